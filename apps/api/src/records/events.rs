use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{authorize, Actor, Operation, Target};
use crate::errors::{AppError, FieldErrors};
use crate::models::{Event, Role};
use crate::records::validation::{check_attendees, normalize_email};
use crate::store::{EventFilter, Store};

#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub client_id: Uuid,
    pub contract_id: Uuid,
    pub support_id: Uuid,
    pub attendees: u32,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventChanges {
    pub client_id: Option<Uuid>,
    pub contract_id: Option<Uuid>,
    pub support_id: Option<Uuid>,
    pub attendees: Option<u32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
    pub client: Option<Uuid>,
    pub contract: Option<Uuid>,
    pub support_email: Option<String>,
    pub date_after: Option<DateTime<Utc>>,
    pub date_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    #[serde(flatten)]
    pub event: Event,
    /// Mirrors the contract's `signed` flag.
    pub signed: bool,
}

async fn event_view(store: &dyn Store, event: Event) -> Result<EventView, AppError> {
    let contract = store.get_contract(event.contract_id).await?.ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "event {} points at missing contract {}",
            event.id,
            event.contract_id
        ))
    })?;
    Ok(EventView {
        signed: contract.signed,
        event,
    })
}

/// Event.client must equal Event.contract.client, the assignee must be a
/// support user, and a contract carries at most one event.
async fn validate_event(store: &dyn Store, event: &Event) -> Result<(), AppError> {
    let mut errors = FieldErrors::new();
    check_attendees(&mut errors, "attendees", event.attendees);

    if store.get_client(event.client_id).await?.is_none() {
        errors.push("client_id", format!("Unknown client {}.", event.client_id));
    }

    match store.get_contract(event.contract_id).await? {
        Some(contract) => {
            if contract.client_id != event.client_id && !errors.has("client_id") {
                errors.push(
                    "client_id",
                    "The client must be the same for the event and the contract!",
                );
            }
        }
        None => errors.push("contract_id", format!("Unknown contract {}.", event.contract_id)),
    }

    if !errors.has("contract_id") {
        if let Some(other) = store.find_event_by_contract(event.contract_id).await? {
            if other.id != event.id {
                errors.push("contract_id", "This contract already has an event.");
            }
        }
    }

    match store.get_user(event.support_id).await? {
        Some(user) if user.role == Role::Support => {}
        Some(_) => errors.push("support_id", "The assignee must be a support user."),
        None => errors.push("support_id", format!("Unknown user {}.", event.support_id)),
    }

    errors.into_result()
}

async fn load_event(store: &dyn Store, id: Uuid) -> Result<Event, AppError> {
    store
        .get_event(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {id} not found")))
}

/// Runs the policy for `op` without performing it. Callers that cannot build
/// a payload use this so a denied actor sees the denial, not the bad input.
pub async fn check_access(
    store: &dyn Store,
    actor: &Actor,
    op: Operation,
    id: Option<Uuid>,
) -> Result<(), AppError> {
    match id {
        Some(id) => {
            let event = load_event(store, id).await?;
            authorize(actor, op, Target::Event(Some(&event)))
        }
        None => authorize(actor, op, Target::Event(None)),
    }
}

pub async fn create_event(
    store: &dyn Store,
    actor: &Actor,
    payload: NewEvent,
) -> Result<EventView, AppError> {
    authorize(actor, Operation::Create, Target::Event(None))?;

    let now = Utc::now();
    let event = Event {
        id: Uuid::new_v4(),
        client_id: payload.client_id,
        contract_id: payload.contract_id,
        support_id: payload.support_id,
        attendees: payload.attendees,
        starts_at: payload.starts_at,
        notes: payload.notes,
        created_at: now,
        updated_at: now,
    };
    validate_event(store, &event).await?;

    store.insert_event(&event).await?;
    info!(
        "{} created event {} for contract {}",
        actor.email, event.id, event.contract_id
    );
    event_view(store, event).await
}

pub async fn get_event(store: &dyn Store, actor: &Actor, id: Uuid) -> Result<EventView, AppError> {
    let event = load_event(store, id).await?;
    authorize(actor, Operation::Read, Target::Event(Some(&event)))?;
    event_view(store, event).await
}

pub async fn list_events(
    store: &dyn Store,
    actor: &Actor,
    query: EventQuery,
) -> Result<Vec<EventView>, AppError> {
    authorize(actor, Operation::List, Target::Event(None))?;

    let support_id = match query.support_email.as_deref() {
        Some(email) => match store.find_user_by_email(&normalize_email(email)).await? {
            Some(user) => Some(user.id),
            None => return Ok(Vec::new()),
        },
        None => None,
    };
    let filter = EventFilter {
        client_id: query.client,
        contract_id: query.contract,
        support_id,
        starts_after: query.date_after,
        starts_before: query.date_before,
    };

    let events = store.list_events(&filter).await?;
    let mut views = Vec::with_capacity(events.len());
    for event in events {
        views.push(event_view(store, event).await?);
    }
    Ok(views)
}

pub async fn update_event(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
    changes: EventChanges,
) -> Result<EventView, AppError> {
    let existing = load_event(store, id).await?;
    authorize(actor, Operation::Update, Target::Event(Some(&existing)))?;

    let mut event = existing.clone();
    if let Some(client_id) = changes.client_id {
        event.client_id = client_id;
    }
    if let Some(contract_id) = changes.contract_id {
        event.contract_id = contract_id;
    }
    if let Some(support_id) = changes.support_id {
        event.support_id = support_id;
    }
    if let Some(attendees) = changes.attendees {
        event.attendees = attendees;
    }
    if let Some(starts_at) = changes.starts_at {
        event.starts_at = starts_at;
    }
    if let Some(notes) = changes.notes {
        event.notes = notes;
    }
    event.updated_at = Utc::now();

    validate_event(store, &event).await?;

    store.update_event(&event).await?;
    info!("{} updated event {}", actor.email, event.id);
    event_view(store, event).await
}

pub async fn delete_event(store: &dyn Store, actor: &Actor, id: Uuid) -> Result<(), AppError> {
    let event = load_event(store, id).await?;
    authorize(actor, Operation::Delete, Target::Event(Some(&event)))?;
    if !store.delete_event(id).await? {
        return Err(AppError::NotFound(format!("Event {id} not found")));
    }
    info!("{} deleted event {}", actor.email, event.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::records::contracts::{update_contract, ContractChanges};
    use crate::records::testing::Fixture;

    fn payload(client_id: Uuid, contract_id: Uuid, support_id: Uuid) -> NewEvent {
        NewEvent {
            client_id,
            contract_id,
            support_id,
            attendees: 75,
            starts_at: Utc::now() + Duration::days(90),
            notes: "Wedding reception".to_string(),
        }
    }

    #[tokio::test]
    async fn test_event_client_must_match_contract_client() {
        let fx = Fixture::new().await;
        let first = fx.client_owned_by(Some(fx.sales_a.id), "first@acme.test").await;
        let second = fx.client_owned_by(Some(fx.sales_a.id), "second@acme.test").await;
        let contract = fx.contract_for(&first, fx.sales_a.id).await;

        for actor in [&fx.manager, &fx.sales_a] {
            let err = create_event(
                fx.store(),
                actor,
                payload(second.id, contract.id, fx.support_a.id),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AppError::Validation(ref e) if e.has("client_id")));
        }
        assert!(fx
            .store()
            .find_event_by_contract(contract.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_attendees_bounded_like_the_events_table() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "crowd@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;

        let err = create_event(
            fx.store(),
            &fx.manager,
            NewEvent {
                attendees: u32::MAX,
                ..payload(client.id, contract.id, fx.support_a.id)
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.has("attendees")));
        assert!(fx
            .store()
            .find_event_by_contract(contract.id)
            .await
            .unwrap()
            .is_none());

        let event = fx.event_for(&contract, fx.support_a.id).await;
        let err = update_event(
            fx.store(),
            &fx.support_a,
            event.id,
            EventChanges {
                attendees: Some(u32::MAX),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.has("attendees")));
        let stored = fx.store().get_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.attendees, event.attendees);
    }

    #[tokio::test]
    async fn test_one_event_per_contract() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        fx.event_for(&contract, fx.support_a.id).await;

        let err = create_event(
            fx.store(),
            &fx.sales_a,
            payload(client.id, contract.id, fx.support_b.id),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.has("contract_id")));
    }

    #[tokio::test]
    async fn test_assignee_must_be_support() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        let err = create_event(
            fx.store(),
            &fx.manager,
            payload(client.id, contract.id, fx.sales_b.id),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.has("support_id")));
    }

    #[tokio::test]
    async fn test_support_cannot_create_events() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        let err = create_event(
            fx.store(),
            &fx.support_a,
            payload(client.id, contract.id, fx.support_a.id),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn test_only_assigned_support_updates_event() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        let event = fx.event_for(&contract, fx.support_a.id).await;

        for actor in [&fx.support_b, &fx.sales_a] {
            let err = update_event(
                fx.store(),
                actor,
                event.id,
                EventChanges {
                    attendees: Some(500),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AppError::Forbidden));
        }
        let stored = fx.store().get_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.attendees, event.attendees);

        let view = update_event(
            fx.store(),
            &fx.support_a,
            event.id,
            EventChanges {
                attendees: Some(500),
                notes: Some("Moved to the big hall".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(view.event.attendees, 500);
        assert_eq!(view.event.notes, "Moved to the big hall");
    }

    #[tokio::test]
    async fn test_status_mirrors_contract() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        let event = fx.event_for(&contract, fx.support_a.id).await;

        let before = get_event(fx.store(), &fx.support_b, event.id).await.unwrap();
        assert!(!before.signed);

        update_contract(
            fx.store(),
            &fx.sales_a,
            contract.id,
            ContractChanges {
                signed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let after = get_event(fx.store(), &fx.support_b, event.id).await.unwrap();
        assert!(after.signed);
    }

    #[tokio::test]
    async fn test_list_events_by_support_email_and_date() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let first = fx.contract_for(&client, fx.sales_a.id).await;
        let second = fx.contract_for(&client, fx.sales_a.id).await;
        fx.event_for(&first, fx.support_a.id).await;
        fx.event_for(&second, fx.support_b.id).await;

        let mine = list_events(
            fx.store(),
            &fx.sales_b,
            EventQuery {
                support_email: Some(fx.support_a.email.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].event.support_id, fx.support_a.id);

        let past = list_events(
            fx.store(),
            &fx.manager,
            EventQuery {
                date_before: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(past.is_empty());
    }

    #[tokio::test]
    async fn test_assigned_support_deletes_event() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        let event = fx.event_for(&contract, fx.support_a.id).await;

        let err = delete_event(fx.store(), &fx.support_b, event.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        delete_event(fx.store(), &fx.support_a, event.id).await.unwrap();
        assert!(fx.store().get_contract(contract.id).await.unwrap().is_some());
    }
}
