use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{authorize, Actor, Operation, Target};
use crate::errors::{AppError, FieldErrors};
use crate::models::{Contract, Role};
use crate::records::validation::{check_amount, normalize_email};
use crate::store::{ContractFilter, Store};

#[derive(Debug, Clone, Deserialize)]
pub struct NewContract {
    pub client_id: Uuid,
    pub sales_contact_id: Uuid,
    #[serde(default)]
    pub signed: bool,
    pub amount: f64,
    pub payment_due: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractChanges {
    pub client_id: Option<Uuid>,
    pub sales_contact_id: Option<Uuid>,
    pub signed: Option<bool>,
    pub amount: Option<f64>,
    pub payment_due: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractQuery {
    pub client: Option<Uuid>,
    pub sales_contact_email: Option<String>,
    pub signed: Option<bool>,
    /// Only contracts whose payment is due before now.
    pub overdue: Option<bool>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractView {
    #[serde(flatten)]
    pub contract: Contract,
    /// The contract's event, if one was organised.
    pub event: Option<Uuid>,
}

async fn contract_view(store: &dyn Store, contract: Contract) -> Result<ContractView, AppError> {
    let event = store.find_event_by_contract(contract.id).await?;
    Ok(ContractView {
        event: event.map(|e| e.id),
        contract,
    })
}

/// Field rules plus the cross-record invariants:
/// the client must exist and already have a sales contact, the owner must be
/// a sales user, and an existing event must keep pointing at the same client.
async fn validate_contract(store: &dyn Store, contract: &Contract) -> Result<(), AppError> {
    let mut errors = FieldErrors::new();
    check_amount(&mut errors, "amount", contract.amount);

    match store.get_client(contract.client_id).await? {
        Some(client) if client.sales_contact_id.is_some() => {}
        Some(_) => errors.push(
            "client_id",
            "The client must have a sales contact before a contract can be signed with them.",
        ),
        None => errors.push("client_id", format!("Unknown client {}.", contract.client_id)),
    }

    match store.get_user(contract.sales_contact_id).await? {
        Some(owner) if owner.role == Role::Sales => {}
        Some(_) => errors.push("sales_contact_id", "The sales contact must be a sales user."),
        None => errors.push(
            "sales_contact_id",
            format!("Unknown user {}.", contract.sales_contact_id),
        ),
    }

    if let Some(event) = store.find_event_by_contract(contract.id).await? {
        if event.client_id != contract.client_id {
            errors.push(
                "client_id",
                "This contract has an event for another client; the client cannot change.",
            );
        }
    }

    errors.into_result()
}

async fn load_contract(store: &dyn Store, id: Uuid) -> Result<Contract, AppError> {
    store
        .get_contract(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Contract {id} not found")))
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
            let contract = load_contract(store, id).await?;
            authorize(actor, op, Target::Contract(Some(&contract)))
        }
        None => authorize(actor, op, Target::Contract(None)),
    }
}

pub async fn create_contract(
    store: &dyn Store,
    actor: &Actor,
    payload: NewContract,
) -> Result<ContractView, AppError> {
    authorize(actor, Operation::Create, Target::Contract(None))?;

    let now = Utc::now();
    let contract = Contract {
        id: Uuid::new_v4(),
        client_id: payload.client_id,
        sales_contact_id: payload.sales_contact_id,
        signed: payload.signed,
        amount: payload.amount,
        payment_due: payload.payment_due,
        created_at: now,
        updated_at: now,
    };
    validate_contract(store, &contract).await?;

    store.insert_contract(&contract).await?;
    info!(
        "{} created contract {} for client {}",
        actor.email, contract.id, contract.client_id
    );
    contract_view(store, contract).await
}

pub async fn get_contract(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
) -> Result<ContractView, AppError> {
    let contract = load_contract(store, id).await?;
    authorize(actor, Operation::Read, Target::Contract(Some(&contract)))?;
    contract_view(store, contract).await
}

pub async fn list_contracts(
    store: &dyn Store,
    actor: &Actor,
    query: ContractQuery,
) -> Result<Vec<ContractView>, AppError> {
    authorize(actor, Operation::List, Target::Contract(None))?;

    let sales_contact_id = match query.sales_contact_email.as_deref() {
        Some(email) => match store.find_user_by_email(&normalize_email(email)).await? {
            Some(user) => Some(user.id),
            None => return Ok(Vec::new()),
        },
        None => None,
    };
    let filter = ContractFilter {
        client_id: query.client,
        sales_contact_id,
        signed: query.signed,
        due_before: query.overdue.filter(|o| *o).map(|_| Utc::now()),
        min_amount: query.min_amount,
        max_amount: query.max_amount,
    };

    let contracts = store.list_contracts(&filter).await?;
    let mut views = Vec::with_capacity(contracts.len());
    for contract in contracts {
        views.push(contract_view(store, contract).await?);
    }
    Ok(views)
}

pub async fn update_contract(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
    changes: ContractChanges,
) -> Result<ContractView, AppError> {
    let existing = load_contract(store, id).await?;
    authorize(actor, Operation::Update, Target::Contract(Some(&existing)))?;

    let mut contract = existing.clone();
    if let Some(client_id) = changes.client_id {
        contract.client_id = client_id;
    }
    if let Some(owner) = changes.sales_contact_id {
        contract.sales_contact_id = owner;
    }
    if let Some(signed) = changes.signed {
        contract.signed = signed;
    }
    if let Some(amount) = changes.amount {
        contract.amount = amount;
    }
    if let Some(due) = changes.payment_due {
        contract.payment_due = due;
    }
    contract.updated_at = Utc::now();

    validate_contract(store, &contract).await?;

    store.update_contract(&contract).await?;
    if contract.signed && !existing.signed {
        info!("{} marked contract {} as signed", actor.email, contract.id);
    } else {
        info!("{} updated contract {}", actor.email, contract.id);
    }
    contract_view(store, contract).await
}

/// Deletes the contract together with its event.
pub async fn delete_contract(store: &dyn Store, actor: &Actor, id: Uuid) -> Result<(), AppError> {
    let contract = load_contract(store, id).await?;
    authorize(actor, Operation::Delete, Target::Contract(Some(&contract)))?;
    if !store.delete_contract(id).await? {
        return Err(AppError::NotFound(format!("Contract {id} not found")));
    }
    info!("{} deleted contract {}", actor.email, contract.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::records::testing::Fixture;

    fn payload(client_id: Uuid, owner: Uuid) -> NewContract {
        NewContract {
            client_id,
            sales_contact_id: owner,
            signed: false,
            amount: 320.54,
            payment_due: Utc::now() + Duration::days(30),
        }
    }

    #[tokio::test]
    async fn test_contract_requires_client_with_sales_contact() {
        let fx = Fixture::new().await;
        let unowned = fx.client_owned_by(None, "free@acme.test").await;
        let err = create_contract(fx.store(), &fx.sales_a, payload(unowned.id, fx.sales_a.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.has("client_id")));
        assert!(fx
            .store()
            .list_contracts(&ContractFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_contract_owner_must_be_sales() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let err = create_contract(fx.store(), &fx.manager, payload(client.id, fx.support_a.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.has("sales_contact_id")));
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let err = create_contract(
            fx.store(),
            &fx.sales_a,
            NewContract {
                amount: -5.0,
                ..payload(client.id, fx.sales_a.id)
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.has("amount")));
    }

    #[tokio::test]
    async fn test_support_cannot_create_contract() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let err = create_contract(fx.store(), &fx.support_a, payload(client.id, fx.sales_a.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn test_sales_cannot_modify_unowned_contract() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;

        let err = update_contract(
            fx.store(),
            &fx.sales_b,
            contract.id,
            ContractChanges {
                signed: Some(true),
                amount: Some(1.0),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let err = delete_contract(fx.store(), &fx.sales_b, contract.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let stored = fx.store().get_contract(contract.id).await.unwrap().unwrap();
        assert_eq!(stored, contract);
    }

    #[tokio::test]
    async fn test_owner_signs_contract() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        let view = update_contract(
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
        assert!(view.contract.signed);
        assert_eq!(view.contract.amount, contract.amount);
    }

    #[tokio::test]
    async fn test_client_change_blocked_when_event_exists() {
        let fx = Fixture::new().await;
        let first = fx.client_owned_by(Some(fx.sales_a.id), "first@acme.test").await;
        let second = fx.client_owned_by(Some(fx.sales_a.id), "second@acme.test").await;
        let contract = fx.contract_for(&first, fx.sales_a.id).await;
        fx.event_for(&contract, fx.support_a.id).await;

        let err = update_contract(
            fx.store(),
            &fx.manager,
            contract.id,
            ContractChanges {
                client_id: Some(second.id),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.has("client_id")));
    }

    #[tokio::test]
    async fn test_delete_contract_removes_event() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        let event = fx.event_for(&contract, fx.support_a.id).await;

        delete_contract(fx.store(), &fx.sales_a, contract.id).await.unwrap();
        assert!(fx.store().get_event(event.id).await.unwrap().is_none());
        assert!(fx.store().get_client(client.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_filters_overdue_and_amount() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let late = create_contract(
            fx.store(),
            &fx.sales_a,
            NewContract {
                payment_due: Utc::now() - Duration::days(3),
                amount: 50.0,
                ..payload(client.id, fx.sales_a.id)
            },
        )
        .await
        .unwrap();
        create_contract(
            fx.store(),
            &fx.sales_a,
            NewContract {
                amount: 5000.0,
                ..payload(client.id, fx.sales_a.id)
            },
        )
        .await
        .unwrap();

        let overdue = list_contracts(
            fx.store(),
            &fx.support_a,
            ContractQuery {
                overdue: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].contract.id, late.contract.id);

        let big = list_contracts(
            fx.store(),
            &fx.manager,
            ContractQuery {
                min_amount: Some(1000.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(big.len(), 1);

        let by_owner = list_contracts(
            fx.store(),
            &fx.manager,
            ContractQuery {
                sales_contact_email: Some(fx.sales_a.email.clone()),
                client: Some(client.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(by_owner.len(), 2);
    }
}
