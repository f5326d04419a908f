use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{authorize, Actor, Operation, Target};
use crate::errors::{AppError, FieldErrors};
use crate::models::{Client, Role};
use crate::records::validation::{
    check_email, check_length, deserialize_some, non_blank, normalize_email, COMPANY_MAX,
    NAME_MAX,
};
use crate::store::{ClientFilter, ContractFilter, EventFilter, Store};

#[derive(Debug, Clone, Deserialize)]
pub struct NewClient {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    #[serde(default)]
    pub mobile_number: Option<String>,
    pub company_name: String,
    #[serde(default)]
    pub sales_contact_id: Option<Uuid>,
}

/// Partial update. Nullable fields use a double option: absent leaves the
/// value alone, `null` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub mobile_number: Option<Option<String>>,
    pub company_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub sales_contact_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientQuery {
    pub email: Option<String>,
    pub company_name: Option<String>,
    pub sales_contact_email: Option<String>,
    pub unassigned: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientView {
    #[serde(flatten)]
    pub client: Client,
    pub contracts: Vec<Uuid>,
    pub events: Vec<Uuid>,
}

async fn client_view(store: &dyn Store, client: Client) -> Result<ClientView, AppError> {
    let contracts = store
        .list_contracts(&ContractFilter {
            client_id: Some(client.id),
            ..Default::default()
        })
        .await?;
    let events = store
        .list_events(&EventFilter {
            client_id: Some(client.id),
            ..Default::default()
        })
        .await?;
    Ok(ClientView {
        contracts: contracts.into_iter().map(|c| c.id).collect(),
        events: events.into_iter().map(|e| e.id).collect(),
        client,
    })
}

async fn validate_client(
    store: &dyn Store,
    client: &Client,
    email_changed: bool,
) -> Result<(), AppError> {
    let mut errors = FieldErrors::new();
    check_length(&mut errors, "first_name", &client.first_name, NAME_MAX);
    check_length(&mut errors, "last_name", &client.last_name, NAME_MAX);
    check_email(&mut errors, "email", &client.email);
    if client.phone_number.trim().is_empty() {
        errors.push("phone_number", "This field is required.");
    }
    check_length(&mut errors, "company_name", &client.company_name, COMPANY_MAX);

    if email_changed && !errors.has("email") {
        if let Some(other) = store.find_client_by_email(&client.email).await? {
            if other.id != client.id {
                errors.push("email", "A client with this email address already exists.");
            }
        }
    }

    match client.sales_contact_id {
        Some(owner_id) => match store.get_user(owner_id).await? {
            Some(owner) if owner.role == Role::Sales => {}
            Some(_) => errors.push("sales_contact_id", "The sales contact must be a sales user."),
            None => errors.push("sales_contact_id", format!("Unknown user {owner_id}.")),
        },
        // Contracts require an owned client.
        None => {
            let contracts = store
                .list_contracts(&ContractFilter {
                    client_id: Some(client.id),
                    ..Default::default()
                })
                .await?;
            if !contracts.is_empty() {
                errors.push(
                    "sales_contact_id",
                    "A client with contracts must keep a sales contact.",
                );
            }
        }
    }

    errors.into_result()
}

async fn load_client(store: &dyn Store, id: Uuid) -> Result<Client, AppError> {
    store
        .get_client(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Client {id} not found")))
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
            let client = load_client(store, id).await?;
            authorize(actor, op, Target::Client(Some(&client)))
        }
        None => authorize(actor, op, Target::Client(None)),
    }
}

pub async fn create_client(
    store: &dyn Store,
    actor: &Actor,
    payload: NewClient,
) -> Result<ClientView, AppError> {
    authorize(actor, Operation::Create, Target::Client(None))?;

    let now = Utc::now();
    let client = Client {
        id: Uuid::new_v4(),
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        email: normalize_email(&payload.email),
        phone_number: payload.phone_number.trim().to_string(),
        mobile_number: non_blank(payload.mobile_number),
        company_name: payload.company_name.trim().to_string(),
        sales_contact_id: payload.sales_contact_id,
        created_at: now,
        updated_at: now,
    };
    validate_client(store, &client, true).await?;

    store.insert_client(&client).await?;
    info!(
        "{} created client {} ({})",
        actor.email, client.email, client.company_name
    );
    client_view(store, client).await
}

pub async fn get_client(store: &dyn Store, actor: &Actor, id: Uuid) -> Result<ClientView, AppError> {
    let client = load_client(store, id).await?;
    authorize(actor, Operation::Read, Target::Client(Some(&client)))?;
    client_view(store, client).await
}

pub async fn list_clients(
    store: &dyn Store,
    actor: &Actor,
    query: ClientQuery,
) -> Result<Vec<ClientView>, AppError> {
    authorize(actor, Operation::List, Target::Client(None))?;

    let sales_contact_id = match query.sales_contact_email.as_deref() {
        Some(email) => match store.find_user_by_email(&normalize_email(email)).await? {
            Some(user) => Some(user.id),
            None => return Ok(Vec::new()),
        },
        None => None,
    };
    let filter = ClientFilter {
        email: query.email.as_deref().map(normalize_email),
        company_name: query.company_name,
        sales_contact_id,
        unassigned: query.unassigned,
    };

    let clients = store.list_clients(&filter).await?;
    let mut views = Vec::with_capacity(clients.len());
    for client in clients {
        views.push(client_view(store, client).await?);
    }
    Ok(views)
}

pub async fn update_client(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
    changes: ClientChanges,
) -> Result<ClientView, AppError> {
    let existing = load_client(store, id).await?;
    authorize(actor, Operation::Update, Target::Client(Some(&existing)))?;

    let mut client = existing.clone();
    if let Some(first_name) = changes.first_name {
        client.first_name = first_name.trim().to_string();
    }
    if let Some(last_name) = changes.last_name {
        client.last_name = last_name.trim().to_string();
    }
    if let Some(email) = changes.email {
        client.email = normalize_email(&email);
    }
    if let Some(phone) = changes.phone_number {
        client.phone_number = phone.trim().to_string();
    }
    if let Some(mobile) = changes.mobile_number {
        client.mobile_number = non_blank(mobile);
    }
    if let Some(company) = changes.company_name {
        client.company_name = company.trim().to_string();
    }
    if let Some(owner) = changes.sales_contact_id {
        client.sales_contact_id = owner;
    }
    client.updated_at = Utc::now();

    validate_client(store, &client, client.email != existing.email).await?;

    store.update_client(&client).await?;
    if client.sales_contact_id != existing.sales_contact_id {
        info!(
            "{} reassigned client {} to {:?}",
            actor.email, client.email, client.sales_contact_id
        );
    } else {
        info!("{} updated client {}", actor.email, client.email);
    }
    client_view(store, client).await
}

/// Deletes the client together with its contracts and events.
pub async fn delete_client(store: &dyn Store, actor: &Actor, id: Uuid) -> Result<(), AppError> {
    let client = load_client(store, id).await?;
    authorize(actor, Operation::Delete, Target::Client(Some(&client)))?;
    if !store.delete_client(id).await? {
        return Err(AppError::NotFound(format!("Client {id} not found")));
    }
    info!("{} deleted client {}", actor.email, client.email);
    Ok(())
}
