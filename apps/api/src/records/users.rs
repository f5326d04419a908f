use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{authorize, Actor, Operation, Target};
use crate::errors::{AppError, FieldErrors};
use crate::models::{Role, User};
use crate::records::validation::{capitalize, check_email, check_length, normalize_email, NAME_MAX};
use crate::store::{ClientFilter, ContractFilter, EventFilter, Store, UserFilter};

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserChanges {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserQuery {
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// A user as the API returns it, with the ids of everything they own.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub is_admin: bool,
    pub clients: Vec<Uuid>,
    pub contracts: Vec<Uuid>,
    pub events: Vec<Uuid>,
}

async fn user_view(store: &dyn Store, user: User) -> Result<UserView, AppError> {
    let clients = store
        .list_clients(&ClientFilter {
            sales_contact_id: Some(user.id),
            ..Default::default()
        })
        .await?;
    let contracts = store
        .list_contracts(&ContractFilter {
            sales_contact_id: Some(user.id),
            ..Default::default()
        })
        .await?;
    let events = store
        .list_events(&EventFilter {
            support_id: Some(user.id),
            ..Default::default()
        })
        .await?;
    Ok(UserView {
        is_admin: user.is_admin(),
        clients: clients.into_iter().map(|c| c.id).collect(),
        contracts: contracts.into_iter().map(|c| c.id).collect(),
        events: events.into_iter().map(|e| e.id).collect(),
        user,
    })
}

fn validate_user(user: &User) -> FieldErrors {
    let mut errors = FieldErrors::new();
    check_email(&mut errors, "email", &user.email);
    check_length(&mut errors, "first_name", &user.first_name, NAME_MAX);
    check_length(&mut errors, "last_name", &user.last_name, NAME_MAX);
    errors
}

async fn check_email_free(
    store: &dyn Store,
    errors: &mut FieldErrors,
    email: &str,
    own_id: Option<Uuid>,
) -> Result<(), AppError> {
    if errors.has("email") {
        return Ok(());
    }
    if let Some(existing) = store.find_user_by_email(email).await? {
        if Some(existing.id) != own_id {
            errors.push("email", "A user with this email address already exists.");
        }
    }
    Ok(())
}

/// A role change must not leave records owned by a user of the wrong role.
async fn check_role_change(
    store: &dyn Store,
    errors: &mut FieldErrors,
    existing: &User,
    new_role: Role,
) -> Result<(), AppError> {
    if existing.role == new_role {
        return Ok(());
    }
    match existing.role {
        Role::Sales => {
            let owns_clients = !store
                .list_clients(&ClientFilter {
                    sales_contact_id: Some(existing.id),
                    ..Default::default()
                })
                .await?
                .is_empty();
            let owns_contracts = !store
                .list_contracts(&ContractFilter {
                    sales_contact_id: Some(existing.id),
                    ..Default::default()
                })
                .await?
                .is_empty();
            if owns_clients || owns_contracts {
                errors.push(
                    "role",
                    "Reassign this user's clients and contracts before changing their role.",
                );
            }
        }
        Role::Support => {
            let assigned = !store
                .list_events(&EventFilter {
                    support_id: Some(existing.id),
                    ..Default::default()
                })
                .await?
                .is_empty();
            if assigned {
                errors.push(
                    "role",
                    "Reassign this user's events before changing their role.",
                );
            }
        }
        Role::Manager => {}
    }
    Ok(())
}

async fn insert_new_user(store: &dyn Store, payload: NewUser) -> Result<User, AppError> {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email: normalize_email(&payload.email),
        first_name: capitalize(&payload.first_name),
        last_name: payload.last_name.trim().to_uppercase(),
        role: payload.role,
        is_active: payload.is_active,
        created_at: now,
        updated_at: now,
    };

    let mut errors = validate_user(&user);
    check_email_free(store, &mut errors, &user.email, None).await?;
    errors.into_result()?;

    store.insert_user(&user).await?;
    Ok(user)
}

async fn load_user(store: &dyn Store, id: Uuid) -> Result<User, AppError> {
    store
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {id} not found")))
}

/// Runs the policy for `op` without performing it. Callers that cannot build
/// a payload use this so a denied actor sees the denial, not the bad input.
pub async fn check_access(
    store: &dyn Store,
    actor: &Actor,
    op: Operation,
    id: Option<Uuid>,
) -> Result<(), AppError> {
    if let Some(id) = id {
        load_user(store, id).await?;
    }
    authorize(actor, op, Target::User)
}

pub async fn create_user(
    store: &dyn Store,
    actor: &Actor,
    payload: NewUser,
) -> Result<UserView, AppError> {
    authorize(actor, Operation::Create, Target::User)?;
    let user = insert_new_user(store, payload).await?;
    info!("{} created user {user} ({})", actor.email, user.role);
    user_view(store, user).await
}

pub async fn get_user(store: &dyn Store, actor: &Actor, id: Uuid) -> Result<UserView, AppError> {
    let user = load_user(store, id).await?;
    authorize(actor, Operation::Read, Target::User)?;
    user_view(store, user).await
}

pub async fn list_users(
    store: &dyn Store,
    actor: &Actor,
    query: UserQuery,
) -> Result<Vec<UserView>, AppError> {
    authorize(actor, Operation::List, Target::User)?;
    let filter = UserFilter {
        email: query.email.as_deref().map(normalize_email),
        role: query.role,
        is_active: query.is_active,
    };
    let users = store.list_users(&filter).await?;
    let mut views = Vec::with_capacity(users.len());
    for user in users {
        views.push(user_view(store, user).await?);
    }
    Ok(views)
}

pub async fn update_user(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
    changes: UserChanges,
) -> Result<UserView, AppError> {
    let existing = load_user(store, id).await?;
    authorize(actor, Operation::Update, Target::User)?;

    let mut user = existing.clone();
    if let Some(email) = changes.email {
        user.email = normalize_email(&email);
    }
    if let Some(first_name) = changes.first_name {
        user.first_name = capitalize(&first_name);
    }
    if let Some(last_name) = changes.last_name {
        user.last_name = last_name.trim().to_uppercase();
    }
    if let Some(role) = changes.role {
        user.role = role;
    }
    if let Some(active) = changes.is_active {
        user.is_active = active;
    }
    user.updated_at = Utc::now();

    let mut errors = validate_user(&user);
    if user.email != existing.email {
        check_email_free(store, &mut errors, &user.email, Some(user.id)).await?;
    }
    check_role_change(store, &mut errors, &existing, user.role).await?;
    errors.into_result()?;

    store.update_user(&user).await?;
    info!("{} updated user {}", actor.email, user.email);
    user_view(store, user).await
}

/// Deleting a sales user releases their clients, so none of those clients may
/// still carry a contract owned by someone else.
async fn check_deletable(store: &dyn Store, user: &User) -> Result<(), AppError> {
    if user.role != Role::Sales {
        return Ok(());
    }
    let clients = store
        .list_clients(&ClientFilter {
            sales_contact_id: Some(user.id),
            ..Default::default()
        })
        .await?;
    for client in clients {
        let contracts = store
            .list_contracts(&ContractFilter {
                client_id: Some(client.id),
                ..Default::default()
            })
            .await?;
        if contracts.iter().any(|c| c.sales_contact_id != user.id) {
            return Err(AppError::invalid(
                "clients",
                format!(
                    "Reassign client {} before deleting this user; it has contracts held by other sales users.",
                    client.email
                ),
            ));
        }
    }
    Ok(())
}

pub async fn delete_user(store: &dyn Store, actor: &Actor, id: Uuid) -> Result<(), AppError> {
    let user = load_user(store, id).await?;
    authorize(actor, Operation::Delete, Target::User)?;
    check_deletable(store, &user).await?;
    if !store.delete_user(id).await? {
        return Err(AppError::NotFound(format!("User {id} not found")));
    }
    info!("{} deleted user {}", actor.email, user.email);
    Ok(())
}

/// Creates the first manager account at startup if it does not exist yet.
/// Returns the created user, or `None` when the email is already taken.
pub async fn bootstrap_manager(store: &dyn Store, email: &str) -> Result<Option<User>, AppError> {
    if store.find_user_by_email(&normalize_email(email)).await?.is_some() {
        return Ok(None);
    }
    let user = insert_new_user(
        store,
        NewUser {
            email: email.to_string(),
            first_name: "Admin".to_string(),
            last_name: "Manager".to_string(),
            role: Role::Manager,
            is_active: true,
        },
    )
    .await?;
    info!("Bootstrapped manager account {}", user.email);
    Ok(Some(user))
}
