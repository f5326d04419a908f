use std::future::Future;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::access::{Actor, Operation};
use crate::errors::AppError;
use crate::records::clients::{self, ClientChanges, ClientQuery, ClientView, NewClient};
use crate::records::contracts::{
    self, ContractChanges, ContractQuery, ContractView, NewContract,
};
use crate::records::events::{self, EventChanges, EventQuery, EventView, NewEvent};
use crate::records::users::{self, NewUser, UserChanges, UserQuery, UserView};
use crate::state::AppState;

type JsonBody<T> = Result<Json<T>, JsonRejection>;
type QueryParams<T> = Result<Query<T>, QueryRejection>;

/// Unwraps a JSON body. A malformed body is only reported once the policy has
/// allowed the operation, so denied actors get 403 whatever they sent.
async fn body_after_policy<T, F>(body: JsonBody<T>, policy: F) -> Result<T, AppError>
where
    F: Future<Output = Result<(), AppError>>,
{
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            policy.await?;
            Err(rejection.into())
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Users
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/users
pub async fn handle_create_user(
    State(state): State<AppState>,
    actor: Actor,
    payload: JsonBody<NewUser>,
) -> Result<(StatusCode, Json<UserView>), AppError> {
    let payload = body_after_policy(
        payload,
        users::check_access(state.store.as_ref(), &actor, Operation::Create, None),
    )
    .await?;
    let view = users::create_user(state.store.as_ref(), &actor, payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/users
pub async fn handle_list_users(
    State(state): State<AppState>,
    actor: Actor,
    query: QueryParams<UserQuery>,
) -> Result<Json<Vec<UserView>>, AppError> {
    let Query(query) = query?;
    Ok(Json(
        users::list_users(state.store.as_ref(), &actor, query).await?,
    ))
}

/// GET /api/v1/users/:id
pub async fn handle_get_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<UserView>, AppError> {
    Ok(Json(users::get_user(state.store.as_ref(), &actor, id).await?))
}

/// PATCH /api/v1/users/:id
pub async fn handle_update_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    changes: JsonBody<UserChanges>,
) -> Result<Json<UserView>, AppError> {
    let changes = body_after_policy(
        changes,
        users::check_access(state.store.as_ref(), &actor, Operation::Update, Some(id)),
    )
    .await?;
    Ok(Json(
        users::update_user(state.store.as_ref(), &actor, id, changes).await?,
    ))
}

/// DELETE /api/v1/users/:id
pub async fn handle_delete_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    users::delete_user(state.store.as_ref(), &actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ────────────────────────────────────────────────────────────────────────────
// Clients
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/clients
pub async fn handle_create_client(
    State(state): State<AppState>,
    actor: Actor,
    payload: JsonBody<NewClient>,
) -> Result<(StatusCode, Json<ClientView>), AppError> {
    let payload = body_after_policy(
        payload,
        clients::check_access(state.store.as_ref(), &actor, Operation::Create, None),
    )
    .await?;
    let view = clients::create_client(state.store.as_ref(), &actor, payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/clients
pub async fn handle_list_clients(
    State(state): State<AppState>,
    actor: Actor,
    query: QueryParams<ClientQuery>,
) -> Result<Json<Vec<ClientView>>, AppError> {
    let Query(query) = query?;
    Ok(Json(
        clients::list_clients(state.store.as_ref(), &actor, query).await?,
    ))
}

/// GET /api/v1/clients/:id
pub async fn handle_get_client(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<ClientView>, AppError> {
    Ok(Json(
        clients::get_client(state.store.as_ref(), &actor, id).await?,
    ))
}

/// PATCH /api/v1/clients/:id
pub async fn handle_update_client(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    changes: JsonBody<ClientChanges>,
) -> Result<Json<ClientView>, AppError> {
    let changes = body_after_policy(
        changes,
        clients::check_access(state.store.as_ref(), &actor, Operation::Update, Some(id)),
    )
    .await?;
    Ok(Json(
        clients::update_client(state.store.as_ref(), &actor, id, changes).await?,
    ))
}

/// DELETE /api/v1/clients/:id
pub async fn handle_delete_client(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    clients::delete_client(state.store.as_ref(), &actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ────────────────────────────────────────────────────────────────────────────
// Contracts
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/contracts
pub async fn handle_create_contract(
    State(state): State<AppState>,
    actor: Actor,
    payload: JsonBody<NewContract>,
) -> Result<(StatusCode, Json<ContractView>), AppError> {
    let payload = body_after_policy(
        payload,
        contracts::check_access(state.store.as_ref(), &actor, Operation::Create, None),
    )
    .await?;
    let view = contracts::create_contract(state.store.as_ref(), &actor, payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/contracts
pub async fn handle_list_contracts(
    State(state): State<AppState>,
    actor: Actor,
    query: QueryParams<ContractQuery>,
) -> Result<Json<Vec<ContractView>>, AppError> {
    let Query(query) = query?;
    Ok(Json(
        contracts::list_contracts(state.store.as_ref(), &actor, query).await?,
    ))
}

/// GET /api/v1/contracts/:id
pub async fn handle_get_contract(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<ContractView>, AppError> {
    Ok(Json(
        contracts::get_contract(state.store.as_ref(), &actor, id).await?,
    ))
}

/// PATCH /api/v1/contracts/:id
pub async fn handle_update_contract(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    changes: JsonBody<ContractChanges>,
) -> Result<Json<ContractView>, AppError> {
    let changes = body_after_policy(
        changes,
        contracts::check_access(state.store.as_ref(), &actor, Operation::Update, Some(id)),
    )
    .await?;
    Ok(Json(
        contracts::update_contract(state.store.as_ref(), &actor, id, changes).await?,
    ))
}

/// DELETE /api/v1/contracts/:id
pub async fn handle_delete_contract(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    contracts::delete_contract(state.store.as_ref(), &actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/events
pub async fn handle_create_event(
    State(state): State<AppState>,
    actor: Actor,
    payload: JsonBody<NewEvent>,
) -> Result<(StatusCode, Json<EventView>), AppError> {
    let payload = body_after_policy(
        payload,
        events::check_access(state.store.as_ref(), &actor, Operation::Create, None),
    )
    .await?;
    let view = events::create_event(state.store.as_ref(), &actor, payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/events
pub async fn handle_list_events(
    State(state): State<AppState>,
    actor: Actor,
    query: QueryParams<EventQuery>,
) -> Result<Json<Vec<EventView>>, AppError> {
    let Query(query) = query?;
    Ok(Json(
        events::list_events(state.store.as_ref(), &actor, query).await?,
    ))
}

/// GET /api/v1/events/:id
pub async fn handle_get_event(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<EventView>, AppError> {
    Ok(Json(
        events::get_event(state.store.as_ref(), &actor, id).await?,
    ))
}

/// PATCH /api/v1/events/:id
pub async fn handle_update_event(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    changes: JsonBody<EventChanges>,
) -> Result<Json<EventView>, AppError> {
    let changes = body_after_policy(
        changes,
        events::check_access(state.store.as_ref(), &actor, Operation::Update, Some(id)),
    )
    .await?;
    Ok(Json(
        events::update_event(state.store.as_ref(), &actor, id, changes).await?,
    ))
}

/// DELETE /api/v1/events/:id
pub async fn handle_delete_event(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    events::delete_event(state.store.as_ref(), &actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
