use std::collections::BTreeMap;

use axum::{
    extract::{rejection::FormRejection, Path, Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::access::{may_modify_any, visible_sections, Actor, Operation, Section};
use crate::admin::forms::{self, FormData};
use crate::admin::logged_fields;
use crate::errors::{AppError, FieldErrors};
use crate::models::Role;
use crate::records::{clients, contracts, events, handlers as api, users};
use crate::state::AppState;

type FormBody = Result<Form<Vec<(String, String)>>, FormRejection>;

#[derive(Debug, Serialize)]
pub struct AdminIndex {
    pub actor: String,
    pub role: Role,
    pub sections: Vec<Section>,
}

#[derive(Debug, Serialize)]
pub struct AdminListPage {
    pub section: Section,
    pub count: usize,
    pub rows: Vec<Value>,
}

/// Form state echoed back after a failed submission.
#[derive(Debug, Serialize)]
pub struct AdminFormPage {
    pub section: Section,
    pub object_id: Option<Uuid>,
    pub values: BTreeMap<String, String>,
    pub errors: FieldErrors,
}

/// A submitted form, or the reason it could not be read at all.
struct Submission {
    form: FormData,
    malformed: Option<String>,
}

impl Submission {
    fn from_body(body: FormBody) -> Self {
        match body {
            Ok(Form(pairs)) => Submission {
                form: FormData::new(pairs),
                malformed: None,
            },
            Err(rejection) => Submission {
                form: FormData::default(),
                malformed: Some(rejection.body_text()),
            },
        }
    }

    fn empty() -> Self {
        Submission {
            form: FormData::default(),
            malformed: None,
        }
    }

    fn parse<T>(&self, parse: fn(&FormData) -> Result<T, FieldErrors>) -> Result<T, FieldErrors> {
        match &self.malformed {
            Some(reason) => {
                let mut errors = FieldErrors::new();
                errors.push("form", reason.clone());
                Err(errors)
            }
            None => parse(&self.form),
        }
    }
}

/// An unparsable form still goes through the policy first, so the actor sees
/// the same denial the API would give.
fn rejected(policy: Result<(), AppError>, errors: FieldErrors) -> Result<(), AppError> {
    policy?;
    Err(AppError::Validation(errors))
}

/// Maps the API outcome of a create, change or delete onto the admin UI.
fn after_submit(
    section: Section,
    op: Operation,
    object_id: Option<Uuid>,
    actor: &Actor,
    submission: &Submission,
    outcome: Result<(), AppError>,
) -> Response {
    match outcome {
        Ok(()) => Redirect::to(&format!("/admin/{}", section.as_str())).into_response(),
        Err(AppError::Forbidden) => {
            warn!(
                "Unauthorized user {} failed to {} a {}",
                actor.email,
                op.as_str(),
                section.record_name()
            );
            AppError::Forbidden.into_response()
        }
        Err(AppError::Validation(errors)) => {
            warn!(
                "Failed to {} {} with {}. The API sent: {}",
                op.as_str(),
                section.record_name(),
                submission.form.summary(logged_fields(section)),
                errors
            );
            let page = AdminFormPage {
                section,
                object_id,
                values: submission.form.values(),
                errors,
            };
            (StatusCode::OK, Json(page)).into_response()
        }
        Err(other) => {
            warn!(
                "Failed to {} {} for {}: {other}",
                op.as_str(),
                section.record_name(),
                actor.email
            );
            other.into_response()
        }
    }
}

fn list_page<T: Serialize>(
    section: Section,
    result: Result<Json<Vec<T>>, AppError>,
) -> Result<AdminListPage, AppError> {
    let Json(items) = result?;
    let rows = items
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(anyhow::Error::from)?;
    Ok(AdminListPage {
        section,
        count: rows.len(),
        rows,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Pages
// ────────────────────────────────────────────────────────────────────────────

/// GET /admin
pub async fn handle_index(actor: Actor) -> Json<AdminIndex> {
    Json(AdminIndex {
        sections: visible_sections(actor.role),
        role: actor.role,
        actor: actor.email,
    })
}

/// GET /admin/:section
/// Filters in the query string are handed to the API list handler untouched.
pub async fn handle_list(
    State(state): State<AppState>,
    actor: Actor,
    Path(section): Path<Section>,
    uri: Uri,
) -> Response {
    let result = match section {
        Section::Users => list_page(
            section,
            api::handle_list_users(State(state), actor.clone(), Query::try_from_uri(&uri)).await,
        ),
        Section::Clients => list_page(
            section,
            api::handle_list_clients(State(state), actor.clone(), Query::try_from_uri(&uri)).await,
        ),
        Section::Contracts => list_page(
            section,
            api::handle_list_contracts(State(state), actor.clone(), Query::try_from_uri(&uri))
                .await,
        ),
        Section::Events => list_page(
            section,
            api::handle_list_events(State(state), actor.clone(), Query::try_from_uri(&uri)).await,
        ),
    };

    match result {
        Ok(page) => Json(page).into_response(),
        Err(AppError::Forbidden) => {
            warn!(
                "Unauthorized user {} failed to list {}",
                actor.email,
                section.as_str()
            );
            AppError::Forbidden.into_response()
        }
        Err(e) => {
            warn!("Failed to list {} for {}: {e}", section.as_str(), actor.email);
            e.into_response()
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Submissions
// ────────────────────────────────────────────────────────────────────────────

/// POST /admin/:section/add
pub async fn handle_add(
    State(state): State<AppState>,
    actor: Actor,
    Path(section): Path<Section>,
    body: FormBody,
) -> Response {
    let submission = Submission::from_body(body);
    let store = state.store.clone();
    let op = Operation::Create;

    let outcome = match section {
        Section::Users => match submission.parse(forms::new_user) {
            Ok(payload) => api::handle_create_user(State(state), actor.clone(), Ok(Json(payload)))
                .await
                .map(|_| ()),
            Err(errors) => rejected(users::check_access(store.as_ref(), &actor, op, None).await, errors),
        },
        Section::Clients => match submission.parse(forms::new_client) {
            Ok(payload) => {
                api::handle_create_client(State(state), actor.clone(), Ok(Json(payload)))
                    .await
                    .map(|_| ())
            }
            Err(errors) => {
                rejected(clients::check_access(store.as_ref(), &actor, op, None).await, errors)
            }
        },
        Section::Contracts => match submission.parse(forms::new_contract) {
            Ok(payload) => {
                api::handle_create_contract(State(state), actor.clone(), Ok(Json(payload)))
                    .await
                    .map(|_| ())
            }
            Err(errors) => {
                rejected(contracts::check_access(store.as_ref(), &actor, op, None).await, errors)
            }
        },
        Section::Events => match submission.parse(forms::new_event) {
            Ok(payload) => api::handle_create_event(State(state), actor.clone(), Ok(Json(payload)))
                .await
                .map(|_| ()),
            Err(errors) => {
                rejected(events::check_access(store.as_ref(), &actor, op, None).await, errors)
            }
        },
    };

    after_submit(section, op, None, &actor, &submission, outcome)
}

/// POST /admin/:section/:id/change
pub async fn handle_change(
    State(state): State<AppState>,
    actor: Actor,
    Path((section, id)): Path<(Section, Uuid)>,
    body: FormBody,
) -> Response {
    let submission = Submission::from_body(body);
    let store = state.store.clone();
    let op = Operation::Update;
    let target = Some(id);

    let outcome = match section {
        Section::Users => match submission.parse(forms::user_changes) {
            Ok(changes) => {
                api::handle_update_user(State(state), actor.clone(), Path(id), Ok(Json(changes)))
                    .await
                    .map(|_| ())
            }
            Err(errors) => {
                rejected(users::check_access(store.as_ref(), &actor, op, target).await, errors)
            }
        },
        Section::Clients => match submission.parse(forms::client_changes) {
            Ok(changes) => {
                api::handle_update_client(State(state), actor.clone(), Path(id), Ok(Json(changes)))
                    .await
                    .map(|_| ())
            }
            Err(errors) => {
                rejected(clients::check_access(store.as_ref(), &actor, op, target).await, errors)
            }
        },
        Section::Contracts => match submission.parse(forms::contract_changes) {
            Ok(changes) => api::handle_update_contract(
                State(state),
                actor.clone(),
                Path(id),
                Ok(Json(changes)),
            )
            .await
            .map(|_| ()),
            Err(errors) => {
                rejected(contracts::check_access(store.as_ref(), &actor, op, target).await, errors)
            }
        },
        Section::Events => match submission.parse(forms::event_changes) {
            Ok(changes) => {
                api::handle_update_event(State(state), actor.clone(), Path(id), Ok(Json(changes)))
                    .await
                    .map(|_| ())
            }
            Err(errors) => {
                rejected(events::check_access(store.as_ref(), &actor, op, target).await, errors)
            }
        },
    };

    after_submit(section, op, target, &actor, &submission, outcome)
}

async fn delete_one(
    state: AppState,
    actor: &Actor,
    section: Section,
    id: Uuid,
) -> Result<(), AppError> {
    let result = match section {
        Section::Users => api::handle_delete_user(State(state), actor.clone(), Path(id)).await,
        Section::Clients => api::handle_delete_client(State(state), actor.clone(), Path(id)).await,
        Section::Contracts => {
            api::handle_delete_contract(State(state), actor.clone(), Path(id)).await
        }
        Section::Events => api::handle_delete_event(State(state), actor.clone(), Path(id)).await,
    };
    result.map(|_| ())
}

/// POST /admin/:section/:id/delete
pub async fn handle_delete(
    State(state): State<AppState>,
    actor: Actor,
    Path((section, id)): Path<(Section, Uuid)>,
) -> Response {
    let outcome = delete_one(state, &actor, section, id).await;
    after_submit(
        section,
        Operation::Delete,
        Some(id),
        &actor,
        &Submission::empty(),
        outcome,
    )
}

/// POST /admin/:section/delete
/// Deletes the selected `ids` in order and stops at the first failure;
/// records deleted before it stay deleted.
pub async fn handle_bulk_delete(
    State(state): State<AppState>,
    actor: Actor,
    Path(section): Path<Section>,
    body: FormBody,
) -> Response {
    let submission = Submission::from_body(body);
    let ids = match selected_ids(&submission) {
        Ok(ids) => ids,
        Err(errors) => {
            let outcome = if may_modify_any(&actor, section) {
                Err(AppError::Validation(errors))
            } else {
                Err(AppError::Forbidden)
            };
            return after_submit(section, Operation::Delete, None, &actor, &submission, outcome);
        }
    };

    for id in ids {
        if let Err(e) = delete_one(state.clone(), &actor, section, id).await {
            return after_submit(section, Operation::Delete, Some(id), &actor, &submission, Err(e));
        }
    }
    after_submit(section, Operation::Delete, None, &actor, &submission, Ok(()))
}

fn selected_ids(submission: &Submission) -> Result<Vec<Uuid>, FieldErrors> {
    let mut errors = FieldErrors::new();
    if let Some(reason) = &submission.malformed {
        errors.push("form", reason.clone());
        return Err(errors);
    }
    let raw = submission.form.all("ids");
    if raw.is_empty() {
        errors.push("ids", "Select at least one item.");
        return Err(errors);
    }
    let mut ids = Vec::with_capacity(raw.len());
    for value in raw {
        match value.parse::<Uuid>() {
            Ok(id) => ids.push(id),
            Err(_) => errors.push("ids", format!("'{value}' is not a valid UUID.")),
        }
    }
    if errors.is_empty() {
        Ok(ids)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
        Router,
    };
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    use crate::access::extract::ACTOR_HEADER;
    use crate::records::testing::Fixture;
    use crate::routes::build_router;
    use crate::store::{ClientFilter, Store};

    fn app(fixture: &Fixture) -> Router {
        build_router(fixture.state())
    }

    fn form_post(uri: &str, actor: &Actor, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(ACTOR_HEADER, &actor.email)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str, actor: &Actor) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(ACTOR_HEADER, &actor.email)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_index_lists_visible_sections() {
        let fx = Fixture::new().await;
        let response = app(&fx).oneshot(get("/admin", &fx.sales_a)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["sections"], serde_json::json!(["clients", "contracts"]));
        assert_eq!(body["role"], "sales");
    }

    #[tokio::test]
    async fn test_add_client_redirects_to_section() {
        let fx = Fixture::new().await;
        let body = "first_name=client&last_name=test&email=c%40acme.test\
                    &phone_number=%2B33666666666&company_name=Acme&sales_contact_id=";
        let response = app(&fx)
            .oneshot(form_post("/admin/clients/add", &fx.sales_a, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/admin/clients");
        let stored = fx.store.find_client_by_email("c@acme.test").await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_add_with_bad_values_rerenders_form() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let body = format!(
            "client_id={}&sales_contact_id={}&amount=-5&payment_due_0=2030-01-01&payment_due_1=10:00",
            client.id, fx.sales_a.id
        );
        let response = app(&fx)
            .oneshot(form_post("/admin/contracts/add", &fx.sales_a, &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = json_body(response).await;
        assert_eq!(page["section"], "contracts");
        assert_eq!(page["values"]["amount"], "-5");
        assert_eq!(page["errors"][0]["field"], "amount");
    }

    #[tokio::test]
    async fn test_denied_add_matches_api_and_leaves_store() {
        let fx = Fixture::new().await;
        let response = app(&fx)
            .oneshot(form_post(
                "/admin/clients/add",
                &fx.support_a,
                "first_name=x&email=x%40y.z",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let api = app(&fx)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/clients")
                    .header(ACTOR_HEADER, &fx.support_a.email)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(api.status(), StatusCode::FORBIDDEN);

        let clients = fx.store.list_clients(&ClientFilter::default()).await.unwrap();
        assert!(clients.is_empty());
    }

    #[tokio::test]
    async fn test_denied_change_with_unparsable_form_is_still_forbidden() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        let uri = format!("/admin/contracts/{}/change", contract.id);
        let response = app(&fx)
            .oneshot(form_post(&uri, &fx.sales_b, "amount=lots"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let owner = app(&fx)
            .oneshot(form_post(&uri, &fx.sales_a, "amount=lots"))
            .await
            .unwrap();
        assert_eq!(owner.status(), StatusCode::OK);
        let stored = fx.store.get_contract(contract.id).await.unwrap().unwrap();
        assert_eq!(stored.amount, contract.amount);
    }

    #[tokio::test]
    async fn test_change_event_with_split_date() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        let event = fx.event_for(&contract, fx.support_a.id).await;
        let uri = format!("/admin/events/{}/change", event.id);
        let response = app(&fx)
            .oneshot(form_post(
                &uri,
                &fx.support_a,
                "attendees=120&starts_at_0=2031-05-04&starts_at_1=19%3A30",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let stored = fx.store.get_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.attendees, 120);
        assert_eq!(stored.starts_at.to_rfc3339(), "2031-05-04T19:30:00+00:00");
    }

    #[tokio::test]
    async fn test_change_missing_record_is_not_found() {
        let fx = Fixture::new().await;
        let uri = format!("/admin/clients/{}/change", Uuid::new_v4());
        let response = app(&fx)
            .oneshot(form_post(&uri, &fx.manager, "company_name=Acme"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_by_support_is_forbidden() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(None, "c@acme.test").await;
        let uri = format!("/admin/clients/{}/delete", client.id);
        let response = app(&fx)
            .oneshot(form_post(&uri, &fx.support_a, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(fx.store.get_client(client.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bulk_delete_stops_at_first_denial() {
        let fx = Fixture::new().await;
        let mine = fx.client_owned_by(Some(fx.sales_a.id), "a@acme.test").await;
        let theirs = fx.client_owned_by(Some(fx.sales_b.id), "b@acme.test").await;
        let last = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let body = format!("ids={}&ids={},{}", mine.id, theirs.id, last.id);
        let response = app(&fx)
            .oneshot(form_post("/admin/clients/delete", &fx.sales_a, &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(fx.store.get_client(mine.id).await.unwrap().is_none());
        assert!(fx.store.get_client(theirs.id).await.unwrap().is_some());
        assert!(fx.store.get_client(last.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bulk_delete_without_ids_rerenders() {
        let fx = Fixture::new().await;
        let response = app(&fx)
            .oneshot(form_post("/admin/events/delete", &fx.manager, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = json_body(response).await;
        assert_eq!(page["errors"][0]["field"], "ids");
    }

    #[tokio::test]
    async fn test_bulk_delete_with_bad_ids_denies_before_validating() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(None, "keep@acme.test").await;

        let response = app(&fx)
            .oneshot(form_post("/admin/clients/delete", &fx.support_a, "ids=not-a-uuid"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app(&fx)
            .oneshot(form_post("/admin/clients/delete", &fx.sales_a, "ids=not-a-uuid"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = json_body(response).await;
        assert_eq!(page["errors"][0]["field"], "ids");

        assert!(fx.store.get_client(client.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_forwards_filters() {
        let fx = Fixture::new().await;
        let client = fx.client_owned_by(Some(fx.sales_a.id), "c@acme.test").await;
        let contract = fx.contract_for(&client, fx.sales_a.id).await;
        let mut overdue = contract.clone();
        overdue.payment_due = Utc::now() - Duration::days(1);
        fx.store.update_contract(&overdue).await.unwrap();
        let other = fx.client_owned_by(Some(fx.sales_b.id), "d@acme.test").await;
        fx.contract_for(&other, fx.sales_b.id).await;

        let response = app(&fx)
            .oneshot(get("/admin/contracts?overdue=true", &fx.support_a))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = json_body(response).await;
        assert_eq!(page["count"], 1);
        assert_eq!(page["rows"][0]["id"], contract.id.to_string());
    }

    #[tokio::test]
    async fn test_list_users_forbidden_for_sales() {
        let fx = Fixture::new().await;
        let response = app(&fx)
            .oneshot(get("/admin/users", &fx.sales_a))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
