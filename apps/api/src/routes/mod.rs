pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::admin::handlers as admin;
use crate::records::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Record API
        .route(
            "/api/v1/users",
            get(handlers::handle_list_users).post(handlers::handle_create_user),
        )
        .route(
            "/api/v1/users/:id",
            get(handlers::handle_get_user)
                .patch(handlers::handle_update_user)
                .delete(handlers::handle_delete_user),
        )
        .route(
            "/api/v1/clients",
            get(handlers::handle_list_clients).post(handlers::handle_create_client),
        )
        .route(
            "/api/v1/clients/:id",
            get(handlers::handle_get_client)
                .patch(handlers::handle_update_client)
                .delete(handlers::handle_delete_client),
        )
        .route(
            "/api/v1/contracts",
            get(handlers::handle_list_contracts).post(handlers::handle_create_contract),
        )
        .route(
            "/api/v1/contracts/:id",
            get(handlers::handle_get_contract)
                .patch(handlers::handle_update_contract)
                .delete(handlers::handle_delete_contract),
        )
        .route(
            "/api/v1/events",
            get(handlers::handle_list_events).post(handlers::handle_create_event),
        )
        .route(
            "/api/v1/events/:id",
            get(handlers::handle_get_event)
                .patch(handlers::handle_update_event)
                .delete(handlers::handle_delete_event),
        )
        // Admin proxy
        .route("/admin", get(admin::handle_index))
        .route("/admin/:section", get(admin::handle_list))
        .route("/admin/:section/add", post(admin::handle_add))
        .route("/admin/:section/delete", post(admin::handle_bulk_delete))
        .route("/admin/:section/:id/change", post(admin::handle_change))
        .route("/admin/:section/:id/delete", post(admin::handle_delete))
        .with_state(state)
}
