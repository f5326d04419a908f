use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use crate::access::Actor;
use crate::errors::AppError;
use crate::records::validation::normalize_email;
use crate::state::AppState;

/// Header carrying the email of the user authenticated by the upstream gateway.
pub const ACTOR_HEADER: &str = "x-actor-email";

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let email = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AppError::Unauthorized)?;

        let user = state
            .store
            .find_user_by_email(&normalize_email(email))
            .await?
            .ok_or_else(|| {
                debug!("Rejected unknown actor {email}");
                AppError::Unauthorized
            })?;

        if !user.is_active {
            debug!("Rejected inactive actor {}", user.email);
            return Err(AppError::Unauthorized);
        }

        Ok(Actor::from(&user))
    }
}
