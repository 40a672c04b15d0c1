//! Authenticated principal extraction from the session cookie.

use axum::http::{HeaderMap, StatusCode};
use sqlx::PgPool;
use tracing::error;

use crate::api::handlers::profiles::policy::Role;

use super::session::authenticate_session;

/// Authenticated user context derived from the session cookie.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: uuid::Uuid,
    pub email: String,
    pub role: Role,
}

/// Resolve a session cookie into a principal, or return 401 for missing sessions.
pub async fn require_auth(headers: &HeaderMap, pool: &PgPool) -> Result<Principal, StatusCode> {
    match authenticate_session(headers, pool).await {
        Ok(Some(record)) => {
            let Some(role) = Role::parse(&record.role) else {
                error!(role = %record.role, "session user carries unknown role");
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            };
            Ok(Principal {
                user_id: record.user_id,
                email: record.email,
                role,
            })
        }
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(status) => Err(status),
    }
}

/// Like `require_auth`, but additionally rejects non-managers with 403.
pub async fn require_manager(headers: &HeaderMap, pool: &PgPool) -> Result<Principal, StatusCode> {
    let principal = require_auth(headers, pool).await?;
    if principal.role != Role::Manager {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(principal)
}
