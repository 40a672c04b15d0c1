//! Password login issuing a session cookie.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::session::session_cookie;
use super::state::AppState;
use super::storage::{insert_session, lookup_user_by_email};
use super::types::{LoginRequest, LoginResponse};
use super::utils::{normalize_email, valid_email, verify_password};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login succeeded", body = LoginResponse),
        (status = 400, description = "Missing payload", body = String),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 403, description = "Email not verified or account not approved", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Same message as a wrong password; the response never says whether
        // the account exists.
        return (StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS.to_string()).into_response();
    }

    let user = match lookup_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS.to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to lookup user for login: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    if !verify_password(request.password.expose_secret(), &user.password_hash) {
        return (StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS.to_string()).into_response();
    }

    if !user.email_verified {
        return (StatusCode::FORBIDDEN, "Email not verified".to_string()).into_response();
    }
    if !user.is_approved {
        return (
            StatusCode::FORBIDDEN,
            "Account awaiting approval".to_string(),
        )
            .into_response();
    }
    if !user.is_active {
        return (StatusCode::FORBIDDEN, "Account disabled".to_string()).into_response();
    }

    let token = match insert_session(&pool, user.id, state.config().session_ttl_seconds()).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    let mut headers = HeaderMap::new();
    match session_cookie(state.config(), &token) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    }

    let response = LoginResponse {
        user_id: user.id.to_string(),
        email: user.email,
        role: user.role,
        name: user.name,
        profile_id: user.profile_id.map(|id| id.to_string()),
        profile_locked: user.profile_locked,
    };
    (StatusCode::OK, headers, Json(response)).into_response()
}
