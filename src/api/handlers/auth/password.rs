//! Password recovery endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, warn};

use crate::api::audit::{ClientInfo, EmailAction};
use crate::api::email::password_reset_email;

use super::rate_limit::RateLimitDecision;
use super::state::AppState;
use super::storage::{
    ConsumeOutcome, consume_password_reset_token, issue_password_reset_token,
    lookup_user_by_email, update_password,
};
use super::types::{ForgotPasswordRequest, ForgotPasswordResponse, ResetPasswordRequest};
use super::utils::{
    build_reset_url, extract_client_ip, hash_password, hash_token, normalize_email, valid_email,
    valid_password,
};

const OPAQUE_RESET_MESSAGE: &str = "If the account exists, a reset link has been sent";

/// Request a password reset link.
///
/// The response body is identical for known and unknown addresses. Only the
/// rate limiter answers differently, with 429.
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Request accepted", body = ForgotPasswordResponse),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> impl IntoResponse {
    let request: ForgotPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return opaque_accepted();
    }

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), EmailAction::PasswordReset)
        .await
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }
    if state
        .rate_limiter()
        .check_email(&email, EmailAction::PasswordReset)
        .await
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let user = match lookup_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return opaque_accepted(),
        Err(err) => {
            error!("Failed to lookup user for password reset: {err}");
            return opaque_accepted();
        }
    };

    let token =
        match issue_password_reset_token(&pool, user.id, state.config().reset_ttl_seconds()).await
        {
            Ok(token) => token,
            Err(err) => {
                error!("Failed to issue password reset token: {err}");
                return opaque_accepted();
            }
        };

    let reset_url = build_reset_url(state.config().frontend_base_url(), &token);
    let name = user.name.clone().unwrap_or_else(|| user.email.clone());
    let message = password_reset_email(&user.email, &name, &reset_url);
    let _ = state.notifier().dispatch(
        Some(user.id),
        EmailAction::PasswordReset,
        message,
        ClientInfo::from_headers(&headers),
    );

    opaque_accepted()
}

fn opaque_accepted() -> axum::response::Response {
    (
        StatusCode::OK,
        Json(ForgotPasswordResponse {
            message: OPAQUE_RESET_MESSAGE.to_string(),
        }),
    )
        .into_response()
}

/// Consume a reset token and set the new password.
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password updated"),
        (status = 400, description = "Invalid token or weak password", body = String)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }
    if !valid_password(request.new_password.expose_secret()) {
        return (
            StatusCode::BAD_REQUEST,
            "Password must be at least 6 characters".to_string(),
        )
            .into_response();
    }

    let token_hash = hash_token(token);
    let user_id = match consume_password_reset_token(&pool, &token_hash).await {
        Ok(ConsumeOutcome::Consumed(user_id)) => user_id,
        Ok(ConsumeOutcome::Invalid) => {
            return (
                StatusCode::BAD_REQUEST,
                "Invalid or expired token".to_string(),
            )
                .into_response();
        }
        Ok(ConsumeOutcome::Expired) => {
            warn!("password reset token expired at consume time");
            return (
                StatusCode::BAD_REQUEST,
                "Invalid or expired token".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to consume password reset token: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response();
        }
    };

    let password_hash = match hash_password(request.new_password.expose_secret()) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash new password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response();
        }
    };

    // One write per consumed token; sessions are revoked in the same transaction.
    if let Err(err) = update_password(&pool, user_id, &password_hash).await {
        error!("Failed to update password: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Password reset failed".to_string(),
        )
            .into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}
