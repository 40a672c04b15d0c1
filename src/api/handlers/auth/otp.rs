//! One-time-code email verification endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, warn};

use crate::api::audit::{ClientInfo, EmailAction};
use crate::api::email::otp_email;

use super::rate_limit::RateLimitDecision;
use super::state::AppState;
use super::storage::{ConsumeOutcome, consume_otp, issue_otp, lookup_user_by_email};
use super::types::{SendOtpRequest, VerifyOtpRequest};
use super::utils::{extract_client_ip, normalize_email, valid_email};

/// Send a six-digit code to an unverified account (opaque response).
#[utoipa::path(
    post,
    path = "/auth/send-otp",
    request_body = SendOtpRequest,
    responses(
        (status = 204, description = "Request accepted")
    ),
    tag = "auth"
)]
pub async fn send_otp(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<SendOtpRequest>>,
) -> impl IntoResponse {
    let request: SendOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Opaque like resend: invalid addresses still get 204.
        return StatusCode::NO_CONTENT.into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), EmailAction::Otp)
        .await
        == RateLimitDecision::Limited
    {
        return StatusCode::NO_CONTENT.into_response();
    }
    if state
        .rate_limiter()
        .check_email(&email, EmailAction::Otp)
        .await
        == RateLimitDecision::Limited
    {
        return StatusCode::NO_CONTENT.into_response();
    }

    let user = match lookup_user_by_email(&pool, &email).await {
        Ok(Some(user)) if !user.email_verified => user,
        Ok(_) => return StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to lookup user for otp: {err}");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let code = match issue_otp(&pool, user.id, state.config().otp_ttl_seconds()).await {
        Ok(code) => code,
        Err(err) => {
            error!("Failed to issue otp: {err}");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let name = user.name.clone().unwrap_or_else(|| user.email.clone());
    let message = otp_email(&user.email, &name, &code);
    let _ = state.notifier().dispatch(
        Some(user.id),
        EmailAction::Otp,
        message,
        ClientInfo::from_headers(&headers),
    );

    StatusCode::NO_CONTENT.into_response()
}

/// Consume the code by exact match and mark the account verified.
#[utoipa::path(
    post,
    path = "/auth/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Invalid or expired code", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    pool: Extension<PgPool>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> impl IntoResponse {
    let request: VerifyOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    let code = request.code.trim();
    if !valid_email(&email) || code.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "Invalid or expired code".to_string(),
        )
            .into_response();
    }

    let user = match lookup_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::BAD_REQUEST,
                "Invalid or expired code".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to lookup user for otp verify: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response();
        }
    };

    match consume_otp(&pool, user.id, code).await {
        Ok(ConsumeOutcome::Consumed(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(ConsumeOutcome::Invalid) => (
            StatusCode::BAD_REQUEST,
            "Invalid or expired code".to_string(),
        )
            .into_response(),
        Ok(ConsumeOutcome::Expired) => {
            warn!("otp expired at consume time");
            (
                StatusCode::BAD_REQUEST,
                "Invalid or expired code".to_string(),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to verify otp: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::{LogEmailSender, Notifier};
    use crate::api::handlers::auth::rate_limit::NoopRateLimiter;
    use crate::api::handlers::auth::state::AppConfig;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;

    fn app_state(pool: PgPool) -> Arc<AppState> {
        let config = AppConfig::new("http://localhost:5173".to_string());
        let notifier = Notifier::new(pool, Arc::new(LogEmailSender));
        Arc::new(AppState::new(config, Arc::new(NoopRateLimiter), notifier))
    }

    #[tokio::test]
    async fn send_otp_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = send_otp(
            HeaderMap::new(),
            Extension(pool.clone()),
            Extension(app_state(pool)),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn send_otp_invalid_email_is_opaque() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = send_otp(
            HeaderMap::new(),
            Extension(pool.clone()),
            Extension(app_state(pool)),
            Some(Json(SendOtpRequest {
                email: "nope".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn verify_otp_blank_code_rejected() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_otp(
            Extension(pool),
            Some(Json(VerifyOtpRequest {
                email: "a@example.edu".to_string(),
                code: "  ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
