//! Email verification endpoints.

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
use crate::api::email::verification_email;

use super::rate_limit::RateLimitDecision;
use super::state::AppState;
use super::storage::{ConsumeOutcome, consume_verification_token, issue_verification_token,
    lookup_user_by_email};
use super::types::{ResendVerificationRequest, VerifyEmailRequest};
use super::utils::{build_verify_url, extract_client_ip, hash_token, normalize_email, valid_email};

/// Verify the email link by consuming the hashed token and activating the user.
#[utoipa::path(
    post,
    path = "/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Invalid or expired token", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    pool: Extension<PgPool>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let request: VerifyEmailRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    // Hash the token before lookup; raw tokens are never stored server-side.
    let token_hash = hash_token(token);
    match consume_verification_token(&pool, &token_hash).await {
        Ok(ConsumeOutcome::Consumed(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(ConsumeOutcome::Invalid) => {
            // Expired and invalid share one message shape on the wire.
            (
                StatusCode::BAD_REQUEST,
                "Invalid or expired token".to_string(),
            )
                .into_response()
        }
        Ok(ConsumeOutcome::Expired) => {
            warn!("verification token expired at consume time");
            (
                StatusCode::BAD_REQUEST,
                "Invalid or expired token".to_string(),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to verify email: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response()
        }
    }
}

/// Resend a verification email (always returns 204 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 204, description = "Resend accepted")
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let request: ResendVerificationRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Always return 204 for invalid emails to avoid account probing.
        return StatusCode::NO_CONTENT.into_response();
    }

    let client_ip = extract_client_ip(&headers);
    if state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), EmailAction::Verification)
        .await
        == RateLimitDecision::Limited
    {
        // Resend is intentionally opaque; rate limits still return 204.
        return StatusCode::NO_CONTENT.into_response();
    }
    if state
        .rate_limiter()
        .check_email(&email, EmailAction::Verification)
        .await
        == RateLimitDecision::Limited
    {
        return StatusCode::NO_CONTENT.into_response();
    }

    let user = match lookup_user_by_email(&pool, &email).await {
        Ok(Some(user)) if !user.email_verified => user,
        Ok(_) => return StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to lookup user for resend: {err}");
            // Avoid leaking failures; always return 204 to callers.
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let token = match issue_verification_token(
        &pool,
        user.id,
        state.config().verification_ttl_seconds(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to issue verification token: {err}");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let verify_url = build_verify_url(state.config().frontend_base_url(), &token);
    let name = user.name.clone().unwrap_or_else(|| user.email.clone());
    let message = verification_email(&user.email, &name, &verify_url);
    let _ = state.notifier().dispatch(
        Some(user.id),
        EmailAction::Verification,
        message,
        ClientInfo::from_headers(&headers),
    );

    StatusCode::NO_CONTENT.into_response()
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
    async fn verify_email_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_email(Extension(pool), None).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn verify_email_empty_token() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_email(
            Extension(pool),
            Some(Json(VerifyEmailRequest {
                token: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn resend_verification_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = resend_verification(
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
    async fn resend_verification_invalid_email_is_opaque() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = resend_verification(
            HeaderMap::new(),
            Extension(pool.clone()),
            Extension(app_state(pool)),
            Some(Json(ResendVerificationRequest {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }
}
