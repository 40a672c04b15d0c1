//! Manager-only administration endpoints: account registration and approval,
//! plus the profile lock controls.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{Instrument, error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::audit::{ClientInfo, EmailAction};
use crate::api::email::registration_email;

use super::auth::principal::require_manager;
use super::auth::state::AppState;
use super::auth::storage::issue_verification_token;
use super::auth::utils::{
    build_verify_url, generate_initial_password, hash_password, is_unique_violation,
    normalize_email, valid_email,
};
use super::profiles::storage::{approve_edit, set_lock, set_lock_all};
use super::profiles::types::{LockAllResponse, LockRequest, ProfileResponse};

#[derive(ToSchema, Deserialize, Debug)]
pub struct RegisterUserRequest {
    pub email: String,
    pub name: String,
    pub department: Option<String>,
    pub phone: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RegisterUserResponse {
    pub user_id: String,
    pub email: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct PendingUserResponse {
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
    pub verified_at: String,
}

/// Lock or unlock one profile.
#[utoipa::path(
    post,
    path = "/admin/profiles/{id}/lock",
    params(("id" = Uuid, Path, description = "Profile id")),
    request_body = LockRequest,
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Managers only"),
        (status = 404, description = "No such profile", body = String)
    ),
    tag = "admin"
)]
pub async fn lock_profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<LockRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_manager(&headers, &pool).await {
        return status.into_response();
    }
    let request: LockRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    match set_lock(&pool, id, request.lock, state.config().lock_ttl_seconds()).await {
        Ok(Some(record)) => {
            info!(profile_id = %id, lock = request.lock, "profile lock changed");
            Json(ProfileResponse::from_record(record)).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "Profile not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to set profile lock: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to set profile lock".to_string(),
            )
                .into_response()
        }
    }
}

/// Lock or unlock every profile at once.
#[utoipa::path(
    post,
    path = "/admin/profiles/lock-all",
    request_body = LockRequest,
    responses(
        (status = 200, description = "Profiles affected", body = LockAllResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Managers only")
    ),
    tag = "admin"
)]
pub async fn lock_all_profiles(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LockRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_manager(&headers, &pool).await {
        return status.into_response();
    }
    let request: LockRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    match set_lock_all(&pool, request.lock, state.config().lock_ttl_seconds()).await {
        Ok(affected) => {
            info!(lock = request.lock, affected, "bulk profile lock changed");
            Json(LockAllResponse { affected }).into_response()
        }
        Err(err) => {
            error!("Failed to set bulk profile lock: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to set profile locks".to_string(),
            )
                .into_response()
        }
    }
}

/// Approve a pending edit request: clears the request flag and the lock.
/// Idempotent; approving a profile with no pending request is a no-op.
#[utoipa::path(
    post,
    path = "/admin/profiles/{id}/approve-edit",
    params(("id" = Uuid, Path, description = "Profile id")),
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Managers only"),
        (status = 404, description = "No such profile", body = String)
    ),
    tag = "admin"
)]
pub async fn approve_edit_request(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(status) = require_manager(&headers, &pool).await {
        return status.into_response();
    }
    match approve_edit(&pool, id).await {
        Ok(Some(record)) => {
            info!(profile_id = %id, "edit request approved");
            Json(ProfileResponse::from_record(record)).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "Profile not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to approve edit request: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to approve edit request".to_string(),
            )
                .into_response()
        }
    }
}

/// Users who verified their email but still await manager approval.
#[utoipa::path(
    get,
    path = "/admin/pending-users",
    responses(
        (status = 200, description = "Verified but unapproved users", body = [PendingUserResponse]),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Managers only")
    ),
    tag = "admin"
)]
pub async fn pending_users(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    if let Err(status) = require_manager(&headers, &pool).await {
        return status.into_response();
    }

    let query = r"
        SELECT users.id, users.email, users.email_verified_at, profiles.name
        FROM users
        LEFT JOIN profiles ON profiles.user_id = users.id
        WHERE users.email_verified_at IS NOT NULL
          AND NOT users.is_approved
        ORDER BY users.email_verified_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    match sqlx::query(query).fetch_all(&*pool).instrument(span).await {
        Ok(rows) => {
            let pending: Vec<PendingUserResponse> = rows
                .into_iter()
                .map(|row| PendingUserResponse {
                    user_id: row.get::<Uuid, _>("id").to_string(),
                    email: row.get("email"),
                    name: row.get("name"),
                    verified_at: row
                        .get::<chrono::DateTime<chrono::Utc>, _>("email_verified_at")
                        .to_rfc3339(),
                })
                .collect();
            Json(pending).into_response()
        }
        Err(err) => {
            error!("Failed to list pending users: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list pending users".to_string(),
            )
                .into_response()
        }
    }
}

/// Approve a verified account so it can log in.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/approve",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "User approved"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Managers only"),
        (status = 404, description = "No such user", body = String)
    ),
    tag = "admin"
)]
pub async fn approve_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(status) = require_manager(&headers, &pool).await {
        return status.into_response();
    }

    let query = r"
        UPDATE users SET is_approved = TRUE, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    match sqlx::query(query)
        .bind(id)
        .execute(&*pool)
        .instrument(span)
        .await
    {
        Ok(result) if result.rows_affected() > 0 => {
            info!(user_id = %id, "user approved");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(_) => (StatusCode::NOT_FOUND, "User not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to approve user: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to approve user".to_string(),
            )
                .into_response()
        }
    }
}

/// Register a staff account on someone's behalf.
///
/// Creates the user and a minimal profile in one transaction, then emails the
/// temporary password together with the verification link. Registered accounts
/// are pre-approved; they only need to verify their email.
#[utoipa::path(
    post,
    path = "/admin/users",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "User registered", body = RegisterUserResponse),
        (status = 400, description = "Invalid email or missing name", body = String),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Managers only"),
        (status = 409, description = "Email already registered", body = String)
    ),
    tag = "admin"
)]
pub async fn register_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<RegisterUserRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_manager(&headers, &pool).await {
        return status.into_response();
    }
    let request: RegisterUserRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if request.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing name".to_string()).into_response();
    }

    let initial_password = match generate_initial_password() {
        Ok(password) => password,
        Err(err) => {
            error!("Failed to generate initial password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };
    let password_hash = match hash_password(&initial_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash initial password: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };

    let user_id = match insert_staff_user(&pool, &email, &password_hash, &request).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            return (
                StatusCode::CONFLICT,
                "Email already registered".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to register user: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response();
        }
    };

    let token = match issue_verification_token(
        &pool,
        user_id,
        state.config().verification_ttl_seconds(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => {
            // The account exists; the user can still ask for a resend.
            error!("Failed to issue verification token after registration: {err}");
            return (
                StatusCode::CREATED,
                Json(RegisterUserResponse {
                    user_id: user_id.to_string(),
                    email,
                }),
            )
                .into_response();
        }
    };

    let verify_url = build_verify_url(state.config().frontend_base_url(), &token);
    let message = registration_email(&email, &request.name, &initial_password, &verify_url);
    let _ = state.notifier().dispatch(
        Some(user_id),
        EmailAction::Registration,
        message,
        ClientInfo::from_headers(&headers),
    );

    info!(user_id = %user_id, "staff account registered");
    (
        StatusCode::CREATED,
        Json(RegisterUserResponse {
            user_id: user_id.to_string(),
            email,
        }),
    )
        .into_response()
}

/// Insert the user and profile rows together. Returns `None` when the email
/// is already taken.
pub(crate) async fn insert_staff_user(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    request: &RegisterUserRequest,
) -> anyhow::Result<Option<Uuid>> {
    use anyhow::Context;

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let query = r"
        INSERT INTO users (email, password_hash, phone, role, is_approved)
        VALUES ($1, $2, $3, 'staff', TRUE)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .bind(request.phone.as_deref().map(str::trim))
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: Uuid = match result {
        Ok(row) => row.get("id"),
        Err(err) if is_unique_violation(&err) => return Ok(None),
        Err(err) => return Err(err).context("failed to insert user"),
    };

    let query = r"
        INSERT INTO profiles (user_id, name, department)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(request.name.trim())
        .bind(&request.department)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert profile for new user")?;

    tx.commit().await.context("failed to commit registration")?;
    Ok(Some(user_id))
}
