//! Profile CRUD and the edit-request endpoint.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::audit::{ClientInfo, EmailAction};
use crate::api::email::edit_request_email;

use super::super::auth::principal::{require_auth, require_manager};
use super::super::auth::state::AppState;
use super::policy;
use super::storage::{
    CreateOutcome, UpdateOutcome, create_profile, delete_profile, get_profile,
    get_profile_by_user, list_profiles, manager_contacts, mark_edit_requested, update_profile,
};
use super::types::{ProfileCreateRequest, ProfileResponse, ProfileUpdateRequest};

/// List all profiles. Public, read-only.
#[utoipa::path(
    get,
    path = "/profiles",
    responses(
        (status = 200, description = "All profiles", body = [ProfileResponse])
    ),
    tag = "profiles"
)]
pub async fn list(pool: Extension<PgPool>) -> impl IntoResponse {
    match list_profiles(&pool).await {
        Ok(records) => {
            let profiles: Vec<ProfileResponse> =
                records.into_iter().map(ProfileResponse::from_record).collect();
            Json(profiles).into_response()
        }
        Err(err) => {
            error!("Failed to list profiles: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list profiles".to_string(),
            )
                .into_response()
        }
    }
}

/// Fetch one profile by its id. Public, read-only.
#[utoipa::path(
    get,
    path = "/profiles/{id}",
    params(("id" = Uuid, Path, description = "Profile id")),
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 404, description = "No such profile", body = String)
    ),
    tag = "profiles"
)]
pub async fn get(pool: Extension<PgPool>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match get_profile(&pool, id).await {
        Ok(Some(record)) => Json(ProfileResponse::from_record(record)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Profile not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to get profile: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get profile".to_string(),
            )
                .into_response()
        }
    }
}

/// Fetch the profile belonging to a user.
#[utoipa::path(
    get,
    path = "/profiles/by-user/{user_id}",
    params(("user_id" = Uuid, Path, description = "Owning user id")),
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 404, description = "No profile for this user", body = String)
    ),
    tag = "profiles"
)]
pub async fn get_by_user(pool: Extension<PgPool>, Path(user_id): Path<Uuid>) -> impl IntoResponse {
    match get_profile_by_user(&pool, user_id).await {
        Ok(Some(record)) => Json(ProfileResponse::from_record(record)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Profile not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to get profile by user: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get profile".to_string(),
            )
                .into_response()
        }
    }
}

/// Create a profile. Staff create their own; managers may create for anyone.
#[utoipa::path(
    post,
    path = "/profiles",
    request_body = ProfileCreateRequest,
    responses(
        (status = 201, description = "Profile created", body = ProfileResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Profile belongs to another user", body = String),
        (status = 409, description = "User already has a profile", body = String)
    ),
    tag = "profiles"
)]
pub async fn create(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    payload: Option<Json<ProfileCreateRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    let request: ProfileCreateRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };
    if request.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing name".to_string()).into_response();
    }

    let owner_id = request.user_id.unwrap_or(principal.user_id);
    if let Err(err) = policy::authorize(&principal, owner_id) {
        return (StatusCode::FORBIDDEN, err.to_string()).into_response();
    }

    match create_profile(&pool, owner_id, &request).await {
        Ok(CreateOutcome::Created(record)) => {
            info!(profile_id = %record.id, owner_id = %owner_id, "profile created");
            (
                StatusCode::CREATED,
                Json(ProfileResponse::from_record(*record)),
            )
                .into_response()
        }
        Ok(CreateOutcome::Conflict) => (
            StatusCode::CONFLICT,
            "User already has a profile".to_string(),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to create profile: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create profile".to_string(),
            )
                .into_response()
        }
    }
}

/// Update profile content. The lock guard runs inside the UPDATE itself.
#[utoipa::path(
    put,
    path = "/profiles/{id}",
    params(("id" = Uuid, Path, description = "Profile id")),
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Profile belongs to another user", body = String),
        (status = 404, description = "No such profile", body = String),
        (status = 423, description = "Profile is locked", body = String)
    ),
    tag = "profiles"
)]
pub async fn update(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ProfileUpdateRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    let request: ProfileUpdateRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let record = match get_profile(&pool, id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "Profile not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load profile for update: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update profile".to_string(),
            )
                .into_response();
        }
    };
    if let Err(err) = policy::authorize(&principal, record.user_id) {
        return (StatusCode::FORBIDDEN, err.to_string()).into_response();
    }

    match update_profile(&pool, id, &request).await {
        Ok(UpdateOutcome::Updated(record)) => {
            Json(ProfileResponse::from_record(*record)).into_response()
        }
        Ok(UpdateOutcome::Locked) => {
            warn!(profile_id = %id, user_id = %principal.user_id, "write rejected by active lock");
            (StatusCode::LOCKED, "Profile is locked".to_string()).into_response()
        }
        // The profile vanished between the ownership check and the write.
        Ok(UpdateOutcome::Missing) => {
            (StatusCode::NOT_FOUND, "Profile not found".to_string()).into_response()
        }
        Err(err) => {
            error!("Failed to update profile: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update profile".to_string(),
            )
                .into_response()
        }
    }
}

/// Delete a profile. Managers only.
#[utoipa::path(
    delete,
    path = "/profiles/{id}",
    params(("id" = Uuid, Path, description = "Profile id")),
    responses(
        (status = 204, description = "Profile deleted"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Managers only"),
        (status = 404, description = "No such profile", body = String)
    ),
    tag = "profiles"
)]
pub async fn delete(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(status) = require_manager(&headers, &pool).await {
        return status.into_response();
    }
    match delete_profile(&pool, id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Profile not found".to_string()).into_response(),
        Err(err) => {
            error!("Failed to delete profile: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to delete profile".to_string(),
            )
                .into_response()
        }
    }
}

/// Request edit access on a locked profile.
///
/// Owner-only, and idempotent: repeating the request keeps the flag set and
/// notifies the managers again. Every manager gets their own message and
/// audit row.
#[utoipa::path(
    post,
    path = "/profiles/{id}/request-edit",
    params(("id" = Uuid, Path, description = "Profile id")),
    responses(
        (status = 204, description = "Edit request recorded"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Only the owner may request edits", body = String),
        (status = 404, description = "No such profile", body = String)
    ),
    tag = "profiles"
)]
pub async fn request_edit(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    let record = match get_profile(&pool, id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "Profile not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to load profile for edit request: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to record edit request".to_string(),
            )
                .into_response();
        }
    };
    if let Err(err) = policy::authorize_owner(&principal, record.user_id) {
        return (StatusCode::FORBIDDEN, err.to_string()).into_response();
    }

    let record = match mark_edit_requested(&pool, id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "Profile not found".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to mark edit requested: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to record edit request".to_string(),
            )
                .into_response();
        }
    };

    let managers = match manager_contacts(&pool).await {
        Ok(managers) => managers,
        Err(err) => {
            // The flag is already persisted; notification is best effort.
            error!("Failed to list managers for edit request: {err}");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let department = record.department.as_deref().unwrap_or("no department");
    let client = ClientInfo::from_headers(&headers);
    for manager in &managers {
        let message =
            edit_request_email(&manager.email, &manager.name, &record.name, department);
        let _ = state.notifier().dispatch(
            Some(principal.user_id),
            EmailAction::EditRequest,
            message,
            client.clone(),
        );
    }
    info!(
        profile_id = %id,
        managers = managers.len(),
        "edit request recorded and managers notified"
    );

    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn create_requires_session() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = create(HeaderMap::new(), Extension(pool), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn update_requires_session() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = update(HeaderMap::new(), Extension(pool), Path(Uuid::new_v4()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn delete_requires_session() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = delete(HeaderMap::new(), Extension(pool), Path(Uuid::new_v4()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
