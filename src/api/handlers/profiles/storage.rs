//! Database helpers for profile records and the lock/edit-request state.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::api::handlers::auth::utils::is_unique_violation;

use super::types::{ProfileCreateRequest, ProfileUpdateRequest};

/// One row of `profiles`. Mirrors the table exactly so `SELECT *` and
/// `RETURNING *` map onto it.
#[derive(FromRow, Debug, Clone)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub department: Option<String>,
    pub title: Option<String>,
    pub bio: Option<String>,
    pub qualifications: Option<String>,
    pub experience: Option<String>,
    pub research: Option<String>,
    pub date_of_joining: Option<NaiveDate>,
    pub profile_pic: Option<String>,
    pub tenth_cert: Option<String>,
    pub twelfth_cert: Option<String>,
    pub appointment_order: Option<String>,
    pub joining_report: Option<String>,
    pub ug_degree: Option<String>,
    pub pg_ms_consolidated: Option<String>,
    pub phd_degree: Option<String>,
    pub journals_list: Option<String>,
    pub conferences_list: Option<String>,
    pub au_supervisor_letter: Option<String>,
    pub fdp_workshops_webinars: Option<String>,
    pub nptel_coursera: Option<String>,
    pub invited_talks: Option<String>,
    pub projects_sanction: Option<String>,
    pub consultancy: Option<String>,
    pub patent: Option<String>,
    pub community_cert: Option<String>,
    pub aadhar: Option<String>,
    pub pan: Option<String>,
    pub is_locked: bool,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub edit_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a guarded content update.
#[derive(Debug)]
pub(crate) enum UpdateOutcome {
    Updated(Box<ProfileRecord>),
    Locked,
    Missing,
}

/// Outcome of creating a profile (one per user).
#[derive(Debug)]
pub(crate) enum CreateOutcome {
    Created(Box<ProfileRecord>),
    Conflict,
}

/// Manager recipients for edit-request fan-out.
pub(crate) struct ManagerContact {
    pub(crate) email: String,
    pub(crate) name: String,
}

pub(crate) async fn list_profiles(pool: &PgPool) -> Result<Vec<ProfileRecord>> {
    let query = "SELECT * FROM profiles ORDER BY name";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, ProfileRecord>(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list profiles")
}

pub(crate) async fn get_profile(pool: &PgPool, id: Uuid) -> Result<Option<ProfileRecord>> {
    let query = "SELECT * FROM profiles WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, ProfileRecord>(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to get profile")
}

pub(crate) async fn get_profile_by_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<ProfileRecord>> {
    let query = "SELECT * FROM profiles WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, ProfileRecord>(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to get profile by user")
}

pub(crate) async fn create_profile(
    pool: &PgPool,
    owner_id: Uuid,
    request: &ProfileCreateRequest,
) -> Result<CreateOutcome> {
    let query = r"
        INSERT INTO profiles (
            user_id, name, department, title, bio, qualifications, experience,
            research, date_of_joining,
            profile_pic, tenth_cert, twelfth_cert, appointment_order,
            joining_report, ug_degree, pg_ms_consolidated, phd_degree,
            journals_list, conferences_list, au_supervisor_letter,
            fdp_workshops_webinars, nptel_coursera, invited_talks,
            projects_sanction, consultancy, patent, community_cert, aadhar, pan
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9,
            $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
            $21, $22, $23, $24, $25, $26, $27, $28, $29
        )
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let docs = &request.documents;
    let result = sqlx::query_as::<_, ProfileRecord>(query)
        .bind(owner_id)
        .bind(&request.name)
        .bind(&request.department)
        .bind(&request.title)
        .bind(&request.bio)
        .bind(&request.qualifications)
        .bind(&request.experience)
        .bind(&request.research)
        .bind(request.date_of_joining)
        .bind(&docs.profile_pic)
        .bind(&docs.tenth_cert)
        .bind(&docs.twelfth_cert)
        .bind(&docs.appointment_order)
        .bind(&docs.joining_report)
        .bind(&docs.ug_degree)
        .bind(&docs.pg_ms_consolidated)
        .bind(&docs.phd_degree)
        .bind(&docs.journals_list)
        .bind(&docs.conferences_list)
        .bind(&docs.au_supervisor_letter)
        .bind(&docs.fdp_workshops_webinars)
        .bind(&docs.nptel_coursera)
        .bind(&docs.invited_talks)
        .bind(&docs.projects_sanction)
        .bind(&docs.consultancy)
        .bind(&docs.patent)
        .bind(&docs.community_cert)
        .bind(&docs.aadhar)
        .bind(&docs.pan)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match result {
        Ok(record) => Ok(CreateOutcome::Created(Box::new(record))),
        Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::Conflict),
        Err(err) => Err(err).context("failed to create profile"),
    }
}

/// Guarded content update: omitted fields keep their stored values.
///
/// The lock predicate lives in SQL so the expiry check uses database time.
/// An expired lock permits the write without clearing the flag.
pub(crate) async fn update_profile(
    pool: &PgPool,
    id: Uuid,
    request: &ProfileUpdateRequest,
) -> Result<UpdateOutcome> {
    let query = r"
        UPDATE profiles SET
            name = COALESCE($2, name),
            department = COALESCE($3, department),
            title = COALESCE($4, title),
            bio = COALESCE($5, bio),
            qualifications = COALESCE($6, qualifications),
            experience = COALESCE($7, experience),
            research = COALESCE($8, research),
            date_of_joining = COALESCE($9, date_of_joining),
            profile_pic = COALESCE($10, profile_pic),
            tenth_cert = COALESCE($11, tenth_cert),
            twelfth_cert = COALESCE($12, twelfth_cert),
            appointment_order = COALESCE($13, appointment_order),
            joining_report = COALESCE($14, joining_report),
            ug_degree = COALESCE($15, ug_degree),
            pg_ms_consolidated = COALESCE($16, pg_ms_consolidated),
            phd_degree = COALESCE($17, phd_degree),
            journals_list = COALESCE($18, journals_list),
            conferences_list = COALESCE($19, conferences_list),
            au_supervisor_letter = COALESCE($20, au_supervisor_letter),
            fdp_workshops_webinars = COALESCE($21, fdp_workshops_webinars),
            nptel_coursera = COALESCE($22, nptel_coursera),
            invited_talks = COALESCE($23, invited_talks),
            projects_sanction = COALESCE($24, projects_sanction),
            consultancy = COALESCE($25, consultancy),
            patent = COALESCE($26, patent),
            community_cert = COALESCE($27, community_cert),
            aadhar = COALESCE($28, aadhar),
            pan = COALESCE($29, pan),
            updated_at = NOW()
        WHERE id = $1
          AND NOT (is_locked AND lock_expires_at > NOW())
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let docs = &request.documents;
    let row = sqlx::query_as::<_, ProfileRecord>(query)
        .bind(id)
        .bind(&request.name)
        .bind(&request.department)
        .bind(&request.title)
        .bind(&request.bio)
        .bind(&request.qualifications)
        .bind(&request.experience)
        .bind(&request.research)
        .bind(request.date_of_joining)
        .bind(&docs.profile_pic)
        .bind(&docs.tenth_cert)
        .bind(&docs.twelfth_cert)
        .bind(&docs.appointment_order)
        .bind(&docs.joining_report)
        .bind(&docs.ug_degree)
        .bind(&docs.pg_ms_consolidated)
        .bind(&docs.phd_degree)
        .bind(&docs.journals_list)
        .bind(&docs.conferences_list)
        .bind(&docs.au_supervisor_letter)
        .bind(&docs.fdp_workshops_webinars)
        .bind(&docs.nptel_coursera)
        .bind(&docs.invited_talks)
        .bind(&docs.projects_sanction)
        .bind(&docs.consultancy)
        .bind(&docs.patent)
        .bind(&docs.community_cert)
        .bind(&docs.aadhar)
        .bind(&docs.pan)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to update profile")?;

    if let Some(record) = row {
        return Ok(UpdateOutcome::Updated(Box::new(record)));
    }

    // Zero rows means missing or actively locked; tell the two apart.
    let query = "SELECT 1 FROM profiles WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let exists = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check profile existence")?;

    Ok(if exists.is_some() {
        UpdateOutcome::Locked
    } else {
        UpdateOutcome::Missing
    })
}

pub(crate) async fn delete_profile(pool: &PgPool, id: Uuid) -> Result<bool> {
    let query = "DELETE FROM profiles WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete profile")?;
    Ok(result.rows_affected() > 0)
}

/// Lock or unlock one profile. Locking stamps a fresh expiry; unlocking
/// clears both fields.
pub(crate) async fn set_lock(
    pool: &PgPool,
    id: Uuid,
    lock: bool,
    lock_ttl_seconds: i64,
) -> Result<Option<ProfileRecord>> {
    let query = r"
        UPDATE profiles SET
            is_locked = $2,
            lock_expires_at = CASE
                WHEN $2 THEN NOW() + ($3 * INTERVAL '1 second')
                ELSE NULL
            END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query_as::<_, ProfileRecord>(query)
        .bind(id)
        .bind(lock)
        .bind(lock_ttl_seconds)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to set profile lock")
}

/// Lock or unlock every profile in one statement.
pub(crate) async fn set_lock_all(pool: &PgPool, lock: bool, lock_ttl_seconds: i64) -> Result<u64> {
    let query = r"
        UPDATE profiles SET
            is_locked = $1,
            lock_expires_at = CASE
                WHEN $1 THEN NOW() + ($2 * INTERVAL '1 second')
                ELSE NULL
            END,
            updated_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(lock)
        .bind(lock_ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to set lock on all profiles")?;
    Ok(result.rows_affected())
}

pub(crate) async fn mark_edit_requested(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<ProfileRecord>> {
    let query = r"
        UPDATE profiles SET
            edit_requested = TRUE,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query_as::<_, ProfileRecord>(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to mark edit requested")
}

/// Approve an edit request: clears the request and the lock in one
/// statement, regardless of whether the lock had expired.
pub(crate) async fn approve_edit(pool: &PgPool, id: Uuid) -> Result<Option<ProfileRecord>> {
    let query = r"
        UPDATE profiles SET
            edit_requested = FALSE,
            is_locked = FALSE,
            lock_expires_at = NULL,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query_as::<_, ProfileRecord>(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to approve edit request")
}

/// Every manager account; they all receive edit-request notifications.
pub(crate) async fn manager_contacts(pool: &PgPool) -> Result<Vec<ManagerContact>> {
    let query = r"
        SELECT users.email, COALESCE(profiles.name, users.email) AS name
        FROM users
        LEFT JOIN profiles ON profiles.user_id = users.id
        WHERE users.role = 'manager'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list manager contacts")?;

    Ok(rows
        .into_iter()
        .map(|row| ManagerContact {
            email: row.get("email"),
            name: row.get("name"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{CreateOutcome, UpdateOutcome};

    #[test]
    fn update_outcome_debug_names() {
        assert_eq!(format!("{:?}", UpdateOutcome::Locked), "Locked");
        assert_eq!(format!("{:?}", UpdateOutcome::Missing), "Missing");
    }

    #[test]
    fn create_outcome_debug_names() {
        assert_eq!(format!("{:?}", CreateOutcome::Conflict), "Conflict");
    }
}
