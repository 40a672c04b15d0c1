//! Database helpers for accounts, tokens, OTPs, and sessions.
//!
//! Token issuance is a single upsert keyed on `user_id`, so at most one live
//! record per (user, kind) exists and reissuing atomically invalidates the
//! previous value. Expiry is always re-checked in SQL with `NOW()` at consume
//! time; nothing depends on the background sweeper having run.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{generate_otp_code, generate_token, hash_token, is_unique_violation};

/// Result of trying to consume a token, OTP, or reset link.
///
/// Expired and invalid values produce the same HTTP shape; the split only
/// exists so logs can tell the two apart.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ConsumeOutcome {
    Consumed(Uuid),
    Invalid,
    Expired,
}

/// Account fields needed by login and the email flows.
pub(crate) struct UserRecord {
    pub(crate) id: Uuid,
    pub(crate) email: String,
    pub(crate) password_hash: String,
    pub(crate) role: String,
    pub(crate) is_active: bool,
    pub(crate) email_verified: bool,
    pub(crate) is_approved: bool,
    pub(crate) name: Option<String>,
    pub(crate) profile_id: Option<Uuid>,
    pub(crate) profile_locked: bool,
}

/// Minimal data returned for a valid session cookie.
pub(crate) struct SessionRecord {
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
    pub(crate) role: String,
}

pub(crate) async fn lookup_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT users.id, users.email, users.password_hash, users.role,
               users.is_active, users.email_verified_at IS NOT NULL AS email_verified,
               users.is_approved, profiles.name,
               profiles.id AS profile_id,
               COALESCE(profiles.is_locked, FALSE) AS profile_locked
        FROM users
        LEFT JOIN profiles ON profiles.user_id = users.id
        WHERE users.email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.map(|row| UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        is_active: row.get("is_active"),
        email_verified: row.get("email_verified"),
        is_approved: row.get("is_approved"),
        name: row.get("name"),
        profile_id: row.get("profile_id"),
        profile_locked: row.get("profile_locked"),
    }))
}

/// Issue a verification token, replacing any previous one for the user.
///
/// Returns the raw token for the email link; only its hash is stored.
pub(crate) async fn issue_verification_token(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    let token = generate_token()?;
    let token_hash = hash_token(&token);

    let query = r"
        INSERT INTO email_verification_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ON CONFLICT (user_id) DO UPDATE SET
            token_hash = EXCLUDED.token_hash,
            expires_at = EXCLUDED.expires_at,
            created_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert verification token")?;

    Ok(token)
}

/// Consume a verification token and activate the user in one transaction.
pub(crate) async fn consume_verification_token(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<ConsumeOutcome> {
    let mut tx = pool.begin().await.context("begin verify transaction")?;

    let query = r"
        DELETE FROM email_verification_tokens
        WHERE token_hash = $1
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to consume verification token")?;

    let Some(row) = row else {
        // Expired rows are removed on the failed attempt so a second try
        // reports Invalid rather than Expired.
        let query = r"
            DELETE FROM email_verification_tokens
            WHERE token_hash = $1
            RETURNING user_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let stale = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to clear expired verification token")?;
        tx.commit().await.context("commit verify cleanup")?;
        return Ok(if stale.is_some() {
            ConsumeOutcome::Expired
        } else {
            ConsumeOutcome::Invalid
        });
    };

    let user_id: Uuid = row.get("user_id");
    mark_user_verified(&mut tx, user_id).await?;
    tx.commit().await.context("commit verify transaction")?;
    Ok(ConsumeOutcome::Consumed(user_id))
}

async fn mark_user_verified(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET email_verified_at = NOW(),
            is_active = TRUE,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to mark user verified")?;
    Ok(())
}

/// Issue a password reset token, replacing any previous one for the user.
pub(crate) async fn issue_password_reset_token(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    let token = generate_token()?;
    let token_hash = hash_token(&token);

    let query = r"
        INSERT INTO password_reset_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ON CONFLICT (user_id) DO UPDATE SET
            token_hash = EXCLUDED.token_hash,
            expires_at = EXCLUDED.expires_at,
            used_at = NULL,
            created_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert password reset token")?;

    Ok(token)
}

/// Mark a reset token used and return its owner.
///
/// Used rows are retained for audit instead of being deleted; the sweeper
/// removes them once expired.
pub(crate) async fn consume_password_reset_token(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<ConsumeOutcome> {
    let query = r"
        UPDATE password_reset_tokens
        SET used_at = NOW()
        WHERE token_hash = $1
          AND used_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume password reset token")?;

    if let Some(row) = row {
        return Ok(ConsumeOutcome::Consumed(row.get("user_id")));
    }

    let query = r"
        SELECT 1
        FROM password_reset_tokens
        WHERE token_hash = $1
          AND used_at IS NULL
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let stale = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check stale reset token")?;

    Ok(if stale.is_some() {
        ConsumeOutcome::Expired
    } else {
        ConsumeOutcome::Invalid
    })
}

/// Issue a six-digit OTP, replacing any previous one for the user.
pub(crate) async fn issue_otp(pool: &PgPool, user_id: Uuid, ttl_seconds: i64) -> Result<String> {
    let code = generate_otp_code()?;

    let query = r"
        INSERT INTO email_otps (user_id, code, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ON CONFLICT (user_id) DO UPDATE SET
            code = EXCLUDED.code,
            expires_at = EXCLUDED.expires_at,
            created_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(&code)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert otp")?;

    Ok(code)
}

/// Consume an OTP by exact code match and mark the user verified.
pub(crate) async fn consume_otp(
    pool: &PgPool,
    user_id: Uuid,
    code: &str,
) -> Result<ConsumeOutcome> {
    let mut tx = pool.begin().await.context("begin otp transaction")?;

    let query = r"
        DELETE FROM email_otps
        WHERE user_id = $1
          AND code = $2
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(code)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to consume otp")?;

    let Some(_) = row else {
        let query = r"
            DELETE FROM email_otps
            WHERE user_id = $1
              AND code = $2
            RETURNING user_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let stale = sqlx::query(query)
            .bind(user_id)
            .bind(code)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to clear expired otp")?;
        tx.commit().await.context("commit otp cleanup")?;
        return Ok(if stale.is_some() {
            ConsumeOutcome::Expired
        } else {
            ConsumeOutcome::Invalid
        });
    };

    mark_user_verified(&mut tx, user_id).await?;
    tx.commit().await.context("commit otp transaction")?;
    Ok(ConsumeOutcome::Consumed(user_id))
}

/// Set a new password hash and revoke every session for the user.
pub(crate) async fn update_password(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin password transaction")?;

    let query = r"
        UPDATE users
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update password")?;

    let query = "DELETE FROM user_sessions WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to revoke sessions")?;

    tx.commit().await.context("commit password transaction")?;
    Ok(())
}

/// Create a session row and return the raw cookie value.
pub(crate) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO user_sessions (user_id, session_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

pub(crate) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    // Only accept active users and unexpired sessions.
    let query = r"
        SELECT users.id, users.email, users.role
        FROM user_sessions
        JOIN users ON users.id = user_sessions.user_id
        WHERE user_sessions.session_hash = $1
          AND user_sessions.expires_at > NOW()
          AND users.is_active
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    if row.is_none() {
        return Ok(None);
    }

    // Record activity for audit/visibility without extending the session TTL.
    let query = r"
        UPDATE user_sessions
        SET last_seen_at = NOW()
        WHERE session_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update session last_seen_at")?;

    Ok(row.map(|row| SessionRecord {
        user_id: row.get("id"),
        email: row.get("email"),
        role: row.get("role"),
    }))
}

pub(crate) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM user_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ConsumeOutcome, SessionRecord, UserRecord};
    use uuid::Uuid;

    #[test]
    fn consume_outcome_debug_names() {
        assert_eq!(
            format!("{:?}", ConsumeOutcome::Consumed(Uuid::nil())),
            format!("Consumed({})", Uuid::nil())
        );
        assert_eq!(format!("{:?}", ConsumeOutcome::Invalid), "Invalid");
        assert_eq!(format!("{:?}", ConsumeOutcome::Expired), "Expired");
    }

    #[test]
    fn session_record_holds_values() {
        let record = SessionRecord {
            user_id: Uuid::nil(),
            email: "staff@example.edu".to_string(),
            role: "staff".to_string(),
        };
        assert_eq!(record.user_id, Uuid::nil());
        assert_eq!(record.role, "staff");
    }

    #[test]
    fn user_record_holds_values() {
        let record = UserRecord {
            id: Uuid::nil(),
            email: "m@example.edu".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: "manager".to_string(),
            is_active: true,
            email_verified: true,
            is_approved: true,
            name: Some("Morgan".to_string()),
            profile_id: Some(Uuid::nil()),
            profile_locked: false,
        };
        assert!(record.is_active);
        assert_eq!(record.name.as_deref(), Some("Morgan"));
        assert!(!record.profile_locked);
    }
}
