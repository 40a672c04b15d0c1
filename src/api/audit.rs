//! Append-only ledger of outbound email attempts.
//!
//! Every dispatch attempt writes exactly one row, whether delivery succeeded
//! or not. The rate limiter reads its rolling-window counts from this table,
//! so the ledger doubles as the source of truth for throttling decisions.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Kind of outbound email, stored in `email_audit_log.action`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailAction {
    Verification,
    Otp,
    PasswordReset,
    Registration,
    EditRequest,
}

impl EmailAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Otp => "otp",
            Self::PasswordReset => "password_reset",
            Self::Registration => "registration",
            Self::EditRequest => "edit_request",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditStatus {
    Sent,
    Failed,
    Pending,
}

impl AuditStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }
}

/// Identifier kind for the observability counters in `rate_limit_windows`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentifierKind {
    Email,
    Ip,
}

impl IdentifierKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Ip => "ip",
        }
    }
}

/// Request metadata captured alongside each audit row.
#[derive(Clone, Debug, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    #[must_use]
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        Self {
            ip: super::handlers::auth::utils::extract_client_ip(headers),
            user_agent: headers
                .get(axum::http::header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        }
    }
}

/// Insert one audit row for a dispatch attempt.
pub async fn record(
    pool: &PgPool,
    user_id: Option<Uuid>,
    action: EmailAction,
    recipient: &str,
    status: AuditStatus,
    client: &ClientInfo,
    error: Option<&str>,
) -> Result<()> {
    let query = r"
        INSERT INTO email_audit_log
            (user_id, action, recipient, status, ip_address, user_agent, error)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(action.as_str())
        .bind(recipient)
        .bind(status.as_str())
        .bind(client.ip.as_deref())
        .bind(client.user_agent.as_deref())
        .bind(error)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert email audit row")?;
    Ok(())
}

/// Count attempts for a recipient within a rolling window.
///
/// Counts every action kind; the budget is per identifier, not per kind of
/// email.
pub async fn count_recipient_since(
    pool: &PgPool,
    recipient: &str,
    window: Duration,
) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS attempts
        FROM email_audit_log
        WHERE recipient = $1
          AND created_at > NOW() - ($2 * INTERVAL '1 second')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(recipient)
        .bind(i64::try_from(window.as_secs()).unwrap_or(i64::MAX))
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count audit rows for recipient")?;
    Ok(row.get("attempts"))
}

/// Count attempts from a client IP within a rolling window, across every
/// action kind.
pub async fn count_ip_since(pool: &PgPool, ip: &str, window: Duration) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS attempts
        FROM email_audit_log
        WHERE ip_address = $1
          AND created_at > NOW() - ($2 * INTERVAL '1 second')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(ip)
        .bind(i64::try_from(window.as_secs()).unwrap_or(i64::MAX))
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count audit rows for ip")?;
    Ok(row.get("attempts"))
}

/// Delete audit rows older than the retention window. Returns rows removed.
pub async fn purge_before(pool: &PgPool, retention: Duration) -> Result<u64> {
    let query = r"
        DELETE FROM email_audit_log
        WHERE created_at < NOW() - ($1 * INTERVAL '1 second')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(i64::try_from(retention.as_secs()).unwrap_or(i64::MAX))
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to purge audit rows")?;
    Ok(result.rows_affected())
}

/// Bump the hourly observability counter for an identifier.
///
/// These rows are never consulted for throttling decisions; the rate limiter
/// counts `email_audit_log` rows instead.
pub async fn bump_window(
    pool: &PgPool,
    identifier: &str,
    kind: IdentifierKind,
    action: EmailAction,
) -> Result<()> {
    let query = r"
        INSERT INTO rate_limit_windows (identifier, identifier_kind, action, window_start, count)
        VALUES ($1, $2, $3, date_trunc('hour', NOW()), 1)
        ON CONFLICT (identifier, identifier_kind, action)
        DO UPDATE SET
            count = CASE
                WHEN rate_limit_windows.window_start = date_trunc('hour', NOW())
                THEN rate_limit_windows.count + 1
                ELSE 1
            END,
            window_start = date_trunc('hour', NOW())
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identifier)
        .bind(kind.as_str())
        .bind(action.as_str())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to bump rate limit window")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{AuditStatus, ClientInfo, EmailAction, IdentifierKind};
    use axum::http::{HeaderMap, HeaderValue, header::USER_AGENT};

    #[test]
    fn email_action_storage_names() {
        assert_eq!(EmailAction::Verification.as_str(), "verification");
        assert_eq!(EmailAction::Otp.as_str(), "otp");
        assert_eq!(EmailAction::PasswordReset.as_str(), "password_reset");
        assert_eq!(EmailAction::Registration.as_str(), "registration");
        assert_eq!(EmailAction::EditRequest.as_str(), "edit_request");
    }

    #[test]
    fn audit_status_storage_names() {
        assert_eq!(AuditStatus::Sent.as_str(), "sent");
        assert_eq!(AuditStatus::Failed.as_str(), "failed");
        assert_eq!(AuditStatus::Pending.as_str(), "pending");
    }

    #[test]
    fn identifier_kind_storage_names() {
        assert_eq!(IdentifierKind::Email.as_str(), "email");
        assert_eq!(IdentifierKind::Ip.as_str(), "ip");
    }

    #[test]
    fn client_info_from_headers_reads_forwarded_ip_and_agent() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        headers.insert(USER_AGENT, HeaderValue::from_static("facultyd-test"));
        let client = ClientInfo::from_headers(&headers);
        assert_eq!(client.ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(client.user_agent.as_deref(), Some("facultyd-test"));
    }

    #[test]
    fn client_info_default_is_empty() {
        let client = ClientInfo::default();
        assert!(client.ip.is_none());
        assert!(client.user_agent.is_none());
    }
}
