//! Periodic cleanup of expired tokens, stale sessions, and old audit rows.
//!
//! Expiry is always re-checked at consume time, so the sweeper only reclaims
//! storage; correctness never depends on it having run.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{Instrument, debug, error};

use super::audit;

#[derive(Debug, Default)]
pub(crate) struct SweepReport {
    pub(crate) verification_tokens: u64,
    pub(crate) reset_tokens: u64,
    pub(crate) otps: u64,
    pub(crate) sessions: u64,
    pub(crate) windows: u64,
    pub(crate) audit_rows: u64,
}

pub(crate) fn spawn_sweeper(
    pool: PgPool,
    interval: Duration,
    audit_retention: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_once(&pool, audit_retention).await {
                Ok(report) => debug!(
                    verification_tokens = report.verification_tokens,
                    reset_tokens = report.reset_tokens,
                    otps = report.otps,
                    sessions = report.sessions,
                    windows = report.windows,
                    audit_rows = report.audit_rows,
                    "sweep finished"
                ),
                Err(err) => error!("sweep failed: {err}"),
            }
        }
    })
}

pub(crate) async fn sweep_once(pool: &PgPool, audit_retention: Duration) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    report.verification_tokens = delete_where(
        pool,
        "DELETE FROM email_verification_tokens WHERE expires_at <= NOW()",
    )
    .await
    .context("failed to sweep verification tokens")?;

    // Consumed reset tokens are kept for audit until they age out.
    report.reset_tokens = delete_where(
        pool,
        "DELETE FROM password_reset_tokens WHERE expires_at <= NOW() - INTERVAL '7 days'",
    )
    .await
    .context("failed to sweep reset tokens")?;

    report.otps = delete_where(pool, "DELETE FROM email_otps WHERE expires_at <= NOW()")
        .await
        .context("failed to sweep otps")?;

    report.sessions = delete_where(pool, "DELETE FROM user_sessions WHERE expires_at <= NOW()")
        .await
        .context("failed to sweep sessions")?;

    report.windows = delete_where(
        pool,
        "DELETE FROM rate_limit_windows WHERE window_start < NOW() - INTERVAL '24 hours'",
    )
    .await
    .context("failed to sweep rate limit windows")?;

    report.audit_rows = audit::purge_before(pool, audit_retention)
        .await
        .context("failed to sweep audit rows")?;

    Ok(report)
}

async fn delete_where(pool: &PgPool, query: &str) -> Result<u64> {
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query).execute(pool).instrument(span).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::SweepReport;

    #[test]
    fn report_defaults_to_zero() {
        let report = SweepReport::default();
        assert_eq!(report.verification_tokens, 0);
        assert_eq!(report.audit_rows, 0);
    }
}
