//! Rate limiting for email-sending flows.
//!
//! Decisions are derived from `email_audit_log` counts in rolling windows, so
//! no separate counter state has to stay consistent with the audit trail. A
//! database failure counts as `Limited`; throttling fails closed.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tracing::error;

use crate::api::audit::{self, EmailAction};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check_email(&self, email: &str, action: EmailAction) -> RateLimitDecision;
    async fn check_ip(&self, ip: Option<&str>, action: EmailAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check_email(&self, _email: &str, _action: EmailAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    async fn check_ip(&self, _ip: Option<&str>, _action: EmailAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Counts prior attempts in the audit log to throttle per recipient and IP.
#[derive(Clone, Debug)]
pub struct AuditRateLimiter {
    pool: PgPool,
    per_hour: i64,
    per_day: i64,
}

impl AuditRateLimiter {
    #[must_use]
    pub fn new(pool: PgPool, per_hour: i64, per_day: i64) -> Self {
        Self {
            pool,
            per_hour,
            per_day,
        }
    }

    /// IPs share delivery across users behind NAT, so their hourly budget is
    /// doubled. There is no daily IP cap.
    fn ip_per_hour(&self) -> i64 {
        self.per_hour.saturating_mul(2)
    }
}

#[async_trait]
impl RateLimiter for AuditRateLimiter {
    // The budget is shared across action kinds: ten sends to one recipient
    // exhaust its hour whether they were OTPs, resets, or a mix.
    async fn check_email(&self, email: &str, action: EmailAction) -> RateLimitDecision {
        let hourly = match audit::count_recipient_since(&self.pool, email, HOUR).await {
            Ok(count) => count,
            Err(err) => {
                error!(action = action.as_str(), "rate limit hourly count failed: {err}");
                return RateLimitDecision::Limited;
            }
        };
        if hourly >= self.per_hour {
            return RateLimitDecision::Limited;
        }

        let daily = match audit::count_recipient_since(&self.pool, email, DAY).await {
            Ok(count) => count,
            Err(err) => {
                error!(action = action.as_str(), "rate limit daily count failed: {err}");
                return RateLimitDecision::Limited;
            }
        };
        if daily >= self.per_day {
            return RateLimitDecision::Limited;
        }

        RateLimitDecision::Allowed
    }

    async fn check_ip(&self, ip: Option<&str>, action: EmailAction) -> RateLimitDecision {
        // Requests without a resolvable client IP are not throttled by IP;
        // the per-recipient limits still apply.
        let Some(ip) = ip else {
            return RateLimitDecision::Allowed;
        };

        let hourly = match audit::count_ip_since(&self.pool, ip, HOUR).await {
            Ok(count) => count,
            Err(err) => {
                error!(action = action.as_str(), "rate limit ip count failed: {err}");
                return RateLimitDecision::Limited;
            }
        };
        if hourly >= self.ip_per_hour() {
            return RateLimitDecision::Limited;
        }

        RateLimitDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, EmailAction::Verification).await,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter
                .check_email("user@example.com", EmailAction::PasswordReset)
                .await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn ip_budget_is_doubled() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool");
        let limiter = AuditRateLimiter::new(pool, 10, 50);
        assert_eq!(limiter.ip_per_hour(), 20);
    }

    #[tokio::test]
    async fn missing_ip_is_not_throttled() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool");
        let limiter = AuditRateLimiter::new(pool, 10, 50);
        assert_eq!(
            limiter.check_ip(None, EmailAction::Otp).await,
            RateLimitDecision::Allowed
        );
    }
}
