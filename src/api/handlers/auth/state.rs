//! Service configuration and shared request state.

use std::sync::Arc;

use crate::api::email::Notifier;

use super::rate_limit::RateLimiter;

const DEFAULT_VERIFICATION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_RESET_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_OTP_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_LOCK_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_EMAIL_PER_HOUR: i64 = 10;
const DEFAULT_EMAIL_PER_DAY: i64 = 50;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60 * 60;
const DEFAULT_AUDIT_RETENTION_DAYS: u64 = 90;

/// Tunables for token lifetimes, throttling, locking, and the sweeper.
///
/// Built explicitly and threaded through the server wiring; nothing reads
/// configuration from ambient state.
#[derive(Clone, Debug)]
pub struct AppConfig {
    frontend_base_url: String,
    verification_ttl_seconds: i64,
    reset_ttl_seconds: i64,
    otp_ttl_seconds: i64,
    session_ttl_seconds: i64,
    lock_ttl_seconds: i64,
    email_per_hour: i64,
    email_per_day: i64,
    sweep_interval_seconds: u64,
    audit_retention_days: u64,
}

impl AppConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            verification_ttl_seconds: DEFAULT_VERIFICATION_TTL_SECONDS,
            reset_ttl_seconds: DEFAULT_RESET_TTL_SECONDS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            lock_ttl_seconds: DEFAULT_LOCK_TTL_SECONDS,
            email_per_hour: DEFAULT_EMAIL_PER_HOUR,
            email_per_day: DEFAULT_EMAIL_PER_DAY,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            audit_retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
        }
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lock_ttl_seconds(mut self, seconds: i64) -> Self {
        self.lock_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_per_hour(mut self, limit: i64) -> Self {
        self.email_per_hour = limit;
        self
    }

    #[must_use]
    pub fn with_email_per_day(mut self, limit: i64) -> Self {
        self.email_per_day = limit;
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_audit_retention_days(mut self, days: u64) -> Self {
        self.audit_retention_days = days;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn verification_ttl_seconds(&self) -> i64 {
        self.verification_ttl_seconds
    }

    #[must_use]
    pub fn reset_ttl_seconds(&self) -> i64 {
        self.reset_ttl_seconds
    }

    #[must_use]
    pub fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn lock_ttl_seconds(&self) -> i64 {
        self.lock_ttl_seconds
    }

    #[must_use]
    pub fn email_per_hour(&self) -> i64 {
        self.email_per_hour
    }

    #[must_use]
    pub fn email_per_day(&self) -> i64 {
        self.email_per_day
    }

    #[must_use]
    pub fn sweep_interval_seconds(&self) -> u64 {
        self.sweep_interval_seconds
    }

    #[must_use]
    pub fn audit_retention_days(&self) -> u64 {
        self.audit_retention_days
    }

    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// Shared state handed to handlers via an axum `Extension` layer.
pub struct AppState {
    config: AppConfig,
    rate_limiter: Arc<dyn RateLimiter>,
    notifier: Notifier,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, rate_limiter: Arc<dyn RateLimiter>, notifier: Notifier) -> Self {
        Self {
            config,
            rate_limiter,
            notifier,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub(crate) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::handlers::auth::rate_limit::NoopRateLimiter;
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn app_config_defaults_and_overrides() {
        let config = AppConfig::new("https://faculty.example.edu".to_string());

        assert_eq!(config.frontend_base_url(), "https://faculty.example.edu");
        assert_eq!(
            config.verification_ttl_seconds(),
            DEFAULT_VERIFICATION_TTL_SECONDS
        );
        assert_eq!(config.reset_ttl_seconds(), DEFAULT_RESET_TTL_SECONDS);
        assert_eq!(config.otp_ttl_seconds(), DEFAULT_OTP_TTL_SECONDS);
        assert_eq!(config.lock_ttl_seconds(), DEFAULT_LOCK_TTL_SECONDS);
        assert_eq!(config.email_per_hour(), 10);
        assert_eq!(config.email_per_day(), 50);
        assert_eq!(config.sweep_interval_seconds(), 3600);
        assert_eq!(config.audit_retention_days(), 90);

        let config = config
            .with_verification_ttl_seconds(120)
            .with_reset_ttl_seconds(60)
            .with_otp_ttl_seconds(30)
            .with_session_ttl_seconds(900)
            .with_lock_ttl_seconds(10)
            .with_email_per_hour(3)
            .with_email_per_day(7)
            .with_sweep_interval_seconds(5)
            .with_audit_retention_days(1);

        assert_eq!(config.verification_ttl_seconds(), 120);
        assert_eq!(config.reset_ttl_seconds(), 60);
        assert_eq!(config.otp_ttl_seconds(), 30);
        assert_eq!(config.session_ttl_seconds(), 900);
        assert_eq!(config.lock_ttl_seconds(), 10);
        assert_eq!(config.email_per_hour(), 3);
        assert_eq!(config.email_per_day(), 7);
        assert_eq!(config.sweep_interval_seconds(), 5);
        assert_eq!(config.audit_retention_days(), 1);
    }

    #[test]
    fn cookie_secure_follows_frontend_scheme() {
        let secure = AppConfig::new("https://faculty.example.edu".to_string());
        assert!(secure.session_cookie_secure());

        let insecure = AppConfig::new("http://localhost:5173".to_string());
        assert!(!insecure.session_cookie_secure());
    }

    #[tokio::test]
    async fn app_state_exposes_parts() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool");
        let config = AppConfig::new("http://localhost:5173".to_string());
        let notifier = Notifier::new(pool, Arc::new(LogEmailSender));
        let state = AppState::new(config, Arc::new(NoopRateLimiter), notifier);
        assert_eq!(state.config().frontend_base_url(), "http://localhost:5173");
    }
}
