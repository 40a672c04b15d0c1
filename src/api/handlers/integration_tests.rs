//! Database-backed tests for token storage, locking, and throttling.
//!
//! These run against a real Postgres instance named by `FACULTYD_TEST_DSN`
//! and skip cleanly when it is not set. The schema is applied on every run;
//! it is idempotent.

use crate::api::audit::{self, AuditStatus, ClientInfo, EmailAction};
use crate::api::handlers::auth::rate_limit::{
    AuditRateLimiter, RateLimitDecision, RateLimiter,
};
use crate::api::handlers::auth::storage::{
    ConsumeOutcome, consume_otp, consume_password_reset_token, consume_verification_token,
    issue_otp, issue_password_reset_token, issue_verification_token,
};
use crate::api::handlers::auth::utils::{hash_password, hash_token};
use crate::api::handlers::admin::{RegisterUserRequest, insert_staff_user};
use crate::api::handlers::profiles::storage::{
    CreateOutcome, UpdateOutcome, approve_edit, create_profile, manager_contacts,
    mark_edit_requested, set_lock, update_profile,
};
use crate::api::handlers::profiles::types::{ProfileCreateRequest, ProfileUpdateRequest};
use crate::api::email::{EmailMessage, EmailSender, LogEmailSender, Notifier, edit_request_email};
use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::sync::Arc;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/db/sql/01_facultyd.sql"
));

async fn test_pool() -> Result<Option<PgPool>> {
    let Ok(dsn) = std::env::var("FACULTYD_TEST_DSN") else {
        eprintln!("Skipping integration test: FACULTYD_TEST_DSN is not set");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&dsn)
        .await
        .context("failed to connect test pool")?;
    apply_schema(&pool).await?;
    Ok(Some(pool))
}

async fn apply_schema(pool: &PgPool) -> Result<()> {
    for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute schema statement {}", index + 1))?;
    }
    Ok(())
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        current.push_str(line);
        current.push('\n');
        if line.trim_end().ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

/// Insert a verified, approved staff user with a unique email.
async fn seed_user(pool: &PgPool) -> Result<Uuid> {
    let email = format!("it-{}@faculty.test", Uuid::new_v4());
    let password_hash = hash_password("integration-test")?;
    let row = sqlx::query(
        r"
        INSERT INTO users (email, password_hash, role, is_active, email_verified_at, is_approved)
        VALUES ($1, $2, 'staff', TRUE, NOW(), TRUE)
        RETURNING id
        ",
    )
    .bind(&email)
    .bind(&password_hash)
    .fetch_one(pool)
    .await
    .context("failed to seed user")?;
    Ok(row.get("id"))
}

async fn seed_profile(pool: &PgPool, user_id: Uuid) -> Result<Uuid> {
    let request = ProfileCreateRequest {
        user_id: None,
        name: "Integration Tester".to_string(),
        department: Some("Testing".to_string()),
        title: None,
        bio: None,
        qualifications: None,
        experience: None,
        research: None,
        date_of_joining: None,
        documents: Default::default(),
    };
    match create_profile(pool, user_id, &request).await? {
        CreateOutcome::Created(record) => Ok(record.id),
        CreateOutcome::Conflict => Err(anyhow!("seed user unexpectedly already has a profile")),
    }
}

#[tokio::test]
async fn verification_token_reissue_invalidates_previous() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let user_id = seed_user(&pool).await?;

    let first = issue_verification_token(&pool, user_id, 3600).await?;
    let second = issue_verification_token(&pool, user_id, 3600).await?;

    let count: i64 =
        sqlx::query("SELECT COUNT(*) AS n FROM email_verification_tokens WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await?
            .get("n");
    assert_eq!(count, 1, "reissue must replace, not accumulate");

    assert_eq!(
        consume_verification_token(&pool, &hash_token(&first)).await?,
        ConsumeOutcome::Invalid
    );
    assert_eq!(
        consume_verification_token(&pool, &hash_token(&second)).await?,
        ConsumeOutcome::Consumed(user_id)
    );

    let verified: bool =
        sqlx::query("SELECT email_verified_at IS NOT NULL AS v FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await?
            .get("v");
    assert!(verified);
    Ok(())
}

#[tokio::test]
async fn expired_verification_token_reports_expired_then_invalid() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let user_id = seed_user(&pool).await?;

    // Negative TTL puts expires_at in the past.
    let token = issue_verification_token(&pool, user_id, -10).await?;
    let token_hash = hash_token(&token);

    assert_eq!(
        consume_verification_token(&pool, &token_hash).await?,
        ConsumeOutcome::Expired
    );
    // The stale row is deleted on the failed consume.
    assert_eq!(
        consume_verification_token(&pool, &token_hash).await?,
        ConsumeOutcome::Invalid
    );
    Ok(())
}

#[tokio::test]
async fn reset_token_is_single_use() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let user_id = seed_user(&pool).await?;

    let token = issue_password_reset_token(&pool, user_id, 3600).await?;
    let token_hash = hash_token(&token);

    assert_eq!(
        consume_password_reset_token(&pool, &token_hash).await?,
        ConsumeOutcome::Consumed(user_id)
    );
    assert_eq!(
        consume_password_reset_token(&pool, &token_hash).await?,
        ConsumeOutcome::Invalid
    );
    Ok(())
}

#[tokio::test]
async fn reset_token_reissue_invalidates_first_link() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let user_id = seed_user(&pool).await?;

    let first = issue_password_reset_token(&pool, user_id, 3600).await?;
    let second = issue_password_reset_token(&pool, user_id, 3600).await?;

    assert_eq!(
        consume_password_reset_token(&pool, &hash_token(&first)).await?,
        ConsumeOutcome::Invalid
    );
    assert_eq!(
        consume_password_reset_token(&pool, &hash_token(&second)).await?,
        ConsumeOutcome::Consumed(user_id)
    );
    Ok(())
}

#[tokio::test]
async fn otp_consume_checks_code_and_is_single_use() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let user_id = seed_user(&pool).await?;

    let code = issue_otp(&pool, user_id, 600).await?;
    let wrong = if code == "000000" { "000001" } else { "000000" };

    assert_eq!(
        consume_otp(&pool, user_id, wrong).await?,
        ConsumeOutcome::Invalid
    );
    assert_eq!(
        consume_otp(&pool, user_id, &code).await?,
        ConsumeOutcome::Consumed(user_id)
    );
    assert_eq!(
        consume_otp(&pool, user_id, &code).await?,
        ConsumeOutcome::Invalid
    );
    Ok(())
}

#[tokio::test]
async fn active_lock_blocks_writes_and_stale_lock_lets_them_through() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let user_id = seed_user(&pool).await?;
    let profile_id = seed_profile(&pool, user_id).await?;

    let locked = set_lock(&pool, profile_id, true, 3600)
        .await?
        .context("profile vanished")?;
    assert!(locked.is_locked);
    assert!(locked.lock_expires_at.is_some());

    let request = ProfileUpdateRequest {
        bio: Some("blocked write".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        update_profile(&pool, profile_id, &request).await?,
        UpdateOutcome::Locked
    ));

    // Age the lock past its expiry without clearing the flag.
    sqlx::query(
        "UPDATE profiles SET lock_expires_at = NOW() - INTERVAL '1 hour' WHERE id = $1",
    )
    .bind(profile_id)
    .execute(&pool)
    .await?;

    match update_profile(&pool, profile_id, &request).await? {
        UpdateOutcome::Updated(record) => {
            assert_eq!(record.bio.as_deref(), Some("blocked write"));
            // The flag stays set until a manager or an approval clears it.
            assert!(record.is_locked);
        }
        other => panic!("stale lock must permit the write, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn approve_edit_clears_request_and_lock_idempotently() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let user_id = seed_user(&pool).await?;
    let profile_id = seed_profile(&pool, user_id).await?;

    set_lock(&pool, profile_id, true, 3600).await?;
    let requested = mark_edit_requested(&pool, profile_id)
        .await?
        .context("profile vanished")?;
    assert!(requested.edit_requested);

    let approved = approve_edit(&pool, profile_id)
        .await?
        .context("profile vanished")?;
    assert!(!approved.edit_requested);
    assert!(!approved.is_locked);
    assert!(approved.lock_expires_at.is_none());

    // Approving again is a no-op, not an error.
    let again = approve_edit(&pool, profile_id)
        .await?
        .context("profile vanished")?;
    assert!(!again.edit_requested);
    assert!(!again.is_locked);
    Ok(())
}

async fn audit_rows_for(pool: &PgPool, recipient: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT status FROM email_audit_log WHERE recipient = $1 ORDER BY created_at",
    )
    .bind(recipient)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|row| row.get("status")).collect())
}

#[tokio::test]
async fn dispatch_writes_one_audit_row_per_message() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let user_id = seed_user(&pool).await?;
    let notifier = Notifier::new(pool.clone(), Arc::new(LogEmailSender));

    // One message per manager, one audit row each.
    let first = format!("mgr1-{}@faculty.test", Uuid::new_v4());
    let second = format!("mgr2-{}@faculty.test", Uuid::new_v4());
    for recipient in [&first, &second] {
        let message = edit_request_email(recipient, "Manager", "Staffer", "Testing");
        notifier
            .dispatch(
                Some(user_id),
                EmailAction::EditRequest,
                message,
                ClientInfo::default(),
            )
            .await?;
    }

    assert_eq!(audit_rows_for(&pool, &first).await?, vec!["sent"]);
    assert_eq!(audit_rows_for(&pool, &second).await?, vec!["sent"]);
    Ok(())
}

#[tokio::test]
async fn failed_delivery_is_audited_not_surfaced() -> Result<()> {
    struct BrokenSender;

    impl EmailSender for BrokenSender {
        fn send(&self, _message: &EmailMessage) -> Result<()> {
            Err(anyhow!("smtp unreachable"))
        }
    }

    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let user_id = seed_user(&pool).await?;
    let notifier = Notifier::new(pool.clone(), Arc::new(BrokenSender));

    let recipient = format!("down-{}@faculty.test", Uuid::new_v4());
    let message = edit_request_email(&recipient, "Manager", "Staffer", "Testing");
    notifier
        .dispatch(
            Some(user_id),
            EmailAction::EditRequest,
            message,
            ClientInfo::default(),
        )
        .await?;

    assert_eq!(audit_rows_for(&pool, &recipient).await?, vec!["failed"]);

    let error: Option<String> =
        sqlx::query("SELECT error FROM email_audit_log WHERE recipient = $1")
            .bind(&recipient)
            .fetch_one(&pool)
            .await?
            .get("error");
    assert_eq!(error.as_deref(), Some("smtp unreachable"));
    Ok(())
}

#[tokio::test]
async fn hourly_email_budget_allows_ten_then_limits() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let recipient = format!("limit-{}@faculty.test", Uuid::new_v4());
    let limiter = AuditRateLimiter::new(pool.clone(), 10, 50);
    let client = ClientInfo::default();

    for _ in 0..9 {
        audit::record(
            &pool,
            None,
            EmailAction::Verification,
            &recipient,
            AuditStatus::Sent,
            &client,
            None,
        )
        .await?;
    }
    assert_eq!(
        limiter
            .check_email(&recipient, EmailAction::Verification)
            .await,
        RateLimitDecision::Allowed,
        "ninth send leaves room for a tenth"
    );

    audit::record(
        &pool,
        None,
        EmailAction::Verification,
        &recipient,
        AuditStatus::Sent,
        &client,
        None,
    )
    .await?;
    assert_eq!(
        limiter
            .check_email(&recipient, EmailAction::Verification)
            .await,
        RateLimitDecision::Limited,
        "tenth prior attempt exhausts the hourly budget"
    );

    // The budget is per recipient, not per action kind: ten verification
    // sends also exhaust the hour for password resets.
    assert_eq!(
        limiter
            .check_email(&recipient, EmailAction::PasswordReset)
            .await,
        RateLimitDecision::Limited
    );
    Ok(())
}

#[tokio::test]
async fn daily_budget_counts_older_hours_and_resets_after_a_day() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let recipient = format!("daily-{}@faculty.test", Uuid::new_v4());
    let limiter = AuditRateLimiter::new(pool.clone(), 10, 12);
    let client = ClientInfo::default();

    for _ in 0..12 {
        audit::record(
            &pool,
            None,
            EmailAction::Verification,
            &recipient,
            AuditStatus::Sent,
            &client,
            None,
        )
        .await?;
    }
    // Push every send out of the hourly window but keep it inside the day.
    sqlx::query(
        "UPDATE email_audit_log SET created_at = NOW() - INTERVAL '2 hours' WHERE recipient = $1",
    )
    .bind(&recipient)
    .execute(&pool)
    .await?;

    assert_eq!(
        limiter.check_email(&recipient, EmailAction::Otp).await,
        RateLimitDecision::Limited,
        "sends from earlier hours still count against the day"
    );

    // After a quiet day the window is empty again.
    sqlx::query(
        "UPDATE email_audit_log SET created_at = NOW() - INTERVAL '25 hours' WHERE recipient = $1",
    )
    .bind(&recipient)
    .execute(&pool)
    .await?;

    assert_eq!(
        limiter.check_email(&recipient, EmailAction::Otp).await,
        RateLimitDecision::Allowed
    );
    Ok(())
}

#[tokio::test]
async fn registration_stores_contact_phone() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let email = format!("reg-{}@faculty.test", Uuid::new_v4());
    let request = RegisterUserRequest {
        email: email.clone(),
        name: "New Staffer".to_string(),
        department: Some("Physics".to_string()),
        phone: Some("+1 555 0100".to_string()),
    };
    let password_hash = hash_password("temp-credential")?;

    let user_id = insert_staff_user(&pool, &email, &password_hash, &request)
        .await?
        .context("email unexpectedly taken")?;

    let phone: Option<String> = sqlx::query("SELECT phone FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await?
        .get("phone");
    assert_eq!(phone.as_deref(), Some("+1 555 0100"));
    Ok(())
}

#[tokio::test]
async fn edit_request_fanout_includes_inactive_managers() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let email = format!("mgr-{}@faculty.test", Uuid::new_v4());
    let password_hash = hash_password("integration-test")?;
    sqlx::query(
        r"
        INSERT INTO users (email, password_hash, role, is_active, email_verified_at, is_approved)
        VALUES ($1, $2, 'manager', FALSE, NOW(), TRUE)
        ",
    )
    .bind(&email)
    .bind(&password_hash)
    .execute(&pool)
    .await?;

    let contacts = manager_contacts(&pool).await?;
    assert!(
        contacts.iter().any(|contact| contact.email == email),
        "a disabled manager account still receives edit-request mail"
    );
    Ok(())
}
