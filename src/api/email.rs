//! Email delivery abstractions and the fire-and-forget dispatcher.
//!
//! Handlers never wait on delivery: the database work for a request commits
//! first, then `Notifier::dispatch` spawns a task that renders, sends, and
//! writes exactly one audit row for the attempt. There is no retry queue;
//! delivery is at-most-once and failures are only visible in the logs and in
//! `email_audit_log`.

use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::audit::{self, AuditStatus, ClientInfo, EmailAction, IdentifierKind};

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub body_html: String,
}

/// Email delivery abstraction used by the dispatcher.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to mark the attempt as failed.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            subject = %message.subject,
            "email send stub"
        );
        Ok(())
    }
}

/// Spawns delivery tasks and records one audit row per attempt.
#[derive(Clone)]
pub struct Notifier {
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
}

impl Notifier {
    #[must_use]
    pub fn new(pool: PgPool, sender: Arc<dyn EmailSender>) -> Self {
        Self { pool, sender }
    }

    /// Fire-and-forget dispatch. The caller's transaction must already be
    /// committed; nothing here can roll it back or block the response.
    pub fn dispatch(
        &self,
        user_id: Option<Uuid>,
        action: EmailAction,
        message: EmailMessage,
        client: ClientInfo,
    ) -> tokio::task::JoinHandle<()> {
        let pool = self.pool.clone();
        let sender = Arc::clone(&self.sender);
        tokio::spawn(async move {
            let recipient = message.to_email.clone();
            let (status, send_error) = match sender.send(&message) {
                Ok(()) => (AuditStatus::Sent, None),
                Err(err) => {
                    error!(
                        recipient = %recipient,
                        action = action.as_str(),
                        "email delivery failed: {err}"
                    );
                    (AuditStatus::Failed, Some(err.to_string()))
                }
            };

            if let Err(err) = audit::record(
                &pool,
                user_id,
                action,
                &recipient,
                status,
                &client,
                send_error.as_deref(),
            )
            .await
            {
                error!("failed to record email audit row: {err}");
            }

            // Observability counters only; throttling reads the audit log.
            if let Err(err) =
                audit::bump_window(&pool, &recipient, IdentifierKind::Email, action).await
            {
                debug!("failed to bump recipient window: {err}");
            }
            if let Some(ip) = client.ip.as_deref()
                && let Err(err) = audit::bump_window(&pool, ip, IdentifierKind::Ip, action).await
            {
                debug!("failed to bump ip window: {err}");
            }
        })
    }
}

/// Email verification link sent after registration or on resend.
#[must_use]
pub fn verification_email(to_email: &str, name: &str, verify_url: &str) -> EmailMessage {
    EmailMessage {
        to_email: to_email.to_string(),
        subject: "Verify your faculty account email".to_string(),
        body_html: format!(
            "<html><body>\
             <h2>Email verification</h2>\
             <p>Dear {name},</p>\
             <p>Please verify your email address by clicking the link below. \
             The link expires in 24 hours.</p>\
             <p><a href=\"{verify_url}\">Verify email</a></p>\
             <p>If you did not request this, you can ignore this message.</p>\
             </body></html>"
        ),
    }
}

/// One-time six-digit code for email verification.
#[must_use]
pub fn otp_email(to_email: &str, name: &str, code: &str) -> EmailMessage {
    EmailMessage {
        to_email: to_email.to_string(),
        subject: "Your verification code".to_string(),
        body_html: format!(
            "<html><body>\
             <h2>Verification code</h2>\
             <p>Dear {name},</p>\
             <p>Your one-time verification code is:</p>\
             <p style=\"font-size:24px;font-weight:bold;letter-spacing:4px\">{code}</p>\
             <p>The code expires in 10 minutes.</p>\
             </body></html>"
        ),
    }
}

/// Password reset link. The raw token only exists in this message.
#[must_use]
pub fn password_reset_email(to_email: &str, name: &str, reset_url: &str) -> EmailMessage {
    EmailMessage {
        to_email: to_email.to_string(),
        subject: "Reset your password".to_string(),
        body_html: format!(
            "<html><body>\
             <h2>Password reset</h2>\
             <p>Dear {name},</p>\
             <p>A password reset was requested for your account. The link below \
             expires in 1 hour and can be used once.</p>\
             <p><a href=\"{reset_url}\">Reset password</a></p>\
             <p>If you did not request a reset, no action is needed.</p>\
             </body></html>"
        ),
    }
}

/// Initial credentials for a staff account registered by a manager.
#[must_use]
pub fn registration_email(
    to_email: &str,
    name: &str,
    initial_password: &str,
    verify_url: &str,
) -> EmailMessage {
    EmailMessage {
        to_email: to_email.to_string(),
        subject: "Your faculty account has been created".to_string(),
        body_html: format!(
            "<html><body>\
             <h2>Welcome</h2>\
             <p>Dear {name},</p>\
             <p>An account has been created for you. Sign in with:</p>\
             <p>Email: <b>{to_email}</b><br>Temporary password: <b>{initial_password}</b></p>\
             <p>Please verify your email first:</p>\
             <p><a href=\"{verify_url}\">Verify email</a></p>\
             <p>Change the temporary password after your first login.</p>\
             </body></html>"
        ),
    }
}

/// Notification sent to each manager when a staff member requests edit access.
#[must_use]
pub fn edit_request_email(
    to_email: &str,
    manager_name: &str,
    staff_name: &str,
    department: &str,
) -> EmailMessage {
    EmailMessage {
        to_email: to_email.to_string(),
        subject: format!("Edit request from {staff_name}"),
        body_html: format!(
            "<html><body>\
             <h2>Profile edit request</h2>\
             <p>Dear {manager_name},</p>\
             <p><b>{staff_name}</b> ({department}) has requested permission to \
             edit their locked profile.</p>\
             <p>Review and approve the request from the admin dashboard.</p>\
             </body></html>"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sender_returns_ok() {
        let sender = LogEmailSender;
        let message = verification_email("a@example.com", "Alice", "https://f.example/verify");
        assert!(sender.send(&message).is_ok());
    }

    #[test]
    fn verification_email_embeds_link() {
        let message = verification_email("a@example.com", "Alice", "https://f.example/verify#t=x");
        assert_eq!(message.to_email, "a@example.com");
        assert!(message.body_html.contains("https://f.example/verify#t=x"));
        assert!(message.body_html.contains("Alice"));
    }

    #[test]
    fn otp_email_embeds_code() {
        let message = otp_email("a@example.com", "Alice", "042317");
        assert!(message.body_html.contains("042317"));
    }

    #[test]
    fn registration_email_embeds_credentials() {
        let message =
            registration_email("s@example.com", "Sam", "tmp-pass", "https://f.example/verify");
        assert!(message.body_html.contains("s@example.com"));
        assert!(message.body_html.contains("tmp-pass"));
        assert!(message.body_html.contains("https://f.example/verify"));
    }

    #[test]
    fn edit_request_email_names_staff() {
        let message = edit_request_email("m@example.com", "Morgan", "Sam", "Physics");
        assert!(message.subject.contains("Sam"));
        assert!(message.body_html.contains("Physics"));
    }
}
