//! Outbound mail
//!
//! Delivery is an external concern; services hand a rendered intent to a [`Mailer`] and never
//! fail an operation because a message could not be queued.

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport unavailable: {0}")]
    Transport(String),
}

/// Message template and its parameters.
#[derive(Clone, PartialEq, Eq)]
pub enum MailTemplate {
    /// Sent to the first admin of a newly provisioned tenant.
    TenantWelcome {
        tenant_name: String,
        domain: String,
        temporary_password: String,
        verification_token: String,
    },

    /// Sent when a password reset was requested for an existing account.
    PasswordReset {
        token: String,
        expires_at: Timestamp,
    },

    /// Sent to self-registered users of tenants that require a verified address.
    EmailVerification {
        token: String,
        expires_at: Timestamp,
    },
}

impl MailTemplate {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TenantWelcome { .. } => "tenant_welcome",
            Self::PasswordReset { .. } => "password_reset",
            Self::EmailVerification { .. } => "email_verification",
        }
    }
}

impl std::fmt::Debug for MailTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TenantWelcome {
                tenant_name,
                domain,
                ..
            } => f
                .debug_struct("TenantWelcome")
                .field("tenant_name", tenant_name)
                .field("domain", domain)
                .finish_non_exhaustive(),
            Self::PasswordReset { expires_at, .. } => f
                .debug_struct("PasswordReset")
                .field("expires_at", expires_at)
                .finish_non_exhaustive(),
            Self::EmailVerification { expires_at, .. } => f
                .debug_struct("EmailVerification")
                .field("expires_at", expires_at)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub template: MailTemplate,
}

#[automock]
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Queue a message for delivery.
    async fn send(&self, message: MailMessage) -> Result<(), MailError>;
}

/// Emits a structured event per message instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        info!(
            to = %message.to,
            template = message.template.name(),
            "mail queued"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_omits_secrets() {
        let template = MailTemplate::TenantWelcome {
            tenant_name: "Acme".to_string(),
            domain: "acme.localhost".to_string(),
            temporary_password: "hunter2hunter2".to_string(),
            verification_token: "tvt_abc".to_string(),
        };

        let rendered = format!("{template:?}");

        assert!(rendered.contains("acme.localhost"));
        assert!(!rendered.contains("hunter2hunter2"));
        assert!(!rendered.contains("tvt_abc"));

        let verification = MailTemplate::EmailVerification {
            token: "evt_abc".to_string(),
            expires_at: Timestamp::UNIX_EPOCH,
        };

        assert!(!format!("{verification:?}").contains("evt_abc"));
    }

    #[tokio::test]
    async fn log_mailer_accepts_messages() -> testresult::TestResult {
        LogMailer
            .send(MailMessage {
                to: "admin@acme.test".to_string(),
                template: MailTemplate::PasswordReset {
                    token: "rst_abc".to_string(),
                    expires_at: Timestamp::UNIX_EPOCH,
                },
            })
            .await?;

        Ok(())
    }
}
