//! Security Config

use clap::Args;
use jiff::SignedDuration;
use tenantry::rate_limit::RateLimitPolicy;

/// Authentication, impersonation and bootstrap settings.
#[derive(Debug, Clone, Args)]
pub struct SecurityConfig {
    /// Secret required to create the first super-admin; bootstrap is refused when unset
    #[arg(long, env = "SETUP_KEY", hide_env_values = true)]
    pub setup_key: Option<String>,

    /// Failed logins allowed per client address inside the decay window
    #[arg(long, env = "LOGIN_MAX_ATTEMPTS", default_value_t = 5)]
    pub login_max_attempts: u32,

    /// Self-registrations allowed per client address inside the decay window
    #[arg(long, env = "REGISTER_MAX_ATTEMPTS", default_value_t = 3)]
    pub register_max_attempts: u32,

    /// Rate-limit decay window, in seconds
    #[arg(long, env = "RATE_LIMIT_DECAY_SECONDS", default_value_t = 300)]
    pub rate_limit_decay_seconds: i64,

    /// Consecutive bad passwords before an account is locked
    #[arg(long, env = "ACCOUNT_LOCKOUT_THRESHOLD", default_value_t = 10)]
    pub account_lockout_threshold: u32,

    /// Account lock duration, in minutes
    #[arg(long, env = "ACCOUNT_LOCKOUT_MINUTES", default_value_t = 15)]
    pub account_lockout_minutes: i64,

    /// Consecutive bad second-factor codes before two-factor is locked
    #[arg(long, env = "TWO_FACTOR_MAX_ATTEMPTS", default_value_t = 5)]
    pub two_factor_max_attempts: u32,

    /// Two-factor lock duration, in minutes
    #[arg(long, env = "TWO_FACTOR_LOCKOUT_MINUTES", default_value_t = 15)]
    pub two_factor_lockout_minutes: i64,

    /// Issuer shown in authenticator apps
    #[arg(long, env = "TOTP_ISSUER", default_value = "Tenantry")]
    pub totp_issuer: String,

    /// Password reset token lifetime, in minutes
    #[arg(long, env = "PASSWORD_RESET_TTL_MINUTES", default_value_t = 60)]
    pub password_reset_ttl_minutes: i64,

    /// Email verification token lifetime, in hours
    #[arg(long, env = "EMAIL_VERIFICATION_TTL_HOURS", default_value_t = 24)]
    pub email_verification_ttl_hours: i64,

    /// Default impersonation token lifetime, in minutes
    #[arg(long, env = "IMPERSONATION_DEFAULT_TTL_MINUTES", default_value_t = 5)]
    pub impersonation_default_ttl_minutes: i64,

    /// Longest impersonation token lifetime that may be requested, in minutes
    #[arg(long, env = "IMPERSONATION_MAX_TTL_MINUTES", default_value_t = 60)]
    pub impersonation_max_ttl_minutes: i64,
}

impl SecurityConfig {
    #[must_use]
    pub const fn login_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_attempts: self.login_max_attempts,
            decay: SignedDuration::from_secs(self.rate_limit_decay_seconds),
        }
    }

    #[must_use]
    pub const fn registration_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_attempts: self.register_max_attempts,
            decay: SignedDuration::from_secs(self.rate_limit_decay_seconds),
        }
    }
}
