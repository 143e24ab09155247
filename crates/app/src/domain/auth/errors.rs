//! Authentication errors.

use jiff::Timestamp;
use tenantry::{ErrorKind, limits::LimitExceeded, validation::ValidationError};
use thiserror::Error;

use crate::{
    domain::{
        auth::{reset::ResetTokenError, totp::TwoFactorError, verification::VerificationTokenError},
        tenants::TenantsServiceError,
        users::UsersServiceError,
    },
    passwords::PasswordError,
    rate_limits::RateLimitError,
};

#[derive(Debug, Error)]
pub enum AuthSessionError {
    #[error("too many attempts, retry in {retry_after_seconds} seconds")]
    TooManyAttempts { retry_after_seconds: i64 },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("tenant is not active")]
    TenantSuspended,

    #[error("tenant not found")]
    TenantNotFound,

    #[error("account is not active")]
    AccountInactive,

    #[error("email address has not been verified")]
    EmailNotVerified,

    #[error("a second factor is required")]
    TwoFactorRequired,

    #[error("invalid second factor")]
    InvalidTwoFactorCode,

    #[error("second factor is locked until {until}")]
    TwoFactorLocked { until: Timestamp },

    #[error("second factor enrollment has not been started")]
    TwoFactorNotStarted,

    #[error("second factor is already enabled")]
    TwoFactorAlreadyEnabled,

    #[error("registration is closed for this tenant")]
    RegistrationClosed,

    #[error("email address is already registered")]
    EmailTaken,

    #[error("reset token is invalid or expired")]
    InvalidResetToken,

    #[error("verification token is invalid or expired")]
    InvalidVerificationToken,

    #[error("user not found")]
    UserNotFound,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),

    #[error("user store failure")]
    Users(#[source] UsersServiceError),

    #[error("tenant store failure")]
    Tenants(#[source] TenantsServiceError),

    #[error("rate limiter failure")]
    RateLimit(#[from] RateLimitError),

    #[error("reset token store failure")]
    ResetTokens(#[from] ResetTokenError),

    #[error("verification token store failure")]
    VerificationTokens(#[from] VerificationTokenError),

    #[error("password hashing failed")]
    Password(#[from] PasswordError),

    #[error(transparent)]
    TwoFactor(#[from] TwoFactorError),
}

impl AuthSessionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TooManyAttempts { .. }
            | Self::InvalidCredentials
            | Self::TenantSuspended
            | Self::AccountInactive
            | Self::EmailNotVerified
            | Self::TwoFactorRequired
            | Self::InvalidTwoFactorCode
            | Self::TwoFactorLocked { .. }
            | Self::InvalidResetToken
            | Self::InvalidVerificationToken => ErrorKind::Authentication,
            Self::RegistrationClosed => ErrorKind::Authorization,
            Self::TenantNotFound | Self::UserNotFound => ErrorKind::NotFound,
            Self::TwoFactorNotStarted | Self::TwoFactorAlreadyEnabled | Self::EmailTaken => {
                ErrorKind::Conflict
            }
            Self::Validation(_) => ErrorKind::Validation,
            Self::LimitExceeded(_) => ErrorKind::ResourceLimit,
            Self::Users(source) => source.kind(),
            Self::Tenants(source) => source.kind(),
            Self::RateLimit(RateLimitError::Sql(source))
            | Self::ResetTokens(ResetTokenError::Sql(source))
            | Self::VerificationTokens(VerificationTokenError::Sql(source)) => {
                crate::domain::tenants::errors::sql_error_kind(source)
            }
            Self::Password(_) | Self::TwoFactor(_) => ErrorKind::Internal,
        }
    }
}

impl From<UsersServiceError> for AuthSessionError {
    fn from(error: UsersServiceError) -> Self {
        match error {
            UsersServiceError::NotFound => Self::UserNotFound,
            UsersServiceError::AlreadyExists => Self::EmailTaken,
            other => Self::Users(other),
        }
    }
}

impl From<TenantsServiceError> for AuthSessionError {
    fn from(error: TenantsServiceError) -> Self {
        match error {
            TenantsServiceError::NotFound => Self::TenantNotFound,
            TenantsServiceError::LimitExceeded(source) => Self::LimitExceeded(source),
            other => Self::Tenants(other),
        }
    }
}
