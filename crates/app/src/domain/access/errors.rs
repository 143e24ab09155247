//! Access control errors.

use tenantry::{
    ErrorKind, access::DenyReason, limits::LimitExceeded, validation::ValidationError,
};
use thiserror::Error;

use crate::{
    domain::{tenants::TenantsServiceError, users::UsersServiceError},
    passwords::PasswordError,
};

#[derive(Debug, Error)]
pub enum AccessControlError {
    #[error("action denied: {0:?}")]
    Denied(DenyReason),

    #[error("users cannot remove or deactivate their own account")]
    SelfRemoval,

    #[error("the last active admin cannot be removed")]
    LastAdmin,

    #[error("user not found")]
    NotFound,

    #[error("user already exists")]
    AlreadyExists,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),

    #[error("user store failure")]
    Users(#[source] UsersServiceError),

    #[error("tenant store failure")]
    Tenants(#[source] TenantsServiceError),

    #[error("password hashing failed")]
    Password(#[from] PasswordError),
}

impl AccessControlError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Denied(_) | Self::SelfRemoval | Self::LastAdmin => ErrorKind::Authorization,
            Self::NotFound => ErrorKind::NotFound,
            Self::AlreadyExists => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::LimitExceeded(_) => ErrorKind::ResourceLimit,
            Self::Users(source) => source.kind(),
            Self::Tenants(source) => source.kind(),
            Self::Password(_) => ErrorKind::Internal,
        }
    }
}

impl From<DenyReason> for AccessControlError {
    fn from(reason: DenyReason) -> Self {
        Self::Denied(reason)
    }
}

impl From<UsersServiceError> for AccessControlError {
    fn from(error: UsersServiceError) -> Self {
        match error {
            UsersServiceError::NotFound => Self::NotFound,
            UsersServiceError::AlreadyExists => Self::AlreadyExists,
            UsersServiceError::LastAdmin => Self::LastAdmin,
            UsersServiceError::InvalidReference => {
                Self::Validation(ValidationError::field("role", "is not defined for this tenant"))
            }
            other => Self::Users(other),
        }
    }
}

impl From<TenantsServiceError> for AccessControlError {
    fn from(error: TenantsServiceError) -> Self {
        match error {
            TenantsServiceError::LimitExceeded(source) => Self::LimitExceeded(source),
            other => Self::Tenants(other),
        }
    }
}
