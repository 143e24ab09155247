//! Impersonation errors.

use tenantry::{ErrorKind, access::DenyReason, validation::ValidationError};
use thiserror::Error;

use crate::domain::{
    tenants::{TenantsServiceError, errors::sql_error_kind},
    users::UsersServiceError,
};

#[derive(Debug, Error)]
pub enum ImpersonationStoreError {
    #[error("impersonation token already exists")]
    AlreadyExists,

    #[error("related resource not found")]
    InvalidReference,

    #[error("invalid data")]
    InvalidData,

    #[error("storage error")]
    Sql(#[source] sqlx::Error),
}

impl From<sqlx::Error> for ImpersonationStoreError {
    fn from(error: sqlx::Error) -> Self {
        use sqlx::error::{DatabaseError, ErrorKind as SqlErrorKind};

        match error.as_database_error().map(DatabaseError::kind) {
            Some(SqlErrorKind::UniqueViolation) => Self::AlreadyExists,
            Some(SqlErrorKind::ForeignKeyViolation) => Self::InvalidReference,
            Some(SqlErrorKind::CheckViolation | SqlErrorKind::NotNullViolation) => {
                Self::InvalidData
            }
            Some(SqlErrorKind::Other | _) | None => Self::Sql(error),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImpersonationError {
    #[error("action denied: {0:?}")]
    Denied(DenyReason),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("tenant not found")]
    TenantNotFound,

    #[error("user not found in tenant")]
    UserNotFound,

    #[error("impersonation token is invalid")]
    InvalidToken,

    #[error("impersonation token has already been used")]
    AlreadyUsed,

    #[error("impersonation token has been revoked")]
    Revoked,

    #[error("impersonation token has expired")]
    Expired,

    #[error("impersonation session has ended")]
    SessionEnded,

    #[error("impersonation token not found")]
    NotFound,

    #[error("impersonation store failure")]
    Store(#[from] ImpersonationStoreError),

    #[error("tenant store failure")]
    Tenants(#[source] TenantsServiceError),

    #[error("user store failure")]
    Users(#[source] UsersServiceError),
}

impl ImpersonationError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Denied(_) => ErrorKind::Authorization,
            Self::Validation(_) => ErrorKind::Validation,
            Self::TenantNotFound | Self::UserNotFound | Self::NotFound => ErrorKind::NotFound,
            Self::InvalidToken | Self::Revoked | Self::Expired | Self::SessionEnded => {
                ErrorKind::Authentication
            }
            Self::AlreadyUsed => ErrorKind::Conflict,
            Self::Store(ImpersonationStoreError::Sql(source)) => sql_error_kind(source),
            Self::Store(ImpersonationStoreError::AlreadyExists) => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Validation,
            Self::Tenants(source) => source.kind(),
            Self::Users(source) => source.kind(),
        }
    }
}

impl From<DenyReason> for ImpersonationError {
    fn from(reason: DenyReason) -> Self {
        Self::Denied(reason)
    }
}

impl From<TenantsServiceError> for ImpersonationError {
    fn from(error: TenantsServiceError) -> Self {
        match error {
            TenantsServiceError::NotFound => Self::TenantNotFound,
            other => Self::Tenants(other),
        }
    }
}

impl From<UsersServiceError> for ImpersonationError {
    fn from(error: UsersServiceError) -> Self {
        match error {
            UsersServiceError::NotFound => Self::UserNotFound,
            other => Self::Users(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_is_a_conflict_and_expiry_an_authentication_failure() {
        assert_eq!(ImpersonationError::AlreadyUsed.kind(), ErrorKind::Conflict);
        assert_eq!(ImpersonationError::Expired.kind(), ErrorKind::Authentication);
        assert_eq!(
            ImpersonationError::Denied(DenyReason::NotSuperAdmin).kind(),
            ErrorKind::Authorization
        );
    }
}
