//! Tenants service errors.

use sqlx::{
    Error,
    error::{DatabaseError, ErrorKind as SqlErrorKind},
};
use tenantry::{
    ErrorKind,
    limits::{LimitExceeded, Resource},
    status::InvalidTransition,
    validation::ValidationError,
};
use thiserror::Error;
use tracing::error;

use crate::{
    domain::{provisioning::ProvisioningError, users::UsersServiceError},
    passwords::PasswordError,
};

#[derive(Debug, Error)]
pub enum TenantsServiceError {
    #[error("tenant already exists")]
    AlreadyExists,

    #[error("tenant not found")]
    NotFound,

    #[error("related resource not found")]
    InvalidReference,

    #[error("missing required data")]
    MissingRequiredData,

    #[error("invalid data")]
    InvalidData,

    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("{resource} cannot drop below zero: {current} in use, {delta} released")]
    CounterUnderflow {
        resource: Resource,
        current: i64,
        delta: i64,
    },

    #[error("storage error")]
    Sql(#[source] Error),
}

impl TenantsServiceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists => ErrorKind::Conflict,
            Self::NotFound => ErrorKind::NotFound,
            Self::InvalidReference
            | Self::MissingRequiredData
            | Self::InvalidData
            | Self::CounterUnderflow { .. } => ErrorKind::Validation,
            Self::LimitExceeded(_) => ErrorKind::ResourceLimit,
            Self::InvalidTransition(_) => ErrorKind::Conflict,
            Self::Sql(source) => sql_error_kind(source),
        }
    }
}

impl From<Error> for TenantsServiceError {
    fn from(error: Error) -> Self {
        if matches!(error, Error::RowNotFound) {
            return Self::NotFound;
        }

        match error.as_database_error().map(DatabaseError::kind) {
            Some(SqlErrorKind::UniqueViolation) => Self::AlreadyExists,
            Some(SqlErrorKind::ForeignKeyViolation) => Self::InvalidReference,
            Some(SqlErrorKind::NotNullViolation) => Self::MissingRequiredData,
            Some(SqlErrorKind::CheckViolation) => Self::InvalidData,
            Some(SqlErrorKind::Other | _) | None => Self::Sql(error),
        }
    }
}

/// Kind of an unclassified storage error: connection-level failures are transient.
#[must_use]
pub(crate) fn sql_error_kind(error: &Error) -> ErrorKind {
    match error {
        Error::PoolTimedOut | Error::PoolClosed | Error::Io(_) | Error::Tls(_) => {
            ErrorKind::TransientInfrastructure
        }
        _ => ErrorKind::Internal,
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} is already taken")]
    Conflict(&'static str),

    #[error("tenant not found")]
    NotFound,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),

    #[error("the system tenant cannot be deleted")]
    SystemTenant,

    #[error("verification token is invalid or already used")]
    InvalidVerificationToken,

    #[error("tenant provisioning failed")]
    Provisioning(#[from] ProvisioningError),

    #[error("tenant user provisioning failed")]
    Users(#[source] UsersServiceError),

    #[error("tenant store failure")]
    Store(#[source] TenantsServiceError),

    #[error("password hashing failed")]
    Password(#[from] PasswordError),
}

impl LifecycleError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) | Self::InvalidTransition(_) => ErrorKind::Conflict,
            Self::NotFound => ErrorKind::NotFound,
            Self::LimitExceeded(_) => ErrorKind::ResourceLimit,
            Self::SystemTenant => ErrorKind::Authorization,
            Self::InvalidVerificationToken => ErrorKind::Authentication,
            Self::Provisioning(source) => source.kind(),
            Self::Users(source) => source.kind(),
            Self::Store(source) => source.kind(),
            Self::Password(_) => ErrorKind::Internal,
        }
    }
}

impl From<TenantsServiceError> for LifecycleError {
    fn from(error: TenantsServiceError) -> Self {
        match error {
            TenantsServiceError::NotFound => Self::NotFound,
            TenantsServiceError::AlreadyExists => Self::Conflict("slug, domain or admin email"),
            TenantsServiceError::LimitExceeded(source) => Self::LimitExceeded(source),
            TenantsServiceError::InvalidTransition(source) => Self::InvalidTransition(source),
            TenantsServiceError::CounterUnderflow { resource, .. } => {
                ValidationError::field(resource.key(), "cannot drop below zero").into()
            }
            other => Self::Store(other),
        }
    }
}

impl From<UsersServiceError> for LifecycleError {
    fn from(error: UsersServiceError) -> Self {
        Self::Users(error)
    }
}

/// Log a failed compensation step; the original error is what the caller sees.
pub(crate) fn log_compensation_failure(step: &'static str, source: &dyn std::error::Error) {
    error!(step, error = %source, "compensation step failed");
}

#[cfg(test)]
mod tests {
    use tenantry::status::TenantStatus;

    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            TenantsServiceError::from(Error::RowNotFound),
            TenantsServiceError::NotFound
        ));
    }

    #[test]
    fn pool_timeouts_are_transient() {
        let error = TenantsServiceError::from(Error::PoolTimedOut);

        assert_eq!(error.kind(), ErrorKind::TransientInfrastructure);
    }

    #[test]
    fn lifecycle_errors_keep_store_classification() {
        let exceeded = LimitExceeded {
            resource: Resource::Users,
            current: 5,
            requested: 1,
            limit: 5,
        };

        assert_eq!(
            LifecycleError::from(TenantsServiceError::LimitExceeded(exceeded)).kind(),
            ErrorKind::ResourceLimit
        );
        assert_eq!(
            LifecycleError::from(TenantsServiceError::AlreadyExists).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            LifecycleError::from(TenantsServiceError::InvalidTransition(InvalidTransition {
                from: TenantStatus::Active,
                to: TenantStatus::Active,
            }))
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            LifecycleError::from(TenantsServiceError::CounterUnderflow {
                resource: Resource::Storage,
                current: 1,
                delta: -2,
            })
            .kind(),
            ErrorKind::Validation
        );
    }
}
