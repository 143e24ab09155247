//! Bootstrap errors.

use tenantry::{ErrorKind, validation::ValidationError};
use thiserror::Error;

use crate::{domain::tenants::errors::sql_error_kind, passwords::PasswordError};

#[derive(Debug, Error)]
pub enum BootstrapStoreError {
    #[error("the platform role is missing from the central store")]
    MissingPlatformRole,

    #[error("system tenant or super-admin conflicts with an existing record")]
    AlreadyExists,

    #[error("storage error")]
    Sql(#[source] sqlx::Error),
}

impl From<sqlx::Error> for BootstrapStoreError {
    fn from(error: sqlx::Error) -> Self {
        use sqlx::error::{DatabaseError, ErrorKind as SqlErrorKind};

        match error.as_database_error().map(DatabaseError::kind) {
            Some(SqlErrorKind::UniqueViolation) => Self::AlreadyExists,
            _ => Self::Sql(error),
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("the platform has already been bootstrapped")]
    AlreadyBootstrapped,

    #[error("invalid setup key")]
    InvalidSetupKey,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("bootstrap store failure")]
    Store(#[from] BootstrapStoreError),

    #[error("password hashing failed")]
    Password(#[from] PasswordError),
}

impl BootstrapError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyBootstrapped => ErrorKind::Conflict,
            Self::InvalidSetupKey => ErrorKind::Authorization,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store(BootstrapStoreError::Sql(source)) => sql_error_kind(source),
            Self::Store(BootstrapStoreError::AlreadyExists) => ErrorKind::Conflict,
            Self::Store(BootstrapStoreError::MissingPlatformRole) | Self::Password(_) => {
                ErrorKind::Internal
            }
        }
    }
}
