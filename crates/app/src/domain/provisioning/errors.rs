//! Provisioning errors.

use sqlx::migrate::MigrateError;
use tenantry::{ErrorKind, slug::DatabaseNameError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("unsafe database name")]
    InvalidName(#[from] DatabaseNameError),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("database administration failed")]
    Database(#[from] sqlx::Error),

    #[error("tenant migrations failed")]
    Migration(#[from] MigrateError),
}

impl ProvisioningError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName(_) => ErrorKind::Validation,
            Self::Timeout { .. } | Self::Database(_) | Self::Migration(_) => {
                ErrorKind::Provisioning
            }
        }
    }
}
