//! Tenant database provisioning
//!
//! Creates, migrates and drops the isolated database behind each tenant. Names are validated
//! and quoted server-side before they reach DDL, and every operation runs under a timeout.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use mockall::automock;
use sqlx::{query, query_scalar};
use tenantry::slug::validate_database_name;
use tokio::time::timeout;
use tracing::info;

use crate::database::{TENANT_MIGRATOR, TenantConnections};

pub mod errors;

pub use errors::ProvisioningError;

const DATABASE_EXISTS_SQL: &str = include_str!("sql/database_exists.sql");
const QUOTE_IDENT_SQL: &str = include_str!("sql/quote_ident.sql");

#[automock]
#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    async fn create_database(&self, name: &str) -> Result<(), ProvisioningError>;

    /// Apply pending tenant migrations.
    async fn migrate(&self, name: &str) -> Result<(), ProvisioningError>;

    /// Drop the database, terminating open connections. Missing databases are not an error.
    async fn drop_database(&self, name: &str) -> Result<(), ProvisioningError>;

    async fn database_exists(&self, name: &str) -> Result<bool, ProvisioningError>;
}

#[derive(Debug, Clone)]
pub struct PgDatabaseProvisioner {
    connections: Arc<TenantConnections>,
    timeout: Duration,
}

impl PgDatabaseProvisioner {
    #[must_use]
    pub fn new(connections: Arc<TenantConnections>, timeout: Duration) -> Self {
        Self {
            connections,
            timeout,
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, future: F) -> Result<T, ProvisioningError>
    where
        F: Future<Output = Result<T, ProvisioningError>> + Send,
    {
        timeout(self.timeout, future)
            .await
            .map_err(|_| ProvisioningError::Timeout { operation })?
    }

    async fn quoted(&self, name: &str) -> Result<String, ProvisioningError> {
        validate_database_name(name)?;

        let ident = query_scalar(QUOTE_IDENT_SQL)
            .bind(name)
            .fetch_one(self.connections.central())
            .await?;

        Ok(ident)
    }
}

#[async_trait]
impl DatabaseProvisioner for PgDatabaseProvisioner {
    async fn create_database(&self, name: &str) -> Result<(), ProvisioningError> {
        self.bounded("create database", async {
            let ident = self.quoted(name).await?;

            query(&format!("CREATE DATABASE {ident}"))
                .execute(self.connections.central())
                .await?;

            info!(database = name, "created tenant database");

            Ok(())
        })
        .await
    }

    async fn migrate(&self, name: &str) -> Result<(), ProvisioningError> {
        validate_database_name(name)?;

        self.bounded("migrate database", async {
            let pool = self.connections.database(name).await;

            TENANT_MIGRATOR.run(&pool).await?;

            info!(database = name, "migrated tenant database");

            Ok(())
        })
        .await
    }

    async fn drop_database(&self, name: &str) -> Result<(), ProvisioningError> {
        self.bounded("drop database", async {
            let ident = self.quoted(name).await?;

            self.connections.forget(name).await;

            query(&format!("DROP DATABASE IF EXISTS {ident} WITH (FORCE)"))
                .execute(self.connections.central())
                .await?;

            info!(database = name, "dropped tenant database");

            Ok(())
        })
        .await
    }

    async fn database_exists(&self, name: &str) -> Result<bool, ProvisioningError> {
        self.bounded("check database", async {
            let exists = query_scalar(DATABASE_EXISTS_SQL)
                .bind(name)
                .fetch_one(self.connections.central())
                .await?;

            Ok(exists)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use sqlx::postgres::PgPoolOptions;
    use testresult::TestResult;

    use crate::test::TestDb;

    use super::*;

    fn offline_provisioner() -> TestResult<PgDatabaseProvisioner> {
        let central = PgPoolOptions::new().connect_lazy("postgres://localhost/unused")?;
        let connections = TenantConnections::from_url(central, "postgres://localhost/unused", 1)?;

        Ok(PgDatabaseProvisioner::new(
            Arc::new(connections),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected_before_any_ddl() -> TestResult {
        let provisioner = offline_provisioner()?;

        for name in ["", "tenant\"; DROP", "1tenant", "database"] {
            let result = provisioner.create_database(name).await;

            assert!(
                matches!(result, Err(ProvisioningError::InvalidName(_))),
                "{name:?} gave {result:?}"
            );
        }

        assert!(matches!(
            provisioner.migrate("bad-name").await,
            Err(ProvisioningError::InvalidName(_))
        ));

        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a container runtime"]
    async fn create_migrate_and_drop_round_trip() -> TestResult {
        let db = TestDb::new().await;
        let provisioner = PgDatabaseProvisioner::new(db.connections()?, Duration::from_secs(30));
        let name = "tenant_provisioning_check";

        provisioner.drop_database(name).await?;
        provisioner.create_database(name).await?;
        provisioner.migrate(name).await?;

        assert!(provisioner.database_exists(name).await?);

        provisioner.drop_database(name).await?;

        assert!(!provisioner.database_exists(name).await?);

        Ok(())
    }
}
