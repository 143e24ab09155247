//! Database connection management
//!
//! The central store holds tenants, super-admins and platform state. Every other tenant has
//! its own database on the same server, reached through [`TenantConnections`].

use std::{error::Error as StdError, str::FromStr};

use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use rustc_hash::FxHashMap;
use sqlx::{
    PgPool, Postgres, Row, Transaction,
    migrate::{MigrateError, Migrator},
    postgres::{PgConnectOptions, PgPoolOptions, PgRow},
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::tenants::models::TenantContext;

/// Central store migrations.
pub static CENTRAL_MIGRATOR: Migrator = sqlx::migrate!("../../migrations/central");

/// Per-tenant store migrations.
pub static TENANT_MIGRATOR: Migrator = sqlx::migrate!("../../migrations/tenant");

#[derive(Debug, Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction on the central store.
    ///
    /// # Errors
    ///
    /// Returns an error when starting the transaction fails.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }
}

/// Connect to `PostgreSQL`.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPool::connect(database_url).await
}

/// Apply pending central migrations.
///
/// # Errors
///
/// Returns an error when a migration fails or the history is inconsistent.
pub async fn migrate_central(pool: &PgPool) -> Result<(), MigrateError> {
    CENTRAL_MIGRATOR.run(pool).await
}

/// Decode a text column into a type parsed with [`FromStr`].
pub(crate) fn parse_column<T>(row: &PgRow, column: &str) -> sqlx::Result<T>
where
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
{
    row.try_get::<String, _>(column)?
        .parse()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

/// Decode a nullable timestamp column.
pub(crate) fn optional_timestamp(row: &PgRow, column: &str) -> sqlx::Result<Option<Timestamp>> {
    Ok(row
        .try_get::<Option<SqlxTimestamp>, _>(column)?
        .map(SqlxTimestamp::to_jiff))
}

/// Lazily opened pools for tenant databases, keyed by database name.
#[derive(Debug)]
pub struct TenantConnections {
    central: PgPool,
    options: PgConnectOptions,
    max_connections: u32,
    pools: RwLock<FxHashMap<String, PgPool>>,
}

impl TenantConnections {
    #[must_use]
    pub fn new(central: PgPool, options: PgConnectOptions, max_connections: u32) -> Self {
        Self {
            central,
            options,
            max_connections,
            pools: RwLock::new(FxHashMap::default()),
        }
    }

    /// Build from the central URL; tenant pools reuse its host and credentials.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL cannot be parsed.
    pub fn from_url(
        central: PgPool,
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, sqlx::Error> {
        let options = PgConnectOptions::from_str(database_url)?;

        Ok(Self::new(central, options, max_connections))
    }

    #[must_use]
    pub fn central(&self) -> &PgPool {
        &self.central
    }

    /// Pool serving a tenant context: the central pool for the system tenant, the tenant's
    /// own database otherwise.
    pub async fn pool_for(&self, ctx: &TenantContext) -> PgPool {
        match ctx.database() {
            None => self.central.clone(),
            Some(name) => self.database(name).await,
        }
    }

    /// Pool for a named tenant database, opened on first use.
    pub async fn database(&self, name: &str) -> PgPool {
        if let Some(pool) = self.pools.read().await.get(name) {
            return pool.clone();
        }

        let mut pools = self.pools.write().await;

        pools
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(database = name, "opening tenant pool");

                PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .connect_lazy_with(self.options.clone().database(name))
            })
            .clone()
    }

    /// Close and discard the pool for a database that is about to be dropped.
    pub async fn forget(&self, name: &str) {
        let pool = self.pools.write().await.remove(name);

        if let Some(pool) = pool {
            pool.close().await;
        }
    }
}
