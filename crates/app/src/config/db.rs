//! Database Config

use std::time::Duration;

use clap::Args;

/// Database settings.
#[derive(Debug, Clone, Args)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection string for the central store
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Maximum connections per tenant database pool
    #[arg(long, env = "TENANT_POOL_MAX_CONNECTIONS", default_value_t = 5)]
    pub tenant_pool_max_connections: u32,

    /// Timeout for creating, migrating or dropping a tenant database, in seconds
    #[arg(long, env = "PROVISIONING_TIMEOUT_SECONDS", default_value_t = 30)]
    pub provisioning_timeout_seconds: u64,
}

impl DatabaseConfig {
    #[must_use]
    pub const fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_seconds)
    }
}
