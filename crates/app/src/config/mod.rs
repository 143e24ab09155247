//! Application configuration
//!
//! Settings are grouped into clap `Args` structs so each command flattens only what it needs.
//! Every value can also come from the environment; `.env` is loaded by the binary.

use clap::Args;

mod db;
mod observability;
mod security;
mod tenancy;

pub use db::DatabaseConfig;
pub use observability::{LogFormat, LoggingConfig};
pub use security::SecurityConfig;
pub use tenancy::TenancyConfig;

/// Everything needed to build an [`AppContext`](crate::context::AppContext).
#[derive(Debug, Clone, Args)]
pub struct AppConfig {
    /// Database settings.
    #[command(flatten)]
    pub database: DatabaseConfig,

    /// Tenant provisioning settings.
    #[command(flatten)]
    pub tenancy: TenancyConfig,

    /// Authentication and bootstrap settings.
    #[command(flatten)]
    pub security: SecurityConfig,
}
