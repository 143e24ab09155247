//! Tenancy Config

use clap::Args;

/// Tenant provisioning settings.
#[derive(Debug, Clone, Args)]
pub struct TenancyConfig {
    /// Base domain tenant subdomains are derived from
    #[arg(long, env = "TENANT_BASE_DOMAIN", default_value = "localhost")]
    pub base_domain: String,

    /// Domain of the central application, assigned to the system tenant
    #[arg(long, env = "CENTRAL_DOMAIN", default_value = "admin.localhost")]
    pub central_domain: String,

    /// Default timezone for new tenants
    #[arg(long, env = "TENANT_DEFAULT_TIMEZONE", default_value = "UTC")]
    pub default_timezone: String,
}
