//! Tenant Models

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tenantry::{
    limits::{Limits, Resource},
    plans::{Features, Plan},
    status::TenantStatus,
};

use crate::{domain::users::models::UserUuid, uuids::TypedUuid};

/// Slug and name of the tenant that owns platform operators. No registered tenant may take it.
pub const SYSTEM_TENANT_SLUG: &str = "system";

/// Tenant UUID
pub type TenantUuid = TypedUuid<Tenant>;

/// Domain UUID
pub type DomainUuid = TypedUuid<TenantDomain>;

/// Tenant Model
#[derive(Debug, Clone, PartialEq)]
pub struct Tenant {
    pub uuid: TenantUuid,
    pub name: String,
    pub slug: String,
    pub domain: String,

    /// Isolated database; `None` for the system tenant, which lives in the central store.
    pub database_name: Option<String>,
    pub migrated_at: Option<Timestamp>,
    pub plan: Plan,
    pub plan_expires_at: Option<Timestamp>,
    pub monthly_revenue_cents: i64,
    pub status: TenantStatus,
    pub activated_at: Option<Timestamp>,
    pub suspended_at: Option<Timestamp>,
    pub suspension_reason: Option<String>,
    pub admin_email: String,
    pub admin_name: String,
    pub settings: TenantSettings,
    pub features: Features,
    pub limits: Limits,
    pub metadata: Value,
    pub user_count: i64,
    pub storage_used: i64,
    pub api_calls_count: i64,
    pub is_system: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Tenant {
    /// Context for tenant-scoped calls against this tenant.
    #[must_use]
    pub fn context(&self) -> TenantContext {
        TenantContext {
            tenant: self.uuid,
            database: self.database_name.clone(),
        }
    }

    /// Current value of a counted resource.
    #[must_use]
    pub const fn counter(&self, counter: Counter) -> i64 {
        match counter {
            Counter::Users => self.user_count,
            Counter::Storage => self.storage_used,
            Counter::ApiCalls => self.api_calls_count,
        }
    }
}

/// Tenant-level switches stored in the `settings` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    pub allow_registration: bool,
    pub require_email_verification: bool,
    pub timezone: String,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            allow_registration: true,
            require_email_verification: true,
            timezone: "UTC".to_string(),
        }
    }
}

/// Domain routed to a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantDomain {
    pub uuid: DomainUuid,
    pub tenant: TenantUuid,
    pub domain: String,
    pub is_primary: bool,
}

/// New Tenant Model
#[derive(Debug, Clone, PartialEq)]
pub struct NewTenant {
    pub uuid: TenantUuid,
    pub name: String,
    pub slug: String,
    pub domain: String,
    pub database_name: Option<String>,
    pub plan: Plan,
    pub status: TenantStatus,
    pub admin_email: String,
    pub admin_name: String,
    pub settings: TenantSettings,
    pub features: Features,
    pub limits: Limits,
    pub is_system: bool,
}

/// The tenant a call acts on and where its data lives.
///
/// Every tenant-scoped store call takes one; connections are never chosen from ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantContext {
    tenant: TenantUuid,
    database: Option<String>,
}

impl TenantContext {
    #[must_use]
    pub const fn new(tenant: TenantUuid, database: Option<String>) -> Self {
        Self { tenant, database }
    }

    /// Context for a tenant stored in the central database.
    #[must_use]
    pub const fn central(tenant: TenantUuid) -> Self {
        Self::new(tenant, None)
    }

    #[must_use]
    pub const fn tenant(&self) -> TenantUuid {
        self.tenant
    }

    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }
}

/// Tenant registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub admin_email: String,
    pub admin_name: String,
    pub plan: Plan,

    /// Custom primary domain; derived from the slug when omitted.
    pub domain: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTenant {
    pub tenant: Tenant,
    pub admin: UserUuid,
}

/// Result of a slug availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub normalized_slug: String,
    pub derived_domain: String,
}

/// Status transition applied by a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    Activate { at: Timestamp },
    Suspend { at: Timestamp, reason: String },
}

impl StatusChange {
    #[must_use]
    pub const fn target(&self) -> TenantStatus {
        match self {
            Self::Activate { .. } => TenantStatus::Active,
            Self::Suspend { .. } => TenantStatus::Suspended,
        }
    }
}

/// Usage counter kept on the tenant row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Users,
    Storage,
    ApiCalls,
}

impl Counter {
    /// Limit governing the counter.
    #[must_use]
    pub const fn resource(self) -> Resource {
        match self {
            Self::Users => Resource::Users,
            Self::Storage => Resource::Storage,
            Self::ApiCalls => Resource::ApiCalls,
        }
    }
}
