//! Bootstrap Models

use std::fmt;

use crate::domain::{
    tenants::models::{NewTenant, TenantUuid},
    users::models::{NewUser, UserUuid},
};

/// First super-admin request.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub setup_key: String,
}

impl fmt::Debug for BootstrapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Rows written by a bootstrap. The system tenant is only inserted when none exists yet.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapSeed {
    pub system_tenant: NewTenant,
    pub super_admin: NewUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Created {
        system_tenant: TenantUuid,
        super_admin: UserUuid,
    },

    /// Another caller completed the bootstrap first.
    AlreadyComplete,
}
