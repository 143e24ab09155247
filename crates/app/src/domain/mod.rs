//! Tenantry Domain Concerns

use std::{fmt, sync::Arc};

use crate::{audit::AuditSink, clock::Clock, mailer::Mailer, passwords::PasswordHasher};

pub mod access;
pub mod auth;
pub mod bootstrap;
pub mod impersonation;
pub mod provisioning;
pub mod tenants;
pub mod users;

/// Side-effect ports shared by every service.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub mailer: Arc<dyn Mailer>,
    pub audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
