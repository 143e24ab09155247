//! Super-admin bootstrap service.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde_json::json;
use tenantry::{
    access::PLATFORM_ADMIN_ROLE,
    limits::Limits,
    plans::{Features, Plan},
    status::{TenantStatus, UserStatus},
    validation::{self, FieldErrors},
};
use tracing::{info, warn};

use crate::{
    audit::{self, Actor, AuditEvent},
    config::TenancyConfig,
    domain::{
        Collaborators,
        bootstrap::{
            errors::BootstrapError,
            models::{BootstrapOutcome, BootstrapRequest, BootstrapSeed},
            store::BootstrapStore,
        },
        tenants::models::{NewTenant, SYSTEM_TENANT_SLUG, TenantSettings, TenantUuid},
        users::models::{NewUser, UserUuid},
    },
    secrets::constant_time_eq,
};

/// One-time creation of the system tenant and its first super administrator.
#[derive(Clone)]
pub struct SuperAdminBootstrap {
    store: Arc<dyn BootstrapStore>,
    collaborators: Collaborators,
    tenancy: TenancyConfig,
    setup_key: Option<String>,
    complete: Arc<AtomicBool>,
}

impl std::fmt::Debug for SuperAdminBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperAdminBootstrap")
            .field("complete", &self.complete.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SuperAdminBootstrap {
    #[must_use]
    pub fn new(
        store: Arc<dyn BootstrapStore>,
        collaborators: Collaborators,
        tenancy: TenancyConfig,
        setup_key: Option<String>,
    ) -> Self {
        Self {
            store,
            collaborators,
            tenancy,
            setup_key,
            complete: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a super-admin exists. Once true, the answer is cached for the process.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be read.
    pub async fn is_bootstrapped(&self) -> Result<bool, BootstrapError> {
        if self.complete.load(Ordering::Acquire) {
            return Ok(true);
        }

        let complete = self.store.is_complete().await?;

        if complete {
            self.complete.store(true, Ordering::Release);
        }

        Ok(complete)
    }

    /// Create the system tenant and the first super-admin.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBootstrapped` once any super-admin exists (including when a concurrent
    /// call won), `InvalidSetupKey` unless the key matches the configured one, and a
    /// validation error for a bad email or short password.
    pub async fn bootstrap(&self, request: BootstrapRequest) -> Result<UserUuid, BootstrapError> {
        if self.is_bootstrapped().await? {
            return Err(BootstrapError::AlreadyBootstrapped);
        }

        if !self.setup_key_matches(&request.setup_key) {
            warn!("bootstrap attempted with an invalid setup key");

            return Err(BootstrapError::InvalidSetupKey);
        }

        let mut errors = FieldErrors::new();
        validation::require_text(&mut errors, "name", &request.name);
        validation::require_email(&mut errors, "email", &request.email);
        validation::require_password(&mut errors, "password", &request.password);
        errors.into_result()?;

        let now = self.collaborators.clock.now();
        let email = validation::normalize_email(&request.email);
        let name = request.name.trim().to_string();
        let password_hash = self.collaborators.hasher.hash(&request.password)?;

        let seed = BootstrapSeed {
            system_tenant: NewTenant {
                uuid: TenantUuid::new(),
                name: "System".to_string(),
                slug: SYSTEM_TENANT_SLUG.to_string(),
                domain: self.tenancy.central_domain.to_ascii_lowercase(),
                database_name: None,
                plan: Plan::Unlimited,
                status: TenantStatus::Active,
                admin_email: email.clone(),
                admin_name: name.clone(),
                settings: TenantSettings {
                    allow_registration: false,
                    require_email_verification: false,
                    timezone: self.tenancy.default_timezone.clone(),
                },
                features: Features::all(),
                limits: Limits::unlimited(),
                is_system: true,
            },
            super_admin: NewUser {
                uuid: UserUuid::new(),
                name,
                email,
                password_hash,
                status: UserStatus::Active,
                is_super_admin: true,
                must_change_password: false,
                email_verified_at: Some(now),
                roles: vec![PLATFORM_ADMIN_ROLE.to_string()],
            },
        };

        let outcome = self.store.bootstrap(seed, now).await?;
        self.complete.store(true, Ordering::Release);

        let BootstrapOutcome::Created {
            system_tenant,
            super_admin,
        } = outcome
        else {
            return Err(BootstrapError::AlreadyBootstrapped);
        };

        info!(tenant = %system_tenant, user = %super_admin, "platform bootstrapped");

        audit::record(
            self.collaborators.audit.as_ref(),
            AuditEvent::new(Actor::System, "system.bootstrapped")
                .tenant(system_tenant)
                .subject(super_admin)
                .properties(json!({ "role": PLATFORM_ADMIN_ROLE })),
            now,
        )
        .await;

        Ok(super_admin)
    }

    /// An unset or empty configured key never matches.
    fn setup_key_matches(&self, provided: &str) -> bool {
        self.setup_key
            .as_deref()
            .filter(|expected| !expected.is_empty())
            .is_some_and(|expected| constant_time_eq(expected, provided))
    }
}
