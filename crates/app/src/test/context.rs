//! Test context for service-level tests over in-memory stores.

use std::sync::Arc;

use jiff::Timestamp;
use tenantry::access::{ADMIN_ROLE, Principal, RoleGraph};

use crate::{
    audit::Actor,
    config::TenancyConfig,
    domain::{
        Collaborators,
        access::AccessControl,
        auth::{AuthSession, AuthSettings},
        bootstrap::SuperAdminBootstrap,
        impersonation::{ImpersonationBroker, ImpersonationSettings},
        tenants::{
            TenantLifecycle,
            models::{RegisteredTenant, Registration, TenantContext},
        },
        users::{UserStore, models::User},
    },
    rate_limits::RateLimiter,
};

use super::{
    fakes::{
        ManualClock, MemoryBootstrapStore, MemoryEmailVerifications, MemoryImpersonationStore,
        MemoryProvisioner, MemoryRateLimits, MemoryResetTokens, MemoryTenantStore, MemoryUserStore,
        PlainHasher, RecordingAuditSink, RecordingMailer,
    },
    fixtures,
};

/// Setup key accepted by the context's bootstrap service.
pub const SETUP_KEY: &str = "test-setup-key";

/// Unix second the context's clock starts at.
pub const START_SECOND: i64 = 1_700_000_000;

pub struct TestContext {
    pub clock: Arc<ManualClock>,
    pub tenants: Arc<MemoryTenantStore>,
    pub users: Arc<MemoryUserStore>,
    pub provisioner: Arc<MemoryProvisioner>,
    pub resets: Arc<MemoryResetTokens>,
    pub tokens: Arc<MemoryImpersonationStore>,
    pub mailer: Arc<RecordingMailer>,
    pub audit: Arc<RecordingAuditSink>,
    pub lifecycle: TenantLifecycle,
    pub access: AccessControl,
    pub auth: AuthSession,
    pub broker: ImpersonationBroker,
    pub bootstrap: SuperAdminBootstrap,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_auth_settings(AuthSettings::default())
    }

    pub fn with_auth_settings(settings: AuthSettings) -> Self {
        let clock = Arc::new(ManualClock::at(
            Timestamp::from_second(START_SECOND).expect("Failed to build start time"),
        ));
        let tenants = Arc::new(MemoryTenantStore::default());
        let users = Arc::new(MemoryUserStore::default());
        let provisioner = Arc::new(MemoryProvisioner::default());
        let resets = Arc::new(MemoryResetTokens::default());
        let tokens = Arc::new(MemoryImpersonationStore::default());
        let mailer = Arc::new(RecordingMailer::default());
        let audit = Arc::new(RecordingAuditSink::default());

        let collaborators = Collaborators {
            clock: clock.clone(),
            hasher: Arc::new(PlainHasher),
            mailer: mailer.clone(),
            audit: audit.clone(),
        };

        let tenancy = tenancy();

        Self {
            lifecycle: TenantLifecycle::new(
                tenants.clone(),
                users.clone(),
                provisioner.clone(),
                collaborators.clone(),
                tenancy.clone(),
            ),
            access: AccessControl::new(tenants.clone(), users.clone(), collaborators.clone()),
            auth: AuthSession::new(
                tenants.clone(),
                users.clone(),
                resets.clone(),
                Arc::new(MemoryEmailVerifications::default()),
                RateLimiter::new(Arc::new(MemoryRateLimits::default()), clock.clone()),
                collaborators.clone(),
                settings,
            ),
            broker: ImpersonationBroker::new(
                tokens.clone(),
                tenants.clone(),
                users.clone(),
                collaborators.clone(),
                ImpersonationSettings::default(),
            ),
            bootstrap: SuperAdminBootstrap::new(
                Arc::new(MemoryBootstrapStore::new(tenants.clone(), users.clone())),
                collaborators,
                tenancy,
                Some(SETUP_KEY.to_string()),
            ),
            clock,
            tenants,
            users,
            provisioner,
            resets,
            tokens,
            mailer,
            audit,
        }
    }

    /// Register and activate a basic-plan tenant.
    pub async fn active_tenant(&self, name: &str) -> RegisteredTenant {
        let registered = self
            .lifecycle
            .register(registration(name), Actor::System)
            .await
            .expect("Failed to register test tenant");

        let tenant = self
            .lifecycle
            .activate(registered.tenant.uuid, Actor::System)
            .await
            .expect("Failed to activate test tenant");

        RegisteredTenant {
            tenant,
            admin: registered.admin,
        }
    }

    /// Principal for a user, resolved the way a login would.
    pub async fn principal(&self, ctx: &TenantContext, user: &User) -> Principal {
        let graph: RoleGraph = self
            .users
            .role_graph(ctx)
            .await
            .expect("Failed to load role graph");

        Principal::new(
            user.uuid.into_uuid(),
            ctx.tenant().into_uuid(),
            user.is_super_admin,
            &user.roles,
            &graph,
        )
    }

    /// Add a user with password `password123`.
    pub async fn add_user(&self, ctx: &TenantContext, email: &str, roles: &[&str]) -> User {
        self.users
            .create_user(ctx, fixtures::new_user(email, roles))
            .await
            .expect("Failed to create test user")
    }

    /// The registered tenant's admin user.
    pub async fn admin(&self, registered: &RegisteredTenant) -> User {
        let admin = self
            .users
            .get_user(&registered.tenant.context(), registered.admin)
            .await
            .expect("Failed to load tenant admin");

        assert!(admin.has_role(ADMIN_ROLE), "tenant admin should hold the admin role");

        admin
    }
}

pub fn tenancy() -> TenancyConfig {
    TenancyConfig {
        base_domain: "localhost".to_string(),
        central_domain: "admin.localhost".to_string(),
        default_timezone: "UTC".to_string(),
    }
}

pub fn registration(name: &str) -> Registration {
    let slug = tenantry::slug::normalize(name);

    Registration {
        name: name.to_string(),
        admin_email: format!("admin@{slug}.test"),
        admin_name: "Admin".to_string(),
        plan: tenantry::plans::Plan::Basic,
        domain: None,
        timezone: None,
    }
}
