//! Tenant lifecycle
//!
//! Registration provisions the tenant row, its database and its first admin as one unit: any
//! failure after the row exists drops the database and purges the row, so either all three
//! exist or none do. Status changes are conditional updates on the current status.
//!
//! A registered tenant stays pending until its emailed activation token is redeemed or an
//! operator activates it. The system slug and the central domain are never handed out.

use std::sync::Arc;

use serde_json::json;
use tenantry::{
    access::ADMIN_ROLE,
    plans::Plan,
    slug,
    status::{TenantStatus, UserStatus},
    validation::{self, FieldErrors, ValidationError},
};
use tracing::{info, warn};

use crate::{
    audit::{self, Actor, AuditEvent},
    config::TenancyConfig,
    domain::{
        Collaborators,
        provisioning::DatabaseProvisioner,
        tenants::{
            errors::{LifecycleError, log_compensation_failure},
            models::{
                Availability, Counter, NewTenant, RegisteredTenant, Registration,
                SYSTEM_TENANT_SLUG, StatusChange, Tenant, TenantContext, TenantSettings, TenantUuid,
            },
            store::TenantStore,
        },
        users::{
            UserStore,
            models::{NewUser, UserUuid},
        },
    },
    mailer::{MailMessage, MailTemplate},
    secrets::{
        TENANT_VERIFICATION_TOKEN_PREFIX, generate_temporary_password, generate_token, hash_token,
    },
};

/// Registration input after validation and normalization.
#[derive(Debug)]
struct ValidRegistration {
    name: String,
    admin_email: String,
    admin_name: String,
    plan: Plan,
    slug: String,
    domain: String,
    timezone: String,
}

/// Registers tenants and moves them through their lifecycle.
#[derive(Clone)]
pub struct TenantLifecycle {
    tenants: Arc<dyn TenantStore>,
    users: Arc<dyn UserStore>,
    provisioner: Arc<dyn DatabaseProvisioner>,
    collaborators: Collaborators,
    tenancy: TenancyConfig,
}

impl std::fmt::Debug for TenantLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantLifecycle")
            .field("tenancy", &self.tenancy)
            .finish_non_exhaustive()
    }
}

impl TenantLifecycle {
    #[must_use]
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        users: Arc<dyn UserStore>,
        provisioner: Arc<dyn DatabaseProvisioner>,
        collaborators: Collaborators,
        tenancy: TenancyConfig,
    ) -> Self {
        Self {
            tenants,
            users,
            provisioner,
            collaborators,
            tenancy,
        }
    }

    /// Register a tenant: row, isolated database, first admin and a welcome message carrying
    /// the activation token. The tenant stays pending until [`Self::verify`] or
    /// [`Self::activate`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad input, a conflict when the admin email, slug or
    /// domain is taken, and a provisioning error when the database cannot be set up. Every
    /// failure after the row is inserted is rolled back before returning.
    pub async fn register(
        &self,
        registration: Registration,
        actor: Actor,
    ) -> Result<RegisteredTenant, LifecycleError> {
        let registration = self.validate(registration)?;

        if self
            .tenants
            .admin_email_taken(&registration.admin_email)
            .await?
        {
            return Err(LifecycleError::Conflict("admin email"));
        }

        if self.tenants.slug_taken(&registration.slug).await? {
            return Err(LifecycleError::Conflict("slug"));
        }

        if self.tenants.domain_taken(&registration.domain).await? {
            return Err(LifecycleError::Conflict("domain"));
        }

        let now = self.collaborators.clock.now();
        let database = slug::database_name(&registration.slug, now);
        let defaults = registration.plan.defaults();

        let tenant = self
            .tenants
            .create_tenant(NewTenant {
                uuid: TenantUuid::new(),
                name: registration.name.clone(),
                slug: registration.slug.clone(),
                domain: registration.domain.clone(),
                database_name: Some(database.clone()),
                plan: registration.plan,
                status: TenantStatus::Pending,
                admin_email: registration.admin_email.clone(),
                admin_name: registration.admin_name.clone(),
                settings: TenantSettings {
                    timezone: registration.timezone.clone(),
                    ..TenantSettings::default()
                },
                features: defaults.features,
                limits: defaults.limits,
                is_system: false,
            })
            .await?;

        let verification_token = generate_token(TENANT_VERIFICATION_TOKEN_PREFIX);

        if let Err(error) = self
            .tenants
            .store_verification_token(tenant.uuid, &hash_token(&verification_token))
            .await
        {
            self.purge(&tenant).await;

            return Err(error.into());
        }

        if let Err(error) = self.provisioner.create_database(&database).await {
            self.purge(&tenant).await;

            return Err(error.into());
        }

        let (admin, temporary_password) =
            match self.provision_admin(&tenant, &database, &registration).await {
                Ok(provisioned) => provisioned,
                Err(error) => {
                    if let Err(source) = self.provisioner.drop_database(&database).await {
                        log_compensation_failure("drop database", &source);
                    }

                    self.purge(&tenant).await;

                    return Err(error);
                }
            };

        let tenant = self.tenants.get_tenant(tenant.uuid).await?;

        let welcome = MailMessage {
            to: tenant.admin_email.clone(),
            template: MailTemplate::TenantWelcome {
                tenant_name: tenant.name.clone(),
                domain: tenant.domain.clone(),
                temporary_password,
                verification_token,
            },
        };

        if let Err(source) = self.collaborators.mailer.send(welcome).await {
            warn!(tenant = %tenant.uuid, error = %source, "failed to queue welcome message");
        }

        info!(tenant = %tenant.uuid, slug = %tenant.slug, "tenant registered");

        self.audit(
            AuditEvent::new(actor, "tenant.registered")
                .tenant(tenant.uuid)
                .subject(tenant.uuid)
                .properties(json!({
                    "slug": tenant.slug,
                    "plan": tenant.plan.as_str(),
                })),
        )
        .await;

        Ok(RegisteredTenant { tenant, admin })
    }

    /// Move a pending or suspended tenant to active, migrating its database first if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` from any other status and `NotFound` for unknown or
    /// deleted tenants.
    pub async fn activate(
        &self,
        tenant: TenantUuid,
        actor: Actor,
    ) -> Result<Tenant, LifecycleError> {
        let current = self.tenants.get_tenant(tenant).await?;

        current.status.activate()?;

        if let Some(database) = current.database_name.as_deref() {
            if current.migrated_at.is_none() && self.provisioner.database_exists(database).await? {
                self.provisioner.migrate(database).await?;
                self.tenants
                    .mark_migrated(tenant, self.collaborators.clock.now())
                    .await?;
            }
        }

        let activated = self
            .tenants
            .transition_status(
                tenant,
                StatusChange::Activate {
                    at: self.collaborators.clock.now(),
                },
            )
            .await?;

        info!(tenant = %tenant, "tenant activated");

        self.audit(
            AuditEvent::new(actor, "tenant.activated")
                .tenant(tenant)
                .subject(tenant)
                .properties(json!({ "from": current.status.as_str() })),
        )
        .await;

        Ok(activated)
    }

    /// Activate a pending tenant with the token from its welcome message. Each token works
    /// once, and only while the tenant is still pending.
    ///
    /// # Errors
    ///
    /// Returns `InvalidVerificationToken` for unknown or spent tokens and the activation
    /// errors otherwise; a failed activation leaves the token usable.
    pub async fn verify(&self, token: &str) -> Result<Tenant, LifecycleError> {
        let token_hash = hash_token(token.trim());

        let tenant = self
            .tenants
            .consume_verification_token(&token_hash)
            .await?
            .ok_or(LifecycleError::InvalidVerificationToken)?;

        match self.activate(tenant, Actor::System).await {
            Ok(activated) => {
                info!(tenant = %tenant, "tenant verified");

                Ok(activated)
            }
            Err(error) => {
                if let Err(source) = self
                    .tenants
                    .store_verification_token(tenant, &token_hash)
                    .await
                {
                    log_compensation_failure("restore tenant verification token", &source);
                }

                Err(error)
            }
        }
    }

    /// Suspend an active tenant. Data is kept; logins fail until it is activated again.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty reason and `InvalidTransition` unless the
    /// tenant is active.
    pub async fn suspend(
        &self,
        tenant: TenantUuid,
        reason: &str,
        actor: Actor,
    ) -> Result<Tenant, LifecycleError> {
        let mut errors = FieldErrors::new();
        validation::require_text(&mut errors, "reason", reason);
        errors.into_result()?;

        let suspended = self
            .tenants
            .transition_status(
                tenant,
                StatusChange::Suspend {
                    at: self.collaborators.clock.now(),
                    reason: reason.trim().to_string(),
                },
            )
            .await?;

        info!(tenant = %tenant, reason, "tenant suspended");

        self.audit(
            AuditEvent::new(actor, "tenant.suspended")
                .tenant(tenant)
                .subject(tenant)
                .properties(json!({ "reason": reason.trim() })),
        )
        .await;

        Ok(suspended)
    }

    /// Drop the tenant's database, then soft-delete the row.
    ///
    /// # Errors
    ///
    /// Returns `SystemTenant` for the system tenant. If the database cannot be dropped the
    /// row is left untouched and the provisioning error is returned.
    pub async fn delete(&self, tenant: TenantUuid, actor: Actor) -> Result<(), LifecycleError> {
        let current = self.tenants.get_tenant(tenant).await?;

        if current.is_system {
            return Err(LifecycleError::SystemTenant);
        }

        if let Some(database) = current.database_name.as_deref() {
            self.provisioner.drop_database(database).await?;
        }

        self.tenants
            .soft_delete(tenant, self.collaborators.clock.now())
            .await?;

        info!(tenant = %tenant, "tenant deleted");

        self.audit(
            AuditEvent::new(actor, "tenant.deleted")
                .tenant(tenant)
                .subject(tenant)
                .properties(json!({ "slug": current.slug })),
        )
        .await;

        Ok(())
    }

    /// Whether a requested slug, and the domain derived from it, are free. Reserved names are
    /// never available.
    ///
    /// # Errors
    ///
    /// Returns a validation error when nothing usable remains after normalization.
    pub async fn check_availability(
        &self,
        requested: &str,
    ) -> Result<Availability, LifecycleError> {
        let normalized_slug = slug::normalize(requested);

        if normalized_slug.is_empty() {
            return Err(ValidationError::field("slug", "must contain letters or digits").into());
        }

        let derived_domain = slug::derive_domain(&normalized_slug, &self.tenancy.base_domain);

        let available = normalized_slug != SYSTEM_TENANT_SLUG
            && !self.is_central_domain(&derived_domain)
            && !self.tenants.slug_taken(&normalized_slug).await?
            && !self.tenants.domain_taken(&derived_domain).await?;

        Ok(Availability {
            available,
            normalized_slug,
            derived_domain,
        })
    }

    /// Context for a live tenant.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or deleted tenants.
    pub async fn resolve(&self, tenant: TenantUuid) -> Result<TenantContext, LifecycleError> {
        Ok(self.tenants.get_tenant(tenant).await?.context())
    }

    /// Context for the live tenant serving a request host. Ports are ignored.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no live tenant serves the host.
    pub async fn resolve_domain(&self, host: &str) -> Result<TenantContext, LifecycleError> {
        let domain = host
            .trim()
            .rsplit_once(':')
            .map_or(host.trim(), |(domain, _port)| domain);

        Ok(self.tenants.find_by_domain(domain).await?.context())
    }

    /// Record stored bytes added (positive) or freed (negative).
    ///
    /// # Errors
    ///
    /// Returns `LimitExceeded` when the storage limit would be passed and a validation error
    /// when more is freed than is in use; the counter is unchanged in both cases.
    pub async fn adjust_storage(
        &self,
        tenant: TenantUuid,
        delta_bytes: i64,
    ) -> Result<i64, LifecycleError> {
        Ok(self
            .tenants
            .adjust_counter(tenant, Counter::Storage, delta_bytes)
            .await?)
    }

    /// Count API calls against the tenant's allowance.
    ///
    /// # Errors
    ///
    /// Returns a validation error for negative counts and `LimitExceeded` past the allowance.
    pub async fn record_api_calls(
        &self,
        tenant: TenantUuid,
        calls: i64,
    ) -> Result<i64, LifecycleError> {
        if calls < 0 {
            return Err(ValidationError::field("calls", "must not be negative").into());
        }

        Ok(self
            .tenants
            .adjust_counter(tenant, Counter::ApiCalls, calls)
            .await?)
    }

    /// Move a tenant to another plan, replacing its features and limits.
    ///
    /// # Errors
    ///
    /// Returns a validation error for plans tenants cannot hold.
    pub async fn change_plan(
        &self,
        tenant: TenantUuid,
        plan: Plan,
        actor: Actor,
    ) -> Result<Tenant, LifecycleError> {
        if !plan.is_registrable() {
            return Err(ValidationError::field("plan", "is reserved for the system tenant").into());
        }

        let updated = self.tenants.update_plan(tenant, plan).await?;

        self.audit(
            AuditEvent::new(actor, "tenant.plan_changed")
                .tenant(tenant)
                .subject(tenant)
                .properties(json!({ "plan": plan.as_str() })),
        )
        .await;

        Ok(updated)
    }

    fn validate(&self, registration: Registration) -> Result<ValidRegistration, ValidationError> {
        let mut errors = FieldErrors::new();

        validation::require_text(&mut errors, "name", &registration.name);
        validation::require_text(&mut errors, "admin_name", &registration.admin_name);
        validation::require_email(&mut errors, "admin_email", &registration.admin_email);

        if !registration.plan.is_registrable() {
            errors.add("plan", "is reserved for the system tenant");
        }

        let slug = slug::normalize(&registration.name);

        if slug.is_empty() && !registration.name.trim().is_empty() {
            errors.add("name", "must contain letters or digits");
        }

        let domain = match registration.domain.as_deref().map(str::trim) {
            Some(domain) if !domain.is_empty() => {
                if !is_hostname(domain) {
                    errors.add("domain", "must be a valid host name");
                }

                domain.to_ascii_lowercase()
            }
            _ => slug::derive_domain(&slug, &self.tenancy.base_domain),
        };

        if slug == SYSTEM_TENANT_SLUG {
            errors.add("name", "is reserved");
        }

        if self.is_central_domain(&domain) {
            errors.add("domain", "is reserved");
        }

        let timezone = match registration.timezone.as_deref().map(str::trim) {
            Some(timezone) if !timezone.is_empty() => {
                if jiff::tz::TimeZone::get(timezone).is_err() {
                    errors.add("timezone", "is not a known time zone");
                }

                timezone.to_string()
            }
            _ => self.tenancy.default_timezone.clone(),
        };

        errors.into_result()?;

        Ok(ValidRegistration {
            name: registration.name.trim().to_string(),
            admin_email: validation::normalize_email(&registration.admin_email),
            admin_name: registration.admin_name.trim().to_string(),
            plan: registration.plan,
            slug,
            domain,
            timezone,
        })
    }

    fn is_central_domain(&self, domain: &str) -> bool {
        domain.eq_ignore_ascii_case(&self.tenancy.central_domain)
    }

    /// Migrate the new database and create the first admin inside it.
    async fn provision_admin(
        &self,
        tenant: &Tenant,
        database: &str,
        registration: &ValidRegistration,
    ) -> Result<(UserUuid, String), LifecycleError> {
        self.provisioner.migrate(database).await?;

        let now = self.collaborators.clock.now();

        self.tenants.mark_migrated(tenant.uuid, now).await?;
        self.tenants
            .adjust_counter(tenant.uuid, Counter::Users, 1)
            .await?;

        let temporary_password = generate_temporary_password();
        let password_hash = self.collaborators.hasher.hash(&temporary_password)?;

        let admin = self
            .users
            .create_user(
                &tenant.context(),
                NewUser {
                    uuid: UserUuid::new(),
                    name: registration.admin_name.clone(),
                    email: registration.admin_email.clone(),
                    password_hash,
                    status: UserStatus::Active,
                    is_super_admin: false,
                    must_change_password: true,
                    email_verified_at: Some(now),
                    roles: vec![ADMIN_ROLE.to_string()],
                },
            )
            .await?;

        Ok((admin.uuid, temporary_password))
    }

    async fn purge(&self, tenant: &Tenant) {
        if let Err(source) = self.tenants.purge_tenant(tenant.uuid).await {
            log_compensation_failure("purge tenant row", &source);
        }
    }

    async fn audit(&self, event: AuditEvent) {
        audit::record(
            self.collaborators.audit.as_ref(),
            event,
            self.collaborators.clock.now(),
        )
        .await;
    }
}

fn is_hostname(domain: &str) -> bool {
    domain.len() <= 253
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tenantry::limits::{GIB, LimitExceeded, Resource};
    use testresult::TestResult;

    use super::*;
    use crate::{
        domain::provisioning::{MockDatabaseProvisioner, ProvisioningError},
        test::{
            TestContext,
            context::{registration, tenancy},
            fakes::{
                ManualClock, MemoryTenantStore, MemoryUserStore, PlainHasher, RecordingAuditSink,
                RecordingMailer,
            },
            fixtures,
        },
    };

    #[tokio::test]
    async fn register_creates_row_database_and_admin() -> TestResult {
        let ctx = TestContext::new();

        let registered = ctx
            .lifecycle
            .register(registration("Acme Corp"), Actor::System)
            .await?;

        let tenant = &registered.tenant;
        let database = tenant.database_name.clone().ok_or("tenant has no database")?;

        assert_eq!(tenant.slug, "acme-corp");
        assert_eq!(tenant.domain, "acme-corp.localhost");
        assert_eq!(tenant.status, TenantStatus::Pending);
        assert_eq!(tenant.user_count, 1);
        assert!(tenant.migrated_at.is_some());
        assert_eq!(ctx.provisioner.databases(), [database.clone()]);
        assert_eq!(ctx.provisioner.migrated(), [database]);

        let admin = ctx.admin(&registered).await;

        assert_eq!(admin.email, "admin@acme-corp.test");
        assert!(admin.must_change_password);

        let sent = ctx.mailer.sent();

        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "admin@acme-corp.test");
        assert!(matches!(sent[0].template, MailTemplate::TenantWelcome { .. }));
        assert_eq!(ctx.audit.actions(), ["tenant.registered"]);

        Ok(())
    }

    #[tokio::test]
    async fn welcome_password_signs_the_admin_in() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx
            .lifecycle
            .register(registration("Acme"), Actor::System)
            .await?;

        let MailTemplate::TenantWelcome {
            temporary_password, ..
        } = &ctx.mailer.sent()[0].template
        else {
            return Err("expected a welcome message".into());
        };

        let admin = ctx.admin(&registered).await;

        assert_eq!(admin.password_hash, format!("plain:{temporary_password}"));

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_slug_is_rejected_without_side_effects() -> TestResult {
        let ctx = TestContext::new();

        ctx.lifecycle
            .register(registration("Acme"), Actor::System)
            .await?;

        let mut duplicate = registration("ACME!");
        duplicate.admin_email = "someone@else.test".to_string();

        let result = ctx.lifecycle.register(duplicate, Actor::System).await;

        assert!(matches!(result, Err(LifecycleError::Conflict("slug"))));
        assert_eq!(ctx.tenants.rows().len(), 1);
        assert_eq!(ctx.provisioner.databases().len(), 1);
        assert_eq!(ctx.users.rows().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn admin_email_must_be_unique_across_tenants() -> TestResult {
        let ctx = TestContext::new();

        ctx.lifecycle
            .register(registration("Acme"), Actor::System)
            .await?;

        let mut other = registration("Globex");
        other.admin_email = "ADMIN@acme.test".to_string();

        let result = ctx.lifecycle.register(other, Actor::System).await;

        assert!(matches!(result, Err(LifecycleError::Conflict("admin email"))));

        Ok(())
    }

    #[tokio::test]
    async fn invalid_registrations_report_every_field() -> TestResult {
        let ctx = TestContext::new();

        let result = ctx
            .lifecycle
            .register(
                Registration {
                    name: String::new(),
                    admin_email: "not-an-email".to_string(),
                    admin_name: "Admin".to_string(),
                    plan: Plan::Unlimited,
                    domain: Some("bad domain".to_string()),
                    timezone: Some("Mars/Olympus".to_string()),
                },
                Actor::System,
            )
            .await;

        let Err(LifecycleError::Validation(error)) = result else {
            return Err(format!("expected a validation error, got {result:?}").into());
        };

        for field in ["name", "admin_email", "plan", "domain", "timezone"] {
            assert!(error.fields.get(field).is_some(), "missing error for {field}");
        }

        assert!(ctx.tenants.rows().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn the_system_slug_and_central_domain_are_reserved() -> TestResult {
        let ctx = TestContext::new();

        let system = ctx.lifecycle.check_availability("System").await?;

        assert_eq!(system.normalized_slug, SYSTEM_TENANT_SLUG);
        assert!(!system.available);

        let central = ctx.lifecycle.check_availability("Admin").await?;

        assert_eq!(central.derived_domain, "admin.localhost");
        assert!(!central.available);

        let Err(LifecycleError::Validation(error)) = ctx
            .lifecycle
            .register(registration("System"), Actor::System)
            .await
        else {
            return Err("expected the system slug to be refused".into());
        };

        assert!(error.fields.get("name").is_some());

        let mut custom = registration("Globex");
        custom.domain = Some("ADMIN.localhost".to_string());

        let Err(LifecycleError::Validation(error)) =
            ctx.lifecycle.register(custom, Actor::System).await
        else {
            return Err("expected the central domain to be refused".into());
        };

        assert!(error.fields.get("domain").is_some());
        assert!(ctx.tenants.rows().is_empty());

        Ok(())
    }

    fn activation_token(ctx: &TestContext) -> Result<String, &'static str> {
        ctx.mailer
            .sent()
            .into_iter()
            .find_map(|message| match message.template {
                MailTemplate::TenantWelcome {
                    verification_token, ..
                } => Some(verification_token),
                _ => None,
            })
            .ok_or("no welcome message was sent")
    }

    #[tokio::test]
    async fn the_welcome_token_activates_a_pending_tenant_once() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx
            .lifecycle
            .register(registration("Acme"), Actor::System)
            .await?;
        let token = activation_token(&ctx)?;

        assert!(matches!(
            ctx.lifecycle.verify("tvt_unknown").await,
            Err(LifecycleError::InvalidVerificationToken)
        ));

        let verified = ctx.lifecycle.verify(&format!(" {token} ")).await?;

        assert_eq!(verified.uuid, registered.tenant.uuid);
        assert_eq!(verified.status, TenantStatus::Active);
        assert!(ctx.audit.actions().contains(&"tenant.activated"));

        ctx.lifecycle
            .suspend(verified.uuid, "billing", Actor::System)
            .await?;

        assert!(matches!(
            ctx.lifecycle.verify(&token).await,
            Err(LifecycleError::InvalidVerificationToken)
        ));

        Ok(())
    }

    #[tokio::test]
    async fn tokens_of_operator_activated_tenants_are_dead() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx
            .lifecycle
            .register(registration("Acme"), Actor::System)
            .await?;
        let token = activation_token(&ctx)?;

        ctx.lifecycle
            .activate(registered.tenant.uuid, Actor::System)
            .await?;
        ctx.lifecycle
            .suspend(registered.tenant.uuid, "billing", Actor::System)
            .await?;

        assert!(matches!(
            ctx.lifecycle.verify(&token).await,
            Err(LifecycleError::InvalidVerificationToken)
        ));
        assert_eq!(
            ctx.tenants.get_tenant(registered.tenant.uuid).await?.status,
            TenantStatus::Suspended
        );

        Ok(())
    }

    #[tokio::test]
    async fn a_failed_activation_keeps_the_token() -> TestResult {
        let tenants = Arc::new(MemoryTenantStore::default());
        let mut pending = fixtures::tenant("acme");
        pending.status = TenantStatus::Pending;
        pending.activated_at = None;
        pending.migrated_at = None;
        let uuid = pending.uuid;
        tenants.insert(pending);
        tenants
            .store_verification_token(uuid, &hash_token("tvt_acme"))
            .await?;

        let mut provisioner = MockDatabaseProvisioner::new();

        provisioner.expect_database_exists().returning(|_| Ok(true));
        provisioner.expect_migrate().times(1).returning(|_| {
            Err(ProvisioningError::Timeout {
                operation: "migrate database",
            })
        });

        let lifecycle = TenantLifecycle::new(
            tenants.clone(),
            Arc::new(MemoryUserStore::default()),
            Arc::new(provisioner),
            Collaborators {
                clock: Arc::new(ManualClock::at(jiff::Timestamp::UNIX_EPOCH)),
                hasher: Arc::new(PlainHasher),
                mailer: Arc::new(RecordingMailer::default()),
                audit: Arc::new(RecordingAuditSink::default()),
            },
            tenancy(),
        );

        assert!(matches!(
            lifecycle.verify("tvt_acme").await,
            Err(LifecycleError::Provisioning(_))
        ));
        assert_eq!(tenants.get_tenant(uuid).await?.status, TenantStatus::Pending);
        assert_eq!(
            tenants
                .consume_verification_token(&hash_token("tvt_acme"))
                .await?,
            Some(uuid)
        );

        Ok(())
    }

    #[tokio::test]
    async fn failed_migration_drops_database_and_purges_row() -> TestResult {
        let tenants = Arc::new(MemoryTenantStore::default());
        let mut provisioner = MockDatabaseProvisioner::new();

        provisioner
            .expect_create_database()
            .times(1)
            .returning(|_| Ok(()));
        provisioner.expect_migrate().times(1).returning(|_| {
            Err(ProvisioningError::Timeout {
                operation: "migrate database",
            })
        });
        provisioner
            .expect_drop_database()
            .times(1)
            .returning(|_| Ok(()));

        let lifecycle = TenantLifecycle::new(
            tenants.clone(),
            Arc::new(MemoryUserStore::default()),
            Arc::new(provisioner),
            Collaborators {
                clock: Arc::new(ManualClock::at(jiff::Timestamp::UNIX_EPOCH)),
                hasher: Arc::new(PlainHasher),
                mailer: Arc::new(RecordingMailer::default()),
                audit: Arc::new(RecordingAuditSink::default()),
            },
            tenancy(),
        );

        let result = lifecycle
            .register(registration("Acme"), Actor::System)
            .await;

        assert!(matches!(
            result,
            Err(LifecycleError::Provisioning(ProvisioningError::Timeout { .. }))
        ));
        assert!(tenants.rows().is_empty());

        let retry = lifecycle.check_availability("acme").await?;

        assert!(retry.available);

        Ok(())
    }

    #[tokio::test]
    async fn suspension_requires_a_reason_and_an_active_tenant() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx
            .lifecycle
            .register(registration("Acme"), Actor::System)
            .await?;
        let tenant = registered.tenant.uuid;

        assert!(matches!(
            ctx.lifecycle.suspend(tenant, "billing", Actor::System).await,
            Err(LifecycleError::InvalidTransition(_))
        ));

        ctx.lifecycle.activate(tenant, Actor::System).await?;

        assert!(matches!(
            ctx.lifecycle.suspend(tenant, "  ", Actor::System).await,
            Err(LifecycleError::Validation(_))
        ));

        let suspended = ctx.lifecycle.suspend(tenant, "billing", Actor::System).await?;

        assert_eq!(suspended.status, TenantStatus::Suspended);
        assert_eq!(suspended.suspension_reason.as_deref(), Some("billing"));

        let reactivated = ctx.lifecycle.activate(tenant, Actor::System).await?;

        assert_eq!(reactivated.status, TenantStatus::Active);
        assert!(reactivated.suspension_reason.is_none());
        assert!(matches!(
            ctx.lifecycle.activate(tenant, Actor::System).await,
            Err(LifecycleError::InvalidTransition(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn storage_cannot_pass_the_plan_limit() -> TestResult {
        let ctx = TestContext::new();
        let tenant = ctx.active_tenant("Acme").await.tenant.uuid;

        assert_eq!(ctx.lifecycle.adjust_storage(tenant, GIB).await?, GIB);

        let result = ctx.lifecycle.adjust_storage(tenant, 1).await;

        assert!(matches!(
            result,
            Err(LifecycleError::LimitExceeded(LimitExceeded {
                resource: Resource::Storage,
                current: GIB,
                requested: 1,
                limit: GIB,
            }))
        ));
        assert!(matches!(
            ctx.lifecycle.adjust_storage(tenant, -2 * GIB).await,
            Err(LifecycleError::Validation(_))
        ));
        assert_eq!(ctx.tenants.get_tenant(tenant).await?.storage_used, GIB);
        assert_eq!(ctx.lifecycle.adjust_storage(tenant, -GIB).await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn api_calls_are_counted_against_the_allowance() -> TestResult {
        let ctx = TestContext::new();
        let tenant = ctx.active_tenant("Acme").await.tenant.uuid;

        assert_eq!(ctx.lifecycle.record_api_calls(tenant, 1_000).await?, 1_000);
        assert!(matches!(
            ctx.lifecycle.record_api_calls(tenant, 1).await,
            Err(LifecycleError::LimitExceeded(_))
        ));
        assert!(matches!(
            ctx.lifecycle.record_api_calls(tenant, -1).await,
            Err(LifecycleError::Validation(_))
        ));

        let upgraded = ctx
            .lifecycle
            .change_plan(tenant, Plan::Pro, Actor::System)
            .await?;

        assert_eq!(upgraded.plan, Plan::Pro);
        assert_eq!(ctx.lifecycle.record_api_calls(tenant, 1).await?, 1_001);

        Ok(())
    }

    #[tokio::test]
    async fn availability_reflects_normalized_slug() -> TestResult {
        let ctx = TestContext::new();

        let free = ctx.lifecycle.check_availability("Acme Corp").await?;

        assert!(free.available);
        assert_eq!(free.normalized_slug, "acme-corp");
        assert_eq!(free.derived_domain, "acme-corp.localhost");

        ctx.lifecycle
            .register(registration("Acme Corp"), Actor::System)
            .await?;

        assert!(!ctx.lifecycle.check_availability("acme_corp").await?.available);
        assert!(matches!(
            ctx.lifecycle.check_availability("!!!").await,
            Err(LifecycleError::Validation(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn deleted_tenants_stop_resolving_and_keep_their_slug() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx.active_tenant("Acme").await;
        let tenant = registered.tenant.uuid;

        let resolved = ctx.lifecycle.resolve_domain("acme.localhost:8080").await?;

        assert_eq!(resolved.tenant(), tenant);

        ctx.lifecycle.delete(tenant, Actor::System).await?;

        assert!(ctx.provisioner.databases().is_empty());
        assert!(matches!(
            ctx.lifecycle.resolve(tenant).await,
            Err(LifecycleError::NotFound)
        ));
        assert!(matches!(
            ctx.lifecycle.resolve_domain("acme.localhost").await,
            Err(LifecycleError::NotFound)
        ));
        assert!(!ctx.lifecycle.check_availability("acme").await?.available);

        Ok(())
    }
}
