//! Access Control Service

use std::sync::Arc;

use serde_json::json;
use tenantry::{
    access::{self, Decision, Principal},
    status::UserStatus,
    validation::{self, FieldErrors},
};
use tracing::info;

use crate::{
    audit::{self, Actor, AuditEvent},
    domain::{
        Collaborators,
        access::errors::AccessControlError,
        tenants::{
            TenantStore,
            errors::log_compensation_failure,
            models::{Counter, TenantContext},
        },
        users::{
            UserStore,
            models::{NewUser, User, UserUuid},
        },
    },
};

/// Admin-created user.
#[derive(Clone, PartialEq, Eq)]
pub struct InviteUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
}

impl std::fmt::Debug for InviteUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InviteUser")
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Authorization decisions plus the user mutations they guard.
#[derive(Clone)]
pub struct AccessControl {
    tenants: Arc<dyn TenantStore>,
    users: Arc<dyn UserStore>,
    collaborators: Collaborators,
}

impl std::fmt::Debug for AccessControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControl").finish_non_exhaustive()
    }
}

impl AccessControl {
    #[must_use]
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        users: Arc<dyn UserStore>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            tenants,
            users,
            collaborators,
        }
    }

    /// Decide an action against a resource owned by `ctx`'s tenant (or a central action when
    /// `ctx` is `None`).
    #[must_use]
    pub fn authorize(
        &self,
        principal: &Principal,
        action: &str,
        ctx: Option<&TenantContext>,
    ) -> Decision {
        access::authorize(
            principal,
            action,
            ctx.map(|ctx| ctx.tenant().into_uuid()),
        )
    }

    /// Resolve a user's roles and permissions from the context's store.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or deleted users.
    pub async fn principal_for(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
    ) -> Result<Principal, AccessControlError> {
        let user = self.users.get_user(ctx, user).await?;
        let graph = self.users.role_graph(ctx).await?;

        Ok(Principal::new(
            user.uuid.into_uuid(),
            ctx.tenant().into_uuid(),
            user.is_super_admin,
            &user.roles,
            &graph,
        ))
    }

    /// Create a user with one role, reserving a seat against the tenant's user limit.
    ///
    /// # Errors
    ///
    /// Returns `Denied` without `users.create`, `LimitExceeded` when no seat is left and a
    /// validation error for bad input or an unknown role.
    pub async fn create_user(
        &self,
        principal: &Principal,
        ctx: &TenantContext,
        invite: InviteUser,
    ) -> Result<User, AccessControlError> {
        self.authorize(principal, "users.create", Some(ctx))
            .into_result()?;

        let mut errors = FieldErrors::new();
        validation::require_text(&mut errors, "name", &invite.name);
        validation::require_email(&mut errors, "email", &invite.email);
        validation::require_password(&mut errors, "password", &invite.password);
        validation::require_text(&mut errors, "role", &invite.role);
        errors.into_result()?;

        let password_hash = self.collaborators.hasher.hash(&invite.password)?;

        self.tenants
            .adjust_counter(ctx.tenant(), Counter::Users, 1)
            .await?;

        let created = self
            .users
            .create_user(
                ctx,
                NewUser {
                    uuid: UserUuid::new(),
                    name: invite.name.trim().to_string(),
                    email: validation::normalize_email(&invite.email),
                    password_hash,
                    status: UserStatus::Active,
                    is_super_admin: false,
                    must_change_password: true,
                    email_verified_at: Some(self.collaborators.clock.now()),
                    roles: vec![invite.role.trim().to_string()],
                },
            )
            .await;

        let user = match created {
            Ok(user) => user,
            Err(error) => {
                self.release_seat(ctx).await;

                return Err(error.into());
            }
        };

        info!(tenant = %ctx.tenant(), user = %user.uuid, "user created");

        self.audit(
            AuditEvent::new(Actor::from_principal(principal), "user.created")
                .tenant(ctx.tenant())
                .subject(user.uuid)
                .properties(json!({ "role": invite.role.trim() })),
        )
        .await;

        Ok(user)
    }

    /// # Errors
    ///
    /// Returns `Denied` without `users.activate`.
    pub async fn activate_user(
        &self,
        principal: &Principal,
        ctx: &TenantContext,
        user: UserUuid,
    ) -> Result<User, AccessControlError> {
        self.authorize(principal, "users.activate", Some(ctx))
            .into_result()?;

        let user = self.users.set_status(ctx, user, UserStatus::Active).await?;

        self.audit(
            AuditEvent::new(Actor::from_principal(principal), "user.activated")
                .tenant(ctx.tenant())
                .subject(user.uuid),
        )
        .await;

        Ok(user)
    }

    /// # Errors
    ///
    /// Returns `SelfRemoval` for the principal's own account and `LastAdmin` for the last
    /// active admin.
    pub async fn deactivate_user(
        &self,
        principal: &Principal,
        ctx: &TenantContext,
        user: UserUuid,
    ) -> Result<User, AccessControlError> {
        self.authorize(principal, "users.suspend", Some(ctx))
            .into_result()?;

        if principal.user == user.into_uuid() {
            return Err(AccessControlError::SelfRemoval);
        }

        let user = self
            .users
            .set_status(ctx, user, UserStatus::Inactive)
            .await?;

        self.audit(
            AuditEvent::new(Actor::from_principal(principal), "user.deactivated")
                .tenant(ctx.tenant())
                .subject(user.uuid),
        )
        .await;

        Ok(user)
    }

    /// Soft-delete a user and free its seat. A seat that cannot be freed is logged, not
    /// reported: the user is already gone.
    ///
    /// # Errors
    ///
    /// Returns `SelfRemoval` for the principal's own account and `LastAdmin` for the last
    /// active admin.
    pub async fn delete_user(
        &self,
        principal: &Principal,
        ctx: &TenantContext,
        user: UserUuid,
    ) -> Result<(), AccessControlError> {
        self.authorize(principal, "users.delete", Some(ctx))
            .into_result()?;

        if principal.user == user.into_uuid() {
            return Err(AccessControlError::SelfRemoval);
        }

        self.users
            .soft_delete(ctx, user, self.collaborators.clock.now())
            .await?;

        self.release_seat(ctx).await;

        info!(tenant = %ctx.tenant(), user = %user, "user deleted");

        self.audit(
            AuditEvent::new(Actor::from_principal(principal), "user.deleted")
                .tenant(ctx.tenant())
                .subject(user),
        )
        .await;

        Ok(())
    }

    async fn release_seat(&self, ctx: &TenantContext) {
        if let Err(source) = self
            .tenants
            .adjust_counter(ctx.tenant(), Counter::Users, -1)
            .await
        {
            log_compensation_failure("release user seat", &source);
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

#[cfg(test)]
mod tests {
    use tenantry::access::{ADMIN_ROLE, DenyReason, MANAGER_ROLE, USER_ROLE};
    use testresult::TestResult;

    use super::*;
    use crate::{
        domain::tenants::{TenantsServiceError, store::MockTenantStore},
        test::{TestContext, fakes::PlainHasher},
    };

    fn invite(email: &str, role: &str) -> InviteUser {
        InviteUser {
            name: "Invited".to_string(),
            email: email.to_string(),
            password: "password123".to_string(),
            role: role.to_string(),
        }
    }

    #[tokio::test]
    async fn user_creation_stops_at_the_plan_limit() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx.active_tenant("Acme").await;
        let tenant = registered.tenant.context();
        let principal = ctx.principal(&tenant, &ctx.admin(&registered).await).await;

        for n in 0..4 {
            ctx.access
                .create_user(&principal, &tenant, invite(&format!("user{n}@acme.test"), USER_ROLE))
                .await?;
        }

        let result = ctx
            .access
            .create_user(&principal, &tenant, invite("sixth@acme.test", USER_ROLE))
            .await;

        assert!(matches!(result, Err(AccessControlError::LimitExceeded(_))));
        assert_eq!(ctx.tenants.get_tenant(tenant.tenant()).await?.user_count, 5);

        Ok(())
    }

    #[tokio::test]
    async fn rejected_creation_releases_the_seat() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx.active_tenant("Acme").await;
        let tenant = registered.tenant.context();
        let principal = ctx.principal(&tenant, &ctx.admin(&registered).await).await;

        let unknown_role = ctx
            .access
            .create_user(&principal, &tenant, invite("ada@acme.test", "owner"))
            .await;

        assert!(matches!(unknown_role, Err(AccessControlError::Validation(_))));

        let duplicate = ctx
            .access
            .create_user(&principal, &tenant, invite("ADMIN@acme.test", USER_ROLE))
            .await;

        assert!(matches!(duplicate, Err(AccessControlError::AlreadyExists)));
        assert_eq!(ctx.tenants.get_tenant(tenant.tenant()).await?.user_count, 1);

        Ok(())
    }

    #[tokio::test]
    async fn managers_can_create_but_not_delete() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx.active_tenant("Acme").await;
        let tenant = registered.tenant.context();
        let admin = ctx.principal(&tenant, &ctx.admin(&registered).await).await;

        let manager = ctx
            .access
            .create_user(&admin, &tenant, invite("manager@acme.test", MANAGER_ROLE))
            .await?;
        let manager = ctx.principal(&tenant, &manager).await;

        let user = ctx
            .access
            .create_user(&manager, &tenant, invite("user@acme.test", USER_ROLE))
            .await?;

        assert!(matches!(
            ctx.access.delete_user(&manager, &tenant, user.uuid).await,
            Err(AccessControlError::Denied(DenyReason::MissingPermission))
        ));

        ctx.access.delete_user(&admin, &tenant, user.uuid).await?;

        assert_eq!(ctx.tenants.get_tenant(tenant.tenant()).await?.user_count, 2);
        assert!(ctx.audit.actions().contains(&"user.deleted"));

        Ok(())
    }

    #[tokio::test]
    async fn a_failed_seat_release_does_not_fail_the_delete() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx.active_tenant("Acme").await;
        let tenant = registered.tenant.context();
        let admin = ctx.principal(&tenant, &ctx.admin(&registered).await).await;
        let user = ctx.add_user(&tenant, "ada@acme.test", &[USER_ROLE]).await;

        let mut tenants = MockTenantStore::new();
        tenants
            .expect_adjust_counter()
            .withf(|_, counter, delta| *counter == Counter::Users && *delta == -1)
            .times(1)
            .returning(|_, _, _| Err(TenantsServiceError::Sql(sqlx::Error::PoolTimedOut)));

        let access = AccessControl::new(
            Arc::new(tenants),
            ctx.users.clone(),
            Collaborators {
                clock: ctx.clock.clone(),
                hasher: Arc::new(PlainHasher),
                mailer: ctx.mailer.clone(),
                audit: ctx.audit.clone(),
            },
        );

        access.delete_user(&admin, &tenant, user.uuid).await?;

        assert!(
            ctx.users
                .rows()
                .iter()
                .any(|row| row.uuid == user.uuid && row.deleted_at.is_some())
        );
        assert!(ctx.audit.actions().contains(&"user.deleted"));

        Ok(())
    }

    #[tokio::test]
    async fn users_cannot_remove_themselves() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx.active_tenant("Acme").await;
        let tenant = registered.tenant.context();
        let admin = ctx.principal(&tenant, &ctx.admin(&registered).await).await;

        assert!(matches!(
            ctx.access
                .deactivate_user(&admin, &tenant, registered.admin)
                .await,
            Err(AccessControlError::SelfRemoval)
        ));
        assert!(matches!(
            ctx.access.delete_user(&admin, &tenant, registered.admin).await,
            Err(AccessControlError::SelfRemoval)
        ));

        Ok(())
    }

    #[tokio::test]
    async fn the_last_active_admin_is_kept() -> TestResult {
        let ctx = TestContext::new();
        let registered = ctx.active_tenant("Acme").await;
        let tenant = registered.tenant.context();
        let first = ctx.principal(&tenant, &ctx.admin(&registered).await).await;

        let second = ctx
            .access
            .create_user(&first, &tenant, invite("second@acme.test", ADMIN_ROLE))
            .await?;
        let stale_session = ctx.principal(&tenant, &second).await;

        ctx.access
            .deactivate_user(&first, &tenant, second.uuid)
            .await?;

        assert!(matches!(
            ctx.access
                .delete_user(&stale_session, &tenant, registered.admin)
                .await,
            Err(AccessControlError::LastAdmin)
        ));

        let reactivated = ctx
            .access
            .activate_user(&first, &tenant, second.uuid)
            .await?;

        assert_eq!(reactivated.status, UserStatus::Active);

        ctx.access
            .delete_user(&stale_session, &tenant, registered.admin)
            .await?;

        Ok(())
    }

    #[tokio::test]
    async fn principals_are_confined_to_their_tenant() -> TestResult {
        let ctx = TestContext::new();
        let acme = ctx.active_tenant("Acme").await;
        let globex = ctx.active_tenant("Globex").await;
        let acme_ctx = acme.tenant.context();
        let admin = ctx.principal(&acme_ctx, &ctx.admin(&acme).await).await;

        assert_eq!(
            ctx.access
                .authorize(&admin, "users.view", Some(&globex.tenant.context())),
            Decision::Deny(DenyReason::CrossTenant)
        );
        assert_eq!(
            ctx.access.authorize(&admin, "users.view", Some(&acme_ctx)),
            Decision::Allow
        );
        assert_eq!(
            ctx.access.authorize(&admin, "tenants.create", None),
            Decision::Deny(DenyReason::NotSuperAdmin)
        );

        let operator = Principal {
            is_super_admin: true,
            ..admin
        };

        assert_eq!(
            ctx.access.authorize(&operator, "users.view", Some(&acme_ctx)),
            Decision::Deny(DenyReason::RequiresImpersonation)
        );

        Ok(())
    }
}
