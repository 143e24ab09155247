//! Access Control
//!
//! Capabilities resolve as `user -> roles -> permissions`. Two capabilities are special:
//!
//! - `is_super_admin` allows every central-scope action. It grants tenant-scope actions only
//!   through impersonation, where the principal becomes the target user with the super-admin
//!   recorded as impersonator.
//! - the tenant `admin` role holds every tenant-scope action.
//!
//! [`authorize`] is fail-closed: unknown actions, cross-tenant access and missing
//! permissions are all denied.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use uuid::Uuid;

/// Name of the tenant role holding every tenant permission.
pub const ADMIN_ROLE: &str = "admin";

/// Name of the tenant role for day-to-day managers.
pub const MANAGER_ROLE: &str = "manager";

/// Name of the default tenant member role.
pub const USER_ROLE: &str = "user";

/// Name of the central role holding every central permission.
pub const PLATFORM_ADMIN_ROLE: &str = "platform_admin";

/// Actions performed against the central application.
pub const CENTRAL_PERMISSIONS: [&str; 19] = [
    "tenants.view",
    "tenants.create",
    "tenants.edit",
    "tenants.delete",
    "tenants.suspend",
    "tenants.activate",
    "tenants.impersonate",
    "system.settings",
    "system.maintenance",
    "system.logs",
    "system.cache",
    "system.queue",
    "system.backup",
    "analytics.view",
    "reports.generate",
    "billing.view",
    "security.audit",
    "security.permissions",
    "security.roles",
];

/// Actions performed inside a tenant.
pub const TENANT_PERMISSIONS: [&str; 11] = [
    "users.view",
    "users.create",
    "users.edit",
    "users.delete",
    "users.suspend",
    "users.activate",
    "dashboard.view",
    "profile.edit",
    "files.upload",
    "files.delete",
    "settings.edit",
];

/// Where an action applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Platform-wide administration.
    Central,

    /// A single tenant's data.
    Tenant,
}

/// Scope of a cataloged action; `None` for unknown actions.
#[must_use]
pub fn action_scope(action: &str) -> Option<Scope> {
    if CENTRAL_PERMISSIONS.contains(&action) {
        Some(Scope::Central)
    } else if TENANT_PERMISSIONS.contains(&action) {
        Some(Scope::Tenant)
    } else {
        None
    }
}

/// Role name to permission set mapping for one store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleGraph {
    roles: FxHashMap<String, FxHashSet<String>>,
}

impl RoleGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a permission to a role.
    pub fn grant(&mut self, role: &str, permission: &str) {
        self.roles
            .entry(role.to_string())
            .or_default()
            .insert(permission.to_string());
    }

    /// Builder-style variant of [`RoleGraph::grant`] for several permissions.
    #[must_use]
    pub fn with_role(mut self, role: &str, permissions: &[&str]) -> Self {
        self.roles.entry(role.to_string()).or_default();

        for permission in permissions {
            self.grant(role, permission);
        }

        self
    }

    /// Roles seeded into every tenant store.
    #[must_use]
    pub fn tenant_defaults() -> Self {
        Self::new()
            .with_role(ADMIN_ROLE, &TENANT_PERMISSIONS)
            .with_role(
                MANAGER_ROLE,
                &[
                    "users.view",
                    "users.create",
                    "users.edit",
                    "dashboard.view",
                    "profile.edit",
                    "files.upload",
                ],
            )
            .with_role(USER_ROLE, &["dashboard.view", "profile.edit", "files.upload"])
    }

    /// Roles seeded into the central store.
    #[must_use]
    pub fn central_defaults() -> Self {
        Self::new().with_role(PLATFORM_ADMIN_ROLE, &CENTRAL_PERMISSIONS)
    }

    /// Whether the role exists.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Union of the permissions held by `roles`. Unknown roles contribute nothing.
    #[must_use]
    pub fn resolve<S: AsRef<str>>(&self, roles: &[S]) -> FxHashSet<String> {
        roles
            .iter()
            .filter_map(|role| self.roles.get(role.as_ref()))
            .flatten()
            .cloned()
            .collect()
    }
}

/// Authenticated actor with resolved capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Acting user.
    pub user: Uuid,

    /// Tenant the user belongs to.
    pub tenant: Uuid,

    /// Platform operator flag.
    pub is_super_admin: bool,

    /// Assigned role names.
    pub roles: SmallVec<[String; 4]>,

    /// Union of the role permissions.
    pub permissions: FxHashSet<String>,

    /// Super-admin acting as this user, when impersonating.
    pub impersonator: Option<Uuid>,
}

impl Principal {
    /// Resolve a principal from role assignments.
    #[must_use]
    pub fn new(
        user: Uuid,
        tenant: Uuid,
        is_super_admin: bool,
        roles: &[String],
        graph: &RoleGraph,
    ) -> Self {
        Self {
            user,
            tenant,
            is_super_admin,
            roles: roles.iter().cloned().collect(),
            permissions: graph.resolve(roles),
            impersonator: None,
        }
    }

    /// The same principal acting under impersonation by `impersonator`.
    ///
    /// The impersonated principal never carries the super-admin flag.
    #[must_use]
    pub fn impersonated_by(mut self, impersonator: Uuid) -> Self {
        self.is_super_admin = false;
        self.impersonator = Some(impersonator);
        self
    }

    /// Whether the principal holds the tenant `admin` role.
    #[must_use]
    pub fn is_tenant_admin(&self) -> bool {
        self.roles.iter().any(|role| role == ADMIN_ROLE)
    }
}

/// Why an action was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// The action is not in the catalog.
    UnknownAction,

    /// Central actions require a super-admin.
    NotSuperAdmin,

    /// Super-admins act inside tenants only through impersonation.
    RequiresImpersonation,

    /// The principal belongs to a different tenant.
    CrossTenant,

    /// None of the principal's roles grant the action.
    MissingPermission,
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The action may proceed.
    Allow,

    /// The action must not proceed.
    Deny(DenyReason),
}

impl Decision {
    /// Whether the decision allows the action.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Convert into a result.
    ///
    /// # Errors
    ///
    /// Returns the [`DenyReason`] when denied.
    pub const fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(reason),
        }
    }
}

/// Decide whether `principal` may perform `action`.
///
/// `tenant` names the tenant that owns the target resource for tenant-scope actions; when
/// omitted the principal's own tenant is assumed. It is ignored for central actions.
#[must_use]
pub fn authorize(principal: &Principal, action: &str, tenant: Option<Uuid>) -> Decision {
    match action_scope(action) {
        None => Decision::Deny(DenyReason::UnknownAction),
        Some(Scope::Central) if principal.is_super_admin => Decision::Allow,
        Some(Scope::Central) => Decision::Deny(DenyReason::NotSuperAdmin),
        Some(Scope::Tenant) if principal.is_super_admin => {
            Decision::Deny(DenyReason::RequiresImpersonation)
        }
        Some(Scope::Tenant) => {
            if tenant.is_some_and(|tenant| tenant != principal.tenant) {
                return Decision::Deny(DenyReason::CrossTenant);
            }

            if principal.is_tenant_admin() || principal.permissions.contains(action) {
                Decision::Allow
            } else {
                Decision::Deny(DenyReason::MissingPermission)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(tenant: Uuid, roles: &[&str]) -> Principal {
        let roles: Vec<String> = roles.iter().map(ToString::to_string).collect();

        Principal::new(
            Uuid::now_v7(),
            tenant,
            false,
            &roles,
            &RoleGraph::tenant_defaults(),
        )
    }

    fn super_admin() -> Principal {
        Principal::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            true,
            &[PLATFORM_ADMIN_ROLE.to_string()],
            &RoleGraph::central_defaults(),
        )
    }

    #[test]
    fn unknown_actions_are_denied_for_everyone() {
        let tenant = Uuid::now_v7();

        for principal in [member(tenant, &[ADMIN_ROLE]), super_admin()] {
            assert_eq!(
                authorize(&principal, "tenants.obliterate", Some(tenant)),
                Decision::Deny(DenyReason::UnknownAction)
            );
        }
    }

    #[test]
    fn super_admin_holds_every_central_action() {
        let principal = super_admin();

        for action in CENTRAL_PERMISSIONS {
            assert!(authorize(&principal, action, None).is_allowed(), "{action}");
        }
    }

    #[test]
    fn super_admin_needs_impersonation_for_tenant_actions() {
        let principal = super_admin();

        assert_eq!(
            authorize(&principal, "users.view", Some(Uuid::now_v7())),
            Decision::Deny(DenyReason::RequiresImpersonation)
        );
    }

    #[test]
    fn impersonated_principal_acts_with_the_target_capabilities() {
        let tenant = Uuid::now_v7();
        let operator = super_admin();
        let principal = member(tenant, &[USER_ROLE]).impersonated_by(operator.user);

        assert_eq!(principal.impersonator, Some(operator.user));
        assert!(authorize(&principal, "dashboard.view", Some(tenant)).is_allowed());
        assert_eq!(
            authorize(&principal, "users.delete", Some(tenant)),
            Decision::Deny(DenyReason::MissingPermission)
        );
        assert_eq!(
            authorize(&principal, "tenants.view", None),
            Decision::Deny(DenyReason::NotSuperAdmin)
        );
    }

    #[test]
    fn tenant_admin_holds_every_tenant_action() {
        let tenant = Uuid::now_v7();
        let principal = member(tenant, &[ADMIN_ROLE]);

        for action in TENANT_PERMISSIONS {
            assert!(authorize(&principal, action, Some(tenant)).is_allowed(), "{action}");
        }
    }

    #[test]
    fn tenant_admin_cannot_perform_central_actions() {
        let principal = member(Uuid::now_v7(), &[ADMIN_ROLE]);

        assert_eq!(
            authorize(&principal, "tenants.suspend", None),
            Decision::Deny(DenyReason::NotSuperAdmin)
        );
    }

    #[test]
    fn tenant_principals_never_cross_tenants() {
        let principal = member(Uuid::now_v7(), &[ADMIN_ROLE]);

        assert_eq!(
            authorize(&principal, "users.view", Some(Uuid::now_v7())),
            Decision::Deny(DenyReason::CrossTenant)
        );
    }

    #[test]
    fn members_hold_exactly_their_role_permissions() {
        let tenant = Uuid::now_v7();
        let manager = member(tenant, &[MANAGER_ROLE]);
        let user = member(tenant, &[USER_ROLE]);

        assert!(authorize(&manager, "users.create", None).is_allowed());
        assert!(!authorize(&manager, "users.delete", None).is_allowed());
        assert!(authorize(&user, "profile.edit", None).is_allowed());
        assert!(!authorize(&user, "users.view", None).is_allowed());
    }

    #[test]
    fn permissions_are_the_union_of_roles() {
        let graph = RoleGraph::new()
            .with_role("reader", &["users.view"])
            .with_role("uploader", &["files.upload"]);

        let permissions = graph.resolve(&["reader", "uploader", "missing"]);

        assert_eq!(permissions.len(), 2);
        assert!(permissions.contains("users.view"));
        assert!(permissions.contains("files.upload"));
    }

    #[test]
    fn every_action_has_exactly_one_scope() {
        for action in CENTRAL_PERMISSIONS {
            assert_eq!(action_scope(action), Some(Scope::Central), "{action}");
        }

        for action in TENANT_PERMISSIONS {
            assert_eq!(action_scope(action), Some(Scope::Tenant), "{action}");
        }
    }
}
