//! Impersonation Broker
//!
//! Tokens are redeemed by a single conditional update; when it matches nothing the token is
//! re-read only to explain why.

use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use serde_json::{Value, json};
use tenantry::{
    access::{self, Principal},
    status::TokenStatus,
    validation::{self, FieldErrors},
};
use tracing::{info, warn};

use crate::{
    audit::{self, Actor, AuditEvent},
    config::SecurityConfig,
    domain::{
        Collaborators,
        impersonation::{
            errors::ImpersonationError,
            models::{
                ImpersonationSession, ImpersonationTokenUuid, IssueImpersonation,
                IssuedImpersonation, NewImpersonationToken,
            },
            store::ImpersonationStore,
        },
        tenants::{TenantStore, models::TenantContext},
        users::{UserStore, models::UserUuid},
    },
    secrets::{IMPERSONATION_TOKEN_PREFIX, generate_token, hash_token},
};

const IMPERSONATE_ACTION: &str = "tenants.impersonate";

/// Token lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpersonationSettings {
    pub default_ttl: SignedDuration,
    pub max_ttl: SignedDuration,
}

impl Default for ImpersonationSettings {
    fn default() -> Self {
        Self {
            default_ttl: SignedDuration::from_mins(5),
            max_ttl: SignedDuration::from_mins(60),
        }
    }
}

impl From<&SecurityConfig> for ImpersonationSettings {
    fn from(config: &SecurityConfig) -> Self {
        Self {
            default_ttl: SignedDuration::from_mins(config.impersonation_default_ttl_minutes),
            max_ttl: SignedDuration::from_mins(config.impersonation_max_ttl_minutes),
        }
    }
}

/// Issues, redeems and revokes impersonation tokens for operators.
#[derive(Clone)]
pub struct ImpersonationBroker {
    tokens: Arc<dyn ImpersonationStore>,
    tenants: Arc<dyn TenantStore>,
    users: Arc<dyn UserStore>,
    collaborators: Collaborators,
    settings: ImpersonationSettings,
}

impl std::fmt::Debug for ImpersonationBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpersonationBroker")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ImpersonationBroker {
    #[must_use]
    pub fn new(
        tokens: Arc<dyn ImpersonationStore>,
        tenants: Arc<dyn TenantStore>,
        users: Arc<dyn UserStore>,
        collaborators: Collaborators,
        settings: ImpersonationSettings,
    ) -> Self {
        Self {
            tokens,
            tenants,
            users,
            collaborators,
            settings,
        }
    }

    /// Issue a single-use token for acting as `request.target_user`.
    ///
    /// # Errors
    ///
    /// Returns `Denied` unless the principal may impersonate, a validation error for a bad
    /// reason or lifetime, and `TenantNotFound`/`UserNotFound` when the target does not
    /// resolve.
    pub async fn issue(
        &self,
        principal: &Principal,
        request: IssueImpersonation,
    ) -> Result<IssuedImpersonation, ImpersonationError> {
        access::authorize(principal, IMPERSONATE_ACTION, None).into_result()?;

        let ttl = request.ttl.unwrap_or(self.settings.default_ttl);

        let mut errors = FieldErrors::new();
        validation::require_text(&mut errors, "reason", &request.reason);

        if ttl <= SignedDuration::ZERO || ttl > self.settings.max_ttl {
            errors.add(
                "ttl",
                format!(
                    "must be between 1 second and {} minutes",
                    self.settings.max_ttl.as_mins()
                ),
            );
        }

        if request.max_duration_minutes.is_some_and(|minutes| minutes <= 0) {
            errors.add("max_duration_minutes", "must be positive");
        }

        errors.into_result()?;

        let tenant = self.tenants.get_tenant(request.tenant).await?;
        let target = self
            .users
            .get_user(&tenant.context(), request.target_user)
            .await?;

        let now = self.collaborators.clock.now();
        let raw = generate_token(IMPERSONATION_TOKEN_PREFIX);

        let token = self
            .tokens
            .create(NewImpersonationToken {
                uuid: ImpersonationTokenUuid::new(),
                token_hash: hash_token(&raw),
                tenant: tenant.uuid,
                target_user: target.uuid,
                impersonator: UserUuid::from_uuid(principal.user),
                max_uses: 1,
                single_use: true,
                expires_at: now.saturating_add(ttl).unwrap_or(Timestamp::MAX),
                max_duration_minutes: request.max_duration_minutes,
                reason: request.reason.trim().to_string(),
                ip_address: request.ip_address,
                user_agent: request.user_agent,
                session_id: request.session_id,
                created_at: now,
            })
            .await?;

        info!(
            token = %token.uuid,
            tenant = %tenant.uuid,
            target = %target.uuid,
            "impersonation token issued"
        );

        self.audit(
            AuditEvent::new(Actor::from_principal(principal), "impersonation.issued")
                .tenant(tenant.uuid)
                .subject(token.uuid)
                .properties(json!({
                    "target_user": target.uuid,
                    "reason": token.reason,
                    "expires_at": token.expires_at,
                })),
        )
        .await;

        Ok(IssuedImpersonation { token, raw })
    }

    /// Redeem a raw token into a session acting as the target user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for unknown tokens, `AlreadyUsed` once the uses are spent,
    /// `Revoked` after revocation and `Expired` past the expiry, used or not.
    pub async fn redeem(&self, raw_token: &str) -> Result<ImpersonationSession, ImpersonationError> {
        let token_hash = hash_token(raw_token.trim());
        let now = self.collaborators.clock.now();

        let Some(token) = self.tokens.redeem(&token_hash, now).await? else {
            return Err(self.classify_rejection(&token_hash, now).await?);
        };

        let tenant = self.tenants.get_tenant(token.tenant).await?;
        let ctx = tenant.context();
        let principal = self
            .principal_for(&ctx, token.target_user)
            .await?
            .impersonated_by(token.impersonator.into_uuid());

        let ends_at = token.max_duration_minutes.map(|minutes| {
            now.saturating_add(SignedDuration::from_mins(minutes))
                .unwrap_or(Timestamp::MAX)
        });

        self.append_trail(token.uuid, json!({ "event": "redeemed", "at": now }))
            .await?;

        info!(token = %token.uuid, tenant = %tenant.uuid, "impersonation token redeemed");

        self.audit(
            AuditEvent::new(Actor::from_principal(&principal), "impersonation.redeemed")
                .tenant(tenant.uuid)
                .subject(token.uuid),
        )
        .await;

        Ok(ImpersonationSession {
            token: token.uuid,
            ctx,
            target_user: token.target_user,
            impersonator: token.impersonator,
            principal,
            redeemed_at: now,
            ends_at,
        })
    }

    /// Append an action taken during the session to the token's trail.
    ///
    /// # Errors
    ///
    /// Returns `SessionEnded` once the session's duration ceiling has passed.
    pub async fn record_action(
        &self,
        session: &ImpersonationSession,
        action: &str,
        details: Value,
    ) -> Result<(), ImpersonationError> {
        let now = self.collaborators.clock.now();

        if session.has_ended(now) {
            return Err(ImpersonationError::SessionEnded);
        }

        self.append_trail(
            session.token,
            json!({ "event": "action", "action": action, "details": details, "at": now }),
        )
        .await?;

        self.audit(
            AuditEvent::new(
                Actor::from_principal(&session.principal),
                "impersonation.action",
            )
            .tenant(session.ctx.tenant())
            .subject(session.token)
            .properties(json!({ "action": action })),
        )
        .await;

        Ok(())
    }

    /// Revoke a token. Tokens that are already used, expired or revoked are left as they are.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown tokens.
    pub async fn revoke(
        &self,
        principal: &Principal,
        token: ImpersonationTokenUuid,
        reason: &str,
    ) -> Result<(), ImpersonationError> {
        access::authorize(principal, IMPERSONATE_ACTION, None).into_result()?;

        let now = self.collaborators.clock.now();
        let revoked = self
            .tokens
            .revoke(
                token,
                UserUuid::from_uuid(principal.user),
                reason.trim().to_string(),
                now,
            )
            .await?;

        let Some(revoked) = revoked else {
            return match self.tokens.get(token).await? {
                Some(_) => Ok(()),
                None => Err(ImpersonationError::NotFound),
            };
        };

        info!(token = %token, "impersonation token revoked");

        self.audit(
            AuditEvent::new(Actor::from_principal(principal), "impersonation.revoked")
                .tenant(revoked.tenant)
                .subject(token)
                .properties(json!({ "reason": revoked.revoke_reason })),
        )
        .await;

        Ok(())
    }

    /// Mark every past-due active token expired. Safe to run repeatedly.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable.
    pub async fn sweep_expired(&self) -> Result<u64, ImpersonationError> {
        let swept = self
            .tokens
            .sweep_expired(self.collaborators.clock.now())
            .await?;

        if swept > 0 {
            info!(swept, "expired impersonation tokens swept");
        }

        Ok(swept)
    }

    async fn classify_rejection(
        &self,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<ImpersonationError, ImpersonationError> {
        let Some(token) = self.tokens.find_by_hash(token_hash).await? else {
            return Ok(ImpersonationError::InvalidToken);
        };

        Ok(match token.status {
            TokenStatus::Revoked => ImpersonationError::Revoked,
            TokenStatus::Expired => ImpersonationError::Expired,
            TokenStatus::Used => ImpersonationError::AlreadyUsed,
            TokenStatus::Active if token.is_expired(now) => {
                self.tokens.mark_expired(token.uuid).await?;

                ImpersonationError::Expired
            }
            TokenStatus::Active => ImpersonationError::AlreadyUsed,
        })
    }

    async fn principal_for(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
    ) -> Result<Principal, ImpersonationError> {
        let user = self.users.get_user(ctx, user).await?;
        let graph = self.users.role_graph(ctx).await?;

        Ok(Principal::new(
            user.uuid.into_uuid(),
            ctx.tenant().into_uuid(),
            false,
            &user.roles,
            &graph,
        ))
    }

    async fn append_trail(
        &self,
        token: ImpersonationTokenUuid,
        entry: Value,
    ) -> Result<(), ImpersonationError> {
        if let Err(source) = self.tokens.append_audit(token, entry).await {
            warn!(token = %token, error = %source, "failed to append impersonation trail");

            return Err(source.into());
        }

        Ok(())
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
    use tenantry::access::{DenyReason, USER_ROLE};
    use testresult::TestResult;

    use super::*;
    use crate::{
        domain::{
            auth::models::{Credentials, LoginTarget},
            bootstrap::models::BootstrapRequest,
            tenants::models::TenantUuid,
        },
        secrets::IMPERSONATION_TOKEN_PREFIX,
        test::{TestContext, context::SETUP_KEY},
    };

    struct Scene {
        ctx: TestContext,
        operator: Principal,
        tenant: TenantUuid,
        target: UserUuid,
    }

    async fn scene() -> TestResult<Scene> {
        let ctx = TestContext::new();

        ctx.bootstrap
            .bootstrap(BootstrapRequest {
                name: "Root".to_string(),
                email: "root@platform.test".to_string(),
                password: "password123".to_string(),
                setup_key: SETUP_KEY.to_string(),
            })
            .await?;

        let operator = ctx
            .auth
            .login(
                LoginTarget::Central,
                Credentials {
                    email: "root@platform.test".to_string(),
                    password: "password123".to_string(),
                    second_factor: None,
                    ip: "198.51.100.1".to_string(),
                },
            )
            .await?
            .principal;

        let registered = ctx.active_tenant("Acme").await;
        let target = ctx
            .add_user(&registered.tenant.context(), "ada@acme.test", &[USER_ROLE])
            .await;

        Ok(Scene {
            ctx,
            operator,
            tenant: registered.tenant.uuid,
            target: target.uuid,
        })
    }

    fn request(scene: &Scene) -> IssueImpersonation {
        IssueImpersonation {
            tenant: scene.tenant,
            target_user: scene.target,
            reason: "support ticket 42".to_string(),
            ttl: None,
            max_duration_minutes: None,
            ip_address: Some("198.51.100.1".to_string()),
            user_agent: None,
            session_id: None,
        }
    }

    #[tokio::test]
    async fn tokens_are_redeemed_exactly_once() -> TestResult {
        let scene = scene().await?;
        let broker = &scene.ctx.broker;

        let issued = broker.issue(&scene.operator, request(&scene)).await?;

        assert!(issued.raw.starts_with(IMPERSONATION_TOKEN_PREFIX));
        assert_ne!(issued.raw, issued.token.token_hash);

        let session = broker.redeem(&issued.raw).await?;

        assert_eq!(session.target_user, scene.target);
        assert_eq!(session.ctx.tenant(), scene.tenant);
        assert_eq!(session.principal.user, scene.target.into_uuid());
        assert_eq!(session.principal.impersonator, Some(scene.operator.user));
        assert!(!session.principal.is_super_admin);
        assert!(session.principal.permissions.contains("dashboard.view"));

        assert!(matches!(
            broker.redeem(&issued.raw).await,
            Err(ImpersonationError::AlreadyUsed)
        ));

        let actions = scene.ctx.audit.actions();

        assert!(actions.contains(&"impersonation.issued"));
        assert!(actions.contains(&"impersonation.redeemed"));

        Ok(())
    }

    #[tokio::test]
    async fn only_super_admins_issue_tokens() -> TestResult {
        let scene = scene().await?;
        let tenant_user = scene
            .ctx
            .auth
            .login(
                LoginTarget::Tenant(scene.tenant),
                Credentials {
                    email: "ada@acme.test".to_string(),
                    password: "password123".to_string(),
                    second_factor: None,
                    ip: "198.51.100.2".to_string(),
                },
            )
            .await?
            .principal;

        assert!(matches!(
            scene.ctx.broker.issue(&tenant_user, request(&scene)).await,
            Err(ImpersonationError::Denied(DenyReason::NotSuperAdmin))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn lifetimes_are_bounded() -> TestResult {
        let scene = scene().await?;

        for ttl in [SignedDuration::ZERO, SignedDuration::from_mins(61)] {
            let result = scene
                .ctx
                .broker
                .issue(
                    &scene.operator,
                    IssueImpersonation {
                        ttl: Some(ttl),
                        ..request(&scene)
                    },
                )
                .await;

            assert!(matches!(result, Err(ImpersonationError::Validation(_))));
        }

        assert!(scene.ctx.tokens.tokens().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn targets_must_belong_to_the_tenant() -> TestResult {
        let scene = scene().await?;

        let result = scene
            .ctx
            .broker
            .issue(
                &scene.operator,
                IssueImpersonation {
                    target_user: UserUuid::new(),
                    ..request(&scene)
                },
            )
            .await;

        assert!(matches!(result, Err(ImpersonationError::UserNotFound)));

        Ok(())
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected_and_marked() -> TestResult {
        let scene = scene().await?;
        let issued = scene
            .ctx
            .broker
            .issue(&scene.operator, request(&scene))
            .await?;

        scene.ctx.clock.advance(SignedDuration::from_mins(6));

        assert!(matches!(
            scene.ctx.broker.redeem(&issued.raw).await,
            Err(ImpersonationError::Expired)
        ));
        assert_eq!(scene.ctx.tokens.tokens()[0].status, TokenStatus::Expired);
        assert_eq!(scene.ctx.broker.sweep_expired().await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn sweeping_expires_every_past_due_token() -> TestResult {
        let scene = scene().await?;

        for _ in 0..3 {
            scene
                .ctx
                .broker
                .issue(&scene.operator, request(&scene))
                .await?;
        }

        assert_eq!(scene.ctx.broker.sweep_expired().await?, 0);

        scene.ctx.clock.advance(SignedDuration::from_mins(5));

        assert_eq!(scene.ctx.broker.sweep_expired().await?, 3);
        assert_eq!(scene.ctx.broker.sweep_expired().await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn revocation_is_idempotent() -> TestResult {
        let scene = scene().await?;
        let broker = &scene.ctx.broker;
        let issued = broker.issue(&scene.operator, request(&scene)).await?;

        broker
            .revoke(&scene.operator, issued.token.uuid, "no longer needed")
            .await?;
        broker
            .revoke(&scene.operator, issued.token.uuid, "again")
            .await?;

        assert!(matches!(
            broker.redeem(&issued.raw).await,
            Err(ImpersonationError::Revoked)
        ));
        assert!(matches!(
            broker
                .revoke(&scene.operator, ImpersonationTokenUuid::new(), "unknown")
                .await,
            Err(ImpersonationError::NotFound)
        ));

        let stored = &scene.ctx.tokens.tokens()[0];

        assert_eq!(stored.revoke_reason.as_deref(), Some("no longer needed"));

        Ok(())
    }

    #[tokio::test]
    async fn unknown_tokens_are_invalid() -> TestResult {
        let scene = scene().await?;

        assert!(matches!(
            scene.ctx.broker.redeem("imp_nothing").await,
            Err(ImpersonationError::InvalidToken)
        ));

        Ok(())
    }

    #[tokio::test]
    async fn actions_are_trailed_until_the_session_ends() -> TestResult {
        let scene = scene().await?;
        let broker = &scene.ctx.broker;
        let issued = broker
            .issue(
                &scene.operator,
                IssueImpersonation {
                    max_duration_minutes: Some(10),
                    ..request(&scene)
                },
            )
            .await?;

        let session = broker.redeem(&issued.raw).await?;

        broker
            .record_action(&session, "profile.edit", json!({ "field": "name" }))
            .await?;

        scene.ctx.clock.advance(SignedDuration::from_mins(10));

        assert!(matches!(
            broker
                .record_action(&session, "profile.edit", json!({}))
                .await,
            Err(ImpersonationError::SessionEnded)
        ));

        let trail = &scene.ctx.tokens.tokens()[0].audit_log;

        assert_eq!(trail.as_array().map(Vec::len), Some(2));

        Ok(())
    }
}
