//! Authentication Service
//!
//! A login passes through, in order: rate limit, tenant status, user lookup, account lock,
//! password, account status, email verification and second factor. Every credential or status
//! failure counts against the client's rate-limit window; a successful login clears it.
//! A locked account is reported as bad credentials so the lock does not reveal the address.
//! Second-factor failures have their own per-user lock instead.

use std::sync::Arc;

use jiff::SignedDuration;
use serde_json::json;
use tenantry::{
    access::{Principal, USER_ROLE},
    rate_limit::{AttemptKind, RateLimitCheck, RateLimitKey, RateLimitPolicy},
    status::UserStatus,
    validation::{self, FieldErrors},
};
use tracing::{debug, info, warn};

use crate::{
    audit::{self, Actor, AuditEvent},
    config::SecurityConfig,
    domain::{
        Collaborators,
        auth::{
            errors::AuthSessionError,
            models::{
                Credentials, LoginTarget, PasswordResetSubmission, SecondFactor, Session,
                TwoFactorEnrollment, UserRegistration,
            },
            reset::{PendingReset, ResetTokenStore},
            totp::{self, Authenticator},
            verification::{EmailVerificationStore, PendingVerification},
        },
        tenants::{
            TenantStore,
            errors::log_compensation_failure,
            models::{Counter, Tenant, TenantContext, TenantUuid},
        },
        users::{
            UserStore,
            models::{Lockout, NewUser, TwoFactorConfirmation, User, UserUuid},
        },
    },
    mailer::{MailMessage, MailTemplate},
    rate_limits::RateLimiter,
    secrets::{
        EMAIL_VERIFICATION_TOKEN_PREFIX, RESET_TOKEN_PREFIX, generate_recovery_code,
        generate_token, hash_token,
    },
};

/// Recovery codes issued when a second factor is confirmed.
pub const RECOVERY_CODE_COUNT: usize = 8;

/// Thresholds and lifetimes for authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub login: RateLimitPolicy,
    pub registration: RateLimitPolicy,
    pub lockout: Lockout,
    pub two_factor_lockout: Lockout,
    pub totp_issuer: String,
    pub reset_ttl: SignedDuration,
    pub verification_ttl: SignedDuration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            login: RateLimitPolicy::LOGIN,
            registration: RateLimitPolicy::REGISTRATION,
            lockout: Lockout {
                threshold: 10,
                duration: SignedDuration::from_mins(15),
            },
            two_factor_lockout: Lockout {
                threshold: 5,
                duration: SignedDuration::from_mins(15),
            },
            totp_issuer: "Tenantry".to_string(),
            reset_ttl: SignedDuration::from_hours(1),
            verification_ttl: SignedDuration::from_hours(24),
        }
    }
}

impl From<&SecurityConfig> for AuthSettings {
    fn from(config: &SecurityConfig) -> Self {
        Self {
            login: config.login_policy(),
            registration: config.registration_policy(),
            lockout: Lockout {
                threshold: config.account_lockout_threshold,
                duration: SignedDuration::from_mins(config.account_lockout_minutes),
            },
            two_factor_lockout: Lockout {
                threshold: config.two_factor_max_attempts,
                duration: SignedDuration::from_mins(config.two_factor_lockout_minutes),
            },
            totp_issuer: config.totp_issuer.clone(),
            reset_ttl: SignedDuration::from_mins(config.password_reset_ttl_minutes),
            verification_ttl: SignedDuration::from_hours(config.email_verification_ttl_hours),
        }
    }
}

/// Tenant-scoped sign-in, registration, password recovery and second factors.
#[derive(Clone)]
pub struct AuthSession {
    tenants: Arc<dyn TenantStore>,
    users: Arc<dyn UserStore>,
    resets: Arc<dyn ResetTokenStore>,
    verifications: Arc<dyn EmailVerificationStore>,
    limiter: RateLimiter,
    collaborators: Collaborators,
    settings: AuthSettings,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    #[must_use]
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        users: Arc<dyn UserStore>,
        resets: Arc<dyn ResetTokenStore>,
        verifications: Arc<dyn EmailVerificationStore>,
        limiter: RateLimiter,
        collaborators: Collaborators,
        settings: AuthSettings,
    ) -> Self {
        Self {
            tenants,
            users,
            resets,
            verifications,
            limiter,
            collaborators,
            settings,
        }
    }

    /// Authenticate a user and establish a session.
    ///
    /// # Errors
    ///
    /// Returns `TooManyAttempts` while the client is rate limited (the user record is not
    /// read), `TenantSuspended` for tenants that cannot sign in, `InvalidCredentials` for an
    /// unknown email, a locked account or a wrong password, and the second-factor errors once
    /// the password checks out.
    pub async fn login(
        &self,
        target: LoginTarget,
        credentials: Credentials,
    ) -> Result<Session, AuthSessionError> {
        let kind = match target {
            LoginTarget::Central => AttemptKind::CentralLogin,
            LoginTarget::Tenant(_) => AttemptKind::TenantLogin,
        };
        let key = RateLimitKey::new(kind, &credentials.ip);
        let policy = self.settings.login;

        self.ensure_allowed(&key, policy).await?;

        let tenant = match target {
            LoginTarget::Central => self.tenants.system_tenant().await?,
            LoginTarget::Tenant(tenant) => Some(self.tenants.get_tenant(tenant).await?),
        };

        let Some(tenant) = tenant else {
            return Err(self.reject(&key, policy, AuthSessionError::InvalidCredentials).await);
        };

        if !tenant.status.allows_login() {
            return Err(self.reject(&key, policy, AuthSessionError::TenantSuspended).await);
        }

        let ctx = tenant.context();
        let email = validation::normalize_email(&credentials.email);

        let Some(user) = self.users.find_by_email(&ctx, &email).await? else {
            return Err(self.reject(&key, policy, AuthSessionError::InvalidCredentials).await);
        };

        let now = self.collaborators.clock.now();

        if user.is_locked(now) {
            debug!(tenant = %tenant.uuid, user = %user.uuid, "login refused for locked account");

            return Err(self.reject(&key, policy, AuthSessionError::InvalidCredentials).await);
        }

        if !self
            .collaborators
            .hasher
            .verify(&credentials.password, &user.password_hash)?
        {
            self.users
                .record_login_failure(&ctx, user.uuid, self.settings.lockout, now)
                .await?;

            return Err(self.reject(&key, policy, AuthSessionError::InvalidCredentials).await);
        }

        if !user.status.allows_login() {
            return Err(self.reject(&key, policy, AuthSessionError::AccountInactive).await);
        }

        if target == LoginTarget::Central && !user.is_super_admin {
            return Err(self.reject(&key, policy, AuthSessionError::InvalidCredentials).await);
        }

        if !tenant.is_system
            && tenant.settings.require_email_verification
            && user.email_verified_at.is_none()
        {
            return Err(self.reject(&key, policy, AuthSessionError::EmailNotVerified).await);
        }

        if user.two_factor_enabled() {
            self.check_second_factor(&ctx, &user, credentials.second_factor.as_ref())
                .await?;
        }

        self.limiter.clear(&key).await?;
        self.users
            .record_login_success(&ctx, user.uuid, now, Some(credentials.ip.clone()))
            .await?;

        let graph = self.users.role_graph(&ctx).await?;
        let principal = Principal::new(
            user.uuid.into_uuid(),
            tenant.uuid.into_uuid(),
            user.is_super_admin,
            &user.roles,
            &graph,
        );

        info!(tenant = %tenant.uuid, user = %user.uuid, "login succeeded");

        self.audit(
            AuditEvent::new(Actor::from_principal(&principal), "auth.login")
                .tenant(tenant.uuid)
                .subject(user.uuid)
                .properties(json!({ "ip": credentials.ip })),
        )
        .await;

        Ok(Session {
            ctx,
            user: user.uuid,
            principal,
            must_change_password: user.must_change_password,
        })
    }

    /// End a session.
    pub async fn logout(&self, session: &Session) {
        self.audit(
            AuditEvent::new(Actor::from_principal(&session.principal), "auth.logout")
                .tenant(session.ctx.tenant())
                .subject(session.user),
        )
        .await;
    }

    /// Self-service registration. The new user gets the `user` role and, when the tenant
    /// requires verified addresses, a verification message.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationClosed` when the tenant does not allow it, `TooManyAttempts` past
    /// the registration rate limit and `LimitExceeded` when the tenant has no seat left.
    pub async fn register_user(
        &self,
        tenant: TenantUuid,
        registration: UserRegistration,
    ) -> Result<User, AuthSessionError> {
        let key = RateLimitKey::new(AttemptKind::TenantRegister, &registration.ip);
        let policy = self.settings.registration;

        self.ensure_allowed(&key, policy).await?;
        self.limiter.hit(&key, policy).await?;

        let tenant = self.tenants.get_tenant(tenant).await?;

        if !tenant.status.allows_login() {
            return Err(AuthSessionError::TenantSuspended);
        }

        if !tenant.settings.allow_registration {
            return Err(AuthSessionError::RegistrationClosed);
        }

        let mut errors = FieldErrors::new();
        validation::require_text(&mut errors, "name", &registration.name);
        validation::require_email(&mut errors, "email", &registration.email);
        validation::require_password(&mut errors, "password", &registration.password);
        errors.into_result()?;

        let ctx = tenant.context();
        let email = validation::normalize_email(&registration.email);

        if self.users.find_by_email(&ctx, &email).await?.is_some() {
            return Err(AuthSessionError::EmailTaken);
        }

        let password_hash = self.collaborators.hasher.hash(&registration.password)?;
        let now = self.collaborators.clock.now();

        self.tenants
            .adjust_counter(tenant.uuid, Counter::Users, 1)
            .await?;

        let created = self
            .users
            .create_user(
                &ctx,
                NewUser {
                    uuid: UserUuid::new(),
                    name: registration.name.trim().to_string(),
                    email,
                    password_hash,
                    status: UserStatus::Active,
                    is_super_admin: false,
                    must_change_password: false,
                    email_verified_at: (!tenant.settings.require_email_verification)
                        .then_some(now),
                    roles: vec![USER_ROLE.to_string()],
                },
            )
            .await;

        let user = match created {
            Ok(user) => user,
            Err(error) => {
                self.release_seat(&tenant).await;

                return Err(error.into());
            }
        };

        info!(tenant = %tenant.uuid, user = %user.uuid, "user registered");

        self.audit(
            AuditEvent::new(
                Actor::User {
                    user: user.uuid.into_uuid(),
                    impersonator: None,
                },
                "user.registered",
            )
            .tenant(tenant.uuid)
            .subject(user.uuid),
        )
        .await;

        if user.email_verified_at.is_none() {
            if let Err(source) = self.send_verification(&ctx, &user).await {
                warn!(
                    tenant = %tenant.uuid,
                    user = %user.uuid,
                    error = %source,
                    "failed to issue email verification"
                );
            }
        }

        Ok(user)
    }

    /// Send a fresh verification token, replacing any outstanding one. Unknown and already
    /// verified addresses get nothing, with the same outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only when a store is unavailable.
    pub async fn resend_verification_email(
        &self,
        ctx: &TenantContext,
        email: &str,
    ) -> Result<(), AuthSessionError> {
        let email = validation::normalize_email(email);

        match self.users.find_by_email(ctx, &email).await? {
            Some(user) if user.email_verified_at.is_none() => {
                self.send_verification(ctx, &user).await
            }
            _ => {
                debug!(tenant = %ctx.tenant(), "verification requested for no pending address");

                Ok(())
            }
        }
    }

    /// Mark the address behind a verification token as verified. Each token works once,
    /// before it expires.
    ///
    /// # Errors
    ///
    /// Returns `InvalidVerificationToken` for unknown, reused or expired tokens.
    pub async fn verify_email(
        &self,
        ctx: &TenantContext,
        token: &str,
    ) -> Result<UserUuid, AuthSessionError> {
        let now = self.collaborators.clock.now();

        let user = self
            .verifications
            .consume(ctx, &hash_token(token.trim()), now)
            .await?
            .ok_or(AuthSessionError::InvalidVerificationToken)?;

        self.users.mark_email_verified(ctx, user, now).await?;

        info!(tenant = %ctx.tenant(), user = %user, "email verified");

        self.audit(
            AuditEvent::new(
                Actor::User {
                    user: user.into_uuid(),
                    impersonator: None,
                },
                "auth.email_verified",
            )
            .tenant(ctx.tenant())
            .subject(user),
        )
        .await;

        Ok(user)
    }

    /// Send a reset token to the account's address. The outcome is the same whether or not
    /// the address is registered.
    ///
    /// # Errors
    ///
    /// Returns an error only when a store is unavailable.
    pub async fn request_password_reset(
        &self,
        ctx: &TenantContext,
        email: &str,
    ) -> Result<(), AuthSessionError> {
        let email = validation::normalize_email(email);

        let Some(user) = self.users.find_by_email(ctx, &email).await? else {
            debug!(tenant = %ctx.tenant(), "password reset requested for unknown address");

            return Ok(());
        };

        let token = generate_token(RESET_TOKEN_PREFIX);
        let expires_at = self
            .collaborators
            .clock
            .now()
            .saturating_add(self.settings.reset_ttl)
            .unwrap_or(jiff::Timestamp::MAX);

        self.resets
            .store(
                ctx,
                PendingReset {
                    user: user.uuid,
                    email: user.email.clone(),
                    token_hash: hash_token(&token),
                    expires_at,
                },
            )
            .await?;

        let message = MailMessage {
            to: user.email.clone(),
            template: MailTemplate::PasswordReset { token, expires_at },
        };

        if let Err(source) = self.collaborators.mailer.send(message).await {
            warn!(
                tenant = %ctx.tenant(),
                user = %user.uuid,
                error = %source,
                "failed to queue password reset message"
            );
        }

        self.audit(
            AuditEvent::new(Actor::System, "auth.password_reset_requested")
                .tenant(ctx.tenant())
                .subject(user.uuid),
        )
        .await;

        Ok(())
    }

    /// Set a new password with a reset token. Each token works once, before it expires.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResetToken` for unknown, reused or expired tokens and a validation
    /// error for a weak password.
    pub async fn reset_password(
        &self,
        ctx: &TenantContext,
        submission: PasswordResetSubmission,
    ) -> Result<(), AuthSessionError> {
        let mut errors = FieldErrors::new();
        validation::require_email(&mut errors, "email", &submission.email);
        validation::require_password(&mut errors, "password", &submission.password);
        errors.into_result()?;

        let now = self.collaborators.clock.now();

        let user = self
            .resets
            .consume(
                ctx,
                &validation::normalize_email(&submission.email),
                &hash_token(submission.token.trim()),
                now,
            )
            .await?
            .ok_or(AuthSessionError::InvalidResetToken)?;

        let password_hash = self.collaborators.hasher.hash(&submission.password)?;

        self.users
            .update_password(ctx, user, password_hash, now)
            .await?;

        info!(tenant = %ctx.tenant(), user = %user, "password reset");

        self.audit(
            AuditEvent::new(Actor::System, "auth.password_reset")
                .tenant(ctx.tenant())
                .subject(user),
        )
        .await;

        Ok(())
    }

    /// Start TOTP enrollment. The secret stays inactive until confirmed.
    ///
    /// # Errors
    ///
    /// Returns `TwoFactorAlreadyEnabled` when a confirmed factor exists.
    pub async fn begin_two_factor_enrollment(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
    ) -> Result<TwoFactorEnrollment, AuthSessionError> {
        let user = self.users.get_user(ctx, user).await?;

        if user.two_factor_enabled() {
            return Err(AuthSessionError::TwoFactorAlreadyEnabled);
        }

        let secret = totp::generate_secret();
        let authenticator = Authenticator::new(&secret, &self.settings.totp_issuer, &user.email)?;

        self.users
            .set_two_factor_secret(ctx, user.uuid, secret.clone())
            .await?;

        Ok(TwoFactorEnrollment {
            secret,
            otpauth_uri: authenticator.uri(),
        })
    }

    /// Confirm enrollment with a current code and return one-time recovery codes.
    ///
    /// # Errors
    ///
    /// Returns `TwoFactorNotStarted` without a pending secret and `InvalidTwoFactorCode` for
    /// a wrong code.
    pub async fn confirm_two_factor(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        code: &str,
    ) -> Result<Vec<String>, AuthSessionError> {
        let user = self.users.get_user(ctx, user).await?;

        if user.two_factor_enabled() {
            return Err(AuthSessionError::TwoFactorAlreadyEnabled);
        }

        let secret = user
            .two_factor_secret
            .as_deref()
            .ok_or(AuthSessionError::TwoFactorNotStarted)?;

        let now = self.collaborators.clock.now();

        let Some(step) =
            Authenticator::new(secret, &self.settings.totp_issuer, &user.email)?.verify(code, now)
        else {
            return Err(AuthSessionError::InvalidTwoFactorCode);
        };

        if !self
            .users
            .accept_two_factor_step(ctx, user.uuid, step)
            .await?
        {
            return Err(AuthSessionError::InvalidTwoFactorCode);
        }

        let codes: Vec<String> = (0..RECOVERY_CODE_COUNT)
            .map(|_| generate_recovery_code())
            .collect();

        self.users
            .confirm_two_factor(
                ctx,
                user.uuid,
                TwoFactorConfirmation {
                    confirmed_at: now,
                    recovery_code_hashes: codes.iter().map(|code| hash_token(code)).collect(),
                },
            )
            .await?;

        self.audit(
            AuditEvent::new(
                Actor::User {
                    user: user.uuid.into_uuid(),
                    impersonator: None,
                },
                "auth.two_factor_enabled",
            )
            .tenant(ctx.tenant())
            .subject(user.uuid),
        )
        .await;

        Ok(codes)
    }

    async fn check_second_factor(
        &self,
        ctx: &TenantContext,
        user: &User,
        factor: Option<&SecondFactor>,
    ) -> Result<(), AuthSessionError> {
        let now = self.collaborators.clock.now();

        if let Some(until) = user
            .two_factor_locked_until
            .filter(|_| user.two_factor_locked(now))
        {
            return Err(AuthSessionError::TwoFactorLocked { until });
        }

        let accepted = match factor {
            None => return Err(AuthSessionError::TwoFactorRequired),
            Some(SecondFactor::Totp(code)) => {
                let secret = user.two_factor_secret.as_deref().unwrap_or_default();

                match Authenticator::new(secret, &self.settings.totp_issuer, &user.email)?
                    .verify(code, now)
                {
                    Some(step) => {
                        self.users
                            .accept_two_factor_step(ctx, user.uuid, step)
                            .await?
                    }
                    None => false,
                }
            }
            Some(SecondFactor::RecoveryCode(code)) => {
                let digest = hash_token(&code.trim().to_ascii_lowercase());

                self.users
                    .consume_recovery_code(ctx, user.uuid, digest)
                    .await?
            }
        };

        if !accepted {
            self.users
                .record_two_factor_failure(ctx, user.uuid, self.settings.two_factor_lockout, now)
                .await?;

            return Err(AuthSessionError::InvalidTwoFactorCode);
        }

        Ok(())
    }

    async fn send_verification(
        &self,
        ctx: &TenantContext,
        user: &User,
    ) -> Result<(), AuthSessionError> {
        let token = generate_token(EMAIL_VERIFICATION_TOKEN_PREFIX);
        let expires_at = self
            .collaborators
            .clock
            .now()
            .saturating_add(self.settings.verification_ttl)
            .unwrap_or(jiff::Timestamp::MAX);

        self.verifications
            .store(
                ctx,
                PendingVerification {
                    user: user.uuid,
                    token_hash: hash_token(&token),
                    expires_at,
                },
            )
            .await?;

        let message = MailMessage {
            to: user.email.clone(),
            template: MailTemplate::EmailVerification { token, expires_at },
        };

        if let Err(source) = self.collaborators.mailer.send(message).await {
            warn!(
                tenant = %ctx.tenant(),
                user = %user.uuid,
                error = %source,
                "failed to queue email verification message"
            );
        }

        Ok(())
    }

    async fn ensure_allowed(
        &self,
        key: &RateLimitKey,
        policy: RateLimitPolicy,
    ) -> Result<(), AuthSessionError> {
        match self.limiter.check(key, policy).await? {
            RateLimitCheck::Allowed { .. } => Ok(()),
            RateLimitCheck::Locked { retry_after } => {
                debug!(key = %key, "attempt rejected by rate limit");

                Err(AuthSessionError::TooManyAttempts {
                    retry_after_seconds: retry_after.as_secs().max(1),
                })
            }
        }
    }

    /// Count a failed attempt and hand back the error to return.
    async fn reject(
        &self,
        key: &RateLimitKey,
        policy: RateLimitPolicy,
        error: AuthSessionError,
    ) -> AuthSessionError {
        match self.limiter.hit(key, policy).await {
            Ok(_) => error,
            Err(source) => source.into(),
        }
    }

    async fn release_seat(&self, tenant: &Tenant) {
        if let Err(source) = self
            .tenants
            .adjust_counter(tenant.uuid, Counter::Users, -1)
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
