//! User store.
//!
//! Every call takes the [`TenantContext`] it acts in: the context picks the database and every
//! query also filters on the tenant.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use sqlx::{Postgres, Transaction};
use tenantry::{access::RoleGraph, status::UserStatus};

use crate::{
    database::TenantConnections,
    domain::{
        tenants::models::TenantContext,
        users::{
            errors::UsersServiceError,
            models::{Lockout, NewUser, TwoFactorConfirmation, User, UserUuid},
            repository::PgUsersRepository,
        },
    },
};

#[automock]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user and grant its roles. Unknown roles fail with `InvalidReference`.
    async fn create_user(
        &self,
        ctx: &TenantContext,
        user: NewUser,
    ) -> Result<User, UsersServiceError>;

    async fn get_user(&self, ctx: &TenantContext, user: UserUuid)
    -> Result<User, UsersServiceError>;

    /// Case-insensitive lookup among live users.
    async fn find_by_email(
        &self,
        ctx: &TenantContext,
        email: &str,
    ) -> Result<Option<User>, UsersServiceError>;

    /// Roles and permissions defined in the context's store.
    async fn role_graph(&self, ctx: &TenantContext) -> Result<RoleGraph, UsersServiceError>;

    /// Count a bad password, locking the account once the threshold is reached.
    async fn record_login_failure(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        lockout: Lockout,
        now: Timestamp,
    ) -> Result<(), UsersServiceError>;

    /// Clear failure counters and stamp the login.
    async fn record_login_success(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        at: Timestamp,
        ip: Option<String>,
    ) -> Result<(), UsersServiceError>;

    async fn record_two_factor_failure(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        lockout: Lockout,
        now: Timestamp,
    ) -> Result<(), UsersServiceError>;

    /// Store an unconfirmed secret, discarding any previous second factor.
    async fn set_two_factor_secret(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        secret: String,
    ) -> Result<(), UsersServiceError>;

    async fn confirm_two_factor(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        confirmation: TwoFactorConfirmation,
    ) -> Result<(), UsersServiceError>;

    /// Remove a recovery code digest; `false` when it was not (or no longer) present.
    async fn consume_recovery_code(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        code_hash: String,
    ) -> Result<bool, UsersServiceError>;

    /// Claim a TOTP time step. `false` when that step, or a later one, was already used.
    async fn accept_two_factor_step(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        step: i64,
    ) -> Result<bool, UsersServiceError>;

    /// Stamp the address as verified. An earlier stamp is kept.
    async fn mark_email_verified(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        at: Timestamp,
    ) -> Result<(), UsersServiceError>;

    /// Replace the password hash and clear lockout and forced-change flags.
    async fn update_password(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        password_hash: String,
        at: Timestamp,
    ) -> Result<(), UsersServiceError>;

    /// Change a user's status; moving the last active admin out of `active` fails with
    /// `LastAdmin`.
    async fn set_status(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        status: UserStatus,
    ) -> Result<User, UsersServiceError>;

    /// Soft-delete a user; the last active admin cannot be deleted.
    async fn soft_delete(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        at: Timestamp,
    ) -> Result<(), UsersServiceError>;
}

#[derive(Debug, Clone)]
pub struct PgUserStore {
    connections: Arc<TenantConnections>,
    repository: PgUsersRepository,
}

impl PgUserStore {
    #[must_use]
    pub fn new(connections: Arc<TenantConnections>) -> Self {
        Self {
            connections,
            repository: PgUsersRepository::new(),
        }
    }

    async fn begin(
        &self,
        ctx: &TenantContext,
    ) -> Result<Transaction<'static, Postgres>, UsersServiceError> {
        Ok(self.connections.pool_for(ctx).await.begin().await?)
    }

    /// Fail with `LastAdmin` when `user` is the only active admin left.
    async fn guard_last_admin(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ctx: &TenantContext,
        user: UserUuid,
    ) -> Result<(), UsersServiceError> {
        let admins = self.repository.lock_active_admins(tx, ctx.tenant()).await?;

        if admins.len() == 1 && admins.contains(&user) {
            return Err(UsersServiceError::LastAdmin);
        }

        Ok(())
    }
}

fn affected(rows_affected: u64) -> Result<(), UsersServiceError> {
    if rows_affected == 0 {
        return Err(UsersServiceError::NotFound);
    }

    Ok(())
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(
        &self,
        ctx: &TenantContext,
        user: NewUser,
    ) -> Result<User, UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let granted = self
            .repository
            .create_user(&mut tx, ctx.tenant(), &user)
            .await?;

        if usize::try_from(granted).ok() != Some(user.roles.len()) {
            return Err(UsersServiceError::InvalidReference);
        }

        let created = self
            .repository
            .get_user(&mut tx, ctx.tenant(), user.uuid)
            .await?
            .ok_or(UsersServiceError::NotFound)?;

        tx.commit().await?;

        Ok(created)
    }

    async fn get_user(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
    ) -> Result<User, UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let found = self.repository.get_user(&mut tx, ctx.tenant(), user).await?;

        tx.commit().await?;

        found.ok_or(UsersServiceError::NotFound)
    }

    async fn find_by_email(
        &self,
        ctx: &TenantContext,
        email: &str,
    ) -> Result<Option<User>, UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let found = self
            .repository
            .find_by_email(&mut tx, ctx.tenant(), email)
            .await?;

        tx.commit().await?;

        Ok(found)
    }

    async fn role_graph(&self, ctx: &TenantContext) -> Result<RoleGraph, UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let graph = self.repository.role_graph(&mut tx).await?;

        tx.commit().await?;

        Ok(graph)
    }

    async fn record_login_failure(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        lockout: Lockout,
        now: Timestamp,
    ) -> Result<(), UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let attempts = self
            .repository
            .record_login_failure(&mut tx, ctx.tenant(), user, lockout, now)
            .await?;

        tx.commit().await?;

        attempts.map(|_| ()).ok_or(UsersServiceError::NotFound)
    }

    async fn record_login_success(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        at: Timestamp,
        ip: Option<String>,
    ) -> Result<(), UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let rows_affected = self
            .repository
            .record_login_success(&mut tx, ctx.tenant(), user, at, ip.as_deref())
            .await?;

        tx.commit().await?;

        affected(rows_affected)
    }

    async fn record_two_factor_failure(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        lockout: Lockout,
        now: Timestamp,
    ) -> Result<(), UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let attempts = self
            .repository
            .record_two_factor_failure(&mut tx, ctx.tenant(), user, lockout, now)
            .await?;

        tx.commit().await?;

        attempts.map(|_| ()).ok_or(UsersServiceError::NotFound)
    }

    async fn set_two_factor_secret(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        secret: String,
    ) -> Result<(), UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let rows_affected = self
            .repository
            .set_two_factor_secret(&mut tx, ctx.tenant(), user, Some(&secret))
            .await?;

        tx.commit().await?;

        affected(rows_affected)
    }

    async fn confirm_two_factor(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        confirmation: TwoFactorConfirmation,
    ) -> Result<(), UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let rows_affected = self
            .repository
            .confirm_two_factor(&mut tx, ctx.tenant(), user, &confirmation)
            .await?;

        tx.commit().await?;

        affected(rows_affected)
    }

    async fn consume_recovery_code(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        code_hash: String,
    ) -> Result<bool, UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let rows_affected = self
            .repository
            .consume_recovery_code(&mut tx, ctx.tenant(), user, &code_hash)
            .await?;

        tx.commit().await?;

        Ok(rows_affected == 1)
    }

    async fn accept_two_factor_step(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        step: i64,
    ) -> Result<bool, UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let rows_affected = self
            .repository
            .accept_two_factor_step(&mut tx, ctx.tenant(), user, step)
            .await?;

        tx.commit().await?;

        Ok(rows_affected == 1)
    }

    async fn mark_email_verified(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        at: Timestamp,
    ) -> Result<(), UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let rows_affected = self
            .repository
            .mark_email_verified(&mut tx, ctx.tenant(), user, at)
            .await?;

        tx.commit().await?;

        affected(rows_affected)
    }

    async fn update_password(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        password_hash: String,
        at: Timestamp,
    ) -> Result<(), UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        let rows_affected = self
            .repository
            .update_password(&mut tx, ctx.tenant(), user, &password_hash, at)
            .await?;

        tx.commit().await?;

        affected(rows_affected)
    }

    async fn set_status(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        status: UserStatus,
    ) -> Result<User, UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        if status != UserStatus::Active {
            self.guard_last_admin(&mut tx, ctx, user).await?;
        }

        let updated = self
            .repository
            .set_status(&mut tx, ctx.tenant(), user, status.as_str())
            .await?
            .ok_or(UsersServiceError::NotFound)?;

        tx.commit().await?;

        Ok(updated)
    }

    async fn soft_delete(
        &self,
        ctx: &TenantContext,
        user: UserUuid,
        at: Timestamp,
    ) -> Result<(), UsersServiceError> {
        let mut tx = self.begin(ctx).await?;

        self.guard_last_admin(&mut tx, ctx, user).await?;

        let rows_affected = self
            .repository
            .soft_delete(&mut tx, ctx.tenant(), user, at)
            .await?;

        affected(rows_affected)?;

        tx.commit().await?;

        Ok(())
    }
}
