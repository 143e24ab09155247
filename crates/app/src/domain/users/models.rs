//! User Models

use std::fmt;

use jiff::{SignedDuration, Timestamp};
use smallvec::SmallVec;
use tenantry::status::UserStatus;

use crate::{domain::tenants::models::TenantUuid, uuids::TypedUuid};

/// User UUID
pub type UserUuid = TypedUuid<User>;

/// User Model
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub uuid: UserUuid,
    pub tenant: TenantUuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub is_super_admin: bool,
    pub failed_login_attempts: u32,
    pub locked_until: Option<Timestamp>,

    /// Base32 TOTP secret; present but unconfirmed while enrollment is in progress.
    pub two_factor_secret: Option<String>,
    pub two_factor_confirmed_at: Option<Timestamp>,

    /// SHA-256 digests of the unused recovery codes.
    pub two_factor_recovery_codes: Vec<String>,
    pub two_factor_failed_attempts: u32,
    pub two_factor_locked_until: Option<Timestamp>,

    /// Last TOTP time step accepted; codes from that step or earlier are spent.
    pub two_factor_last_step: Option<i64>,
    pub password_changed_at: Option<Timestamp>,
    pub must_change_password: bool,
    pub email_verified_at: Option<Timestamp>,
    pub last_login_at: Option<Timestamp>,
    pub last_login_ip: Option<String>,
    pub roles: SmallVec<[String; 4]>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl User {
    #[must_use]
    pub fn is_locked(&self, now: Timestamp) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// A confirmed secret makes the second factor mandatory.
    #[must_use]
    pub const fn two_factor_enabled(&self) -> bool {
        self.two_factor_secret.is_some() && self.two_factor_confirmed_at.is_some()
    }

    #[must_use]
    pub fn two_factor_locked(&self, now: Timestamp) -> bool {
        self.two_factor_locked_until.is_some_and(|until| until > now)
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|held| held == role)
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("uuid", &self.uuid)
            .field("tenant", &self.tenant)
            .field("email", &self.email)
            .field("status", &self.status)
            .field("is_super_admin", &self.is_super_admin)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

/// New User Model
#[derive(Clone, PartialEq, Eq)]
pub struct NewUser {
    pub uuid: UserUuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub is_super_admin: bool,
    pub must_change_password: bool,
    pub email_verified_at: Option<Timestamp>,
    pub roles: Vec<String>,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("uuid", &self.uuid)
            .field("email", &self.email)
            .field("status", &self.status)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

/// Consecutive failures allowed before a lock, and how long the lock lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lockout {
    pub threshold: u32,
    pub duration: SignedDuration,
}

impl Lockout {
    /// Lock end for a failure recorded at `now`.
    #[must_use]
    pub fn until(&self, now: Timestamp) -> Timestamp {
        now.saturating_add(self.duration).unwrap_or(Timestamp::MAX)
    }
}

/// Second-factor state written when enrollment is confirmed.
#[derive(Clone, PartialEq, Eq)]
pub struct TwoFactorConfirmation {
    pub confirmed_at: Timestamp,
    pub recovery_code_hashes: Vec<String>,
}

impl fmt::Debug for TwoFactorConfirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoFactorConfirmation")
            .field("confirmed_at", &self.confirmed_at)
            .finish_non_exhaustive()
    }
}
