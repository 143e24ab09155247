//! Impersonation Models

use std::fmt;

use jiff::{SignedDuration, Timestamp};
use serde_json::Value;
use tenantry::{access::Principal, status::TokenStatus};

use crate::{
    domain::{
        tenants::models::{TenantContext, TenantUuid},
        users::models::UserUuid,
    },
    uuids::TypedUuid,
};

/// Impersonation token UUID
pub type ImpersonationTokenUuid = TypedUuid<ImpersonationToken>;

/// Stored impersonation token. The raw token is never stored, only its digest.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpersonationToken {
    pub uuid: ImpersonationTokenUuid,
    pub token_hash: String,
    pub tenant: TenantUuid,
    pub target_user: UserUuid,
    pub impersonator: UserUuid,
    pub status: TokenStatus,
    pub max_uses: u32,
    pub used_count: u32,
    pub single_use: bool,
    pub expires_at: Timestamp,
    pub max_duration_minutes: Option<i64>,
    pub reason: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub used_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    pub revoked_by: Option<UserUuid>,
    pub revoke_reason: Option<String>,
    pub audit_log: Value,
    pub created_at: Timestamp,
}

impl ImpersonationToken {
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    #[must_use]
    pub const fn is_used_up(&self) -> bool {
        self.used_count >= self.max_uses
    }
}

/// Request to impersonate a tenant user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueImpersonation {
    pub tenant: TenantUuid,
    pub target_user: UserUuid,
    pub reason: String,

    /// Time the token stays redeemable; the configured default when `None`.
    pub ttl: Option<SignedDuration>,

    /// Ceiling on the session length after redemption.
    pub max_duration_minutes: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImpersonationToken {
    pub uuid: ImpersonationTokenUuid,
    pub token_hash: String,
    pub tenant: TenantUuid,
    pub target_user: UserUuid,
    pub impersonator: UserUuid,
    pub max_uses: u32,
    pub single_use: bool,
    pub expires_at: Timestamp,
    pub max_duration_minutes: Option<i64>,
    pub reason: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub created_at: Timestamp,
}

/// Freshly issued token. `raw` is returned once and cannot be recovered later.
#[derive(Clone, PartialEq)]
pub struct IssuedImpersonation {
    pub token: ImpersonationToken,
    pub raw: String,
}

impl fmt::Debug for IssuedImpersonation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedImpersonation")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Session established by redeeming a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpersonationSession {
    pub token: ImpersonationTokenUuid,
    pub ctx: TenantContext,
    pub target_user: UserUuid,
    pub impersonator: UserUuid,

    /// The target user's capabilities, marked as impersonated.
    pub principal: Principal,
    pub redeemed_at: Timestamp,

    /// Hard end of the session, when the token carried a duration ceiling.
    pub ends_at: Option<Timestamp>,
}

impl ImpersonationSession {
    #[must_use]
    pub fn has_ended(&self, now: Timestamp) -> bool {
        self.ends_at.is_some_and(|ends_at| ends_at <= now)
    }
}
