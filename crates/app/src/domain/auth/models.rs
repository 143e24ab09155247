//! Authentication Models

use std::fmt;

use tenantry::access::Principal;

use crate::domain::{
    tenants::models::{TenantContext, TenantUuid},
    users::models::UserUuid,
};

/// Where a login is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginTarget {
    /// The central application; only super-admins may sign in.
    Central,

    /// A tenant application.
    Tenant(TenantUuid),
}

/// Second factor presented with a login.
#[derive(Clone, PartialEq, Eq)]
pub enum SecondFactor {
    Totp(String),
    RecoveryCode(String),
}

impl fmt::Debug for SecondFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Totp(_) => f.write_str("Totp(..)"),
            Self::RecoveryCode(_) => f.write_str("RecoveryCode(..)"),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub second_factor: Option<SecondFactor>,

    /// Client address, used for rate limiting.
    pub ip: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("ip", &self.ip)
            .finish_non_exhaustive()
    }
}

/// Established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub ctx: TenantContext,
    pub user: UserUuid,
    pub principal: Principal,

    /// The user signed in with a temporary password and must pick a new one.
    pub must_change_password: bool,
}

/// Self-service registration inside a tenant.
#[derive(Clone, PartialEq, Eq)]
pub struct UserRegistration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub ip: String,
}

impl fmt::Debug for UserRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRegistration")
            .field("email", &self.email)
            .field("ip", &self.ip)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PasswordResetSubmission {
    pub email: String,
    pub token: String,
    pub password: String,
}

impl fmt::Debug for PasswordResetSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordResetSubmission")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Pending second factor, shown once to the user.
#[derive(Clone, PartialEq, Eq)]
pub struct TwoFactorEnrollment {
    pub secret: String,
    pub otpauth_uri: String,
}

impl fmt::Debug for TwoFactorEnrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoFactorEnrollment").finish_non_exhaustive()
    }
}
