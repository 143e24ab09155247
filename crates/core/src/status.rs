//! Status machines
//!
//! Tenant transitions: `pending -> active`, `suspended -> active`, `active -> suspended`.
//! Deletion is a separate soft-delete flag and is allowed from any status.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status value that is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status `{0}`")]
pub struct UnknownStatus(pub String);

/// Requested transition is not allowed from the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move tenant from {from} to {to}")]
pub struct InvalidTransition {
    /// Current status.
    pub from: TenantStatus,

    /// Requested status.
    pub to: TenantStatus,
}

/// Tenant availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Registered, awaiting activation.
    Pending,

    /// Fully available.
    Active,

    /// Administratively disabled without a suspension reason.
    Inactive,

    /// Disabled by policy or billing failure; data retained.
    Suspended,
}

impl TenantStatus {
    /// Stored identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }

    /// Statuses `activate` accepts.
    pub const ACTIVATABLE: [Self; 2] = [Self::Pending, Self::Suspended];

    /// Status after activation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] unless the tenant is pending or suspended.
    pub fn activate(self) -> Result<Self, InvalidTransition> {
        if Self::ACTIVATABLE.contains(&self) {
            Ok(Self::Active)
        } else {
            Err(InvalidTransition {
                from: self,
                to: Self::Active,
            })
        }
    }

    /// Status after suspension.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] unless the tenant is active.
    pub fn suspend(self) -> Result<Self, InvalidTransition> {
        if self == Self::Active {
            Ok(Self::Suspended)
        } else {
            Err(InvalidTransition {
                from: self,
                to: Self::Suspended,
            })
        }
    }

    /// Whether users of the tenant may sign in.
    #[must_use]
    pub const fn allows_login(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "suspended" => Ok(Self::Suspended),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// User account availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// May sign in.
    Active,

    /// Deactivated by an administrator.
    Inactive,

    /// Suspended by policy.
    Suspended,

    /// Awaiting email verification.
    Pending,

    /// Permanently barred.
    Banned,
}

impl UserStatus {
    /// Stored identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
            Self::Pending => "pending",
            Self::Banned => "banned",
        }
    }

    /// Whether the account may sign in.
    #[must_use]
    pub const fn allows_login(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "suspended" => Ok(Self::Suspended),
            "pending" => Ok(Self::Pending),
            "banned" => Ok(Self::Banned),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Impersonation token state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// Issued and redeemable.
    Active,

    /// Redeemed the maximum number of times.
    Used,

    /// Passed its expiry without being used up.
    Expired,

    /// Withdrawn by an operator.
    Revoked,
}

impl TokenStatus {
    /// Stored identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "used" => Ok(Self::Used),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
