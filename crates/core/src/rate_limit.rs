//! Attempt rate limiting
//!
//! A sliding decay window: each recorded failure pushes the window end to `now + decay`.
//! Once `max_attempts` failures sit inside the window, further attempts are rejected until
//! the window ends. A success clears the window.

use std::fmt;

use jiff::{SignedDuration, Timestamp};

/// Attempts recorded for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptWindow {
    /// Failures inside the window.
    pub attempts: u32,

    /// When the window lapses.
    pub resets_at: Timestamp,
}

impl AttemptWindow {
    /// Whether the window has lapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.resets_at <= now
    }
}

/// Result of checking a key before an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitCheck {
    /// The attempt may proceed.
    Allowed {
        /// Failures still allowed before lockout.
        remaining: u32,
    },

    /// The key is locked out.
    Locked {
        /// Time until the window lapses.
        retry_after: SignedDuration,
    },
}

/// Ceiling and decay for one kind of attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Failures allowed inside the window.
    pub max_attempts: u32,

    /// Window length, extended on every failure.
    pub decay: SignedDuration,
}

impl RateLimitPolicy {
    /// Five login failures per five minutes.
    pub const LOGIN: Self = Self {
        max_attempts: 5,
        decay: SignedDuration::from_secs(300),
    };

    /// Three registrations per five minutes.
    pub const REGISTRATION: Self = Self {
        max_attempts: 3,
        decay: SignedDuration::from_secs(300),
    };

    /// Evaluate the stored window before an attempt.
    #[must_use]
    pub fn check(&self, window: Option<&AttemptWindow>, now: Timestamp) -> RateLimitCheck {
        match window {
            Some(window) if !window.is_expired(now) && window.attempts >= self.max_attempts => {
                RateLimitCheck::Locked {
                    retry_after: window.resets_at.duration_since(now),
                }
            }
            Some(window) if !window.is_expired(now) => RateLimitCheck::Allowed {
                remaining: self.max_attempts - window.attempts,
            },
            _ => RateLimitCheck::Allowed {
                remaining: self.max_attempts,
            },
        }
    }

    /// Window after recording one failure.
    #[must_use]
    pub fn hit(&self, window: Option<AttemptWindow>, now: Timestamp) -> AttemptWindow {
        let attempts = match window {
            Some(window) if !window.is_expired(now) => window.attempts.saturating_add(1),
            _ => 1,
        };

        AttemptWindow {
            attempts,
            resets_at: now.saturating_add(self.decay).unwrap_or(Timestamp::MAX),
        }
    }
}

/// Attempt kind used to derive keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptKind {
    /// Super-admin login against the central application.
    CentralLogin,

    /// User login inside a tenant.
    TenantLogin,

    /// Self-service registration inside a tenant.
    TenantRegister,
}

/// Rate-limit bucket identifier, scoped by attempt kind and client address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Build the key for an attempt from `ip`.
    #[must_use]
    pub fn new(kind: AttemptKind, ip: &str) -> Self {
        let prefix = match kind {
            AttemptKind::CentralLogin => "central-login",
            AttemptKind::TenantLogin => "tenant-login",
            AttemptKind::TenantRegister => "tenant-register",
        };

        Self(format!("{prefix}:{ip}"))
    }

    /// Stored key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
