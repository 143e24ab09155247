//! Resource Limits
//!
//! Limits are stored as a map from resource key to integer. A negative value, or a missing
//! key, means the resource is unlimited. Any non-negative value is a hard ceiling: a
//! mutation whose result would exceed it is rejected, never clamped.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel stored for unlimited resources.
pub const UNLIMITED: i64 = -1;

/// Bytes in one gibibyte.
pub const GIB: i64 = 1024 * 1024 * 1024;

/// Limited resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// Tenant user accounts.
    Users,

    /// Stored bytes.
    Storage,

    /// API calls in the current accounting period.
    ApiCalls,

    /// Projects.
    Projects,
}

impl Resource {
    /// Every resource, in display order.
    pub const ALL: [Self; 4] = [Self::Users, Self::Storage, Self::ApiCalls, Self::Projects];

    /// Key used in the stored limits map.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Storage => "storage",
            Self::ApiCalls => "api_calls",
            Self::Projects => "projects",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|resource| resource.key() == value)
            .ok_or_else(|| UnknownResource(value.to_string()))
    }
}

/// A resource key that is not part of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resource `{0}`")]
pub struct UnknownResource(pub String);

/// Effective limit for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// No ceiling.
    Unlimited,

    /// Inclusive ceiling.
    Bounded(i64),
}

impl Limit {
    /// Interpret a stored value.
    #[must_use]
    pub const fn from_stored(value: i64) -> Self {
        if value < 0 {
            Self::Unlimited
        } else {
            Self::Bounded(value)
        }
    }

    /// Value to persist.
    #[must_use]
    pub const fn stored(self) -> i64 {
        match self {
            Self::Unlimited => UNLIMITED,
            Self::Bounded(value) => value,
        }
    }
}

/// A mutation would take a resource past its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{resource} limit of {limit} reached (current {current}, requested {requested})")]
pub struct LimitExceeded {
    /// Limited resource.
    pub resource: Resource,

    /// Value before the mutation.
    pub current: i64,

    /// Amount the mutation tried to add.
    pub requested: i64,

    /// Configured ceiling.
    pub limit: i64,
}

/// Per-tenant limits map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Limits(BTreeMap<String, i64>);

impl Limits {
    /// Build limits from `(resource, stored value)` pairs.
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Resource, i64)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(resource, value)| (resource.key().to_string(), value))
                .collect(),
        )
    }

    /// Limits with every resource unlimited.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::from_pairs(Resource::ALL.map(|resource| (resource, UNLIMITED)))
    }

    /// Effective limit for a resource.
    #[must_use]
    pub fn get(&self, resource: Resource) -> Limit {
        self.0
            .get(resource.key())
            .copied()
            .map_or(Limit::Unlimited, Limit::from_stored)
    }

    /// Override a single resource limit.
    pub fn set(&mut self, resource: Resource, limit: Limit) {
        self.0.insert(resource.key().to_string(), limit.stored());
    }

    /// Check whether adding `delta` to `current` stays within the limit.
    ///
    /// Decrements always pass.
    ///
    /// # Errors
    ///
    /// Returns [`LimitExceeded`] when the post-mutation value would exceed a bounded limit.
    pub fn check(&self, resource: Resource, current: i64, delta: i64) -> Result<(), LimitExceeded> {
        if delta <= 0 {
            return Ok(());
        }

        match self.get(resource) {
            Limit::Unlimited => Ok(()),
            Limit::Bounded(limit) if current.saturating_add(delta) <= limit => Ok(()),
            Limit::Bounded(limit) => Err(LimitExceeded {
                resource,
                current,
                requested: delta,
                limit,
            }),
        }
    }

    /// Iterate over stored `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_negative_limits_are_unlimited() {
        let limits = Limits::from_pairs([(Resource::Users, UNLIMITED)]);

        assert_eq!(limits.get(Resource::Users), Limit::Unlimited);
        assert_eq!(limits.get(Resource::Storage), Limit::Unlimited);
        assert!(limits.check(Resource::Storage, i64::MAX - 1, 1).is_ok());
    }

    #[test]
    fn bounded_limit_allows_reaching_the_ceiling() {
        let limits = Limits::from_pairs([(Resource::Users, 5)]);

        assert!(limits.check(Resource::Users, 4, 1).is_ok());
    }

    #[test]
    fn bounded_limit_rejects_going_past_the_ceiling() {
        let limits = Limits::from_pairs([(Resource::Storage, GIB)]);

        let error = limits
            .check(Resource::Storage, GIB - 10, 11)
            .expect_err("should exceed");

        assert_eq!(
            error,
            LimitExceeded {
                resource: Resource::Storage,
                current: GIB - 10,
                requested: 11,
                limit: GIB,
            }
        );
    }

    #[test]
    fn zero_limit_is_enforced() {
        let limits = Limits::from_pairs([(Resource::Projects, 0)]);

        assert!(limits.check(Resource::Projects, 0, 1).is_err());
    }

    #[test]
    fn decrements_always_pass() {
        let limits = Limits::from_pairs([(Resource::Users, 1)]);

        assert!(limits.check(Resource::Users, 7, -1).is_ok());
    }

    #[test]
    fn set_overrides_a_single_resource() {
        let mut limits = Limits::unlimited();

        limits.set(Resource::ApiCalls, Limit::Bounded(10));

        assert_eq!(limits.get(Resource::ApiCalls), Limit::Bounded(10));
        assert_eq!(limits.get(Resource::Users), Limit::Unlimited);
    }

    #[test]
    fn resource_keys_parse() {
        for resource in Resource::ALL {
            assert_eq!(resource.key().parse::<Resource>(), Ok(resource));
        }

        assert!("seats".parse::<Resource>().is_err());
    }
}
