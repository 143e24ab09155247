//! Plans
//!
//! The single table of plan defaults. Registration copies a plan's features and limits onto
//! the tenant; plan changes replace them wholesale.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::{GIB, Limits, Resource, UNLIMITED};

/// Feature flags known to the platform.
pub const FEATURES: [&str; 4] = ["users", "teams", "api_access", "advanced_analytics"];

/// Commercial plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Entry plan.
    Basic,

    /// Mid-tier plan.
    Pro,

    /// Unlimited resources, every feature.
    Enterprise,

    /// Reserved for the system tenant.
    Unlimited,
}

impl Plan {
    /// Plans a tenant may register with.
    pub const REGISTRABLE: [Self; 3] = [Self::Basic, Self::Pro, Self::Enterprise];

    /// Stored identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
            Self::Unlimited => "unlimited",
        }
    }

    /// Whether tenants may register on this plan.
    #[must_use]
    pub const fn is_registrable(self) -> bool {
        !matches!(self, Self::Unlimited)
    }

    /// Features and limits a tenant on this plan starts with.
    #[must_use]
    pub fn defaults(self) -> PlanDefaults {
        match self {
            Self::Basic => PlanDefaults {
                features: Features::only(&["users"]),
                limits: Limits::from_pairs([
                    (Resource::Users, 5),
                    (Resource::Storage, GIB),
                    (Resource::ApiCalls, 1_000),
                    (Resource::Projects, 3),
                ]),
            },
            Self::Pro => PlanDefaults {
                features: Features::only(&["users", "teams", "api_access", "advanced_analytics"]),
                limits: Limits::from_pairs([
                    (Resource::Users, 25),
                    (Resource::Storage, 10 * GIB),
                    (Resource::ApiCalls, 10_000),
                    (Resource::Projects, 15),
                ]),
            },
            Self::Enterprise | Self::Unlimited => PlanDefaults {
                features: Features::all(),
                limits: Limits::from_pairs(Resource::ALL.map(|resource| (resource, UNLIMITED))),
            },
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "basic" => Ok(Self::Basic),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            "unlimited" => Ok(Self::Unlimited),
            other => Err(UnknownPlan(other.to_string())),
        }
    }
}

/// A plan identifier that is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown plan `{0}`")]
pub struct UnknownPlan(pub String);

/// Feature flag map; every known feature is listed with an explicit value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(BTreeMap<String, bool>);

impl Features {
    /// Enable exactly the given features; every other known feature is disabled.
    #[must_use]
    pub fn only(enabled: &[&str]) -> Self {
        Self(
            FEATURES
                .iter()
                .map(|feature| ((*feature).to_string(), enabled.contains(feature)))
                .collect(),
        )
    }

    /// Enable every known feature.
    #[must_use]
    pub fn all() -> Self {
        Self::only(&FEATURES)
    }

    /// Whether a feature is enabled. Unknown features are disabled.
    #[must_use]
    pub fn enabled(&self, feature: &str) -> bool {
        self.0.get(feature).copied().unwrap_or(false)
    }
}

/// Defaults applied when a tenant joins a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanDefaults {
    /// Feature flags.
    pub features: Features,

    /// Resource limits.
    pub limits: Limits,
}

#[cfg(test)]
mod tests {
    use crate::limits::Limit;

    use super::*;

    #[test]
    fn basic_plan_defaults() {
        let defaults = Plan::Basic.defaults();

        assert_eq!(defaults.limits.get(Resource::Users), Limit::Bounded(5));
        assert_eq!(defaults.limits.get(Resource::Storage), Limit::Bounded(GIB));
        assert_eq!(defaults.limits.get(Resource::ApiCalls), Limit::Bounded(1_000));
        assert_eq!(defaults.limits.get(Resource::Projects), Limit::Bounded(3));
        assert!(defaults.features.enabled("users"));
        assert!(!defaults.features.enabled("teams"));
        assert!(!defaults.features.enabled("api_access"));
    }

    #[test]
    fn pro_plan_defaults() {
        let defaults = Plan::Pro.defaults();

        assert_eq!(defaults.limits.get(Resource::Users), Limit::Bounded(25));
        assert_eq!(defaults.limits.get(Resource::Storage), Limit::Bounded(10 * GIB));
        assert!(defaults.features.enabled("advanced_analytics"));
    }

    #[test]
    fn enterprise_is_unlimited() {
        let defaults = Plan::Enterprise.defaults();

        for resource in Resource::ALL {
            assert_eq!(defaults.limits.get(resource), Limit::Unlimited, "{resource}");
        }

        assert_eq!(defaults.features, Features::all());
    }

    #[test]
    fn unlimited_plan_is_not_registrable() {
        assert!(!Plan::Unlimited.is_registrable());
        assert!(Plan::REGISTRABLE.iter().all(|plan| plan.is_registrable()));
    }

    #[test]
    fn plans_parse_from_their_identifiers() {
        for plan in [Plan::Basic, Plan::Pro, Plan::Enterprise, Plan::Unlimited] {
            assert_eq!(plan.as_str().parse::<Plan>(), Ok(plan));
        }

        assert!("gold".parse::<Plan>().is_err());
    }

    #[test]
    fn feature_maps_list_every_known_feature() {
        let features = Features::only(&["teams"]);

        for feature in FEATURES {
            assert_eq!(features.enabled(feature), feature == "teams", "{feature}");
        }

        assert!(!features.enabled("unknown"));
    }
}
