//! Error Kinds

use std::fmt;

/// Coarse classification shared by every error the platform reports.
///
/// Presentation layers map on this instead of matching individual error enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A uniqueness rule was violated (slug, domain, email, single-use token).
    Conflict,

    /// Input failed validation; carries field-level detail at the source.
    Validation,

    /// Credentials, tokens or second factors were rejected.
    Authentication,

    /// The caller is authenticated but not allowed to perform the action.
    Authorization,

    /// A plan limit would be exceeded.
    ResourceLimit,

    /// Creating, migrating or dropping a tenant database failed.
    Provisioning,

    /// Storage or network trouble that may succeed on a later attempt.
    TransientInfrastructure,

    /// The addressed record does not exist.
    NotFound,

    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Stable snake-case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::ResourceLimit => "resource_limit",
            Self::Provisioning => "provisioning",
            Self::TransientInfrastructure => "transient_infrastructure",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
