//! Tenantry
//!
//! Pure rules for a multi-tenant administration platform: plan defaults, resource limits,
//! slug and database naming, tenant/user status machines, the capability model and the
//! login rate-limit policy. Nothing here performs I/O.

pub mod access;
pub mod errors;
pub mod limits;
pub mod plans;
pub mod rate_limit;
pub mod slug;
pub mod status;
pub mod validation;

pub use errors::ErrorKind;
