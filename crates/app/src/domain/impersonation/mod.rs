//! Impersonation: short-lived tokens that let a super-admin act as a tenant user.

pub mod broker;
pub mod errors;
pub mod models;
mod repository;
pub mod store;

pub use broker::*;
pub use errors::{ImpersonationError, ImpersonationStoreError};
pub use store::*;
