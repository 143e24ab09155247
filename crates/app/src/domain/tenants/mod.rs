//! Tenants

pub mod errors;
pub mod lifecycle;
pub mod models;
pub(crate) mod repository;
pub mod store;

pub use errors::{LifecycleError, TenantsServiceError};
pub use lifecycle::*;
pub use store::*;
