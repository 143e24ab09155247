//! One-time creation of the system tenant and the first super-admin.

pub mod errors;
pub mod models;
pub mod service;
pub mod store;

pub use errors::{BootstrapError, BootstrapStoreError};
pub use service::*;
pub use store::*;
