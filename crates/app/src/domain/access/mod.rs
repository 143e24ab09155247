//! Access control over tenant users.

pub mod errors;
pub mod service;

pub use errors::AccessControlError;
pub use service::*;
