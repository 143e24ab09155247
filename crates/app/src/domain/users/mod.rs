//! Users

pub mod errors;
pub mod models;
pub(crate) mod repository;
pub mod store;

pub use errors::UsersServiceError;
pub use store::*;
