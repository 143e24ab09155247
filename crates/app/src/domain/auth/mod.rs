//! Authentication: login, registration, email verification, password reset and second factor.

pub mod errors;
pub mod models;
pub mod reset;
pub mod service;
pub mod totp;
pub mod verification;

pub use errors::AuthSessionError;
pub use reset::{PgResetTokenStore, ResetTokenStore};
pub use service::*;
pub use verification::{EmailVerificationStore, PgEmailVerificationStore};
