//! Password hashing (Argon2id, PHC strings).

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier as _, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use mockall::automock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("stored password hash is malformed")]
    MalformedHash(#[source] argon2::password_hash::Error),

    #[error("password hashing failed")]
    Hashing(#[source] argon2::password_hash::Error),

    #[error("invalid argon2 parameters")]
    Params(#[source] argon2::Error),
}

#[automock]
pub trait PasswordHasher: Send + Sync {
    /// Hash a password into a PHC string.
    fn hash(&self, password: &str) -> Result<String, PasswordError>;

    /// Check a password against a stored PHC string. A mismatch is `Ok(false)`.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError>;
}

#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    /// Hasher with explicit cost parameters (memory KiB, iterations, lanes).
    ///
    /// # Errors
    ///
    /// Returns an error when the parameters are out of range.
    pub fn with_costs(memory_kib: u32, iterations: u32, lanes: u32) -> Result<Self, PasswordError> {
        let params =
            Params::new(memory_kib, iterations, lanes, None).map_err(PasswordError::Params)?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(PasswordError::Hashing)
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(hash).map_err(PasswordError::MalformedHash)?;

        match self.argon2().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(error) => Err(PasswordError::Hashing(error)),
        }
    }
}
