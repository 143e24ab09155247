//! TOTP second factor (RFC 6238: SHA-1, 6 digits, 30 second steps, one step of skew).

use jiff::Timestamp;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::secrets::constant_time_eq;

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: i64 = 30;

#[derive(Debug, Error)]
pub enum TwoFactorError {
    #[error("stored two-factor secret is malformed: {0}")]
    MalformedSecret(String),

    #[error("cannot build TOTP generator: {0}")]
    Generator(String),
}

/// A user's TOTP generator.
#[derive(Debug, Clone)]
pub struct Authenticator {
    totp: TOTP,
}

impl Authenticator {
    /// Generator for a base32 secret, labelled for authenticator apps.
    ///
    /// # Errors
    ///
    /// Returns an error when the secret does not decode or is too short.
    pub fn new(secret: &str, issuer: &str, account: &str) -> Result<Self, TwoFactorError> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|error| TwoFactorError::MalformedSecret(error.to_string()))?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS.unsigned_abs(),
            bytes,
            Some(issuer.to_string()),
            account.to_string(),
        )
        .map_err(|error| TwoFactorError::Generator(error.to_string()))?;

        Ok(Self { totp })
    }

    /// `otpauth://` provisioning URI.
    #[must_use]
    pub fn uri(&self) -> String {
        self.totp.get_url()
    }

    /// Time step `code` belongs to when it is valid at `now`.
    ///
    /// Callers record the step so a code cannot be used twice.
    #[must_use]
    pub fn verify(&self, code: &str, now: Timestamp) -> Option<i64> {
        let code = code.trim();
        let current = now.as_second().div_euclid(STEP_SECONDS);
        let skew = i64::from(SKEW);

        (current - skew..=current + skew).find(|step| {
            let start = u64::try_from(step.saturating_mul(STEP_SECONDS)).unwrap_or(0);

            constant_time_eq(&self.totp.generate(start), code)
        })
    }

    /// Code for `now`.
    #[must_use]
    pub fn code_at(&self, now: Timestamp) -> String {
        self.totp.generate(unix_seconds(now))
    }
}

/// Fresh base32 secret.
#[must_use]
pub fn generate_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

fn unix_seconds(now: Timestamp) -> u64 {
    u64::try_from(now.as_second()).unwrap_or(0)
}
