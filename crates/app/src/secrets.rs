//! One-time secrets: reset, verification and impersonation tokens, temporary passwords and
//! recovery codes. Raw values are shown once; only their SHA-256 digests are stored.

use std::fmt;

use rand::{Rng, RngCore, distributions::Alphanumeric, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Number of random bytes in a token secret.
pub const SECRET_BYTES: usize = 32;

/// Prefix of password reset tokens.
pub const RESET_TOKEN_PREFIX: &str = "rst";

/// Prefix of email verification tokens.
pub const EMAIL_VERIFICATION_TOKEN_PREFIX: &str = "evt";

/// Prefix of the tokens that activate a newly registered tenant.
pub const TENANT_VERIFICATION_TOKEN_PREFIX: &str = "tvt";

/// Prefix of impersonation tokens.
pub const IMPERSONATION_TOKEN_PREFIX: &str = "imp";

const SECRET_HEX_CHARS: usize = SECRET_BYTES * 2;

const TEMPORARY_PASSWORD_LENGTH: usize = 20;

const RECOVERY_CODE_HALF_LENGTH: usize = 5;

#[derive(Clone)]
pub struct TokenSecret {
    bytes: [u8; SECRET_BYTES],
}

impl TokenSecret {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SECRET_BYTES]) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SECRET_BYTES] {
        &self.bytes
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(**redacted**)")
    }
}

impl Drop for TokenSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

#[must_use]
pub fn generate_secret() -> TokenSecret {
    let mut secret = [0_u8; SECRET_BYTES];

    OsRng.fill_bytes(&mut secret);

    TokenSecret::from_bytes(secret)
}

/// Render a secret as `{prefix}_{hex}`.
#[must_use]
pub fn format_token(prefix: &str, secret: &TokenSecret) -> String {
    format!("{prefix}_{}", encode_hex(secret.as_bytes()))
}

/// Generate and render a fresh token in one step.
#[must_use]
pub fn generate_token(prefix: &str) -> String {
    format_token(prefix, &generate_secret())
}

/// Hex SHA-256 digest used as the stored form of a token.
#[must_use]
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Compare two secrets without leaking where they differ.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Random password handed to a newly provisioned tenant admin.
#[must_use]
pub fn generate_temporary_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TEMPORARY_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// One two-factor recovery code, formatted `xxxxx-xxxxx`.
#[must_use]
pub fn generate_recovery_code() -> String {
    let mut rng = OsRng;
    let mut half = || -> String {
        (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(RECOVERY_CODE_HALF_LENGTH)
            .map(|byte| char::from(byte).to_ascii_lowercase())
            .collect()
    };

    let first = half();
    let second = half();

    format!("{first}-{second}")
}

fn encode_hex(bytes: &[u8; SECRET_BYTES]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";

    let mut encoded = String::with_capacity(SECRET_HEX_CHARS);

    for byte in bytes {
        encoded.push(char::from(HEX[usize::from(byte >> 4)]));
        encoded.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }

    encoded
}
