//! Input Validation
//!
//! Field-level validation helpers. Errors are collected per field so callers can report
//! every problem with a submission at once.

use std::{collections::BTreeMap, fmt};

use thiserror::Error;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum accepted length for names and emails, in characters.
pub const MAX_FIELD_LENGTH: usize = 255;

/// Validation messages keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    /// Create an empty error set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message against a field.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// Whether no field failed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages recorded for a field.
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Iterate over failing fields and their messages.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0
            .iter()
            .map(|(field, messages)| (field.as_str(), messages.as_slice()))
    }

    /// Convert into a result, failing when any field was recorded.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when at least one field failed.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { fields: self })
        }
    }
}

/// One or more fields failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {fields}")]
pub struct ValidationError {
    /// Failing fields.
    pub fields: FieldErrors,
}

impl ValidationError {
    /// Shorthand for a single failing field.
    #[must_use]
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.add(field, message);

        Self { fields }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;

        for (field, messages) in self.iter() {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }

                write!(f, "{field}: {message}")?;
                first = false;
            }
        }

        Ok(())
    }
}

/// Require a non-blank value no longer than [`MAX_FIELD_LENGTH`].
pub fn require_text(errors: &mut FieldErrors, field: &str, value: &str) {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        errors.add(field, "is required");
    } else if trimmed.chars().count() > MAX_FIELD_LENGTH {
        errors.add(field, format!("must be at most {MAX_FIELD_LENGTH} characters"));
    }
}

/// Require a plausible email address.
pub fn require_email(errors: &mut FieldErrors, field: &str, value: &str) {
    require_text(errors, field, value);

    if !value.trim().is_empty() && !is_plausible_email(value.trim()) {
        errors.add(field, "must be a valid email address");
    }
}

/// Require a password that satisfies the password policy.
pub fn require_password(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.chars().count() < MIN_PASSWORD_LENGTH {
        errors.add(
            field,
            format!("must be at least {MIN_PASSWORD_LENGTH} characters"),
        );
    }
}

/// Lowercase and trim an email for storage and lookup.
#[must_use]
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

fn is_plausible_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_messages_per_field() {
        let mut errors = FieldErrors::new();

        require_text(&mut errors, "name", "  ");
        require_email(&mut errors, "email", "not-an-email");
        require_password(&mut errors, "password", "short");

        assert_eq!(errors.get("name"), Some(&["is required".to_string()][..]));
        assert!(errors.get("email").is_some(), "email should fail");
        assert!(errors.get("password").is_some(), "password should fail");
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn accepts_valid_input() {
        let mut errors = FieldErrors::new();

        require_text(&mut errors, "name", "Acme");
        require_email(&mut errors, "email", "admin@acme.test");
        require_password(&mut errors, "password", "correct horse");

        assert!(errors.into_result().is_ok());
    }

    #[test]
    fn rejects_malformed_emails() {
        for email in ["a@b", "@acme.test", "a@@acme.test", "a b@acme.test", "a@.test"] {
            assert!(!is_plausible_email(email), "{email} should be rejected");
        }
    }

    #[test]
    fn display_joins_messages() {
        let error = ValidationError::field("plan", "is not available");

        assert_eq!(error.to_string(), "validation failed: plan: is not available");
    }

    #[test]
    fn normalize_email_lowercases() {
        assert_eq!(normalize_email("  Admin@Acme.Test "), "admin@acme.test");
    }
}
