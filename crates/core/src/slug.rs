//! Slugs, domains and database names

use jiff::Timestamp;
use thiserror::Error;

/// Longest slug kept after normalization.
pub const MAX_SLUG_LENGTH: usize = 100;

/// PostgreSQL identifier limit in bytes.
pub const MAX_DATABASE_NAME_LENGTH: usize = 63;

const DATABASE_NAME_PREFIX: &str = "tenant_";

const RESERVED_DATABASE_NAMES: [&str; 15] = [
    "user", "table", "select", "insert", "update", "delete", "drop", "create", "alter", "index",
    "database", "schema", "role", "grant", "revoke",
];

/// Normalize a tenant name or requested slug into a URL-safe slug.
///
/// Lowercases, keeps ASCII alphanumerics, turns runs of whitespace, `-` and `_` into a single
/// hyphen, drops everything else and trims hyphens from both ends. Idempotent.
#[must_use]
pub fn normalize(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_hyphen = false;

    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }

            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_hyphen = true;
        }
    }

    slug.truncate(MAX_SLUG_LENGTH);

    while slug.ends_with('-') {
        slug.pop();
    }

    slug
}

/// Primary domain derived from a slug.
#[must_use]
pub fn derive_domain(slug: &str, base_domain: &str) -> String {
    format!("{slug}.{}", base_domain.trim_start_matches('.'))
}

/// Name of the isolated database for a new tenant.
///
/// `tenant_{slug}_{unix seconds}` with hyphens turned into underscores; the slug part is
/// truncated so the whole name fits PostgreSQL's identifier limit.
#[must_use]
pub fn database_name(slug: &str, created_at: Timestamp) -> String {
    let suffix = format!("_{}", created_at.as_second());
    let budget = MAX_DATABASE_NAME_LENGTH - DATABASE_NAME_PREFIX.len() - suffix.len();

    let stem: String = slug
        .chars()
        .map(|ch| if ch == '-' { '_' } else { ch })
        .take(budget)
        .collect();

    format!("{DATABASE_NAME_PREFIX}{stem}{suffix}")
}

/// A database name that is unsafe to interpolate into DDL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseNameError {
    /// Empty or longer than 63 bytes.
    #[error("database name must be 1-63 characters long")]
    Length,

    /// First character is not a letter or underscore.
    #[error("database name must start with a letter or underscore")]
    InvalidStart,

    /// Contains characters outside `[A-Za-z0-9_$]`.
    #[error("database name can only contain letters, digits, underscores, and dollar signs")]
    InvalidCharacters,

    /// Collides with a reserved word.
    #[error("database name `{0}` is a reserved word")]
    Reserved(String),
}

/// Validate a database name before it is quoted into `CREATE`/`DROP DATABASE`.
///
/// # Errors
///
/// Returns a [`DatabaseNameError`] describing the first rule the name breaks.
pub fn validate_database_name(name: &str) -> Result<(), DatabaseNameError> {
    if name.is_empty() || name.len() > MAX_DATABASE_NAME_LENGTH {
        return Err(DatabaseNameError::Length);
    }

    if !name
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
    {
        return Err(DatabaseNameError::InvalidStart);
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(DatabaseNameError::InvalidCharacters);
    }

    if RESERVED_DATABASE_NAMES
        .iter()
        .any(|&word| name.eq_ignore_ascii_case(word))
    {
        return Err(DatabaseNameError::Reserved(name.to_string()));
    }

    Ok(())
}
