//! Tenant administration services: provisioning, access control, authentication and
//! impersonation on top of PostgreSQL.

pub mod audit;
pub mod clock;
pub mod config;
pub mod context;
pub mod database;
pub mod domain;
pub mod mailer;
pub mod observability;
pub mod passwords;
pub mod rate_limits;
pub mod secrets;
pub mod uuids;

#[cfg(test)]
mod test;
