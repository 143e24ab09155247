//! Test support: containerised databases, fixtures and in-memory collaborators.

pub mod context;

pub use context::TestContext;
pub use db::TestDb;
