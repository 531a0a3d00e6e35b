//! Database access layer
//!
//! Schema initialization, seeded configuration defaults, and shared row models.

pub mod init;
pub mod models;

pub use init::{init_database, init_schema, seed_defaults};
