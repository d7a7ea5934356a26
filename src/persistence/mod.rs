//! Persistence layer modules.

pub mod db;
pub mod record;
pub mod schema;
pub mod store;

pub use record::{Collection, Record};
pub use store::RecordStore;
/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
