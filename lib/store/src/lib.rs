//! Persistence backends implementing `claudecron_scheduler::Store`.
//!
//! [`SqliteStore`] and [`PostgresStore`] share the same `codec` module for
//! the JSON-as-TEXT encoding of rich fields (§6); [`InMemoryStore`] is a
//! test double for callers that don't want a real database.

mod codec;
mod memory;
mod postgres;
mod sqlite;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
