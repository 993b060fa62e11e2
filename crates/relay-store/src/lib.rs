//! Event record store, control-flag store and audit log implementations.

mod audit;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use audit::{InMemoryAuditStore, JsonlAuditStore};
pub use memory::{InMemoryControlStore, InMemoryEventStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use relay_types::{AuditStore, ControlStore, EventStore, StoreError};
