//! Core types and traits for the LMP event relay (transactional outbox/inbox).
//!
//! Wire names follow the admin API contract (camelCase); CloudEvent fields
//! keep their CloudEvents attribute names.

mod audit;
mod auth;
mod envelope;
mod error;
mod record;
mod schedule;
mod traits;

pub use audit::*;
pub use auth::*;
pub use envelope::*;
pub use error::*;
pub use record::*;
pub use schedule::*;
pub use traits::*;
