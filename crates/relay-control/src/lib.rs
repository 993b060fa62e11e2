//! Control plane: global and per-event flags, schedule configuration, field mappings
//! and the audit trail of every change.

mod plane;
mod schedule;

pub use plane::ControlPlane;
pub use schedule::{next_scheduled_at, validate_schedule};
