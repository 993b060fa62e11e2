//! Relay engine: the outbox publisher with its post-commit delivery task, and inbox staging.

mod domain;
mod inbox;
mod publisher;

pub use domain::{GradeSubmitted, QuizGradeSubmitted, GRADE_SUBMITTED, QUIZ_GRADE_SUBMITTED};
pub use inbox::{map_fields, InboundEvent, Inbox, StageOutcome};
pub use publisher::{
    DeliveryOutcome, OutboundEvent, PublishReceipt, Publisher, DEFAULT_PENDING_GRACE_SECS,
    DEFAULT_TENANT, SYSTEM_ACTOR,
};
