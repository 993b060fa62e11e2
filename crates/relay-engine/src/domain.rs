//! Typed payloads for the grade events the LMP emits.

use crate::{OutboundEvent, PublishReceipt, Publisher};
use serde::{Deserialize, Serialize};

pub const GRADE_SUBMITTED: &str = "lmp_grade_submitted";
pub const QUIZ_GRADE_SUBMITTED: &str = "lmp_quiz_grade_submitted";

/// A teacher graded a student on a course grade item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSubmitted {
    /// Correlation id built by the emitter (teacher, student, course, time).
    pub eventid: String,
    pub teacher: String,
    pub student: String,
    #[serde(default)]
    pub idnumber: String,
    pub courseshortname: String,
    pub grademax: f64,
    pub grademin: f64,
    /// Raw item grade; absent when the item was cleared.
    pub grade: Option<f64>,
    pub finalgrade: f64,
    /// Unix seconds.
    pub timestamp: i64,
}

/// A student submitted a quiz attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizGradeSubmitted {
    pub eventid: String,
    pub teacher: String,
    pub student: String,
    pub courseshortname: String,
    pub quizid: i64,
    pub attemptid: i64,
    pub grade: f64,
    pub maxgrade: f64,
    pub timestamp: i64,
}

impl Publisher {
    pub async fn publish_grade_submitted(
        &self,
        grade: &GradeSubmitted,
        tenant_id: &str,
        actor: &str,
    ) -> PublishReceipt {
        self.publish_typed(
            GRADE_SUBMITTED,
            "Grade Submitted",
            "Individual grade submission from LMP to CMP",
            grade,
            tenant_id,
            actor,
        )
        .await
    }

    pub async fn publish_quiz_grade_submitted(
        &self,
        attempt: &QuizGradeSubmitted,
        tenant_id: &str,
        actor: &str,
    ) -> PublishReceipt {
        self.publish_typed(
            QUIZ_GRADE_SUBMITTED,
            "Quiz Grade Submitted",
            "Quiz attempt submission from LMP to CMP",
            attempt,
            tenant_id,
            actor,
        )
        .await
    }

    async fn publish_typed<T: Serialize>(
        &self,
        event_type: &str,
        name: &str,
        description: &str,
        payload: &T,
        tenant_id: &str,
        actor: &str,
    ) -> PublishReceipt {
        // Flat structs with no maps: to_value cannot fail here.
        let data = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        self.publish_event(
            OutboundEvent::new(event_type, data)
                .named(name, description)
                .for_tenant(tenant_id)
                .created_by(actor),
        )
        .await
    }
}
