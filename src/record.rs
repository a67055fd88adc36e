//! Grading records, as stored in the history.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use uuid::Uuid;

use crate::{
    grading::{Grade, Scores},
    prelude::*,
};

/// One graded answer. Records are created once and never modified.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, JsonSchema, Serialize)]
pub struct GradingRecord {
    /// A unique ID.
    pub id: Uuid,

    /// The user who owns this record.
    pub user_id: String,

    /// The essay question.
    pub question: String,

    /// The answer that was graded.
    pub answer: String,

    /// The five dimension scores.
    pub scores: Scores,

    /// The maximum score for each dimension.
    pub max_score: u32,

    /// The grader's feedback, in Markdown.
    pub feedback: String,

    /// The grader's suggested answer, in Markdown.
    pub suggested_answer: String,

    /// When the answer was graded.
    pub created_at: DateTime<Utc>,
}

impl GradingRecord {
    /// Create a new record, timestamped now.
    pub fn new(user_id: &str, question: &str, answer: &str, grade: &Grade) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_owned(),
            question: question.trim().to_owned(),
            answer: answer.trim().to_owned(),
            scores: grade.scores.clone(),
            max_score: grade.max_score,
            feedback: grade.feedback.clone(),
            suggested_answer: grade.suggested_answer.clone(),
            created_at: Utc::now(),
        }
    }

    /// The grade part of this record.
    pub fn grade(&self) -> Grade {
        Grade {
            scores: self.scores.clone(),
            max_score: self.max_score,
            feedback: self.feedback.clone(),
            suggested_answer: self.suggested_answer.clone(),
        }
    }
}
