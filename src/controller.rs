//! The grading session: input in, events out.
//!
//! The [`Controller`] ties together OCR, grading, charting and history. The
//! web server and the CLI are thin layers on top of it.

use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, StreamExt as _};
use schemars::JsonSchema;
use uuid::Uuid;

use crate::{
    async_utils::BoxedStream,
    chart::RadarChart,
    error::{GradeError, GradeResult},
    grading::{Grade, GradingClient, GradingEvent},
    history::{DEFAULT_HISTORY_LIMIT, HistoryStore, clamp_history_limit, require_user},
    ocr::TextExtractor,
    prelude::*,
    record::GradingRecord,
};

/// Where the answer comes from.
#[derive(Clone, Debug)]
pub enum AnswerSource {
    /// Typed text.
    Text(String),
    /// A photo or scan, which we'll OCR.
    Image(Vec<u8>),
}

/// One request to grade an answer.
#[derive(Clone, Debug)]
pub struct Submission {
    /// The user, if known. Required when `save` is set.
    pub user_id: Option<String>,
    /// The essay question.
    pub question: String,
    /// The answer.
    pub answer: AnswerSource,
    /// Save the result to the user's history?
    pub save: bool,
}

/// Something the user should see.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Text extracted from an image answer.
    Extracted { text: String },
    /// Part of the grader's response, as it arrives.
    Chunk { text: String },
    /// The final grade.
    Graded {
        grade: Grade,
        total: u32,
        max_total: u32,
        chart_svg: String,
    },
    /// The saved history record.
    Saved { record: GradingRecord },
}

/// A stream of [`SessionEvent`]s, ending at the first error.
pub type SessionStream = BoxedStream<GradeResult<SessionEvent>>;

/// Runs grading sessions.
#[derive(Clone, Debug)]
pub struct Controller {
    extractor: TextExtractor,
    grader: GradingClient,
    store: Arc<dyn HistoryStore>,
}

impl Controller {
    /// Create a new controller.
    pub fn new(
        extractor: TextExtractor,
        grader: GradingClient,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            extractor,
            grader,
            store,
        }
    }

    /// The maximum score for each dimension.
    pub fn max_score(&self) -> u32 {
        self.grader.max_score()
    }

    /// OCR an image without grading it, so the user can check the text.
    #[instrument(level = "debug", skip_all)]
    pub async fn extract_text(&self, image: Vec<u8>) -> GradeResult<String> {
        self.extractor.extract(image).await
    }

    /// Start a grading session.
    ///
    /// Anything we can check locally is checked here, before any remote call.
    /// The returned stream does the rest.
    pub fn submit(&self, submission: Submission) -> GradeResult<SessionStream> {
        if submission.question.trim().is_empty() {
            return Err(GradeError::EmptyQuestion);
        }
        match &submission.answer {
            AnswerSource::Text(text) if text.trim().is_empty() => {
                return Err(GradeError::EmptyAnswer);
            }
            AnswerSource::Image(bytes) if bytes.is_empty() => {
                return Err(GradeError::EmptyImage);
            }
            _ => {}
        }
        if submission.save {
            require_user(submission.user_id.as_deref().unwrap_or_default())?;
        }
        Ok(session_events(self.clone(), submission).boxed())
    }

    /// Save a grade to a user's history.
    ///
    /// The grade may come from a client, so we check it as carefully as one
    /// of our own.
    #[instrument(level = "debug", skip_all)]
    pub async fn save(
        &self,
        user_id: &str,
        question: &str,
        answer: &str,
        grade: &Grade,
    ) -> GradeResult<GradingRecord> {
        let user_id = require_user(user_id)?;
        if question.trim().is_empty() {
            return Err(GradeError::EmptyQuestion);
        }
        if answer.trim().is_empty() {
            return Err(GradeError::EmptyAnswer);
        }
        self.check_grade(grade)?;
        let record = GradingRecord::new(user_id, question, answer, grade);
        let saved = self.store.save(&record).await?;
        info!(id = %saved.id, "Saved grading record");
        Ok(saved)
    }

    /// Reject grades we could never have produced.
    fn check_grade(&self, grade: &Grade) -> GradeResult<()> {
        if grade.max_score != self.max_score() {
            return Err(GradeError::InvalidGrade(format!(
                "scores are out of {}, but we grade out of {}",
                grade.max_score,
                self.max_score()
            )));
        }
        if grade.feedback.trim().is_empty() {
            return Err(GradeError::InvalidGrade("the feedback is empty".to_owned()));
        }
        if grade.suggested_answer.trim().is_empty() {
            return Err(GradeError::InvalidGrade(
                "the suggested answer is empty".to_owned(),
            ));
        }
        // Checks each score against `max_score`.
        RadarChart::from_grade(grade)?;
        Ok(())
    }

    /// List a user's history, newest first. `limit` is clamped to
    /// `1..=MAX_HISTORY_LIMIT`.
    pub async fn history(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> GradeResult<Vec<GradingRecord>> {
        let limit = clamp_history_limit(limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
        self.store.list(user_id, limit).await
    }

    /// Delete one record from a user's history.
    pub async fn delete(&self, user_id: &str, id: Uuid) -> GradeResult<()> {
        self.store.delete(user_id, id).await
    }
}

/// OCR (if needed), grade, chart and save.
fn session_events(
    controller: Controller,
    submission: Submission,
) -> impl Stream<Item = GradeResult<SessionEvent>> + Send {
    try_stream! {
        let Submission { user_id, question, answer, save } = submission;

        let answer = match answer {
            AnswerSource::Text(text) => text,
            AnswerSource::Image(bytes) => {
                let text = controller.extractor.extract(bytes).await?;
                yield SessionEvent::Extracted { text: text.clone() };
                text
            }
        };

        let mut grading = controller.grader.grade_stream(&question, &answer)?;
        let mut grade = None;
        while let Some(event) = grading.next().await {
            match event? {
                GradingEvent::Chunk(text) => yield SessionEvent::Chunk { text },
                GradingEvent::Completed(completed) => grade = Some(completed),
            }
        }
        let grade = grade.ok_or_else(|| {
            GradeError::Internal("grading stream ended without a grade".to_owned())
        })?;

        let chart = RadarChart::from_grade(&grade)?;
        yield SessionEvent::Graded {
            total: grade.scores.total(),
            max_total: grade.max_total(),
            chart_svg: chart.to_svg(),
            grade: grade.clone(),
        };

        if save {
            let user_id = user_id.unwrap_or_default();
            let record = controller.save(&user_id, &question, &answer, &grade).await?;
            yield SessionEvent::Saved { record };
        }
    }
}
