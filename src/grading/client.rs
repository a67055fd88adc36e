//! Streaming grading requests.

use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, StreamExt as _};

use super::{Grade, GradingPrompt, parse_grade, prompt::SYSTEM_MESSAGE};
use crate::{
    async_utils::BoxedStream,
    drivers::{ChatRequest, Driver, LlmOpts},
    error::{GradeError, GradeResult, Service},
    prelude::*,
    retry::with_backoff,
};

/// Something that happened while grading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GradingEvent {
    /// More response text. Chunks arrive in order, and concatenating them
    /// gives the full response.
    Chunk(String),

    /// The final, parsed grade. Always the last event.
    Completed(Grade),
}

/// A stream of [`GradingEvent`]s. It ends after [`GradingEvent::Completed`]
/// or the first error.
pub type GradingStream = BoxedStream<GradeResult<GradingEvent>>;

/// Grades answers using an LLM.
#[derive(Clone, Debug)]
pub struct GradingClient {
    driver: Arc<dyn Driver>,
    prompt: GradingPrompt,
    llm_opts: LlmOpts,
    max_score: u32,
}

impl GradingClient {
    /// Create a new grading client.
    pub fn new(
        driver: Arc<dyn Driver>,
        prompt: GradingPrompt,
        llm_opts: LlmOpts,
        max_score: u32,
    ) -> Self {
        Self {
            driver,
            prompt,
            llm_opts,
            max_score,
        }
    }

    /// The maximum score for each dimension.
    pub fn max_score(&self) -> u32 {
        self.max_score
    }

    /// Start grading `answer`.
    ///
    /// Empty input is rejected here, before we contact the model. Nothing is
    /// sent until the returned stream is polled, and dropping the stream
    /// abandons the request.
    pub fn grade_stream(&self, question: &str, answer: &str) -> GradeResult<GradingStream> {
        let question = question.trim();
        let answer = answer.trim();
        if question.is_empty() {
            return Err(GradeError::EmptyQuestion);
        }
        if answer.is_empty() {
            return Err(GradeError::EmptyAnswer);
        }

        let user_text = self
            .prompt
            .render(question, answer, self.max_score)
            .map_err(|err| GradeError::Internal(format!("{err:#}")))?;
        let req = ChatRequest::text(&self.llm_opts.model, Some(SYSTEM_MESSAGE), user_text);
        Ok(grading_events(
            self.driver.clone(),
            self.llm_opts.clone(),
            self.max_score,
            req,
        )
        .boxed())
    }

    /// Grade `answer`, waiting for the complete response.
    #[instrument(level = "debug", skip_all)]
    pub async fn grade(&self, question: &str, answer: &str) -> GradeResult<Grade> {
        let mut stream = self.grade_stream(question, answer)?;
        while let Some(event) = stream.next().await {
            if let GradingEvent::Completed(grade) = event? {
                return Ok(grade);
            }
        }
        Err(GradeError::Internal(
            "grading stream ended without a grade".to_owned(),
        ))
    }
}

/// Stream the model's response, then parse it.
fn grading_events(
    driver: Arc<dyn Driver>,
    llm_opts: LlmOpts,
    max_score: u32,
    req: ChatRequest,
) -> impl Stream<Item = GradeResult<GradingEvent>> + Send {
    try_stream! {
        let mut chunks = with_backoff("grading request", || driver.stream_chat(&req, &llm_opts))
            .await
            .map_err(|err| GradeError::upstream(Service::Llm, format!("{err:#}")))?;

        // Once the user has seen part of a response, we can't retry.
        let mut response = String::new();
        while let Some(chunk) = chunks.next().await {
            let chunk =
                chunk.map_err(|err| GradeError::upstream(Service::Llm, format!("{err:#}")))?;
            response.push_str(&chunk);
            yield GradingEvent::Chunk(chunk);
        }
        trace!(%response, "Complete grading response");

        let grade = parse_grade(&response, max_score).inspect_err(|err| {
            warn!("Could not parse grading response: {err}");
        })?;
        yield GradingEvent::Completed(grade);
    }
}
