//! LLM-based OCR engine.

use std::sync::Arc;

use futures::StreamExt as _;

use crate::{
    drivers::{ChatRequest, Driver, LlmOpts},
    normalize::NormalizedImage,
    prelude::*,
    retry::{SimpleRetryResult, retry_result_ok, retry_result_transient, try_retry_result},
};

use super::OcrEngine;

/// What the model says when there's nothing to transcribe.
const NO_TEXT_SENTINEL: &str = "NO_TEXT_DETECTED";

/// Our transcription instructions.
const OCR_PROMPT: &str = "Transcribe all of the handwritten or printed text in this \
image of an exam answer, exactly as written. Keep paragraph breaks. Do not correct \
spelling or grammar, and do not add commentary, headings or formatting. If the image \
contains no legible text, reply with exactly NO_TEXT_DETECTED.";

/// An OCR engine that asks a vision model to transcribe the image.
#[derive(Debug)]
pub struct LlmOcrEngine {
    driver: Arc<dyn Driver>,
    model: String,
    llm_opts: LlmOpts,
}

impl LlmOcrEngine {
    /// Create a new LLM-based OCR engine.
    pub fn new(driver: Arc<dyn Driver>, model: String, llm_opts: LlmOpts) -> Self {
        Self {
            driver,
            model,
            llm_opts,
        }
    }
}

#[async_trait]
impl OcrEngine for LlmOcrEngine {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn ocr_image(&self, image: &NormalizedImage) -> SimpleRetryResult<Option<String>> {
        let req = ChatRequest {
            model: self.model.clone(),
            system: None,
            user_text: OCR_PROMPT.to_owned(),
            image_data_urls: vec![image.to_data_url()],
        };
        let mut stream = try_retry_result!(self.driver.stream_chat(&req, &self.llm_opts).await);

        // Nobody sees OCR output until it's complete, so a broken stream can
        // be retried from scratch.
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => text.push_str(&chunk),
                Err(err) => return retry_result_transient(err),
            }
        }

        retry_result_ok(strip_sentinel(&text))
    }
}

/// Map the "no text" sentinel to `None`, and strip any code fence the model
/// wrapped around its transcription.
fn strip_sentinel(text: &str) -> Option<String> {
    let mut text = text.trim();
    if let Some(inner) = text.strip_prefix("```") {
        // Drop the info string, if any.
        let inner = inner.split_once('\n').map_or("", |(_, rest)| rest);
        text = inner.strip_suffix("```").unwrap_or(inner).trim();
    }
    if text.is_empty() || text == NO_TEXT_SENTINEL {
        None
    } else {
        Some(text.to_owned())
    }
}
