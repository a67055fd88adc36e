//! Replay driver for tests and offline demos.
//!
//! This driver ignores the request and streams back a canned response, one
//! line per chunk.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{StreamExt as _, stream};

use crate::{
    prelude::*,
    retry::{SimpleRetryResult, retry_result_ok},
};

use super::{ChatRequest, Driver, LlmOpts, TextStream};

/// Replay driver for tests and offline demos.
#[derive(Debug)]
pub struct ReplayDriver {
    /// The response to replay.
    response: String,

    /// How many times have we been called?
    calls: AtomicUsize,
}

impl ReplayDriver {
    /// Replay `response` for every request.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replay the contents of a file.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let response = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        Ok(Self::new(response))
    }

    /// How many requests have we answered?
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for ReplayDriver {
    async fn stream_chat(
        &self,
        req: &ChatRequest,
        _llm_opts: &LlmOpts,
    ) -> SimpleRetryResult<TextStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(model = %req.model, "Replaying canned response");
        let chunks = self
            .response
            .split_inclusive('\n')
            .map(|line| Ok(line.to_owned()))
            .collect::<Vec<_>>();
        retry_result_ok(stream::iter(chunks).boxed())
    }
}
