//! LLM drivers.
//!
//! Everything we send to a model goes through a [`Driver`]. In production
//! that's [`openai::OpenAiDriver`], which also works with Gemini's
//! OpenAI-compatible endpoint, LiteLLM, Ollama and other gateways. For tests
//! and offline demos, [`replay::ReplayDriver`] streams a canned response.

use std::{error, fmt, pin::Pin, sync::Arc, time::Duration};

use clap::{Args, ValueEnum};
use futures::{FutureExt as _, TryFutureExt as _};
use tokio::time;

use crate::{
    async_utils::BoxedStream,
    prelude::*,
    retry::{IsKnownTransient, SimpleRetryResult},
};

pub mod openai;
pub mod replay;

/// A stream of text chunks from a model.
pub type TextStream = BoxedStream<Result<String>>;

/// Our different driver types.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum DriverType {
    /// OpenAI driver (also for Gemini, LiteLLM, Ollama, etc).
    #[default]
    #[clap(name = "openai")]
    OpenAI,

    /// Replay a canned response from `--replay-file`. Never calls a server.
    Replay,
}

impl DriverType {
    /// Instantiate an appropriate driver.
    pub async fn create_driver(&self, llm_opts: &LlmOpts) -> Result<Arc<dyn Driver>> {
        match self {
            DriverType::OpenAI => Ok(Arc::new(openai::OpenAiDriver::new(llm_opts)?)),
            DriverType::Replay => {
                let path = llm_opts
                    .replay_file
                    .as_deref()
                    .ok_or_else(|| anyhow!("--driver=replay requires --replay-file"))?;
                Ok(Arc::new(replay::ReplayDriver::from_path(path).await?))
            }
        }
    }
}

/// Our LLM-related options.
#[derive(Args, Clone, Debug)]
pub struct LlmOpts {
    /// The LLM driver to use. This defaults to `openai`, which works with
    /// OpenAI, Gemini, LiteLLM and Ollama-based models.
    #[clap(long, value_enum, default_value_t = DriverType::default())]
    pub driver: DriverType,

    /// The model used for grading.
    #[clap(long, env = "GRADER_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    /// An upper limit on the number of completion tokens to generate. A
    /// suggested answer is usually a page or two, so don't set this too low.
    #[clap(long)]
    pub max_completion_tokens: Option<u32>,

    /// The temperature to use for sampling, between 0.0 and 2.0. Lower values
    /// make grading more consistent between runs.
    #[clap(long, default_value_t = 0.3)]
    pub temperature: f32,

    /// The top-p sampling value to use, between 0.0 and 1.0. Defaults to the
    /// model's default.
    #[clap(long)]
    pub top_p: Option<f32>,

    /// A timeout, in seconds, for the first chunk of a response, and for
    /// each chunk after that.
    #[clap(long, default_value_t = 60)]
    pub timeout: u64,

    /// The API key for the OpenAI-compatible server.
    #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the OpenAI-compatible server URL.
    #[clap(long, env = "OPENAI_API_BASE")]
    pub api_base: Option<String>,

    /// The response to replay when using `--driver=replay`.
    #[clap(long)]
    pub replay_file: Option<PathBuf>,
}

impl Default for LlmOpts {
    fn default() -> Self {
        Self {
            driver: DriverType::default(),
            model: "gpt-4o-mini".to_owned(),
            max_completion_tokens: None,
            temperature: 0.3,
            top_p: None,
            timeout: 60,
            api_key: None,
            api_base: None,
            replay_file: None,
        }
    }
}

impl LlmOpts {
    /// Our timeout, as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Apply our timeout to a future.
    ///
    /// `'fut` is the lifetime of any data borrowed by `future`, and we
    /// preserve it in the boxed output.
    pub fn apply_timeout<'fut, T, E>(
        &self,
        future: impl Future<Output = Result<T, E>> + Send + 'fut,
    ) -> Pin<Box<dyn Future<Output = Result<T, LlmError<E>>> + Send + 'fut>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let future = future.map_err(LlmError::Native);
        time::timeout(self.timeout(), future)
            // Flatten `Result<Result<T, LlmError<E>>, Elapsed>`.
            .map(|result| match result {
                Ok(inner) => inner,
                Err(_) => Err(LlmError::Timeout),
            })
            .boxed()
    }
}

/// A chat request, already rendered.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// The model to use.
    pub model: String,

    /// The system message, if any.
    pub system: Option<String>,

    /// The user's text.
    pub user_text: String,

    /// Images to send along with `user_text`, as `data:` URLs.
    pub image_data_urls: Vec<String>,
}

impl ChatRequest {
    /// A text-only request.
    pub fn text(model: &str, system: Option<&str>, user_text: String) -> Self {
        Self {
            model: model.to_owned(),
            system: system.map(ToOwned::to_owned),
            user_text,
            image_data_urls: vec![],
        }
    }
}

/// Interface trait for LLM drivers.
#[async_trait]
pub trait Driver: fmt::Debug + Send + Sync + 'static {
    /// Start a streaming chat completion.
    ///
    /// Implementations should not return until the first chunk has arrived,
    /// so that connection and authentication failures show up here, where
    /// they can still be retried, rather than part way through the stream.
    async fn stream_chat(
        &self,
        req: &ChatRequest,
        llm_opts: &LlmOpts,
    ) -> SimpleRetryResult<TextStream>;
}

/// An error which occurred while calling an LLM.
///
/// Used internally by drivers to handle timeouts.
#[derive(Debug)]
pub enum LlmError<E> {
    /// A native error.
    Native(E),

    /// A timeout error.
    Timeout,
}

impl<E> IsKnownTransient for LlmError<E>
where
    E: IsKnownTransient,
{
    fn is_known_transient(&self) -> bool {
        match self {
            LlmError::Native(err) => err.is_known_transient(),
            // Overloaded servers often recover.
            LlmError::Timeout => true,
        }
    }
}

impl<E> fmt::Display for LlmError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Native(err) => write!(f, "LLM error: {err}"),
            LlmError::Timeout => write!(f, "LLM request timed out"),
        }
    }
}

impl<E> error::Error for LlmError<E>
where
    E: error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            LlmError::Native(err) => Some(err),
            LlmError::Timeout => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeouts_are_transient_errors() {
        let opts = LlmOpts {
            timeout: 0,
            ..LlmOpts::default()
        };
        let result = opts
            .apply_timeout(async {
                time::sleep(Duration::from_secs(5)).await;
                Ok::<_, async_openai::error::OpenAIError>(())
            })
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, LlmError::Timeout));
        assert!(err.is_known_transient());
    }

    #[tokio::test]
    async fn replay_driver_requires_a_file() {
        let opts = LlmOpts {
            driver: DriverType::Replay,
            ..LlmOpts::default()
        };
        let err = DriverType::Replay.create_driver(&opts).await.unwrap_err();
        assert!(err.to_string().contains("--replay-file"));
    }
}
