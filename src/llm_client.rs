//! Client for OpenAI-compatible APIs (OpenAI, Gemini, LiteLLM or Ollama).

use async_openai::{Client, config::OpenAIConfig};

/// Create an OpenAI-compatible client. Anything not passed in falls back to
/// the library defaults.
pub fn create_llm_client(
    api_key: Option<&str>,
    api_base: Option<&str>,
) -> Client<OpenAIConfig> {
    let mut client_config = OpenAIConfig::new();
    if let Some(api_key) = api_key {
        client_config = client_config.with_api_key(api_key);
    }
    if let Some(api_base) = api_base {
        client_config = client_config.with_api_base(api_base);
    }
    Client::with_config(client_config)
}
