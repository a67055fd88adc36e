//! Our OpenAI driver, which we also use for Gemini, LiteLLM, Ollama and other
//! compatible gateways.

use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContentPart, ChatCompletionResponseStream,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionStreamResponse, FinishReason, ImageDetail, ImageUrlArgs,
    },
};
use async_stream::try_stream;
use futures::{FutureExt as _, Stream, StreamExt as _};
use tokio::time;

use crate::{
    llm_client::create_llm_client,
    prelude::*,
    retry::{
        SimpleRetryResult, retry_result_ok, retry_result_transient, try_fatal,
        try_potentially_transient,
    },
};

use super::{ChatRequest, Driver, LlmOpts, TextStream};

/// Our OpenAI driver, which we also use for Gemini, LiteLLM, Ollama and other
/// compatible gateways.
#[derive(Debug)]
pub struct OpenAiDriver {
    /// The OpenAI client.
    pub client: Client<OpenAIConfig>,
}

impl OpenAiDriver {
    /// Create a new OpenAI driver.
    pub fn new(llm_opts: &LlmOpts) -> Result<Self> {
        if llm_opts.api_key.is_none() && llm_opts.api_base.is_none() {
            warn!("No OPENAI_API_KEY or OPENAI_API_BASE set, requests will probably fail");
        }
        let client =
            create_llm_client(llm_opts.api_key.as_deref(), llm_opts.api_base.as_deref());
        Ok(Self { client })
    }
}

#[async_trait]
impl Driver for OpenAiDriver {
    #[instrument(level = "debug", skip_all, fields(model = %req.model))]
    async fn stream_chat(
        &self,
        req: &ChatRequest,
        llm_opts: &LlmOpts,
    ) -> SimpleRetryResult<TextStream> {
        let request = try_fatal!(build_request(req, llm_opts));
        trace!(?request, "Request");

        let chat = self.client.chat();
        let mut stream =
            try_potentially_transient!(llm_opts.apply_timeout(chat.create_stream(request)).await);

        // The request isn't really sent until we poll, so wait for the first
        // event before calling this a success.
        let first = try_potentially_transient!(
            llm_opts
                .apply_timeout(stream.next().map(Option::transpose))
                .await
        );
        let Some(first) = first else {
            return retry_result_transient(anyhow!("LLM closed the stream without responding"));
        };
        let first_text = try_fatal!(chunk_text(&first));
        debug!("LLM stream opened");

        retry_result_ok(rest_of_stream(first_text, stream, llm_opts.timeout()).boxed())
    }
}

/// Build a streaming chat request.
fn build_request(
    req: &ChatRequest,
    llm_opts: &LlmOpts,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
    if let Some(system) = &req.system {
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system.as_str())
                .build()?
                .into(),
        );
    }

    let user = if req.image_data_urls.is_empty() {
        ChatCompletionRequestUserMessageArgs::default()
            .content(req.user_text.as_str())
            .build()?
    } else {
        let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(req.user_text.as_str())
                .build()?
                .into(),
        ];
        for url in &req.image_data_urls {
            let image_url = ImageUrlArgs::default()
                .url(url.as_str())
                .detail(ImageDetail::High)
                .build()?;
            parts.push(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(image_url)
                    .build()?
                    .into(),
            );
        }
        ChatCompletionRequestUserMessageArgs::default()
            .content(parts)
            .build()?
    };
    messages.push(user.into());

    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(req.model.clone())
        .messages(messages)
        .temperature(llm_opts.temperature);
    if let Some(max_completion_tokens) = llm_opts.max_completion_tokens {
        args.max_completion_tokens(max_completion_tokens);
    }
    if let Some(top_p) = llm_opts.top_p {
        args.top_p(top_p);
    }
    args.build()
}

/// Get the text from one streamed chunk. Usually there's exactly one choice,
/// and the first chunk may have no content at all.
fn chunk_text(chunk: &CreateChatCompletionStreamResponse) -> Result<String> {
    let mut text = String::new();
    for choice in &chunk.choices {
        if choice.finish_reason == Some(FinishReason::ContentFilter) {
            return Err(anyhow!(
                "Content filter triggered (may also be a RECITATION error for Gemini models)"
            ));
        }
        if let Some(content) = &choice.delta.content {
            text.push_str(content);
        }
    }
    Ok(text)
}

/// Yield `first`, then the text of every remaining chunk. Empty chunks are
/// skipped.
fn rest_of_stream(
    first: String,
    mut stream: ChatCompletionResponseStream,
    timeout: Duration,
) -> impl Stream<Item = Result<String>> + Send {
    try_stream! {
        if !first.is_empty() {
            yield first;
        }
        loop {
            let next = time::timeout(timeout, stream.next())
                .await
                .map_err(|_| anyhow!("LLM stream stalled for {}s", timeout.as_secs()))?;
            let Some(chunk) = next else {
                break;
            };
            let text = chunk_text(&chunk?)?;
            if !text.is_empty() {
                yield text;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_text_request() {
        let req = ChatRequest::text("gpt-4o-mini", Some("Be fair."), "Grade this.".to_owned());
        let request = build_request(&req, &LlmOpts::default()).unwrap();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][0]["content"], "Be fair.");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "Grade this.");
    }

    #[test]
    fn builds_image_request() {
        let req = ChatRequest {
            model: "gpt-4o".to_owned(),
            system: None,
            user_text: "Transcribe.".to_owned(),
            image_data_urls: vec!["data:image/jpeg;base64,aGk=".to_owned()],
        };
        let request = build_request(&req, &LlmOpts::default()).unwrap();
        let value = serde_json::to_value(&request).unwrap();
        let parts = &value["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,aGk=");
    }
}
