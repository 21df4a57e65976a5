use crate::{ContentPart, ConversationMessage, LlmError, LlmResult, Message};
use async_trait::async_trait;
use bon::bon;
use common_types::EncodedImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Anything that can turn a message list into a completion.
///
/// Implemented by [`LlmClient`]; pipelines take this trait so they can run against fakes.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn call(&self, messages: &[ConversationMessage]) -> LlmResult<String>;

    /// Single-shot request: optional system prompt plus one human turn.
    async fn complete(&self, system: Option<&str>, user_parts: Vec<ContentPart>) -> LlmResult<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ConversationMessage::System(system.to_string()));
        }
        messages.push(ConversationMessage::Human(user_parts));
        self.call(&messages).await
    }
}

#[async_trait]
impl<T: ChatCompletion + ?Sized> ChatCompletion for Arc<T> {
    async fn call(&self, messages: &[ConversationMessage]) -> LlmResult<String> {
        (**self).call(messages).await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatFullResponse {
    choices: Vec<FullChoice>,
}

#[derive(Deserialize)]
struct FullChoice {
    message: FullMessage,
}

#[derive(Deserialize)]
struct FullMessage {
    content: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json_response: bool,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
///
/// Cheap to clone; clones share one connection pool. No retries happen in here.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    config: SamplingConfig,
    timeout: Duration,
}

#[bon]
impl LlmClient {
    #[builder(start_fn = with_base_url)]
    #[must_use]
    pub fn new(
        #[builder(start_fn)] base_url: &str,
        #[builder(into)] api_key: String,
        #[builder(into)] model: Option<String>,
        temperature: Option<f32>,
        top_p: Option<f32>,
        max_tokens: Option<u32>,
        json_response: Option<bool>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.unwrap_or_default(),
            config: SamplingConfig {
                temperature: temperature.unwrap_or(0.1),
                top_p,
                max_tokens,
                json_response: json_response.unwrap_or(false),
            },
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Convenience single-shot call: `client.chat("prompt").images(&imgs).call().await`.
    #[builder]
    pub async fn chat(
        &self,
        #[builder(start_fn)] prompt: &str,
        system: Option<&str>,
        images: Option<&[EncodedImage]>,
    ) -> LlmResult<String> {
        let mut parts = vec![ContentPart::text(prompt)];
        parts.extend(
            images
                .unwrap_or_default()
                .iter()
                .cloned()
                .map(ContentPart::Image),
        );
        self.complete(system, parts).await
    }

    async fn send(&self, messages: &[ConversationMessage]) -> LlmResult<String> {
        let req_body = self.build_request(messages);
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            messages = messages.len(),
            images = messages.iter().map(ConversationMessage::image_count).sum::<usize>(),
            "Sending chat completion request"
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&req_body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(LlmError::Api { status, body });
        }
        let Ok(full) = serde_json::from_str::<ChatFullResponse>(&body) else {
            return Err(LlmError::Api { status, body });
        };
        match full.choices.into_iter().next() {
            Some(choice) => Ok(choice.message.content.unwrap_or_default()),
            None => Err(LlmError::Api { status, body }),
        }
    }

    fn build_request(&self, messages: &[ConversationMessage]) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: messages.iter().map(Message::from).collect(),
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
            response_format: self
                .config
                .json_response
                .then_some(ResponseFormat { kind: "json_object" }),
        }
    }
}

#[async_trait]
impl ChatCompletion for LlmClient {
    async fn call(&self, messages: &[ConversationMessage]) -> LlmResult<String> {
        self.send(messages).await
    }
}
