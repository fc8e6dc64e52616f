//! OpenAI-compatible language-model client.
//!
//! Implements [`ChatModel`] over any OpenAI-compatible chat-completion
//! endpoint. Timeouts live on the HTTP client; the retry policy belongs to
//! the generation pipeline, not this layer.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;

use crate::context::ContextRole;
use crate::error::{DebateError, ModelError};
use crate::pipeline::{ChatModel, ModelRequest};

/// Connection settings for the model endpoint.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    /// API key for authentication.
    pub api_key: String,
}

/// Chat-completion client over an OpenAI-compatible API.
pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
}

impl OpenAiChatModel {
    pub fn new(settings: ApiSettings) -> Result<Self, DebateError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        let config = OpenAIConfig::new()
            .with_api_key(&settings.api_key)
            .with_api_base(&settings.api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(request.window.messages.len() + 1);

        messages.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessage {
                content: request.window.system_prompt.clone().into(),
                name: None,
            },
        ));

        for message in &request.window.messages {
            messages.push(match message.role {
                ContextRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage {
                        content: message.content.clone().into(),
                        name: None,
                    },
                ),
                ContextRole::User => {
                    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                        content: message.content.clone().into(),
                        name: None,
                    })
                }
                ContextRole::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessage {
                        content: Some(message.content.clone().into()),
                        name: None,
                        tool_calls: None,
                        refusal: None,
                        audio: None,
                        function_call: None,
                    },
                ),
            });
        }

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .max_completion_tokens(request.max_tokens)
            .temperature(request.temperature)
            .messages(messages)
            .build()
            .map_err(|e| ModelError::Service(e.to_string()))?;

        match self.client.chat().create(chat_request).await {
            Ok(response) => {
                let content = response
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .unwrap_or_default();
                Ok(content)
            }
            Err(err) => Err(classify(err.to_string())),
        }
    }
}

/// Sort a provider error into the pipeline's transient/fatal taxonomy.
/// Classification is textual: provider error shapes vary across
/// OpenAI-compatible backends, their messages are the stable part.
fn classify(error: String) -> ModelError {
    let lowered = error.to_lowercase();
    if lowered.contains("timed out") || lowered.contains("timeout") {
        ModelError::Timeout
    } else if lowered.contains("rate limit")
        || lowered.contains("too many requests")
        || lowered.contains("overloaded")
    {
        ModelError::RateLimited
    } else {
        ModelError::Service(error)
    }
}
