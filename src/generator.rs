//! # Answer generation
//!
//! Sends the context-stuffed prompt to an OpenAI-compatible chat endpoint (a local Ollama
//! works out of the box) and returns the single completion.
//!
//! The rest of the crate only sees the [`Generator`] trait.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::debug;

use crate::config::SecureSupportConfig;
use crate::error::{SupportError, SupportResult};
use crate::template::Prompt;

/// Produces one response for a prompt. No streaming.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> SupportResult<String>;
}

/// Creates a new OpenAI API client from configuration.
fn create_client(config: &SecureSupportConfig) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    debug!("Client created with config: {:?}", openai_config);
    Client::with_config(openai_config)
}

/// [`Generator`] backed by the chat completions API.
pub struct ChatGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    stop_words: Vec<String>,
}

impl ChatGenerator {
    pub fn new(config: &SecureSupportConfig) -> Self {
        Self {
            client: create_client(config),
            model: config.model.clone(),
            max_tokens: u32::from(config.answer_reserve_tokens),
            stop_words: config.stop_words.clone(),
        }
    }

    fn messages(prompt: &Prompt) -> Vec<ChatCompletionRequestMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = &prompt.system_prompt {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(
                        system_prompt.clone(),
                    ),
                    name: None,
                },
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.user_prompt.clone()),
                name: None,
            },
        ));
        messages
    }
}

#[async_trait]
impl Generator for ChatGenerator {
    #[allow(deprecated)]
    async fn complete(&self, prompt: &Prompt) -> SupportResult<String> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.max_tokens(self.max_tokens)
            .model(self.model.clone())
            .messages(Self::messages(prompt));
        if !self.stop_words.is_empty() {
            args.stop(self.stop_words.clone());
        }
        let request = args
            .build()
            .map_err(|e| SupportError::Generation(e.to_string()))?;

        debug!("Sending request: {:?}", request);

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| SupportError::Generation(e.to_string()))?;

        let answer: String = response
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect();

        if answer.is_empty() {
            return Err(SupportError::Generation("No assistant response".into()));
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn mock_config(api_base: String) -> SecureSupportConfig {
        SecureSupportConfig {
            api_key: "mock_api_key".to_string(),
            api_base,
            model: "llama3.2:1b".to_string(),
            ..SecureSupportConfig::default()
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system_prompt: Some("You are a telecom support assistant.".into()),
            user_prompt: "Question: How do I fix error code 5412?\n\nAnswer:".into(),
            tickets_used: 1,
        }
    }

    #[test]
    fn test_messages_include_optional_system_prompt() {
        let mut p = prompt();
        assert_eq!(ChatGenerator::messages(&p).len(), 2);
        p.system_prompt = None;
        let messages = ChatGenerator::messages(&p);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::User(_)));
    }

    #[tokio::test]
    async fn test_complete_returns_assistant_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1_700_000_000,
                    "model": "llama3.2:1b",
                    "choices": [{
                        "index": 0,
                        "message": {
                            "role": "assistant",
                            "content": "Restart the device and wait 10 minutes."
                        },
                        "finish_reason": "stop"
                    }]
                }));
            })
            .await;

        let generator = ChatGenerator::new(&mock_config(format!("{}/v1", server.base_url())));
        let answer = generator.complete(&prompt()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(answer, "Restart the device and wait 10 minutes.");
    }

    #[tokio::test]
    async fn test_complete_reports_generation_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(404).json_body(json!({
                    "error": {
                        "message": "model 'llama3.2:1b' not found",
                        "type": "not_found_error",
                        "param": null,
                        "code": null
                    }
                }));
            })
            .await;

        let generator = ChatGenerator::new(&mock_config(format!("{}/v1", server.base_url())));
        let err = generator.complete(&prompt()).await.unwrap_err();

        assert!(matches!(err, SupportError::Generation(_)));
    }
}
