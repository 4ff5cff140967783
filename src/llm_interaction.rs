use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::constants::{self, FALLBACK_ANSWER};
use crate::error::{ChatError, Result};

/// The hosted models offered in the sidebar selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum ChatModel {
    #[default]
    #[serde(rename = "Llama3-70b-8192")]
    #[value(name = "Llama3-70b-8192")]
    Llama3_70b,
    #[serde(rename = "gemma2-9b-it")]
    #[value(name = "gemma2-9b-it")]
    Gemma2_9b,
    #[serde(rename = "mixtral-8x7b-32768")]
    #[value(name = "mixtral-8x7b-32768")]
    Mixtral8x7b,
}

impl ChatModel {
    pub const ALL: [ChatModel; 3] = [
        ChatModel::Llama3_70b,
        ChatModel::Gemma2_9b,
        ChatModel::Mixtral8x7b,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            ChatModel::Llama3_70b => "Llama3-70b-8192",
            ChatModel::Gemma2_9b => "gemma2-9b-it",
            ChatModel::Mixtral8x7b => "mixtral-8x7b-32768",
        }
    }
}

impl fmt::Display for ChatModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ChatModel {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        ChatModel::ALL
            .into_iter()
            .find(|m| m.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ChatError::UnknownModel(s.to_string()))
    }
}

/// Turns a finished prompt into answer text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, model: ChatModel, prompt: &str) -> Result<String>;
}

// OpenAI-compatible chat-completions wire format
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize, Debug)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct GroqClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GroqClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(constants::GROQ_API_URL.clone(), api_key)
    }

    pub fn with_base_url(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl Generator for GroqClient {
    #[instrument(skip(self, prompt), fields(model = %model, prompt_len = prompt.len()))]
    async fn generate(&self, model: ChatModel, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request_payload = CompletionRequest {
            model: model.id(),
            messages: vec![CompletionMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_payload)
            .send()
            .await
            .map_err(|e| ChatError::Generation(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "LLM API request failed");
            return Err(ChatError::Generation(format!(
                "LLM API request failed with status {}: {}",
                status, error_body
            )));
        }

        let completion = response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| ChatError::Generation(format!("Failed to parse LLM response: {}", e)))?;

        let answer = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .unwrap_or_else(|| FALLBACK_ANSWER.to_string());

        debug!(answer_len = answer.len(), "Received LLM answer");
        Ok(answer)
    }
}
