//! Language-model backends.
//!
//! [`LanguageModel`] offers blocking-style [`generate`](LanguageModel::generate)
//! and token [`stream`](LanguageModel::stream)ing. Streams are delivered over
//! a bounded `mpsc` channel; the producing task stops as soon as the
//! receiver is dropped, which is how a disconnected HTTP client cancels
//! generation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::LlmConfig;
use crate::error::NexusError;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub type TokenStream = mpsc::Receiver<Result<String>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete the conversation and return the whole reply.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Complete the conversation, yielding tokens in generation order.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream>;
}

pub fn create_language_model(config: &LlmConfig) -> crate::error::Result<Arc<dyn LanguageModel>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| NexusError::config(format!("failed to build HTTP client: {}", e)))?;

    let model: Arc<dyn LanguageModel> = match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| NexusError::config("OPENAI_API_KEY environment variable not set"))?;
            Arc::new(OpenAIChat {
                model: config.model.clone(),
                temperature: config.temperature,
                api_key,
                url: config.url.clone().unwrap_or_else(|| OPENAI_CHAT_URL.to_string()),
                client,
            })
        }
        "ollama" => Arc::new(OllamaChat {
            model: config.model.clone(),
            temperature: config.temperature,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client,
        }),
        other => {
            return Err(NexusError::config(format!(
                "Unknown llm provider: {}",
                other
            )))
        }
    };
    tracing::info!(provider = %config.provider, model = %config.model, "language model ready");
    Ok(model)
}

async fn send(request: reqwest::RequestBuilder, label: &str) -> Result<reqwest::Response> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("{} error {}: {}", label, status, text);
    }
    Ok(response)
}

/// Forward a line-oriented HTTP body to a token channel.
///
/// `parse_line` returns `Ok(Some(token))` for content, `Ok(None)` for lines
/// to skip, and `Err(())` when the stream signalled completion.
fn spawn_line_stream<F>(response: reqwest::Response, parse_line: F) -> TokenStream
where
    F: Fn(&str) -> std::result::Result<Option<String>, ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let mut body = response.bytes_stream();

    tokio::spawn(async move {
        let mut pending = String::new();
        while let Some(item) = body.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };
            pending.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_line(line) {
                    Ok(Some(token)) => {
                        if tx.send(Ok(token)).await.is_err() {
                            tracing::debug!("token receiver dropped, stopping generation");
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(()) => return,
                }
            }
        }
        if let Ok(Some(token)) = parse_line(pending.trim()) {
            let _ = tx.send(Ok(token)).await;
        }
    });

    rx
}

// ============ OpenAI ============

pub struct OpenAIChat {
    model: String,
    temperature: f32,
    api_key: String,
    url: String,
    client: reqwest::Client,
}

fn parse_openai_sse(line: &str) -> std::result::Result<Option<String>, ()> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Err(());
    }
    let Ok(json) = serde_json::from_str::<Value>(data) else {
        return Ok(None);
    };
    Ok(json["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": false,
        });
        let request = self.client.post(&self.url).bearer_auth(&self.api_key).json(&body);
        let payload: Value = send(request, "OpenAI chat").await?.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("OpenAI chat response has no content"))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": true,
        });
        let request = self.client.post(&self.url).bearer_auth(&self.api_key).json(&body);
        let response = send(request, "OpenAI chat stream").await?;
        Ok(spawn_line_stream(response, parse_openai_sse))
    }
}

// ============ Ollama ============

pub struct OllamaChat {
    model: String,
    temperature: f32,
    url: String,
    client: reqwest::Client,
}

fn parse_ollama_line(line: &str) -> std::result::Result<Option<String>, ()> {
    let Ok(json) = serde_json::from_str::<Value>(line) else {
        return Ok(None);
    };
    let token = json["message"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    if json["done"].as_bool() == Some(true) && token.is_none() {
        return Err(());
    }
    Ok(token)
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let request = self.client.post(format!("{}/api/chat", self.url)).json(&body);
        let payload: Value = send(request, "Ollama chat").await?.json().await?;
        payload["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Ollama chat response has no content"))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "options": { "temperature": self.temperature },
        });
        let request = self.client.post(format!("{}/api/chat", self.url)).json(&body);
        let response = send(request, "Ollama chat stream").await?;
        Ok(spawn_line_stream(response, parse_ollama_line))
    }
}
