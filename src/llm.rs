use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
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

/// Failure modes of a model call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Network or HTTP status failure. Retried before it surfaces.
    #[error("LLM request failed after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    /// The endpoint answered, but not with a usable completion.
    #[error("unexpected LLM response: {0}")]
    Response(String),
}

impl ApiError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport { .. })
    }
}

/// The parts of a chat completion the bot cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub citations: Vec<String>,
}

impl ChatResponse {
    #[cfg(test)]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            citations: Vec::new(),
        }
    }

    /// Extract `choices[0].message.content` and the optional `citations` list.
    pub fn from_json(json: &Value) -> Result<Self, ApiError> {
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| {
                ApiError::Response(format!(
                    "missing choices[0].message.content in {}",
                    truncate_for_log(&json.to_string())
                ))
            })?
            .to_string();

        let citations = json["citations"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { content, citations })
    }
}

/// Anything that can answer a chat completion request.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// `search` holds caller-supplied live search directives; they are merged
    /// with the defaults before transmission.
    async fn call(
        &self,
        messages: &[Message],
        search: Option<&Map<String, Value>>,
    ) -> Result<ChatResponse, ApiError>;
}

/// Merge caller search directives over the defaults, dropping null values.
/// Keys outside the recognized set are ignored.
pub fn merge_search_parameters(directives: &Map<String, Value>) -> Map<String, Value> {
    let defaults = [
        ("mode", json!("auto")),
        ("sources", json!([{ "type": "web" }, { "type": "x" }])),
        ("from_date", Value::Null),
        ("to_date", Value::Null),
        ("max_search_results", json!(20)),
        ("return_citations", json!(false)),
    ];

    defaults
        .into_iter()
        .filter_map(|(key, default)| {
            let value = directives.get(key).cloned().unwrap_or(default);
            (!value.is_null()).then(|| (key.to_string(), value))
        })
        .collect()
}

/// Run `op` until it succeeds, fails with a non-transport error, or
/// `max_attempts` transport failures have been seen.
async fn with_retries<T, F, Fut>(max_attempts: u32, backoff: Duration, mut op: F) -> Result<T, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Err(e) if e.is_transport() && attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %e, "LLM request failed, retrying");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn truncate_for_log(s: &str) -> String {
    s.chars().take(300).collect()
}

pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        })
    }

    pub fn from_env() -> Result<Self> {
        let base_url =
            dotenv::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.x.ai/v1".to_string());
        let model = dotenv::var("LLM_MODEL").unwrap_or_else(|_| "grok-3-mini".to_string());
        let api_key = dotenv::var("XAI_API_KEY").ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!("XAI_API_KEY not set, requests will be sent without authorization");
        }

        Self::new(base_url, model, api_key)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    async fn send_once(&self, body: &Value, attempt: u32) -> Result<ChatResponse, ApiError> {
        let transport = |e: reqwest::Error| ApiError::Transport {
            attempts: attempt,
            message: e.to_string(),
        };

        let mut req = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transport)?;
        let text = resp.text().await.map_err(transport)?;
        let json: Value = serde_json::from_str(&text).map_err(|e| {
            ApiError::Response(format!("invalid JSON ({}): {}", e, truncate_for_log(&text)))
        })?;

        ChatResponse::from_json(&json)
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn call(
        &self,
        messages: &[Message],
        search: Option<&Map<String, Value>>,
    ) -> Result<ChatResponse, ApiError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(directives) = search {
            body["search_parameters"] = Value::Object(merge_search_parameters(directives));
        }

        debug!(
            model = %self.model,
            messages = messages.len(),
            search = search.is_some(),
            "Sending chat completion"
        );

        let response = with_retries(MAX_ATTEMPTS, RETRY_BACKOFF, |attempt| {
            self.send_once(&body, attempt)
        })
        .await?;

        debug!(
            content_len = response.content.len(),
            citations = response.citations.len(),
            "Chat completion received"
        );
        Ok(response)
    }
}
