use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use super::context::ContextStore;
use super::credibility::{self, SearchResult};
use crate::llm::{ApiError, ChatModel, ChatResponse, Message};

/// Maximum characters kept from search content, final answers and summaries.
pub const CONTENT_LIMIT: usize = 1000;

/// Score at which a search result counts as reliable.
const RELIABLE_SCORE: u32 = 60;
/// Minimum number of sources, and of reliable sources, needed to answer.
const MIN_SOURCES: usize = 3;

/// The fixed set of functions the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    GetCurrentTime,
    CallModelWithSearch,
    TranslateText,
    FinalizeResponse,
    SummarizeContext,
}

impl FunctionKind {
    pub fn name(self) -> &'static str {
        match self {
            FunctionKind::GetCurrentTime => "get_current_time",
            FunctionKind::CallModelWithSearch => "call_model_with_search",
            FunctionKind::TranslateText => "translate_text",
            FunctionKind::FinalizeResponse => "finalize_response",
            FunctionKind::SummarizeContext => "summarize_context",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FunctionKind {
    type Err = FunctionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get_current_time" => Ok(FunctionKind::GetCurrentTime),
            "call_model_with_search" | "call_grok_api" => Ok(FunctionKind::CallModelWithSearch),
            "translate_text" => Ok(FunctionKind::TranslateText),
            "finalize_response" => Ok(FunctionKind::FinalizeResponse),
            "summarize_context" => Ok(FunctionKind::SummarizeContext),
            other => Err(FunctionError::UnknownFunction(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("invalid arguments for {function}: {reason}")]
    InvalidArguments {
        function: FunctionKind,
        reason: String,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl FunctionError {
    /// Transport failures end the turn; everything else is recorded and the
    /// loop moves on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FunctionError::Api(e) if e.is_transport())
    }

    /// An unrecognized name never ran, so it does not use up a call slot.
    pub fn consumes_call(&self) -> bool {
        !matches!(self, FunctionError::UnknownFunction(_))
    }
}

/// Result of a successfully executed function.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionOutput {
    Text(String),
    Search {
        response: ChatResponse,
        search_results: Vec<SearchResult>,
    },
    /// Composed answer from `finalize_response`.
    Final(String),
}

impl FunctionOutput {
    /// String form appended to the conversation history.
    pub fn to_history_entry(&self) -> String {
        match self {
            FunctionOutput::Text(s) | FunctionOutput::Final(s) => s.clone(),
            FunctionOutput::Search {
                response,
                search_results,
            } => json!({
                "content": response.content,
                "citations": response.citations,
                "search_results": search_results.len(),
            })
            .to_string(),
        }
    }
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Compose the final answer, appending a sources block when citations exist.
pub fn finalize_response(content: &str, citations: &[String]) -> String {
    let content = truncate_chars(content, CONTENT_LIMIT);
    if citations.is_empty() {
        return content;
    }
    let sources = citations
        .iter()
        .map(|url| format!("[{}]({})", url, url))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n來源:\n{}", content, sources)
}

/// Decide whether the gathered evidence is strong enough and describe it.
pub fn summarize_results(results: &[SearchResult]) -> String {
    let reliable: Vec<&SearchResult> = results
        .iter()
        .filter(|r| r.score >= RELIABLE_SCORE)
        .collect();
    let line = |r: &SearchResult| format!("- {} (score: {})", r.content, r.score);

    let summary = if results.len() < MIN_SOURCES || reliable.len() < MIN_SOURCES {
        let scores = results
            .iter()
            .map(|r| r.score.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let mut text = format!(
            "Insufficient evidence to give a reliable answer. Only {} source(s) found (scores: {}); \
            at least {} sources and {} reliable sources (score >= {}) are required.",
            results.len(),
            scores,
            MIN_SOURCES,
            MIN_SOURCES,
            RELIABLE_SCORE
        );
        if results.is_empty() {
            text.push_str("\nNo data available.");
        } else {
            text.push_str("\nAvailable data:\n");
            text.push_str(&results.iter().map(line).collect::<Vec<_>>().join("\n"));
        }
        text
    } else {
        format!(
            "Based on the following reliable sources:\n{}",
            reliable.iter().copied().map(line).collect::<Vec<_>>().join("\n")
        )
    };

    truncate_chars(&summary, CONTENT_LIMIT)
}

fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Runs the fixed function set on behalf of the orchestration loop.
pub struct FunctionExecutor {
    llm: Arc<dyn ChatModel>,
    contexts: Arc<ContextStore>,
}

impl FunctionExecutor {
    pub fn new(llm: Arc<dyn ChatModel>, contexts: Arc<ContextStore>) -> Self {
        Self { llm, contexts }
    }

    /// Dispatch `name` with its parameter bag. `conversation_key` scopes
    /// `summarize_context` to the conversation the turn belongs to.
    pub async fn execute(
        &self,
        conversation_key: &str,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<(FunctionKind, FunctionOutput), FunctionError> {
        let kind: FunctionKind = name.parse()?;
        debug!(function = %kind, params = params.len(), "Executing function");

        let output = match kind {
            FunctionKind::GetCurrentTime => {
                let timezone = str_param(params, "timezone").unwrap_or("UTC");
                FunctionOutput::Text(self.get_current_time(timezone)?)
            }
            FunctionKind::CallModelWithSearch => {
                let messages = parse_messages(params)?;
                let search = params.get("search_parameters").and_then(Value::as_object);
                self.call_model_with_search(&messages, search).await?
            }
            FunctionKind::TranslateText => {
                let text = str_param(params, "text").unwrap_or("");
                let target = str_param(params, "target_language").unwrap_or("en");
                FunctionOutput::Text(self.translate_text(text, target).await?)
            }
            FunctionKind::FinalizeResponse => {
                let content = str_param(params, "content").unwrap_or("");
                let citations: Vec<String> = params
                    .get("citations")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|c| c.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                FunctionOutput::Final(finalize_response(content, &citations))
            }
            FunctionKind::SummarizeContext => {
                FunctionOutput::Text(self.summarize_context(conversation_key).await)
            }
        };

        Ok((kind, output))
    }

    pub fn get_current_time(&self, timezone: &str) -> Result<String, FunctionError> {
        let tz: Tz = timezone
            .trim()
            .parse()
            .map_err(|_| FunctionError::InvalidTimezone(timezone.to_string()))?;
        Ok(Utc::now()
            .with_timezone(&tz)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string())
    }

    /// Forward to the model. With search directives, every returned citation
    /// becomes a scored search result.
    pub async fn call_model_with_search(
        &self,
        messages: &[Message],
        search: Option<&Map<String, Value>>,
    ) -> Result<FunctionOutput, FunctionError> {
        let response = self.llm.call(messages, search).await?;

        let search_results = if search.is_some() && !response.citations.is_empty() {
            let content = truncate_chars(&response.content, CONTENT_LIMIT);
            let batch = response
                .citations
                .iter()
                .map(|url| SearchResult {
                    source: "unknown".to_string(),
                    content: content.clone(),
                    url: url.clone(),
                    score: 0,
                })
                .collect();
            credibility::score_batch(batch)
        } else {
            Vec::new()
        };

        debug!(
            citations = response.citations.len(),
            results = search_results.len(),
            "Model call with search complete"
        );
        Ok(FunctionOutput::Search {
            response,
            search_results,
        })
    }

    pub async fn translate_text(&self, text: &str, target_language: &str) -> Result<String, ApiError> {
        let messages = [
            Message::system(format!("Translate the following text to {}.", target_language)),
            Message::user(text),
        ];
        Ok(self.llm.call(&messages, None).await?.content)
    }

    pub async fn summarize_context(&self, conversation_key: &str) -> String {
        let context = self.contexts.get(conversation_key).await;
        summarize_results(&context.search_results)
    }
}

/// Read `messages`, falling back to a `query` string as a single user message.
fn parse_messages(params: &Map<String, Value>) -> Result<Vec<Message>, FunctionError> {
    let invalid = |reason: String| FunctionError::InvalidArguments {
        function: FunctionKind::CallModelWithSearch,
        reason,
    };

    let messages: Vec<Message> = match params.get("messages") {
        Some(value) if !value.is_null() => serde_json::from_value(value.clone())
            .map_err(|e| invalid(format!("messages: {}", e)))?,
        _ => str_param(params, "query")
            .map(|q| vec![Message::user(q)])
            .unwrap_or_default(),
    };

    if messages.is_empty() {
        return Err(invalid("no messages or query given".to_string()));
    }
    Ok(messages)
}
