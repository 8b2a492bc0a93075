pub mod context;
pub mod credibility;
pub mod decision;
pub mod functions;
pub mod prompts;

#[cfg(test)]
pub mod test_helpers;

use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::delivery::{Delivery, NoticeHandle};
use crate::llm::{ChatModel, Message};
use crate::state::AgentConfig;

use context::ContextStore;
use decision::Decision;
use functions::{FunctionExecutor, FunctionOutput};
use prompts::PromptInputs;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The model called `finalize_response`.
    Finalized(String),
    /// The call budget or iteration cap ran out and the evidence was summarized.
    ForcedSummary(String),
    /// The model endpoint was unreachable.
    Aborted(String),
}

pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub iterations: u32,
    pub call_count: u32,
}

/// Why the iteration loop stopped.
enum LoopExit {
    Finalized(String),
    BudgetExhausted,
    IterationCap,
    Aborted(String),
}

/// Per-turn bookkeeping shared by the loop helpers.
struct Turn<'a> {
    key: &'a str,
    delivery: &'a dyn Delivery,
    notices: Vec<NoticeHandle>,
    iteration: u32,
}

pub struct Agent {
    llm: Arc<dyn ChatModel>,
    contexts: Arc<ContextStore>,
    executor: FunctionExecutor,
}

impl Agent {
    pub fn new(llm: Arc<dyn ChatModel>, contexts: Arc<ContextStore>) -> Self {
        let executor = FunctionExecutor::new(llm.clone(), contexts.clone());
        Self {
            llm,
            contexts,
            executor,
        }
    }

    #[cfg(test)]
    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// Run one turn for `user_input` in conversation `key`.
    ///
    /// Turns on the same key are serialized. Context updates are applied to
    /// the store as they happen, so the context is persisted on every exit.
    pub async fn run_turn(
        &self,
        key: &str,
        user_input: &str,
        config: &AgentConfig,
        delivery: &dyn Delivery,
    ) -> Result<TurnReport> {
        let _turn_guard = self.contexts.lock_turn(key).await;
        info!(
            key,
            input_len = user_input.len(),
            max_function_calls = config.max_function_calls,
            max_iterations = config.max_iterations,
            "Turn started"
        );

        self.contexts
            .update(key, |ctx| ctx.conversation_history.push(Message::user(user_input)))
            .await;

        let language = self.detect_language(user_input).await;
        self.contexts
            .update(key, |ctx| ctx.user_language = language.clone())
            .await;

        let translated_input = if is_english(&language) {
            user_input.to_string()
        } else {
            match self.executor.translate_text(user_input, "en").await {
                Ok(text) => text,
                Err(e) => {
                    warn!(key, language, error = %e, "Input translation failed, using original text");
                    user_input.to_string()
                }
            }
        };
        debug!(key, language, translated = %translated_input, "Input prepared");

        let mut turn = Turn {
            key,
            delivery,
            notices: Vec::new(),
            iteration: 0,
        };
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();

        let exit = loop {
            let ctx = self.contexts.get(key).await;
            if ctx.call_count >= config.max_function_calls {
                break LoopExit::BudgetExhausted;
            }
            if turn.iteration >= config.max_iterations {
                break LoopExit::IterationCap;
            }
            turn.iteration += 1;

            let prompt = prompts::render_system_prompt(&PromptInputs {
                user_input,
                translated_input: &translated_input,
                current_date: &today,
                max_function_calls: config.max_function_calls,
                context: &ctx,
            });
            let messages = [Message::system(prompt), Message::user(translated_input.as_str())];

            let response = match self.llm.call(&messages, None).await {
                Ok(response) => response,
                Err(e) if e.is_transport() => {
                    error!(key, iteration = turn.iteration, error = %e, "Model unreachable, aborting turn");
                    self.note(&mut turn, &format!("Error: {}", e)).await;
                    break LoopExit::Aborted(e.to_string());
                }
                Err(e) => {
                    warn!(key, iteration = turn.iteration, error = %e, "Unusable model response");
                    self.note(&mut turn, &format!("Error: {}", e)).await;
                    continue;
                }
            };

            let call = match Decision::parse(&response.content) {
                Decision::Call(call) => call,
                Decision::Reasoning(text) => {
                    debug!(key, iteration = turn.iteration, len = text.len(), "Free-form reasoning");
                    self.note(&mut turn, &text).await;
                    self.contexts
                        .update(key, |ctx| ctx.conversation_history.push(Message::assistant(text)))
                        .await;
                    continue;
                }
            };

            let params_text = Value::Object(call.parameters.clone()).to_string();
            self.note(
                &mut turn,
                &format!("invoking function {} with params {}", call.name, params_text),
            )
            .await;

            match self.executor.execute(key, &call.name, &call.parameters).await {
                Ok((kind, output)) => {
                    let call_count = self.increment_calls(key).await;
                    debug!(key, iteration = turn.iteration, function = %kind, call_count, "Function executed");

                    match output {
                        FunctionOutput::Final(answer) => break LoopExit::Finalized(answer),
                        output => {
                            let entry = output.to_history_entry();
                            self.contexts
                                .update(key, |ctx| {
                                    if let FunctionOutput::Search { search_results, .. } = output {
                                        ctx.search_results.extend(search_results);
                                    }
                                    ctx.conversation_history.push(Message::assistant(entry));
                                })
                                .await;
                        }
                    }
                }
                Err(e) => {
                    if e.consumes_call() {
                        self.increment_calls(key).await;
                    }
                    warn!(key, iteration = turn.iteration, function = %call.name, error = %e, "Function failed");
                    self.note(&mut turn, &format!("Error: {}", e)).await;
                    if e.is_fatal() {
                        break LoopExit::Aborted(e.to_string());
                    }
                }
            }
        };

        let outcome = match exit {
            LoopExit::Finalized(answer) => {
                TurnOutcome::Finalized(self.deliver_answer(&mut turn, &language, answer).await?)
            }
            LoopExit::BudgetExhausted => {
                let reason = "Maximum function calls reached, forcing a summary.";
                TurnOutcome::ForcedSummary(self.force_summary(&mut turn, &language, reason).await?)
            }
            LoopExit::IterationCap => {
                let reason = "Iteration limit reached, forcing a summary.";
                TurnOutcome::ForcedSummary(self.force_summary(&mut turn, &language, reason).await?)
            }
            LoopExit::Aborted(reason) => TurnOutcome::Aborted(reason),
        };

        let call_count = self.contexts.get(key).await.call_count;
        info!(
            key,
            iterations = turn.iteration,
            call_count,
            outcome = outcome_label(&outcome),
            "Turn complete"
        );

        Ok(TurnReport {
            outcome,
            iterations: turn.iteration,
            call_count,
        })
    }

    /// Reasoning history of a conversation, or its last summary when there is none.
    pub async fn reasoning_report(&self, key: &str) -> String {
        let ctx = self.contexts.get(key).await;
        if ctx.reasoning_history.is_empty() {
            let summary = if ctx.last_summary.is_empty() {
                "No summary available."
            } else {
                ctx.last_summary.as_str()
            };
            format!("No reasoning recorded yet. Last summary:\n{}", summary)
        } else {
            format!("Latest reasoning:\n{}", ctx.reasoning_history.join("\n"))
        }
    }

    pub async fn clear_context(&self, key: &str) -> bool {
        self.contexts.clear(key).await
    }

    async fn detect_language(&self, text: &str) -> String {
        let messages = [
            Message::system(prompts::LANGUAGE_DETECTION_PROMPT),
            Message::user(text),
        ];
        match self.llm.call(&messages, None).await {
            Ok(response) => parse_language_code(&response.content).unwrap_or_else(|| {
                debug!(raw = %response.content, "Unrecognized language code, defaulting to en");
                "en".to_string()
            }),
            Err(e) => {
                warn!(error = %e, "Language detection failed, defaulting to en");
                "en".to_string()
            }
        }
    }

    async fn increment_calls(&self, key: &str) -> u32 {
        self.contexts
            .update(key, |ctx| {
                ctx.call_count += 1;
                ctx.call_count
            })
            .await
    }

    /// Record a reasoning note and show it to the user.
    async fn note(&self, turn: &mut Turn<'_>, text: &str) {
        let iteration = turn.iteration;
        self.contexts
            .update(turn.key, |ctx| {
                ctx.reasoning_history
                    .push(format!("Thinking #{}: {}", iteration, text))
            })
            .await;

        match turn
            .delivery
            .send_notice(&format!("Thinking #{}:\n{}", iteration, text))
            .await
        {
            Ok(handle) => turn.notices.push(handle),
            Err(e) => warn!(key = turn.key, error = %e, "Failed to send notice"),
        }
    }

    async fn force_summary(&self, turn: &mut Turn<'_>, language: &str, reason: &str) -> Result<String> {
        warn!(key = turn.key, iterations = turn.iteration, "{}", reason);
        self.note(turn, reason).await;
        let summary = self.executor.summarize_context(turn.key).await;
        self.deliver_answer(turn, language, summary).await
    }

    /// Translate the answer back if needed, clear notices, send it and keep it
    /// as the conversation's last summary.
    async fn deliver_answer(&self, turn: &mut Turn<'_>, language: &str, answer: String) -> Result<String> {
        let answer = if is_english(language) {
            answer
        } else {
            match self.executor.translate_text(&answer, language).await {
                Ok(translated) => translated,
                Err(e) => {
                    warn!(key = turn.key, language, error = %e, "Answer translation failed, sending English");
                    answer
                }
            }
        };

        let delivery = turn.delivery;
        let deletions = turn
            .notices
            .drain(..)
            .map(|handle| delivery.delete_notice(handle));
        for result in join_all(deletions).await {
            if let Err(e) = result {
                warn!(key = turn.key, error = %e, "Failed to delete notice");
            }
        }

        self.contexts
            .update(turn.key, |ctx| ctx.last_summary = answer.clone())
            .await;
        turn.delivery.send_final(&answer).await?;
        Ok(answer)
    }
}

fn outcome_label(outcome: &TurnOutcome) -> &'static str {
    match outcome {
        TurnOutcome::Finalized(_) => "finalized",
        TurnOutcome::ForcedSummary(_) => "forced_summary",
        TurnOutcome::Aborted(_) => "aborted",
    }
}

/// Whether a language code has `en` as its primary subtag.
pub fn is_english(code: &str) -> bool {
    code.split('-').next() == Some("en")
}

/// Normalize a model's language-detection answer into a code like `zh-TW`.
pub fn parse_language_code(raw: &str) -> Option<String> {
    let token = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.'))
        .trim();

    let mut subtags = token.split(|c| c == '-' || c == '_');
    let primary = subtags.next()?;
    if !(2..=3).contains(&primary.len()) || !primary.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let mut code = primary.to_ascii_lowercase();
    for sub in subtags {
        if sub.is_empty() || sub.len() > 4 || !sub.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        code.push('-');
        code.push_str(sub);
    }
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ApiError, ChatResponse};
    use serde_json::json;
    use super::test_helpers::{DeliveryEvent, RecordingDelivery, ScriptedModel};

    fn config(max_function_calls: u32, max_iterations: u32) -> AgentConfig {
        AgentConfig {
            max_function_calls,
            max_iterations,
        }
    }

    fn agent(model: Arc<ScriptedModel>) -> Agent {
        agent_with_store(model, Arc::new(ContextStore::new()))
    }

    fn agent_with_store(model: Arc<ScriptedModel>, contexts: Arc<ContextStore>) -> Agent {
        Agent::new(model, contexts)
    }

    fn call(function: &str, parameters: Value) -> String {
        json!({ "function": function, "parameters": parameters }).to_string()
    }

    fn finalize(content: &str) -> String {
        call("finalize_response", json!({ "content": content }))
    }

    #[tokio::test]
    async fn test_finalize_ends_turn() {
        let model = Arc::new(ScriptedModel::texts(&[
            "en",
            &call(
                "finalize_response",
                json!({ "content": "hello", "citations": ["http://a"] }),
            ),
        ]));
        let agent = agent(model.clone());
        let delivery = RecordingDelivery::new();

        let report = agent
            .run_turn("c1", "say hello", &config(20, 40), &delivery)
            .await
            .unwrap();

        let expected = "hello\n來源:\n[http://a](http://a)";
        assert_eq!(report.outcome, TurnOutcome::Finalized(expected.to_string()));
        assert_eq!(report.call_count, 1);
        assert_eq!(report.iterations, 1);
        assert_eq!(delivery.finals(), vec![expected.to_string()]);

        // The invocation notice is removed before the answer goes out
        let events = delivery.events();
        assert!(matches!(&events[0], DeliveryEvent::Notice(1, text) if text.contains("invoking function finalize_response")));
        assert_eq!(events[1], DeliveryEvent::Deleted(1));

        let ctx = agent.contexts().get("c1").await;
        assert_eq!(ctx.last_summary, expected);
        assert_eq!(ctx.conversation_history[0], Message::user("say hello"));

        // Loop call: rendered prompt as system, input as user
        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].messages[0].content, prompts::LANGUAGE_DETECTION_PROMPT);
        assert!(calls[1].messages[0].content.starts_with(prompts::SYSTEM_PROMPT));
        assert_eq!(calls[1].messages[1], Message::user("say hello"));
    }

    #[tokio::test]
    async fn test_non_english_round_trip() {
        let model = Arc::new(ScriptedModel::texts(&[
            "zh-TW",
            "What time is it in Taipei?",
            &call("get_current_time", json!({ "timezone": "Asia/Taipei" })),
            &finalize("It is noon in Taipei."),
            "台北現在是中午。",
        ]));
        let agent = agent(model.clone());
        let delivery = RecordingDelivery::new();

        let report = agent
            .run_turn("c1", "台北現在幾點？", &config(20, 40), &delivery)
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Finalized("台北現在是中午。".to_string()));
        assert_eq!(report.call_count, 2);

        let calls = model.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[1].messages[0].content, "Translate the following text to en.");
        assert_eq!(calls[2].messages[1].content, "What time is it in Taipei?");
        assert_eq!(calls[4].messages[0].content, "Translate the following text to zh-TW.");
        assert_eq!(calls[4].messages[1].content, "It is noon in Taipei.");

        let ctx = agent.contexts().get("c1").await;
        assert_eq!(ctx.user_language, "zh-TW");
        assert_eq!(ctx.last_summary, "台北現在是中午。");
        // The time lookup result went into the history
        assert_eq!(ctx.conversation_history.len(), 2);
        assert_eq!(delivery.deleted(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_forces_summary() {
        let model = Arc::new(
            ScriptedModel::texts(&["en"])
                .with_fallback(&call("get_current_time", json!({ "timezone": "UTC" }))),
        );
        let agent = agent(model.clone());
        let delivery = RecordingDelivery::new();

        let report = agent
            .run_turn("c1", "what time is it", &config(3, 40), &delivery)
            .await
            .unwrap();

        assert_eq!(report.call_count, 3);
        assert_eq!(report.iterations, 3);
        let TurnOutcome::ForcedSummary(summary) = &report.outcome else {
            panic!("expected forced summary, got {:?}", report.outcome);
        };
        assert!(summary.starts_with("Insufficient evidence"));
        assert!(delivery
            .notices()
            .iter()
            .any(|n| n.contains("Maximum function calls reached")));
        assert_eq!(delivery.finals(), vec![summary.clone()]);
        // Every notice, including the budget notice, is cleaned up
        assert_eq!(delivery.deleted().len(), delivery.notices().len());
        assert_eq!(agent.contexts().get("c1").await.last_summary, *summary);
        assert_eq!(model.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_pure_reasoning_stops_at_iteration_cap() {
        let model = Arc::new(ScriptedModel::texts(&["en"]).with_fallback("Let me think about this more."));
        let agent = agent(model.clone());
        let delivery = RecordingDelivery::new();

        let report = agent
            .run_turn("c1", "why is the sky blue", &config(20, 5), &delivery)
            .await
            .unwrap();

        assert_eq!(report.call_count, 0);
        assert_eq!(report.iterations, 5);
        assert!(matches!(report.outcome, TurnOutcome::ForcedSummary(_)));
        assert!(delivery
            .notices()
            .iter()
            .any(|n| n.contains("Iteration limit reached")));

        let ctx = agent.contexts().get("c1").await;
        // user input + five reasoning turns
        assert_eq!(ctx.conversation_history.len(), 6);
        assert_eq!(ctx.reasoning_history.len(), 6);
        assert!(ctx.reasoning_history[0].starts_with("Thinking #1: Let me think"));
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_without_summary() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(ChatResponse::text("en")),
            Err(ApiError::Transport {
                attempts: 3,
                message: "connection refused".into(),
            }),
        ]));
        let agent = agent(model);
        let delivery = RecordingDelivery::new();

        let report = agent
            .run_turn("c1", "hello", &config(20, 40), &delivery)
            .await
            .unwrap();

        assert!(matches!(report.outcome, TurnOutcome::Aborted(ref r) if r.contains("connection refused")));
        assert!(delivery.finals().is_empty());
        assert!(delivery.deleted().is_empty());
        assert!(delivery.notices()[0].contains("Error:"));

        let ctx = agent.contexts().get("c1").await;
        assert!(ctx.last_summary.is_empty());
        assert!(ctx.reasoning_history[0].contains("connection refused"));
    }

    #[tokio::test]
    async fn test_response_error_is_recoverable() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(ChatResponse::text("en")),
            Err(ApiError::Response("missing choices".into())),
            Ok(ChatResponse::text(finalize("recovered"))),
        ]));
        let agent = agent(model);
        let delivery = RecordingDelivery::new();

        let report = agent
            .run_turn("c1", "hello", &config(20, 40), &delivery)
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Finalized("recovered".to_string()));
        assert_eq!(report.iterations, 2);
        assert_eq!(report.call_count, 1);
        let ctx = agent.contexts().get("c1").await;
        assert!(ctx.reasoning_history[0].contains("missing choices"));
    }

    #[tokio::test]
    async fn test_unknown_function_does_not_consume_budget() {
        let model = Arc::new(ScriptedModel::texts(&[
            "en",
            &call("launch_rockets", json!({})),
            &call("get_current_time", json!({ "timezone": "Not/AZone" })),
            &finalize("done"),
        ]));
        let agent = agent(model);
        let delivery = RecordingDelivery::new();

        let report = agent
            .run_turn("c1", "hello", &config(20, 40), &delivery)
            .await
            .unwrap();

        // Invalid timezone and finalize count, the unknown name does not
        assert_eq!(report.call_count, 2);
        assert_eq!(report.iterations, 3);
        let ctx = agent.contexts().get("c1").await;
        assert!(ctx
            .reasoning_history
            .iter()
            .any(|r| r.contains("unknown function: launch_rockets")));
        assert!(ctx
            .reasoning_history
            .iter()
            .any(|r| r.contains("invalid timezone: Not/AZone")));
    }

    #[tokio::test]
    async fn test_call_count_tracks_function_iterations() {
        let model = Arc::new(ScriptedModel::texts(&[
            "en",
            "First I should check the time.",
            &call("get_current_time", json!({ "timezone": "Europe/Paris" })),
            "Now I can answer.",
            &call("summarize_context", json!({})),
            &finalize("It is evening in Paris."),
        ]));
        let agent = agent(model);
        let delivery = RecordingDelivery::new();

        let report = agent
            .run_turn("c1", "time in paris", &config(20, 40), &delivery)
            .await
            .unwrap();

        assert_eq!(report.iterations, 5);
        assert_eq!(report.call_count, 3);
    }

    #[tokio::test]
    async fn test_search_results_accumulate_in_context() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(ChatResponse::text("en")),
            Ok(ChatResponse::text(call(
                "call_model_with_search",
                json!({
                    "messages": [{ "role": "user", "content": "ceasefire news" }],
                    "search_parameters": { "mode": "on", "return_citations": true },
                }),
            ))),
            Ok(ChatResponse {
                content: "The ceasefire began on that date due to talks.".to_string(),
                citations: vec![
                    "https://un.org/a".to_string(),
                    "https://hrw.org/b".to_string(),
                    "https://justice.gov/c".to_string(),
                ],
            }),
            Ok(ChatResponse::text(call("summarize_context", json!({})))),
            Ok(ChatResponse::text(finalize("A ceasefire is in place."))),
        ]));
        let agent = agent(model);
        let delivery = RecordingDelivery::new();

        agent
            .run_turn("c1", "ceasefire?", &config(20, 40), &delivery)
            .await
            .unwrap();

        let ctx = agent.contexts().get("c1").await;
        assert_eq!(ctx.search_results.len(), 3);
        // 40 + corroboration + keyword + trusted domain + causal
        assert!(ctx.search_results.iter().all(|r| r.score == 60));
        assert!(ctx
            .conversation_history
            .iter()
            .any(|m| m.content.starts_with("Based on the following reliable sources")));
    }

    #[tokio::test]
    async fn test_unparseable_language_defaults_to_english() {
        let model = Arc::new(ScriptedModel::texts(&[
            "The text appears to be English.",
            &finalize("ok"),
        ]));
        let agent = agent(model.clone());
        let delivery = RecordingDelivery::new();

        agent
            .run_turn("c1", "hi", &config(20, 40), &delivery)
            .await
            .unwrap();

        assert_eq!(agent.contexts().get("c1").await.user_language, "en");
        // No translation calls were made
        assert_eq!(model.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_call_count_accumulates_across_turns() {
        let model = Arc::new(ScriptedModel::texts(&[
            "en",
            &finalize("first"),
            "en",
            &finalize("second"),
        ]));
        let agent = agent(model);
        let delivery = RecordingDelivery::new();

        agent.run_turn("c1", "one", &config(20, 40), &delivery).await.unwrap();
        let report = agent.run_turn("c1", "two", &config(20, 40), &delivery).await.unwrap();
        assert_eq!(report.call_count, 2);
        assert_eq!(agent.contexts().get("c1").await.last_summary, "second");

        // Other conversations keep their own budget
        let model = Arc::new(ScriptedModel::texts(&["en", &finalize("other")]));
        let other = agent_with_store(model, agent.contexts.clone());
        let report = other.run_turn("c2", "three", &config(20, 40), &delivery).await.unwrap();
        assert_eq!(report.call_count, 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_summarizes_without_loop_call() {
        let model = Arc::new(ScriptedModel::texts(&["en", &finalize("first"), "en"]));
        let agent = agent(model.clone());
        let delivery = RecordingDelivery::new();

        agent.run_turn("c1", "one", &config(1, 40), &delivery).await.unwrap();
        let report = agent.run_turn("c1", "two", &config(1, 40), &delivery).await.unwrap();

        assert_eq!(report.iterations, 0);
        assert_eq!(report.call_count, 1);
        let TurnOutcome::ForcedSummary(summary) = &report.outcome else {
            panic!("expected forced summary, got {:?}", report.outcome);
        };
        assert!(summary.starts_with("Insufficient evidence"));
        assert!(delivery
            .notices()
            .last()
            .unwrap()
            .contains("Maximum function calls reached"));
        // Only language detection ran on the second turn
        assert_eq!(model.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_clear_context_restores_budget() {
        let model = Arc::new(ScriptedModel::texts(&[
            "en",
            &finalize("first"),
            "en",
            &finalize("after clear"),
        ]));
        let agent = agent(model);
        let delivery = RecordingDelivery::new();

        agent.run_turn("c1", "one", &config(1, 40), &delivery).await.unwrap();
        assert!(agent.clear_context("c1").await);

        let report = agent.run_turn("c1", "two", &config(1, 40), &delivery).await.unwrap();
        assert_eq!(report.outcome, TurnOutcome::Finalized("after clear".to_string()));
        assert_eq!(report.call_count, 1);
    }

    #[tokio::test]
    async fn test_non_english_forced_summary_is_translated() {
        let model = Arc::new(ScriptedModel::texts(&[
            "fr",
            "What time is it?",
            &call("get_current_time", json!({ "timezone": "Europe/Paris" })),
            "Preuves insuffisantes.",
        ]));
        let agent = agent(model.clone());
        let delivery = RecordingDelivery::new();

        let report = agent
            .run_turn("c1", "Quelle heure est-il ?", &config(1, 40), &delivery)
            .await
            .unwrap();

        assert_eq!(
            report.outcome,
            TurnOutcome::ForcedSummary("Preuves insuffisantes.".to_string())
        );
        assert_eq!(delivery.finals(), vec!["Preuves insuffisantes.".to_string()]);
        // Invocation notice and budget notice are both removed
        assert_eq!(delivery.notices().len(), 2);
        assert_eq!(delivery.deleted(), vec![1, 2]);

        let calls = model.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3].messages[0].content, "Translate the following text to fr.");
        assert!(calls[3].messages[1].content.starts_with("Insufficient evidence"));
        assert_eq!(
            agent.contexts().get("c1").await.last_summary,
            "Preuves insuffisantes."
        );
    }

    #[tokio::test]
    async fn test_summary_kept_when_final_send_fails() {
        let model = Arc::new(ScriptedModel::texts(&["en", &finalize("kept")]));
        let agent = agent(model);
        let delivery = RecordingDelivery::failing_finals();

        let result = agent.run_turn("c1", "hi", &config(20, 40), &delivery).await;
        assert!(result.is_err());
        assert_eq!(agent.contexts().get("c1").await.last_summary, "kept");
    }

    #[tokio::test]
    async fn test_reasoning_report_falls_back_to_summary() {
        let agent = agent(Arc::new(ScriptedModel::new(vec![])));
        assert_eq!(
            agent.reasoning_report("c1").await,
            "No reasoning recorded yet. Last summary:\nNo summary available."
        );

        agent
            .contexts()
            .update("c1", |ctx| ctx.last_summary = "done".into())
            .await;
        assert!(agent.reasoning_report("c1").await.ends_with("\ndone"));

        agent
            .contexts()
            .update("c1", |ctx| ctx.reasoning_history.push("Thinking #1: x".into()))
            .await;
        assert_eq!(agent.reasoning_report("c1").await, "Latest reasoning:\nThinking #1: x");

        assert!(agent.clear_context("c1").await);
        assert!(!agent.clear_context("c1").await);
    }

    #[test]
    fn test_parse_language_code() {
        assert_eq!(parse_language_code("en").as_deref(), Some("en"));
        assert_eq!(parse_language_code(" 'zh-TW'\n").as_deref(), Some("zh-TW"));
        assert_eq!(parse_language_code("`ja`").as_deref(), Some("ja"));
        assert_eq!(parse_language_code("pt_BR").as_deref(), Some("pt-BR"));
        assert_eq!(parse_language_code("FR.").as_deref(), Some("fr"));
        assert_eq!(parse_language_code("The language is en"), None);
        assert_eq!(parse_language_code(""), None);
    }

    #[test]
    fn test_is_english() {
        assert!(is_english("en"));
        assert!(is_english("en-US"));
        assert!(!is_english("zh-TW"));
        assert!(!is_english("eng"));
    }
}
