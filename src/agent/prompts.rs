use super::context::ConversationContext;

pub const LANGUAGE_DETECTION_PROMPT: &str = "Detect the language of the following text and return only the language code (e.g., 'en', 'zh-TW').";

/// Standing instructions for every loop iteration.
pub const SYSTEM_PROMPT: &str = r#"You are a careful research assistant answering questions in a Discord channel. You work in steps. On every step reply with EXACTLY ONE of:

1. A function call, as a single JSON object and nothing else:
   {"function": "<name>", "parameters": {...}}
2. Free-form reasoning text, when you need to think before acting.

Available functions:
- get_current_time {"timezone": "Asia/Taipei"}
    Current wall-clock time in an IANA timezone.
- call_model_with_search {"messages": [{"role": "user", "content": "..."}], "search_parameters": {"mode": "on", "sources": [{"type": "web"}, {"type": "news"}, {"type": "x"}], "from_date": "YYYY-MM-DD", "to_date": "YYYY-MM-DD", "max_search_results": 20, "return_citations": true}}
    Ask the model with live search. Set return_citations to true to collect scored sources.
- translate_text {"text": "...", "target_language": "en"}
- summarize_context {}
    Check whether the sources collected so far are sufficient and list them.
- finalize_response {"content": "...", "citations": ["https://..."]}
    Deliver the final answer (max 1000 characters). This ends the turn.

Rules:
- Answer factual or current-events questions only from searched sources. An answer needs at least 3 sources with a credibility score of 60 or more; otherwise search again or say the evidence is insufficient.
- Write the final answer in English; it is translated for the user afterwards.
- Cite every source URL you rely on in finalize_response.
- Do not repeat a function call with identical parameters.
- You have a limited number of function calls. Finalize before running out."#;

/// Everything the per-iteration prompt is rendered from.
pub struct PromptInputs<'a> {
    pub user_input: &'a str,
    pub translated_input: &'a str,
    pub current_date: &'a str,
    pub max_function_calls: u32,
    pub context: &'a ConversationContext,
}

/// Render the system prompt for one iteration from the current context.
pub fn render_system_prompt(inputs: &PromptInputs<'_>) -> String {
    let ctx = inputs.context;
    let mut prompt = String::from(SYSTEM_PROMPT);

    prompt.push_str(&format!(
        "\n\n## Request\nCurrent date: {}\nUser language: {}\nOriginal input: {}\nEnglish input: {}\nFunction calls used: {}/{}",
        inputs.current_date,
        ctx.user_language,
        inputs.user_input,
        inputs.translated_input,
        ctx.call_count,
        inputs.max_function_calls,
    ));

    if !ctx.last_summary.is_empty() {
        prompt.push_str(&format!("\n\n## Previous answer\n{}", ctx.last_summary));
    }

    let search_results = ctx.recent_search_results();
    if !search_results.is_empty() {
        prompt.push_str("\n\n## Search results\n");
        for r in search_results {
            prompt.push_str(&format!(
                "- [score {}] {} ({})\n  {}\n",
                r.score, r.url, r.source, r.content
            ));
        }
    }

    let reasoning = ctx.recent_reasoning();
    if !reasoning.is_empty() {
        prompt.push_str("\n\n## Reasoning so far\n");
        prompt.push_str(&reasoning.join("\n"));
    }

    let conversation = ctx.recent_conversation();
    if !conversation.is_empty() {
        prompt.push_str("\n\n## Conversation history\n");
        for m in conversation {
            prompt.push_str(&format!("[{}] {}\n", m.role.as_str(), m.content));
        }
    }

    prompt
}
