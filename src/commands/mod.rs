mod ask;
mod config;
mod reasoning;

use crate::state::{AppState, Context};

/// Every slash command the bot registers.
pub fn all() -> Vec<poise::Command<AppState, anyhow::Error>> {
    vec![
        ask::ask(),
        ask::search(),
        ask::time(),
        reasoning::view_reasoning(),
        reasoning::clear_context(),
        config::config(),
    ]
}

/// Conversations are keyed by the channel the command was issued in.
fn conversation_key(ctx: &Context<'_>) -> String {
    ctx.channel_id().to_string()
}
