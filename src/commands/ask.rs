use tracing::{info, warn};

use super::conversation_key;
use crate::agent::TurnOutcome;
use crate::delivery::DiscordDelivery;
use crate::state::Context;

/// Ask a question
#[poise::command(slash_command, guild_only)]
pub async fn ask(
    ctx: Context<'_>,
    #[description = "Your question"] question: String,
) -> Result<(), anyhow::Error> {
    run_turn(ctx, question).await
}

/// Perform a search query
#[poise::command(slash_command, guild_only)]
pub async fn search(
    ctx: Context<'_>,
    #[description = "Search query"] query: String,
    #[description = "Optional source (web, x, news)"] source: Option<String>,
) -> Result<(), anyhow::Error> {
    run_turn(ctx, search_input(&query, source.as_deref())).await
}

/// Get current time
#[poise::command(slash_command, guild_only)]
pub async fn time(
    ctx: Context<'_>,
    #[description = "Timezone (e.g., Asia/Taipei)"] timezone: Option<String>,
) -> Result<(), anyhow::Error> {
    run_turn(ctx, time_input(timezone.as_deref())).await
}

fn search_input(query: &str, source: Option<&str>) -> String {
    match source.map(str::trim).filter(|s| !s.is_empty()) {
        Some(source) => format!("Search {} sources for: {}", source, query),
        None => query.to_string(),
    }
}

fn time_input(timezone: Option<&str>) -> String {
    format!("Get current time in {}", timezone.unwrap_or("UTC"))
}

async fn run_turn(ctx: Context<'_>, input: String) -> Result<(), anyhow::Error> {
    ctx.defer().await?;

    let key = conversation_key(&ctx);
    let config = *ctx.data().agent_config.read().await;
    info!(
        user = ctx.author().name,
        command = ctx.command().name,
        key,
        "Turn requested"
    );

    let delivery = DiscordDelivery::new(ctx);
    let report = ctx
        .data()
        .agent
        .run_turn(&key, &input, &config, &delivery)
        .await?;

    match &report.outcome {
        TurnOutcome::Aborted(reason) => warn!(key, reason = %reason, "Turn aborted"),
        _ => info!(
            key,
            iterations = report.iterations,
            call_count = report.call_count,
            "Answer delivered"
        ),
    }
    Ok(())
}
