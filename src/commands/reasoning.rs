use tracing::info;

use super::conversation_key;
use crate::delivery::discord_parts;
use crate::state::Context;

/// View latest reasoning or summary
#[poise::command(slash_command, guild_only)]
pub async fn view_reasoning(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    ctx.defer().await?;
    let key = conversation_key(&ctx);
    let report = ctx.data().agent.reasoning_report(&key).await;

    for part in discord_parts(&report) {
        ctx.say(part).await?;
    }
    Ok(())
}

/// Clear channel context
#[poise::command(slash_command, guild_only)]
pub async fn clear_context(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    ctx.defer().await?;
    let key = conversation_key(&ctx);
    let existed = ctx.data().agent.clear_context(&key).await;
    info!(user = ctx.author().name, key, existed, "Context cleared");

    ctx.say("Channel context cleared.").await?;
    Ok(())
}
