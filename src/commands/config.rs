use tracing::info;

use crate::state::Context;

/// Configure loop limits (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn config(
    ctx: Context<'_>,
    #[description = "max_function_calls | max_iterations"] param: Option<String>,
    #[description = "New value"] value: Option<u32>,
) -> Result<(), anyhow::Error> {
    let user_id = ctx.author().id.get();
    if !ctx.data().is_admin(user_id) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    match (param.as_deref(), value) {
        (None, _) => {
            let config = ctx.data().agent_config.read().await;
            ctx.say(format!(
                "**Agent Configuration:**\n\
                 `max_function_calls`: {}\n\
                 `max_iterations`: {}",
                config.max_function_calls, config.max_iterations
            ))
            .await?;
        }
        (Some(key), Some(val)) => {
            let mut config = ctx.data().agent_config.write().await;
            match key {
                "max_function_calls" => config.max_function_calls = val,
                "max_iterations" => config.max_iterations = val,
                _ => {
                    ctx.say(format!(
                        "Unknown param `{}`. Valid: `max_function_calls`, `max_iterations`",
                        key
                    ))
                    .await?;
                    return Ok(());
                }
            }
            drop(config);
            info!(user_id, param = key, value = val, "Agent config updated");
            ctx.say(format!("`{}` set to {}", key, val)).await?;
        }
        (Some(_), None) => {
            ctx.say("Provide both `param` and `value`. Example: `/config max_iterations 20`")
                .await?;
        }
    }

    Ok(())
}
