use anyhow::{anyhow, Result};
use async_trait::async_trait;
use poise::ReplyHandle;
use tokio::sync::Mutex;
use tracing::debug;

use crate::state::Context;

/// Discord rejects messages longer than this.
pub const MESSAGE_LIMIT: usize = 2000;
/// Chunk size used when splitting, leaving room for part labels.
pub const CHUNK_LIMIT: usize = MESSAGE_LIMIT - 100;

/// Opaque reference to a previously sent notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeHandle(pub usize);

/// Where a turn sends its progress notices and final answer.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Send an intermediate notice that can later be deleted.
    async fn send_notice(&self, text: &str) -> Result<NoticeHandle>;

    async fn delete_notice(&self, handle: NoticeHandle) -> Result<()>;

    async fn send_final(&self, text: &str) -> Result<()>;
}

/// Split text into ordered parts of at most `max_chars` characters,
/// preferring to break after a newline.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > max_chars {
        let limit = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let split_at = remaining[..limit]
            .rfind('\n')
            .filter(|&i| i > 0)
            .map(|i| i + 1)
            .unwrap_or(limit);
        parts.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
    }

    if !remaining.is_empty() {
        parts.push(remaining.to_string());
    }
    parts
}

/// Split `text` for Discord, labeling parts when there is more than one.
pub fn discord_parts(text: &str) -> Vec<String> {
    if text.chars().count() <= MESSAGE_LIMIT {
        return vec![text.to_string()];
    }
    let parts = split_message(text, CHUNK_LIMIT);
    let total = parts.len();
    parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| format!("({}/{}) {}", i + 1, total, part))
        .collect()
}

/// Delivery through a poise command context. Replies are routed through the
/// interaction webhook, so no Send Messages channel permission is needed.
pub struct DiscordDelivery<'a> {
    ctx: Context<'a>,
    notices: Mutex<Vec<Vec<ReplyHandle<'a>>>>,
}

impl<'a> DiscordDelivery<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self {
            ctx,
            notices: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl<'a> Delivery for DiscordDelivery<'a> {
    async fn send_notice(&self, text: &str) -> Result<NoticeHandle> {
        let mut handles = Vec::new();
        for part in discord_parts(text) {
            handles.push(self.ctx.say(part).await?);
        }

        let mut notices = self.notices.lock().await;
        notices.push(handles);
        Ok(NoticeHandle(notices.len() - 1))
    }

    async fn delete_notice(&self, handle: NoticeHandle) -> Result<()> {
        let handles = {
            let mut notices = self.notices.lock().await;
            let slot = notices
                .get_mut(handle.0)
                .ok_or_else(|| anyhow!("unknown notice handle {}", handle.0))?;
            std::mem::take(slot)
        };

        debug!(notice = handle.0, parts = handles.len(), "Deleting notice");
        for reply in handles {
            reply.delete(self.ctx).await?;
        }
        Ok(())
    }

    async fn send_final(&self, text: &str) -> Result<()> {
        for part in discord_parts(text) {
            self.ctx.say(part).await?;
        }
        Ok(())
    }
}
