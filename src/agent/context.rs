use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::credibility::SearchResult;
use crate::llm::Message;

/// Rendering windows over the context histories.
pub const CONVERSATION_WINDOW: usize = 50;
pub const REASONING_WINDOW: usize = 10;
pub const SEARCH_WINDOW: usize = 20;

/// Per-conversation state accumulated across turns.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub conversation_history: Vec<Message>,
    pub reasoning_history: Vec<String>,
    pub search_results: Vec<SearchResult>,
    pub call_count: u32,
    pub user_language: String,
    pub last_summary: String,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self {
            conversation_history: Vec::new(),
            reasoning_history: Vec::new(),
            search_results: Vec::new(),
            call_count: 0,
            user_language: "en".to_string(),
            last_summary: String::new(),
        }
    }
}

impl ConversationContext {
    pub fn recent_conversation(&self) -> &[Message] {
        tail(&self.conversation_history, CONVERSATION_WINDOW)
    }

    pub fn recent_reasoning(&self) -> &[String] {
        tail(&self.reasoning_history, REASONING_WINDOW)
    }

    pub fn recent_search_results(&self) -> &[SearchResult] {
        tail(&self.search_results, SEARCH_WINDOW)
    }
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

/// Keyed store of conversation contexts.
///
/// Every `get`/`update`/`clear` holds the map lock for its whole duration,
/// so individual operations are atomic. Whole turns on one key are
/// serialized separately through [`ContextStore::lock_turn`].
#[derive(Default)]
pub struct ContextStore {
    contexts: Mutex<HashMap<String, ConversationContext>>,
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a conversation's context, created on first access.
    pub async fn get(&self, key: &str) -> ConversationContext {
        let mut contexts = self.contexts.lock().await;
        contexts.entry(key.to_string()).or_default().clone()
    }

    /// Apply `f` to a conversation's context atomically.
    pub async fn update<R>(&self, key: &str, f: impl FnOnce(&mut ConversationContext) -> R) -> R {
        let mut contexts = self.contexts.lock().await;
        f(contexts.entry(key.to_string()).or_default())
    }

    /// Delete a conversation's context. Returns whether one existed.
    ///
    /// Waits for an in-flight turn on `key` to finish first, then drops the
    /// key's turn lock unless another turn is already queued on it.
    pub async fn clear(&self, key: &str) -> bool {
        let lock = self.turn_lock(key).await;
        let removed = {
            let _turn = lock.lock().await;
            self.contexts.lock().await.remove(key).is_some()
        };
        drop(lock);

        let mut locks = self.turn_locks.lock().await;
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
        debug!(key, removed, "context cleared");
        removed
    }

    #[cfg(test)]
    pub async fn contains(&self, key: &str) -> bool {
        self.contexts.lock().await.contains_key(key)
    }

    /// Wait for exclusive turn ownership of `key`. Held for the whole turn so
    /// overlapping commands on one conversation run one after the other.
    pub async fn lock_turn(&self, key: &str) -> OwnedMutexGuard<()> {
        self.turn_lock(key).await.lock_owned().await
    }

    async fn turn_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        locks.entry(key.to_string()).or_default().clone()
    }
}
