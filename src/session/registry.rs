//! Per-session task registry (spec §3 "Task registry", §5 "Cancellation
//! semantics").
//!
//! A small map from a logical slot to the currently-running cancellable
//! task occupying it. Replacing a slot cancels whatever was there first;
//! `cancel_all` tears down every slot, used on barge-in and on
//! channel-close.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Logical registry slots (§3). `Warmer` is carried for parity with
/// that key set even though the warm-keeper itself is process-wide
/// (§4.4) rather than session-owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// The in-flight partial/final STT call.
    Stt,
    /// The in-flight LLM token stream.
    Llm,
    /// The in-flight TTS audio stream.
    Tts,
    /// Reserved for parity with spec §3; unused per-session in practice.
    Warmer,
}

struct Entry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Per-session cancellable task registry. Invariant: at most one entry per
/// [`TaskKey`], so at most 4 entries total.
#[derive(Default)]
pub struct TaskRegistry {
    entries: Mutex<HashMap<TaskKey, Entry>>,
}

impl TaskRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new task under `key`, cancelling and forgetting whatever
    /// task previously occupied that slot. Does not wait for the old task
    /// to finish draining (cancellation is cooperative and prompt, not
    /// synchronous); callers needing a drain barrier use [`Self::cancel`].
    pub async fn insert(&self, key: TaskKey, cancel: CancellationToken, handle: JoinHandle<()>) {
        let previous = {
            let mut entries = self.entries.lock().await;
            entries.insert(key, Entry { cancel, handle })
        };
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Cancel and remove the task at `key`, if any, waiting for it to
    /// reach a terminal state.
    pub async fn cancel(&self, key: TaskKey) {
        let removed = self.entries.lock().await.remove(&key);
        if let Some(entry) = removed {
            entry.cancel.cancel();
            let _ = entry.handle.await;
        }
    }

    /// Cancel every task in the registry and clear it (spec §4.5
    /// `cancel_active_streams`, §6.1 `interrupt`, channel-close cleanup).
    /// Waits for all tasks to reach a terminal state, but no longer than
    /// `timeout` (spec §5 "on channel-close... beyond that, they are
    /// abandoned").
    pub async fn cancel_all(&self, timeout: std::time::Duration) {
        let removed: Vec<Entry> = {
            let mut entries = self.entries.lock().await;
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &removed {
            entry.cancel.cancel();
        }
        let joins = removed.into_iter().map(|entry| entry.handle);
        let _ = tokio::time::timeout(timeout, futures_util::future::join_all(joins)).await;
    }

    /// Number of tasks currently registered (spec §8 invariant: ≤ 4).
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether a task currently occupies `key`.
    pub async fn contains(&self, key: TaskKey) -> bool {
        self.entries.lock().await.contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn inserting_over_existing_key_cancels_the_previous_task() {
        let registry = TaskRegistry::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        let first_cancel = CancellationToken::new();
        let flag = cancelled.clone();
        let token_clone = first_cancel.clone();
        let handle = tokio::spawn(async move {
            token_clone.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });
        registry.insert(TaskKey::Llm, first_cancel, handle).await;

        let second_cancel = CancellationToken::new();
        let second_handle = tokio::spawn(async {});
        registry.insert(TaskKey::Llm, second_cancel, second_handle).await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(cancelled.load(Ordering::SeqCst));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn cancel_all_empties_the_registry() {
        let registry = TaskRegistry::new();
        for key in [TaskKey::Stt, TaskKey::Llm, TaskKey::Tts] {
            let cancel = CancellationToken::new();
            let token_clone = cancel.clone();
            let handle = tokio::spawn(async move {
                token_clone.cancelled().await;
            });
            registry.insert(key, cancel, handle).await;
        }
        assert_eq!(registry.len().await, 3);
        registry
            .cancel_all(std::time::Duration::from_secs(2))
            .await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn registry_never_exceeds_four_keys() {
        let registry = TaskRegistry::new();
        for key in [TaskKey::Stt, TaskKey::Llm, TaskKey::Tts, TaskKey::Warmer] {
            registry
                .insert(key, CancellationToken::new(), tokio::spawn(async {}))
                .await;
        }
        assert_eq!(registry.len().await, 4);
    }
}
