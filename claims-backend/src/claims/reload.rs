//! Trailing-edge debounce for reload requests
//!
//! Bursts of external change notifications collapse into a single reload
//! that fires once the window has passed with no new notification.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Configuration for reload coalescing
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    /// Quiet period after the last trigger before the action fires (default: 500ms)
    pub debounce_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

pub struct ReloadDebouncer {
    config: DebounceConfig,
    /// Timer for the currently scheduled action, if any
    pending: Mutex<Option<JoinHandle<()>>>,
    fired: Arc<AtomicU64>,
}

impl ReloadDebouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(None),
            fired: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule `action` after the debounce window, replacing any action
    /// still waiting. Only the timer is ever cancelled: once the window
    /// elapses the action runs on its own task to completion.
    pub fn schedule(&self, action: BoxFuture<'static, ()>) {
        let window = Duration::from_millis(self.config.debounce_ms);
        let fired = self.fired.clone();

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            fired.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(action);
        }));
    }

    /// Drop the scheduled action if its window has not elapsed yet
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Whether an action is waiting for its window to elapse
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Number of actions that have fired so far
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }
}

impl Drop for ReloadDebouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}
