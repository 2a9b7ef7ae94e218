//! In-memory fixed window counters.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::{CounterStore, StorageError, WindowState};
use crate::clock::{Clock, SystemClock};

/// One live window of a key.
#[derive(Debug, Clone, Copy)]
struct WindowRecord {
    count: u64,
    window_end: SystemTime,
}

impl WindowRecord {
    fn empty(now: SystemTime, window: Duration) -> Self {
        Self {
            count: 0,
            window_end: now + window,
        }
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        now > self.window_end
    }

    fn hit(&mut self, now: SystemTime, window: Duration) -> WindowState {
        if self.is_expired(now) {
            *self = Self::empty(now, window);
        }

        self.count = self.count.saturating_add(1);

        WindowState {
            total: self.count,
            reset_time: self.window_end,
        }
    }
}

/// In-memory rate limit storage.
///
/// Windows expire lazily: a record is only replaced when its key is hit again.
/// Call [`MemoryStore::spawn_sweeper`] to also drop records of idle keys.
pub struct MemoryStore {
    windows: DashMap<String, WindowRecord>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store with windows of length `window`.
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            clock,
        }
    }

    /// Number of keys with a record, expired or not.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no key has a record.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Remove every expired record, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        self.windows.retain(|_, record| {
            let expired = record.is_expired(now);
            removed += usize::from(expired);
            !expired
        });

        removed
    }

    /// Sweep the store every `interval` until the store is dropped.
    pub fn spawn_sweeper(store: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(store);
        let interval = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(store) = store.upgrade() else {
                    log::debug!("Rate limit store dropped, stopping sweeper");
                    break;
                };

                let removed = store.sweep();

                if removed > 0 {
                    log::debug!("Removed {removed} expired rate limit windows");
                }
            }
        })
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str) -> Result<WindowState, StorageError> {
        let now = self.clock.now();

        // The entry guard holds the shard lock, which serializes hits per key.
        if let Some(mut record) = self.windows.get_mut(key) {
            return Ok(record.hit(now, self.window));
        }

        let mut record = self
            .windows
            .entry(key.to_owned())
            .or_insert_with(|| WindowRecord::empty(now, self.window));

        Ok(record.hit(now, self.window))
    }

    async fn reset(&self, key: &str) -> Result<(), StorageError> {
        self.windows.remove(key);
        Ok(())
    }
}
