//! ==============================================================================
//! store.rs - bounded history of readings
//! ==============================================================================
//!
//! purpose:
//!     holds the latest reading and a fixed-capacity fifo ring of the most
//!     recent ones. this is the only shared mutable state in the hub.
//!
//! concurrency:
//!     - one writer: the ingestion task (ingest.rs) calls `record`
//!     - many readers: http handlers call `snapshot` / `history`
//!
//!     both sides go through one tokio RwLock. `record` updates `current` and
//!     the ring under a single write guard, so readers never see a half-applied
//!     append or eviction. readers only clone `Arc`s under the read guard and
//!     release it before any json serialization happens.
//!
//! ordering:
//!     entries are kept in ingestion order. timestamps are not assumed to be
//!     monotonic (the broker may redeliver or reorder).
//!
//! ==============================================================================

use crate::domain::Reading;

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// ring size used when the config does not override it
pub const DEFAULT_CAPACITY: usize = 100;

pub struct HistoryStore {
    capacity: usize,
    inner: RwLock<Ring>,
}

struct Ring {
    current: Option<Arc<Reading>>,
    history: VecDeque<Arc<Reading>>,
}

/// point-in-time copy handed to readers
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub current: Option<Arc<Reading>>,
    /// oldest first
    pub history: Vec<Arc<Reading>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(Ring {
                current: None,
                history: VecDeque::with_capacity(capacity + 1),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// make `reading` current and append it, evicting the oldest entry when full
    pub async fn record(&self, reading: Reading) {
        let reading = Arc::new(reading);
        let mut ring = self.inner.write().await;
        ring.current = Some(Arc::clone(&reading));
        ring.history.push_back(reading);
        while ring.history.len() > self.capacity {
            ring.history.pop_front();
        }
    }

    /// the newest `min(limit, len)` entries (oldest first) plus the current reading
    pub async fn snapshot(&self, limit: usize) -> Snapshot {
        let ring = self.inner.read().await;
        let skip = ring.history.len().saturating_sub(limit);
        Snapshot {
            current: ring.current.clone(),
            history: ring.history.iter().skip(skip).cloned().collect(),
        }
    }

    pub async fn current(&self) -> Option<Arc<Reading>> {
        self.inner.read().await.current.clone()
    }

    /// whole ring, oldest first
    pub async fn history(&self) -> Vec<Arc<Reading>> {
        self.inner.read().await.history.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.history.len()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
