//! read-only views over the history store, shaped as the api's json envelopes.
//! nothing here mutates state; each call copies what it needs and lets go of
//! the store before the response is serialized.

use crate::domain::Reading;
use crate::stats::{self, Stats};
use crate::store::HistoryStore;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct CurrentReading {
    pub success: bool,
    /// null until the first reading arrives
    pub data: Option<Arc<Reading>>,
    #[serde(rename = "lastUpdate")]
    pub last_update: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub success: bool,
    pub data: Vec<Arc<Reading>>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub success: bool,
    pub data: Stats,
}

#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<HistoryStore>,
}

impl QueryFacade {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }

    pub async fn get_current(&self) -> CurrentReading {
        let current = self.store.snapshot(0).await.current;
        let last_update = current.as_ref().and_then(|r| iso8601(r.captured_at));
        CurrentReading { success: true, data: current, last_update }
    }

    /// newest `limit` readings, oldest first
    pub async fn get_history(&self, limit: usize) -> HistoryPage {
        let history = self.store.snapshot(limit).await.history;
        HistoryPage { success: true, count: history.len(), data: history }
    }

    pub async fn get_stats(&self) -> StatsReport {
        StatsReport { success: true, data: stats::compute_stats(&self.store).await }
    }

    pub async fn data_points(&self) -> usize {
        self.store.len().await
    }

    /// firmware version the device last reported, if any reading has arrived
    pub async fn reported_firmware(&self) -> Option<String> {
        self.store.current().await.map(|r| r.firmware_version.clone())
    }
}

/// epoch seconds -> "2024-05-01T12:00:00.000Z"
pub fn iso8601(epoch_secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(epoch_secs, 0).map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}
