//! ==============================================================================
//! ingest.rs - the single writer of the history store
//! ==============================================================================
//!
//! purpose:
//!     the bus subscriber (bus.rs) only moves raw payload bytes into a channel.
//!     this task drains that channel, decodes each payload, normalizes it and
//!     records it. being the only holder of the receiving end makes it the only
//!     writer of the store.
//!
//! failure policy:
//!     a payload that is not json, or is json but not an object, is logged and
//!     dropped. nothing here can stop the loop except the channel closing.
//!
//! relationships:
//!     - fed by: bus.rs (InboundMessage over mpsc)
//!     - uses: normalize.rs, store.rs
//!     - notifies: ota.rs (reported firmware version, when wired in)
//!
//! ==============================================================================

use crate::normalize::Normalizer;
use crate::ota::OtaService;
use crate::store::HistoryStore;

use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// one publish as it came off the broker
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is json but not an object")]
    NotAnObject,
}

/// parse a payload into the string-keyed map the normalizer works on
pub fn decode_payload(bytes: &[u8]) -> Result<Map<String, Value>, IngestError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(IngestError::NotAnObject),
    }
}

pub struct Ingestor {
    store: Arc<HistoryStore>,
    normalizer: Normalizer,
    show_sensor_data: bool,
    ota: Option<Arc<OtaService>>,
}

impl Ingestor {
    pub fn new(store: Arc<HistoryStore>, normalizer: Normalizer, show_sensor_data: bool) -> Self {
        Self { store, normalizer, show_sensor_data, ota: None }
    }

    /// report each reading's firmware version to the update tracker
    pub fn with_ota(mut self, ota: Arc<OtaService>) -> Self {
        self.ota = Some(ota);
        self
    }

    /// decode -> normalize -> record; the store is untouched on error
    pub async fn ingest(&self, payload: &[u8]) -> Result<(), IngestError> {
        let fields = decode_payload(payload)?;
        let reading = self.normalizer.normalize(&fields);

        if self.show_sensor_data {
            info!(
                temperature = ?reading.temperature,
                humidity = ?reading.humidity,
                state = %reading.system_state,
                device = %reading.device_id,
                "reading received"
            );
        }

        let firmware = reading.firmware_version.clone();
        self.store.record(reading).await;
        if let Some(ota) = &self.ota {
            ota.observe_firmware(&firmware).await;
        }
        Ok(())
    }

    /// drain the channel until every sender is gone
    pub async fn run(self, mut inbox: mpsc::Receiver<InboundMessage>) {
        info!("ingestion task started");
        while let Some(message) = inbox.recv().await {
            if let Err(e) = self.ingest(&message.payload).await {
                warn!(
                    topic = %message.topic,
                    bytes = message.payload.len(),
                    error = %e,
                    "dropping malformed message"
                );
                continue;
            }
            debug!(topic = %message.topic, "message ingested");
        }
        info!("ingestion channel closed, ingestion task stopping");
    }
}
