//! ==============================================================================
//! domain.rs - canonical telemetry record
//! ==============================================================================
//!
//! purpose:
//!     defines the `Reading` every other module speaks. readings are built once
//!     by normalize.rs and never mutated afterwards; the store shares them
//!     behind `Arc` so snapshots are cheap and read-only.
//!
//! wire shape:
//!     the json form keeps the field names the dashboard and device firmware
//!     already use (`led_amarillo`, `state`, `timestamp`, `uuid`, `version`),
//!     with indicator leds rendered as 0/1.
//!
//! ==============================================================================

use serde::{Serialize, Serializer};

/// one normalized telemetry sample
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    /// degrees celsius, absent if the sensor faulted
    pub temperature: Option<f64>,
    /// relative humidity (0-100%), absent if the sensor faulted
    pub humidity: Option<f64>,
    #[serde(flatten)]
    pub indicators: IndicatorStates,
    /// free-form controller state ("IDLE", "COOLING", ...), passed through as-is
    #[serde(rename = "state")]
    pub system_state: String,
    /// epoch seconds, producer supplied or stamped at ingestion
    #[serde(rename = "timestamp")]
    pub captured_at: i64,
    #[serde(rename = "uuid")]
    pub device_id: String,
    #[serde(rename = "version")]
    pub firmware_version: String,
}

/// the three status leds on the device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IndicatorStates {
    #[serde(rename = "led_amarillo", serialize_with = "as_switch")]
    pub amber: bool,
    #[serde(rename = "led_verde", serialize_with = "as_switch")]
    pub green: bool,
    #[serde(rename = "led_rojo", serialize_with = "as_switch")]
    pub red: bool,
}

fn as_switch<S: Serializer>(on: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*on))
}

#[cfg(test)]
impl Reading {
    /// minimal reading for store/stats tests
    pub fn sample(temperature: Option<f64>, humidity: Option<f64>, captured_at: i64) -> Self {
        Self {
            temperature,
            humidity,
            indicators: IndicatorStates::default(),
            system_state: "IDLE".to_string(),
            captured_at,
            device_id: "test-device".to_string(),
            firmware_version: "1.0".to_string(),
        }
    }
}
