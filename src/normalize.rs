//! ==============================================================================
//! normalize.rs - loose bus payload -> canonical Reading
//! ==============================================================================
//!
//! purpose:
//!     firmware builds disagree on field names (spanish vs english keys) and
//!     leave fields out when a sensor faults. this module folds all of that into
//!     one `Reading`. it never fails: a field that is missing or of the wrong
//!     type degrades to its default instead of rejecting the message.
//!
//! precedence (canonical key wins, localized key is the fallback):
//!
//!     field            canonical       localized       default
//!     ---------------  --------------  --------------  --------------------
//!     temperature      temperature     temperatura     none
//!     humidity         humidity        humedad         none
//!     amber led        led_amarillo    -               off
//!     green led        led_verde       -               off
//!     red led          led_rojo        -               off
//!     system state     state           estado          "IDLE"
//!     captured at      timestamp       -               ingestion wall clock
//!                                                      (also for values < 1 or
//!                                                      beyond chrono's range)
//!     firmware         version         -               device.firmware_version
//!     device id        uuid            -               device.device_id
//!
//!     a key holding json `null` counts as absent.
//!
//! relationships:
//!     - used by: ingest.rs (once per inbound message)
//!     - configured by: config.rs ([device] section)
//!
//! ==============================================================================

use crate::domain::{IndicatorStates, Reading};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_DEVICE_ID: &str = "2020171026";
pub const DEFAULT_FIRMWARE_VERSION: &str = "1.0";
pub const DEFAULT_SYSTEM_STATE: &str = "IDLE";

/// identifiers stamped on readings whose payload does not carry them
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceDefaults {
    pub device_id: String,
    pub firmware_version: String,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            firmware_version: DEFAULT_FIRMWARE_VERSION.to_string(),
        }
    }
}

// ==============================================================================
// field table
// ==============================================================================

#[derive(Debug, Clone, Copy)]
struct Spelling {
    canonical: &'static str,
    localized: Option<&'static str>,
}

impl Spelling {
    const fn pair(canonical: &'static str, localized: &'static str) -> Self {
        Self { canonical, localized: Some(localized) }
    }

    const fn only(canonical: &'static str) -> Self {
        Self { canonical, localized: None }
    }

    fn lookup<'a>(&self, payload: &'a Map<String, Value>) -> Option<&'a Value> {
        let present = |key: &str| payload.get(key).filter(|v| !v.is_null());
        present(self.canonical).or_else(|| self.localized.and_then(present))
    }
}

const TEMPERATURE: Spelling = Spelling::pair("temperature", "temperatura");
const HUMIDITY: Spelling = Spelling::pair("humidity", "humedad");
const LED_AMBER: Spelling = Spelling::only("led_amarillo");
const LED_GREEN: Spelling = Spelling::only("led_verde");
const LED_RED: Spelling = Spelling::only("led_rojo");
const STATE: Spelling = Spelling::pair("state", "estado");
const TIMESTAMP: Spelling = Spelling::only("timestamp");
const FIRMWARE: Spelling = Spelling::only("version");
const DEVICE: Spelling = Spelling::only("uuid");

// ==============================================================================
// normalizer
// ==============================================================================

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    defaults: DeviceDefaults,
}

impl Normalizer {
    pub fn new(defaults: DeviceDefaults) -> Self {
        Self { defaults }
    }

    /// normalize using the current wall clock for missing timestamps
    pub fn normalize(&self, payload: &Map<String, Value>) -> Reading {
        self.normalize_at(payload, Utc::now().timestamp())
    }

    /// normalize with an explicit ingestion time (epoch seconds)
    pub fn normalize_at(&self, payload: &Map<String, Value>, now: i64) -> Reading {
        let number = |field: Spelling| field.lookup(payload).and_then(as_number);
        let switch = |field: Spelling| field.lookup(payload).map(as_switch).unwrap_or(false);
        let label = |field: Spelling| field.lookup(payload).and_then(as_label);

        let captured_at = number(TIMESTAMP)
            .filter(|secs| *secs >= 1.0)
            .map(|secs| secs.trunc() as i64)
            .filter(|secs| DateTime::<Utc>::from_timestamp(*secs, 0).is_some())
            .unwrap_or(now);

        Reading {
            temperature: number(TEMPERATURE),
            humidity: number(HUMIDITY),
            indicators: IndicatorStates {
                amber: switch(LED_AMBER),
                green: switch(LED_GREEN),
                red: switch(LED_RED),
            },
            system_state: label(STATE).unwrap_or_else(|| DEFAULT_SYSTEM_STATE.to_string()),
            captured_at,
            device_id: label(DEVICE).unwrap_or_else(|| self.defaults.device_id.clone()),
            firmware_version: label(FIRMWARE)
                .unwrap_or_else(|| self.defaults.firmware_version.clone()),
        }
    }
}

/// finite numbers, or strings that parse as one
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

/// firmware sends 0/1; be lenient about bools and "on"/"true" strings
fn as_switch(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => {
            let s = s.trim();
            s == "1" || s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("on")
        }
        _ => false,
    }
}

fn as_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn normalize(payload: Value) -> Reading {
        let map = payload.as_object().cloned().unwrap();
        Normalizer::default().normalize_at(&map, NOW)
    }

    #[test]
    fn localized_payload_with_defaults() {
        let reading = normalize(json!({"temperatura": 23.5, "led_verde": 1}));

        assert_eq!(reading.temperature, Some(23.5));
        assert_eq!(reading.humidity, None);
        assert!(reading.indicators.green);
        assert!(!reading.indicators.amber);
        assert!(!reading.indicators.red);
        assert_eq!(reading.system_state, "IDLE");
        assert_eq!(reading.device_id, DEFAULT_DEVICE_ID);
        assert_eq!(reading.firmware_version, DEFAULT_FIRMWARE_VERSION);
        assert_eq!(reading.captured_at, NOW);
    }

    #[test]
    fn canonical_key_wins_over_localized() {
        let reading = normalize(json!({
            "temperature": 21.0,
            "temperatura": 99.0,
            "humedad": 40.0,
            "state": "COOLING",
            "estado": "HEATING"
        }));

        assert_eq!(reading.temperature, Some(21.0));
        assert_eq!(reading.humidity, Some(40.0));
        assert_eq!(reading.system_state, "COOLING");
    }

    #[test]
    fn null_canonical_falls_back_to_localized() {
        let reading = normalize(json!({"temperature": null, "temperatura": 18.25}));
        assert_eq!(reading.temperature, Some(18.25));
    }

    #[test]
    fn non_numeric_values_become_absent() {
        let reading = normalize(json!({"temperature": "warm", "humidity": [1, 2]}));
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.humidity, None);

        let reading = normalize(json!({"temperature": " 19.5 "}));
        assert_eq!(reading.temperature, Some(19.5));
    }

    #[test]
    fn timestamp_rules() {
        assert_eq!(normalize(json!({"timestamp": 1_650_000_000})).captured_at, 1_650_000_000);
        assert_eq!(normalize(json!({"timestamp": 1_650_000_000.9})).captured_at, 1_650_000_000);
        assert_eq!(normalize(json!({"timestamp": 0})).captured_at, NOW);
        assert_eq!(normalize(json!({"timestamp": -5})).captured_at, NOW);
        assert_eq!(normalize(json!({"timestamp": "soon"})).captured_at, NOW);
    }

    #[test]
    fn unrepresentable_timestamp_uses_wall_clock() {
        assert_eq!(normalize(json!({"temperature": 21.0, "timestamp": 1.0e13})).captured_at, NOW);
        assert_eq!(normalize(json!({"timestamp": 1.0e300})).captured_at, NOW);
        assert!(crate::query::iso8601(normalize(json!({"timestamp": 1.0e13})).captured_at).is_some());
    }

    #[test]
    fn english_led_names_are_not_read() {
        let reading = normalize(json!({"led_green": 1, "led_red": true}));
        assert_eq!(reading.indicators, IndicatorStates::default());
    }

    #[test]
    fn switch_coercion() {
        let reading = normalize(json!({
            "led_amarillo": true,
            "led_verde": "on",
            "led_rojo": 0
        }));
        assert_eq!(
            reading.indicators,
            IndicatorStates { amber: true, green: true, red: false }
        );
    }

    #[test]
    fn unknown_state_passes_through() {
        let reading = normalize(json!({"estado": "DEFROSTING"}));
        assert_eq!(reading.system_state, "DEFROSTING");
    }

    #[test]
    fn device_identifiers_from_payload_or_configured_defaults() {
        let reading = normalize(json!({"uuid": 42, "version": "2.1.0"}));
        assert_eq!(reading.device_id, "42");
        assert_eq!(reading.firmware_version, "2.1.0");

        let normalizer = Normalizer::new(DeviceDefaults {
            device_id: "greenhouse-7".to_string(),
            firmware_version: "0.9".to_string(),
        });
        let reading = normalizer.normalize_at(&Map::new(), NOW);
        assert_eq!(reading.device_id, "greenhouse-7");
        assert_eq!(reading.firmware_version, "0.9");
    }

    #[test]
    fn empty_payload_is_still_a_reading() {
        let reading = normalize(json!({}));
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.indicators, IndicatorStates::default());
        assert_eq!(reading.system_state, DEFAULT_SYSTEM_STATE);
    }
}
