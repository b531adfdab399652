//! ==============================================================================
//! stats.rs - rolling statistics over the history ring
//! ==============================================================================
//!
//! readings with an absent value are skipped for that value (never counted as
//! zero) but still count towards `total_readings`. averages are rounded to one
//! decimal place, halves away from zero.
//!
//! ==============================================================================

use crate::domain::Reading;
use crate::store::HistoryStore;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub avg_temp: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub total_readings: usize,
}

/// stats over the store's current history; the lock is released before summing
pub async fn compute_stats(store: &HistoryStore) -> Stats {
    let history = store.history().await;
    summarize(history.iter().map(|reading| reading.as_ref()))
}

pub fn summarize<'a, I>(readings: I) -> Stats
where
    I: IntoIterator<Item = &'a Reading>,
{
    let mut temperature = Accumulator::default();
    let mut humidity = Accumulator::default();
    let mut total_readings = 0;

    for reading in readings {
        total_readings += 1;
        if let Some(t) = reading.temperature {
            temperature.push(t);
        }
        if let Some(h) = reading.humidity {
            humidity.push(h);
        }
    }

    Stats {
        min_temp: temperature.min,
        max_temp: temperature.max,
        avg_temp: temperature.mean().map(round_one_decimal),
        avg_humidity: humidity.mean().map(round_one_decimal),
        total_readings,
    }
}

/// `f64::round` rounds half away from zero
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}
