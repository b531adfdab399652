//! ==============================================================================
//! ota.rs - firmware update status and trigger
//! ==============================================================================
//!
//! purpose:
//!     backs /api/ota/info and /api/ota/force-update. the candidate firmware and
//!     its changelog come from the [ota] config section; the installed version
//!     is whatever the device last reported in its telemetry.
//!
//! update request lifecycle:
//!
//!     idle ──force-update──▶ requested(target) ──device reports target──▶ completed
//!
//!     progress only moves when the device actually reports the new firmware
//!     version: the ingestion task calls `observe_firmware` for every reading.
//!     there is no timer-driven progress, and reads never change the state.
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OtaConfig {
    /// newest firmware published for the device, if any
    pub candidate_version: Option<String>,
    /// newest first
    pub changelog: Vec<ChangelogEntry>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChangelogEntry {
    pub version: String,
    pub date: String,
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UpdateState {
    Idle,
    Requested { target: String, requested_at: i64 },
    Completed { version: String },
}

/// response body of GET /api/ota/info
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtaInfo {
    pub current_version: String,
    pub firmware: FirmwareOffer,
    pub changelog: Vec<ChangelogEntry>,
    pub update: UpdateState,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirmwareOffer {
    pub available: bool,
    /// candidate version, present even when it is not newer
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OtaRejected {
    #[error("no firmware update is available")]
    NothingAvailable,
}

pub struct OtaService {
    config: OtaConfig,
    fallback_version: String,
    state: RwLock<UpdateState>,
}

impl OtaService {
    /// `fallback_version` is used until the device reports its own
    pub fn new(config: OtaConfig, fallback_version: impl Into<String>) -> Self {
        Self {
            config,
            fallback_version: fallback_version.into(),
            state: RwLock::new(UpdateState::Idle),
        }
    }

    /// status as seen with the device's last reported firmware version
    pub async fn info(&self, reported_version: Option<&str>) -> OtaInfo {
        let current_version = reported_version.unwrap_or(&self.fallback_version).to_string();
        let update = self.state.read().await.clone();

        OtaInfo {
            firmware: FirmwareOffer {
                available: self.update_available(&current_version),
                version: self.config.candidate_version.clone(),
            },
            changelog: self.config.changelog.clone(),
            current_version,
            update,
        }
    }

    /// record an update request for the candidate firmware
    pub async fn trigger(
        &self,
        reported_version: Option<&str>,
        now: i64,
    ) -> Result<String, OtaRejected> {
        let current = reported_version.unwrap_or(&self.fallback_version);
        let target = match &self.config.candidate_version {
            Some(candidate) if self.update_available(current) => candidate.clone(),
            _ => return Err(OtaRejected::NothingAvailable),
        };

        let mut state = self.state.write().await;
        if !matches!(&*state, UpdateState::Requested { target: t, .. } if *t == target) {
            info!(from = %current, to = %target, "firmware update requested");
            *state = UpdateState::Requested { target: target.clone(), requested_at: now };
        }
        Ok(target)
    }

    fn update_available(&self, current: &str) -> bool {
        self.config
            .candidate_version
            .as_deref()
            .is_some_and(|candidate| compare_versions(candidate, current) == Ordering::Greater)
    }

    /// advance requested -> completed once the device runs the target version
    pub async fn observe_firmware(&self, reported_version: &str) {
        let mut state = self.state.write().await;
        if let UpdateState::Requested { target, .. } = &*state {
            if compare_versions(reported_version, target) != Ordering::Less {
                info!(version = %reported_version, "device reports updated firmware");
                *state = UpdateState::Completed { version: reported_version.to_string() };
            }
        }
    }
}

/// dotted version comparison; numeric segments compare as numbers, missing
/// segments count as zero ("1.0" == "1.0.0")
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let segments = |v: &str| -> Vec<String> {
        v.trim()
            .trim_start_matches(['v', 'V'])
            .split(['.', '-'])
            .map(str::to_string)
            .collect()
    };
    let (a, b) = (segments(a), segments(b));

    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).map(String::as_str).unwrap_or("0");
        let y = b.get(i).map(String::as_str).unwrap_or("0");
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
