//! JavaScript-facing views of engine values.
//!
//! Nonces and token amounts are carried as decimal strings: both exceed
//! `Number.MAX_SAFE_INTEGER` in practice.

use bro_core::event::format_hash_rate;
use bro_core::reward::{format_token_amount, TOKEN_DECIMALS};
use bro_core::{
    MiningEvent, MiningMode, MiningResult, MiningStats, MiningStatus, Phase, RewardInfo,
    StepOutcome,
};
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {:?}", e)))
}

/// One mining event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventInfo {
    Status {
        status: MiningStatus,
        mode: MiningMode,
        message: String,
    },
    BestHash {
        hash: String,
        nonce: String,
        leading_zeros: u32,
        reward: String,
        reward_display: String,
    },
    Progress {
        current_nonce: String,
        current_hash: String,
        current_leading_zeros: u32,
        best_hash: String,
        best_nonce: String,
        best_leading_zeros: u32,
        hash_rate: f64,
        hash_rate_display: String,
        elapsed_ms: f64,
        mode: MiningMode,
    },
}

impl From<MiningEvent> for EventInfo {
    fn from(event: MiningEvent) -> Self {
        match event {
            MiningEvent::Status {
                status,
                mode,
                message,
            } => EventInfo::Status {
                status,
                mode,
                message,
            },
            MiningEvent::BestHash {
                hash,
                nonce,
                leading_zeros,
                reward,
            } => EventInfo::BestHash {
                hash,
                nonce: nonce.to_string(),
                leading_zeros,
                reward: reward.to_string(),
                reward_display: format_token_amount(reward, TOKEN_DECIMALS),
            },
            MiningEvent::Progress(report) => EventInfo::Progress {
                current_nonce: report.current_nonce.to_string(),
                current_hash: report.current_hash,
                current_leading_zeros: report.current_leading_zeros,
                best_hash: report.best_hash,
                best_nonce: report.best_nonce.to_string(),
                best_leading_zeros: report.best_leading_zeros,
                hash_rate: report.hash_rate,
                hash_rate_display: format_hash_rate(report.hash_rate),
                elapsed_ms: report.elapsed_ms as f64,
                mode: report.mode,
            },
        }
    }
}

/// Convert a batch of events into a JS array.
pub fn events_to_js(events: Vec<MiningEvent>) -> Result<JsValue, JsValue> {
    let infos: Vec<EventInfo> = events.into_iter().map(EventInfo::from).collect();
    to_js(&infos)
}

/// What one `step()` did, with the events it produced.
///
/// `retry_at_ms` is set while a GPU retry is pending; calling `step()` again
/// before then does no work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInfo {
    /// One of "idle", "progressed", "backing_off", "stopped", "completed".
    pub outcome: String,
    pub hashes: String,
    pub retry_at_ms: Option<f64>,
    pub events: Vec<EventInfo>,
}

impl StepInfo {
    pub fn new(outcome: &StepOutcome, events: Vec<MiningEvent>) -> Self {
        let (name, hashes, retry_at_ms) = match outcome {
            StepOutcome::Idle => ("idle", 0, None),
            StepOutcome::Progressed { hashes } => ("progressed", *hashes, None),
            StepOutcome::BackingOff { until_ms } => ("backing_off", 0, Some(*until_ms as f64)),
            StepOutcome::Stopped(_) => ("stopped", 0, None),
            StepOutcome::Completed(_) => ("completed", 0, None),
        };
        StepInfo {
            outcome: name.to_string(),
            hashes: hashes.to_string(),
            retry_at_ms,
            events: events.into_iter().map(EventInfo::from).collect(),
        }
    }

    /// Convert to JS value.
    pub fn to_js(&self) -> Result<JsValue, JsValue> {
        to_js(self)
    }
}

/// Best result of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultInfo {
    pub nonce: String,
    pub hash: String,
    pub leading_zeros: u32,
    pub challenge: String,
    pub reward_amount: String,
    pub reward_display: String,
    pub timestamp_ms: f64,
}

impl From<&MiningResult> for ResultInfo {
    fn from(result: &MiningResult) -> Self {
        ResultInfo {
            nonce: result.nonce.to_string(),
            hash: result.hash.clone(),
            leading_zeros: result.leading_zeros,
            challenge: result.challenge.to_string(),
            reward_amount: result.reward_amount.to_string(),
            reward_display: format_token_amount(result.reward_amount, TOKEN_DECIMALS),
            timestamp_ms: result.timestamp_ms as f64,
        }
    }
}

impl ResultInfo {
    /// Convert to JS value.
    pub fn to_js(&self) -> Result<JsValue, JsValue> {
        to_js(self)
    }
}

/// Session statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsInfo {
    pub phase: Phase,
    pub mode: MiningMode,
    pub current_nonce: String,
    pub best_leading_zeros: u32,
    pub hashes: String,
    pub elapsed_ms: f64,
    pub hash_rate: f64,
    pub hash_rate_display: String,
}

impl From<&MiningStats> for StatsInfo {
    fn from(stats: &MiningStats) -> Self {
        StatsInfo {
            phase: stats.phase,
            mode: stats.mode,
            current_nonce: stats.current_nonce.to_string(),
            best_leading_zeros: stats.best_leading_zeros,
            hashes: stats.hashes.to_string(),
            elapsed_ms: stats.elapsed_ms as f64,
            hash_rate: stats.hash_rate,
            hash_rate_display: format_hash_rate(stats.hash_rate),
        }
    }
}

impl StatsInfo {
    /// Convert to JS value.
    pub fn to_js(&self) -> Result<JsValue, JsValue> {
        to_js(self)
    }
}

/// Reward breakdown for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardInfoJs {
    pub leading_zeros: u32,
    pub raw_amount: String,
    pub formatted_amount: String,
    pub nonce: String,
    pub hash: String,
    pub block_time: f64,
    pub halvings: u32,
    pub formula: String,
}

impl From<RewardInfo> for RewardInfoJs {
    fn from(info: RewardInfo) -> Self {
        RewardInfoJs {
            leading_zeros: info.leading_zeros,
            raw_amount: info.raw_amount.to_string(),
            formatted_amount: info.formatted_amount,
            nonce: info.nonce.to_string(),
            hash: info.hash,
            block_time: info.block_time as f64,
            halvings: u32::try_from(info.halvings).unwrap_or(u32::MAX),
            formula: info.formula,
        }
    }
}

impl RewardInfoJs {
    /// Convert to JS value.
    pub fn to_js(&self) -> Result<JsValue, JsValue> {
        to_js(self)
    }
}

/// Serialize any engine value that is safe to pass as plain numbers.
pub fn value_to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_js(value)
}
