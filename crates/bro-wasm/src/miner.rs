//! Mining controller for the WASM miner.

use bro_core::{
    hash, Clock, FundingPlanner, MinerConfig, MiningMode, MiningOrchestrator, PlannerConfig,
    RewardSchedule, Utxo, VsizeFeeEstimator,
};
use wasm_bindgen::prelude::*;

use crate::state::{events_to_js, value_to_js, ResultInfo, RewardInfoJs, StatsInfo, StepInfo};
use crate::storage::LocalStorageCheckpointStore;

fn js_error<E: core::fmt::Display>(e: E) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Host clock backed by `Date.now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsClock;

impl Clock for JsClock {
    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }
}

fn parse_nonce(nonce: &str) -> Result<u64, JsValue> {
    nonce
        .trim()
        .parse::<u64>()
        .map_err(|_| JsValue::from_str(&format!("Invalid nonce: {}", nonce)))
}

fn from_js_or_default<T>(value: JsValue) -> Result<T, JsValue>
where
    T: Default + serde::de::DeserializeOwned,
{
    if value.is_undefined() || value.is_null() {
        return Ok(T::default());
    }
    serde_wasm_bindgen::from_value(value).map_err(|e| JsValue::from_str(&format!("Invalid config: {:?}", e)))
}

/// The main mining controller.
///
/// JavaScript drives it by calling `step()` from its event loop (for example
/// from `setTimeout` or `requestAnimationFrame`) until `is_running` is false.
#[wasm_bindgen]
pub struct Miner {
    inner: MiningOrchestrator<LocalStorageCheckpointStore, JsClock>,
}

#[wasm_bindgen]
impl Miner {
    /// Create a new miner instance.
    ///
    /// # Arguments
    /// * `config` - Optional object with `MinerConfig` fields; missing fields use defaults
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<Miner, JsValue> {
        let config: MinerConfig = from_js_or_default(config)?;
        let inner = MiningOrchestrator::new(config, LocalStorageCheckpointStore::new(), JsClock)
            .map_err(js_error)?;
        Ok(Miner { inner })
    }

    /// Start mining the challenge of a UTXO, resuming saved progress.
    #[wasm_bindgen]
    pub fn start(&mut self, txid: &str, vout: u32) -> Result<(), JsValue> {
        self.inner.start(&Utxo::new(txid, vout, 0)).map_err(js_error)
    }

    /// Continue the last challenge after `stop()`.
    #[wasm_bindgen]
    pub fn resume(&mut self) -> Result<(), JsValue> {
        self.inner.resume().map_err(js_error)
    }

    /// Run one slice of work.
    ///
    /// Returns `{ outcome, hashes, retry_at_ms, events }`. While `outcome` is
    /// "backing_off" the host should wait until `retry_at_ms` before the next
    /// call.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<JsValue, JsValue> {
        let outcome = self.inner.step();
        StepInfo::new(&outcome, self.inner.drain_events()).to_js()
    }

    /// Stop mining and return the best result, or `undefined` if none.
    #[wasm_bindgen]
    pub fn stop(&mut self) -> Result<JsValue, JsValue> {
        match self.inner.stop() {
            Some(result) => ResultInfo::from(&result).to_js(),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    /// Best result so far, or `undefined`.
    #[wasm_bindgen]
    pub fn result(&self) -> Result<JsValue, JsValue> {
        match self.inner.result() {
            Some(result) => ResultInfo::from(&result).to_js(),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    /// Events queued since the last `step()`, e.g. after `stop()`.
    #[wasm_bindgen]
    pub fn drain_events(&mut self) -> Result<JsValue, JsValue> {
        events_to_js(self.inner.drain_events())
    }

    /// Set the preferred mode ("cpu" or "gpu"). Returns false while mining.
    #[wasm_bindgen]
    pub fn set_mode(&mut self, mode: &str) -> Result<bool, JsValue> {
        let mode = MiningMode::from_str(mode).ok_or_else(|| JsValue::from_str("Invalid mode"))?;
        Ok(self.inner.set_mode(mode))
    }

    /// Stop and forget the current challenge and its saved progress.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Get current mining statistics.
    #[wasm_bindgen]
    pub fn stats(&self) -> Result<JsValue, JsValue> {
        StatsInfo::from(&self.inner.stats()).to_js()
    }

    /// Check if mining is active.
    #[wasm_bindgen(getter)]
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Preferred mining mode.
    #[wasm_bindgen(getter)]
    pub fn mode(&self) -> String {
        self.inner.mode().name().to_string()
    }

    /// Challenge being mined, if any.
    #[wasm_bindgen(getter)]
    pub fn challenge(&self) -> Option<String> {
        self.inner.state().map(|s| s.challenge.to_string())
    }
}

/// Token reward (smallest unit) as a decimal string.
#[wasm_bindgen]
pub fn reward(nonce: &str, hash: &str, block_time: f64) -> Result<String, JsValue> {
    let nonce = parse_nonce(nonce)?;
    Ok(bro_core::reward(nonce, hash, block_time as u64).to_string())
}

/// Leading zero bits of a hex hash; 0 for malformed input.
#[wasm_bindgen]
pub fn leading_zero_bits(hash: &str) -> u32 {
    hash::leading_zero_bits(hash)
}

/// Reward together with its derivation.
#[wasm_bindgen]
pub fn reward_info(nonce: &str, hash: &str, block_time: f64) -> Result<JsValue, JsValue> {
    let nonce = parse_nonce(nonce)?;
    let info = RewardSchedule::default().reward_info(nonce, hash, block_time as u64);
    RewardInfoJs::from(info).to_js()
}

/// Plan a funding transaction.
///
/// # Arguments
/// * `utxos` - Array of `{ txid, vout, value, address?, confirmations? }`
/// * `required_outputs` - Number of outputs needed
/// * `sat_per_vbyte` - Fee rate; a non-positive rate uses the fixed fallback fee
/// * `config` - Optional object with `PlannerConfig` fields
#[wasm_bindgen]
pub fn plan_funding(
    utxos: JsValue,
    required_outputs: u32,
    sat_per_vbyte: f64,
    config: JsValue,
) -> Result<JsValue, JsValue> {
    let utxos: Vec<Utxo> = serde_wasm_bindgen::from_value(utxos)
        .map_err(|e| JsValue::from_str(&format!("Invalid UTXO list: {:?}", e)))?;
    let config: PlannerConfig = from_js_or_default(config)?;
    let planner =
        FundingPlanner::with_config(config, VsizeFeeEstimator::new(sat_per_vbyte)).map_err(js_error)?;
    let plan = planner.plan(&utxos, u64::from(required_outputs));
    value_to_js(&plan)
}
