//! Tunable parameters for mining and funding.
//!
//! Both structs deserialize from partial JSON documents: any field left out
//! keeps its default.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::reward::RewardSchedule;

/// Value of each funding output, in satoshis.
pub const DEFAULT_OUTPUT_VALUE: u64 = 5_000;

/// Outputs at or below this value are not relayed; change this small is folded into fees.
pub const DUST_LIMIT: u64 = 546;

/// UTXO values that mark digital assets (inscriptions, runes, rare sats, stamps).
pub const PROTECTED_VALUES: [u64; 8] = [
    546,    // Ordinals & Runes dust
    333,    // Rare sats
    330,    // Rare sats, alternative marker
    1_000,  // BRC-20 transfers and small inscriptions
    777,    // Lucky sats
    600,    // Stamps (SRC-20)
    10_000, // Large inscriptions
    5_000,  // Medium inscriptions
];

/// Mining loop parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Nonces hashed per CPU slice before control returns to the host.
    pub cpu_yield_interval: u64,
    /// A progress event is emitted whenever the nonce is a multiple of this.
    pub cpu_progress_interval: u64,
    /// A checkpoint is written whenever the nonce is a multiple of this.
    pub cpu_save_interval: u64,
    /// Batch size used when the backend does not recommend one.
    pub gpu_batch_size: u32,
    /// Nonces between periodic GPU checkpoints.
    pub gpu_save_interval: u64,
    /// Delay before retrying a failed GPU batch.
    pub gpu_retry_backoff_ms: u64,
    /// Consecutive batch failures tolerated before falling back to CPU.
    pub gpu_max_retries: u32,
    /// Events held for the host before the oldest progress reports are dropped.
    pub max_queued_events: usize,
    /// Reward schedule used for results.
    pub reward: RewardSchedule,
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            cpu_yield_interval: 100,
            cpu_progress_interval: 1_000,
            cpu_save_interval: 1_000,
            gpu_batch_size: 1_000_000,
            gpu_save_interval: 500_000_000,
            gpu_retry_backoff_ms: 100,
            gpu_max_retries: 5,
            max_queued_events: 10_000,
            reward: RewardSchedule::default(),
        }
    }
}

impl MinerConfig {
    /// Parse from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: MinerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or divide by zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_yield_interval == 0 {
            return Err(ConfigError::Zero("cpu_yield_interval"));
        }
        if self.cpu_progress_interval == 0 {
            return Err(ConfigError::Zero("cpu_progress_interval"));
        }
        if self.cpu_save_interval == 0 {
            return Err(ConfigError::Zero("cpu_save_interval"));
        }
        if self.gpu_batch_size == 0 {
            return Err(ConfigError::Zero("gpu_batch_size"));
        }
        if self.gpu_save_interval == 0 {
            return Err(ConfigError::Zero("gpu_save_interval"));
        }
        if self.max_queued_events == 0 {
            return Err(ConfigError::Zero("max_queued_events"));
        }
        self.reward.validate()
    }
}

/// Funding planner parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Value of each output the plan must produce.
    pub output_value: u64,
    /// Change at or below this is folded into the fee.
    pub dust_limit: u64,
    /// UTXO values that must never be spent.
    pub protected_values: Vec<u64>,
    /// Fee share charged to each large UTXO that gets split.
    pub split_fee_per_input: u64,
    /// Fee budget required before small UTXOs are combined.
    pub combine_base_fee: u64,
    /// Extra fee per combined small UTXO.
    pub combine_fee_per_input: u64,
    /// Base fee of transactions that sweep all usable UTXOs.
    pub sweep_base_fee: u64,
    /// Per-input fee of sweeping transactions.
    pub sweep_fee_per_input: u64,
    /// Per-output fee of sweeping transactions.
    pub sweep_fee_per_output: u64,
    /// Base of the fixed estimate used when the fee estimator fails.
    pub fallback_fee_base: u64,
    /// Per-output part of the fixed fallback estimate.
    pub fallback_fee_per_output: u64,
    /// Minimum fee reserved when computing how many outputs are affordable.
    pub affordability_reserve: u64,
    /// Cap on the input count passed to the fee estimator.
    pub max_estimated_inputs: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            output_value: DEFAULT_OUTPUT_VALUE,
            dust_limit: DUST_LIMIT,
            protected_values: PROTECTED_VALUES.to_vec(),
            split_fee_per_input: 200,
            combine_base_fee: 500,
            combine_fee_per_input: 100,
            sweep_base_fee: 1_000,
            sweep_fee_per_input: 100,
            sweep_fee_per_output: 50,
            fallback_fee_base: 1_000,
            fallback_fee_per_output: 150,
            affordability_reserve: 1_000,
            max_estimated_inputs: 5,
        }
    }
}

impl PlannerConfig {
    /// Parse from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PlannerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject an output value of zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_value == 0 {
            return Err(ConfigError::Zero("output_value"));
        }
        Ok(())
    }

    /// Whether a UTXO value marks an asset that must not be spent.
    ///
    /// The planner's own output value is never protected: UTXOs of exactly
    /// that value are funding outputs from a previous round.
    pub fn is_protected(&self, value: u64) -> bool {
        value != self.output_value && self.protected_values.contains(&value)
    }
}
