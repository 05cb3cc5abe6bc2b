//! Core mining and funding engine for the BRO token miner.
//!
//! This crate provides pure Rust implementations of:
//! - Double-SHA256 proof-of-work over a UTXO challenge with leading-zero scoring
//! - The token reward schedule with periodic halvings, in exact integers
//! - CPU and GPU mining strategies driven by a resumable orchestrator
//! - Versioned checkpoints and the storage port they are written through
//! - A funding planner that restructures UTXOs into equal-value outputs
//!
//! Time and storage are injected by the host, so the same engine runs natively
//! and inside `wasm32-unknown-unknown`.

pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod cpu;
pub mod error;
pub mod event;
pub mod fees;
pub mod funding;
pub mod gpu;
pub mod hash;
pub mod network;
pub mod orchestrator;
pub mod reward;
pub mod state;
pub mod utxo;

pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore, CHECKPOINT_VERSION};
pub use clock::Clock;
#[cfg(feature = "std")]
pub use clock::SystemClock;
pub use config::{MinerConfig, PlannerConfig, DEFAULT_OUTPUT_VALUE, DUST_LIMIT, PROTECTED_VALUES};
pub use cpu::{CpuMiningStrategy, MiningSink, SliceReport};
pub use error::{BackendError, ConfigError, FeeError, MiningError, StoreError};
pub use event::{format_hash_rate, EventQueue, MiningEvent, MiningStatus, ProgressReport};
pub use fees::{FeeEstimator, FixedFeeEstimator, VsizeFeeEstimator};
pub use funding::{FundingPlan, FundingPlanner, FundingStrategy, SplitDetail};
pub use gpu::{GpuBatchCoordinator, GpuBatchResult, GpuComputeBackend};
pub use hash::{double_sha256, hash_step, leading_zero_bits};
pub use network::Network;
pub use orchestrator::{MiningOrchestrator, MiningStats, Phase, StepOutcome, StopHandle};
pub use reward::{reward, RewardInfo, RewardSchedule};
pub use state::{Challenge, MiningMode, MiningResult, MiningState};
pub use utxo::Utxo;
