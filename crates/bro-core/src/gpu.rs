//! Batch coordination for a massively parallel hashing backend.
//!
//! The backend evaluates a contiguous nonce range and returns only the best
//! hash in it. This module picks batch sizes, decodes the packed result and
//! folds it into the [`MiningState`] with the same tie-break as the CPU loop.

use log::{debug, warn};

use crate::config::MinerConfig;
use crate::cpu::MiningSink;
use crate::error::BackendError;
use crate::hash::leading_zero_bits;
use crate::state::MiningState;

/// Best hash of one batch as returned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBatchResult {
    /// The 256-bit hash as eight big-endian 32-bit words.
    pub best_words: [u32; 8],
    /// Leading zero bits as counted by the backend.
    pub best_leading_zeros: u32,
    pub best_nonce_hi: u32,
    pub best_nonce_lo: u32,
}

impl GpuBatchResult {
    /// Canonical lowercase hex of the hash.
    pub fn hash_hex(&self) -> String {
        let mut bytes = [0u8; 32];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(self.best_words.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        hex::encode(bytes)
    }

    /// The 64-bit nonce rebuilt from its halves.
    pub fn nonce(&self) -> u64 {
        (u64::from(self.best_nonce_hi) << 32) | u64::from(self.best_nonce_lo)
    }
}

/// A parallel hashing device.
///
/// Only one batch is in flight at a time: the coordinator waits for
/// `compute_batch` to return before issuing the next one.
pub trait GpuComputeBackend {
    /// Acquire the device.
    fn init(&mut self) -> Result<(), BackendError>;

    /// Upload the challenge bytes all following batches hash against.
    fn set_challenge(&mut self, challenge: &[u8]) -> Result<(), BackendError>;

    /// Evaluate nonces `start_nonce .. start_nonce + batch_size`.
    fn compute_batch(&mut self, start_nonce: u64, batch_size: u32) -> Result<GpuBatchResult, BackendError>;

    /// Batch size suited to the device, if it has an opinion.
    fn recommended_batch_size(&self) -> Option<u32> {
        None
    }

    /// Release the device.
    fn destroy(&mut self);
}

/// Result of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub start_nonce: u64,
    pub batch_size: u32,
    pub improved: bool,
    pub stopped: bool,
    pub exhausted: bool,
}

/// Drives a [`GpuComputeBackend`] one batch at a time.
#[derive(Debug, Clone)]
pub struct GpuBatchCoordinator {
    default_batch_size: u32,
    save_interval: u64,
    last_saved_nonce: u64,
}

impl GpuBatchCoordinator {
    /// `start_nonce` is where the session resumes; periodic checkpoints are
    /// counted from there.
    pub fn new(config: &MinerConfig, start_nonce: u64) -> Self {
        GpuBatchCoordinator {
            default_batch_size: config.gpu_batch_size.max(1),
            save_interval: config.gpu_save_interval.max(1),
            last_saved_nonce: start_nonce,
        }
    }

    /// Batch size for the next dispatch: the backend's recommendation if it
    /// gives a usable one, the configured default otherwise.
    pub fn batch_size(&self, backend: &dyn GpuComputeBackend) -> u32 {
        match backend.recommended_batch_size() {
            Some(size) if size > 0 => size,
            _ => self.default_batch_size,
        }
    }

    /// Dispatch one batch at `state.current_nonce` and reconcile its result.
    pub fn run_batch<K: MiningSink>(
        &mut self,
        backend: &mut dyn GpuComputeBackend,
        state: &mut MiningState,
        sink: &mut K,
    ) -> Result<BatchReport, BackendError> {
        let start = state.current_nonce;
        if sink.should_stop() {
            return Ok(BatchReport {
                start_nonce: start,
                stopped: true,
                ..BatchReport::default()
            });
        }

        // Never let the range run past u64::MAX
        let room = u64::MAX - start;
        if room == 0 {
            return Ok(BatchReport {
                start_nonce: start,
                exhausted: true,
                ..BatchReport::default()
            });
        }
        let size = u64::from(self.batch_size(backend)).min(room) as u32;

        debug!("dispatching batch of {} nonces at {}", size, start);
        let result = backend.compute_batch(start, size)?;
        self.reconcile(state, start, size, &result, sink)
    }

    /// Fold a batch result into the state.
    ///
    /// The nonce advances by the full batch whether or not the best improved.
    /// A result nonce outside the batch range is rejected and leaves the
    /// state untouched.
    pub fn reconcile<K: MiningSink>(
        &mut self,
        state: &mut MiningState,
        start: u64,
        size: u32,
        result: &GpuBatchResult,
        sink: &mut K,
    ) -> Result<BatchReport, BackendError> {
        let end = start.saturating_add(u64::from(size));
        let nonce = result.nonce();
        if nonce < start || nonce >= end {
            return Err(BackendError::InvalidResult(format!(
                "nonce {} outside batch {}..{}",
                nonce, start, end
            )));
        }

        let hex = result.hash_hex();
        let leading_zeros = leading_zero_bits(&hex);
        if leading_zeros != result.best_leading_zeros {
            warn!(
                "backend reported {} leading zeros for nonce {}, hash has {}",
                result.best_leading_zeros, nonce, leading_zeros
            );
        }

        let improved = state.offer(&hex, nonce, leading_zeros);
        state.current_hash = hex;
        state.current_nonce = end;

        if improved {
            sink.best_hash(state);
        }
        if improved || end - self.last_saved_nonce >= self.save_interval {
            self.last_saved_nonce = end;
            sink.checkpoint(state);
        }
        sink.progress(state, end, leading_zeros);

        Ok(BatchReport {
            start_nonce: start,
            batch_size: size,
            improved,
            stopped: false,
            exhausted: end == u64::MAX,
        })
    }
}
