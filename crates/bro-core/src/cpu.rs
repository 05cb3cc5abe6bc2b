//! Sequential CPU nonce search.

use log::debug;

use crate::config::MinerConfig;
use crate::hash::{hash_to_hex, leading_zero_bits_bytes, NoncePreimage};
use crate::state::{Challenge, MiningState};

/// Hooks a strategy uses to report back to the session that owns it.
///
/// All calls happen synchronously on the mining loop, so every snapshot a
/// sink sees is internally consistent.
pub trait MiningSink {
    /// Whether a stop was requested. Polled before every nonce or batch.
    fn should_stop(&self) -> bool;

    /// The state just accepted a new best hash.
    fn best_hash(&mut self, state: &MiningState);

    /// Periodic progress; `nonce` is the last nonce reported on.
    fn progress(&mut self, state: &MiningState, nonce: u64, leading_zeros: u32);

    /// Persist a snapshot of the state.
    fn checkpoint(&mut self, state: &MiningState);
}

/// Outcome of one cooperative slice of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceReport {
    /// Nonces hashed in this slice.
    pub hashes: u64,
    /// Whether the best hash improved during the slice.
    pub improved: bool,
    /// The slice ended because a stop was requested.
    pub stopped: bool,
    /// The last nonce (`u64::MAX`) has been evaluated.
    pub exhausted: bool,
}

/// Cooperative CPU miner.
///
/// Each call to [`run_slice`](Self::run_slice) hashes at most
/// `cpu_yield_interval` nonces and then returns so the host can service other
/// work before calling again.
#[derive(Debug, Clone)]
pub struct CpuMiningStrategy {
    preimage: NoncePreimage,
    yield_interval: u64,
    progress_interval: u64,
    save_interval: u64,
}

impl CpuMiningStrategy {
    pub fn new(challenge: &Challenge, config: &MinerConfig) -> Self {
        CpuMiningStrategy {
            preimage: NoncePreimage::new(challenge.as_bytes()),
            yield_interval: config.cpu_yield_interval.max(1),
            progress_interval: config.cpu_progress_interval.max(1),
            save_interval: config.cpu_save_interval.max(1),
        }
    }

    /// Hash nonces starting at `state.current_nonce` until the slice is full,
    /// a stop is requested, or the nonce space runs out.
    pub fn run_slice<K: MiningSink>(&mut self, state: &mut MiningState, sink: &mut K) -> SliceReport {
        let mut report = SliceReport::default();

        for _ in 0..self.yield_interval {
            if sink.should_stop() {
                report.stopped = true;
                break;
            }

            let nonce = state.current_nonce;
            let digest = self.preimage.hash(nonce);
            let leading_zeros = leading_zero_bits_bytes(&digest);
            let hex = hash_to_hex(&digest);
            report.hashes += 1;

            let improved = state.offer(&hex, nonce, leading_zeros);
            state.current_hash = hex;

            match nonce.checked_add(1) {
                Some(next) => state.current_nonce = next,
                None => report.exhausted = true,
            }

            if improved {
                report.improved = true;
                debug!(
                    "new best for {}: nonce {} with {} leading zeros",
                    state.challenge, nonce, leading_zeros
                );
                sink.best_hash(state);
                sink.checkpoint(state);
            } else if nonce % self.save_interval == 0 {
                sink.checkpoint(state);
            }

            if nonce % self.progress_interval == 0 {
                sink.progress(state, nonce, leading_zeros);
            }

            if report.exhausted {
                break;
            }
        }

        report
    }
}
