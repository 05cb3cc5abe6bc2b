//! Mining state, modes and results.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MiningError;
use crate::hash::{is_better_hash, leading_zero_bits};
use crate::utxo::Utxo;

/// The string a mining session hashes against: `"{txid}:{vout}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Challenge(String);

impl Challenge {
    /// Build the challenge for an outpoint.
    pub fn new(txid: &str, vout: u32) -> Result<Self, MiningError> {
        let txid = txid.trim();
        if txid.is_empty() {
            return Err(MiningError::InvalidChallenge("empty txid".to_string()));
        }
        if txid.contains(':') {
            return Err(MiningError::InvalidChallenge(format!("txid contains ':': {}", txid)));
        }
        Ok(Challenge(format!("{}:{}", txid, vout)))
    }

    /// Build the challenge for a UTXO.
    pub fn from_utxo(utxo: &Utxo) -> Result<Self, MiningError> {
        Challenge::new(&utxo.txid, utxo.vout)
    }

    /// Parse an existing `"{txid}:{vout}"` string.
    pub fn parse(s: &str) -> Result<Self, MiningError> {
        let (txid, vout) = s
            .rsplit_once(':')
            .ok_or_else(|| MiningError::InvalidChallenge(format!("missing ':' in {}", s)))?;
        let vout = vout
            .parse::<u32>()
            .map_err(|_| MiningError::InvalidChallenge(format!("bad vout in {}", s)))?;
        Challenge::new(txid, vout)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The txid half of the challenge.
    pub fn txid(&self) -> &str {
        self.0.rsplit_once(':').map(|(txid, _)| txid).unwrap_or(&self.0)
    }

    /// The vout half of the challenge.
    pub fn vout(&self) -> u32 {
        self.0
            .rsplit_once(':')
            .and_then(|(_, vout)| vout.parse().ok())
            .unwrap_or(0)
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution strategy for the nonce search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiningMode {
    #[default]
    Cpu,
    Gpu,
}

impl MiningMode {
    /// Parse a mode name, case-insensitively.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Some(MiningMode::Cpu),
            "gpu" | "webgpu" => Some(MiningMode::Gpu),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MiningMode::Cpu => "cpu",
            MiningMode::Gpu => "gpu",
        }
    }
}

impl fmt::Display for MiningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mutable record of a nonce search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningState {
    /// Next nonce to evaluate.
    pub current_nonce: u64,
    /// Most recently evaluated hash.
    pub current_hash: String,
    /// Best hash accepted so far; empty until the first acceptance.
    pub best_hash: String,
    pub best_nonce: u64,
    pub best_leading_zeros: u32,
    pub challenge: Challenge,
    /// Strategy actually running (may differ from the preference after a fallback).
    pub mode: MiningMode,
    pub is_running: bool,
}

impl MiningState {
    /// Fresh state for a challenge.
    pub fn new(challenge: Challenge, mode: MiningMode) -> Self {
        MiningState {
            current_nonce: 0,
            current_hash: String::new(),
            best_hash: String::new(),
            best_nonce: 0,
            best_leading_zeros: 0,
            challenge,
            mode,
            is_running: false,
        }
    }

    /// Whether any hash has been accepted.
    pub fn has_result(&self) -> bool {
        !self.best_hash.is_empty()
    }

    /// Offer a candidate; returns true if it became the new best.
    pub fn offer(&mut self, hash: &str, nonce: u64, leading_zeros: u32) -> bool {
        if !is_better_hash(leading_zeros, hash, self.best_leading_zeros, &self.best_hash) {
            return false;
        }
        self.best_hash = hash.to_string();
        self.best_nonce = nonce;
        self.best_leading_zeros = leading_zeros;
        true
    }

    /// Check the best-hash invariant.
    pub fn is_consistent(&self) -> bool {
        if self.best_hash.is_empty() {
            self.best_leading_zeros == 0
        } else {
            self.best_leading_zeros == leading_zero_bits(&self.best_hash)
        }
    }

    /// Snapshot the best result, if any.
    pub fn result(&self, reward_amount: u64, timestamp_ms: u64) -> Option<MiningResult> {
        if !self.has_result() {
            return None;
        }
        Some(MiningResult {
            nonce: self.best_nonce,
            hash: self.best_hash.clone(),
            leading_zeros: self.best_leading_zeros,
            challenge: self.challenge.clone(),
            reward_amount,
            timestamp_ms,
        })
    }
}

/// Immutable snapshot of the best result of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningResult {
    pub nonce: u64,
    pub hash: String,
    pub leading_zeros: u32,
    pub challenge: Challenge,
    /// Token reward in the smallest unit.
    pub reward_amount: u64,
    /// Unix time in milliseconds when the snapshot was taken.
    pub timestamp_ms: u64,
}
