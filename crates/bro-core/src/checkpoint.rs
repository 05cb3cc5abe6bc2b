//! Resumable checkpoints of a mining session.
//!
//! A checkpoint is one versioned record per challenge. Nonces are written as
//! decimal strings so JavaScript hosts can round-trip values above 2^53.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::hash::leading_zero_bits;
use crate::state::{Challenge, MiningMode, MiningState};

/// Current checkpoint schema version.
pub const CHECKPOINT_VERSION: u32 = 2;

/// Persisted snapshot of a [`MiningState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub version: u32,
    pub challenge: Challenge,
    /// Next nonce to evaluate on resume.
    #[serde(with = "u64_string")]
    pub current_nonce: u64,
    pub best_hash: String,
    #[serde(with = "u64_string")]
    pub best_nonce: u64,
    pub best_leading_zeros: u32,
    pub mode: MiningMode,
    pub saved_at_ms: u64,
}

impl Checkpoint {
    /// Snapshot a state.
    pub fn from_state(state: &MiningState, saved_at_ms: u64) -> Self {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            challenge: state.challenge.clone(),
            current_nonce: state.current_nonce,
            best_hash: state.best_hash.clone(),
            best_nonce: state.best_nonce,
            best_leading_zeros: state.best_leading_zeros,
            mode: state.mode,
            saved_at_ms,
        }
    }

    /// Apply this checkpoint to a state for the same challenge.
    ///
    /// The best-hash invariant is re-established from the stored hash, so a
    /// hand-edited or corrupted leading-zero count cannot leak into the state.
    pub fn restore_into(&self, state: &mut MiningState) {
        state.current_nonce = self.current_nonce;
        state.best_hash = self.best_hash.clone();
        state.best_nonce = self.best_nonce;
        state.best_leading_zeros = if self.best_hash.is_empty() {
            0
        } else {
            leading_zero_bits(&self.best_hash)
        };
        state.current_hash = self.best_hash.clone();
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON record, upgrading legacy records when needed.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if value.get("version").is_some() {
            return Ok(serde_json::from_value(value)?);
        }
        Checkpoint::upgrade_legacy(&value)
    }

    /// Convert a legacy `miningProgress` record into the current schema.
    ///
    /// Legacy records keep the nonce and mode under `progress` and may store
    /// nonces either as numbers or as decimal strings.
    pub fn upgrade_legacy(value: &serde_json::Value) -> Result<Self, StoreError> {
        let challenge = value
            .get("challenge")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(Challenge::parse)
            .or_else(|| {
                let txid = value.get("challengeTxid")?.as_str()?;
                let vout = value.get("challengeVout")?.as_u64()?;
                Some(Challenge::new(txid, u32::try_from(vout).ok()?))
            })
            .ok_or_else(|| StoreError::Serialization("legacy record has no challenge".to_string()))?
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let progress = value.get("progress");
        let current_nonce = progress
            .and_then(|p| p.get("currentNonce"))
            .or_else(|| value.get("currentNonce"))
            .map(json_u64)
            .transpose()?
            .unwrap_or(0);
        let mode = progress
            .and_then(|p| p.get("mode"))
            .or_else(|| value.get("mode"))
            .and_then(|m| m.as_str())
            .and_then(MiningMode::from_str)
            .unwrap_or_default();
        let best_hash = value
            .get("bestHash")
            .and_then(|h| h.as_str())
            .unwrap_or_default()
            .to_string();
        let best_nonce = value
            .get("bestNonce")
            .map(json_u64)
            .transpose()?
            .unwrap_or(0);
        let saved_at_ms = value.get("timestamp").and_then(|t| t.as_u64()).unwrap_or(0);

        Ok(Checkpoint {
            version: CHECKPOINT_VERSION,
            challenge,
            current_nonce,
            best_leading_zeros: leading_zero_bits(&best_hash),
            best_hash,
            best_nonce,
            mode,
            saved_at_ms,
        })
    }
}

fn json_u64(value: &serde_json::Value) -> Result<u64, StoreError> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| StoreError::Serialization(format!("not a u64: {}", n))),
        serde_json::Value::String(s) => s
            .parse()
            .map_err(|_| StoreError::Serialization(format!("not a u64: {}", s))),
        serde_json::Value::Null => Ok(0),
        other => Err(StoreError::Serialization(format!("not a u64: {}", other))),
    }
}

/// Serialize u64 as a decimal string; accept strings or numbers on input.
mod u64_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Str(String),
        Num(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Str(s) => s.parse().map_err(de::Error::custom),
            Repr::Num(n) => Ok(n),
        }
    }
}

/// Persistence port for checkpoints.
///
/// Failures are reported but never abort mining; callers treat a failed load
/// as "no checkpoint" and a failed save as best-effort.
pub trait CheckpointStore {
    /// Persist the latest checkpoint for a challenge, replacing any older one.
    fn save(&mut self, challenge: &Challenge, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Load the checkpoint for a challenge.
    fn load(&self, challenge: &Challenge) -> Result<Option<Checkpoint>, StoreError>;

    /// Forget the checkpoint for a challenge.
    fn clear(&mut self, challenge: &Challenge) -> Result<(), StoreError>;

    /// Persist the preferred mining mode.
    fn save_mode(&mut self, _mode: MiningMode) -> Result<(), StoreError> {
        Ok(())
    }

    /// Load the preferred mining mode.
    fn load_mode(&self) -> Result<Option<MiningMode>, StoreError> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    checkpoints: BTreeMap<Challenge, Checkpoint>,
    mode: Option<MiningMode>,
}

/// In-memory store. Clones share the same records, which lets a test hand
/// one clone to an orchestrator and inspect or reuse another.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Rc<RefCell<MemoryInner>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    pub fn len(&self) -> usize {
        self.inner.borrow().checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a checkpoint without going through the trait.
    pub fn get(&self, challenge: &Challenge) -> Option<Checkpoint> {
        self.inner.borrow().checkpoints.get(challenge).cloned()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&mut self, challenge: &Challenge, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.inner
            .borrow_mut()
            .checkpoints
            .insert(challenge.clone(), checkpoint.clone());
        Ok(())
    }

    fn load(&self, challenge: &Challenge) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.get(challenge))
    }

    fn clear(&mut self, challenge: &Challenge) -> Result<(), StoreError> {
        self.inner.borrow_mut().checkpoints.remove(challenge);
        Ok(())
    }

    fn save_mode(&mut self, mode: MiningMode) -> Result<(), StoreError> {
        self.inner.borrow_mut().mode = Some(mode);
        Ok(())
    }

    fn load_mode(&self) -> Result<Option<MiningMode>, StoreError> {
        Ok(self.inner.borrow().mode)
    }
}
