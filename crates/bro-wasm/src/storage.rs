//! `localStorage`-backed checkpoint store.

use bro_core::{Challenge, Checkpoint, CheckpointStore, MiningMode, StoreError};
use log::{info, warn};
use web_sys::Storage;

/// Prefix of per-challenge checkpoint keys.
pub const CHECKPOINT_KEY_PREFIX: &str = "bro:mining:";

/// Key of the preferred mining mode.
pub const MODE_KEY: &str = "bro:mining:mode";

/// Key the previous web miner kept its single progress record under.
pub const LEGACY_KEY: &str = "miningProgress";

/// Stores one JSON checkpoint per challenge in `window.localStorage`.
///
/// A legacy `miningProgress` record is migrated the first time its challenge
/// is loaded, then removed.
pub struct LocalStorageCheckpointStore {
    storage: Option<Storage>,
}

impl LocalStorageCheckpointStore {
    /// Store over the window's `localStorage`. Without one (workers, private
    /// mode) every operation reports `StoreError::Unavailable`.
    pub fn new() -> Self {
        let storage = web_sys::window().and_then(|w| w.local_storage().ok().flatten());
        if storage.is_none() {
            warn!("localStorage unavailable; mining progress will not persist");
        }
        LocalStorageCheckpointStore { storage }
    }

    pub fn is_available(&self) -> bool {
        self.storage.is_some()
    }

    fn storage(&self) -> Result<&Storage, StoreError> {
        self.storage
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("no localStorage".to_string()))
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.storage()?
            .get_item(key)
            .map_err(|e| StoreError::Io(format!("{:?}", e)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.storage()?
            .set_item(key, value)
            .map_err(|e| StoreError::Io(format!("{:?}", e)))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.storage()?
            .remove_item(key)
            .map_err(|e| StoreError::Io(format!("{:?}", e)))
    }

    fn migrate_legacy(&self, challenge: &Challenge) -> Result<Option<Checkpoint>, StoreError> {
        let raw = match self.get(LEGACY_KEY)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let checkpoint = Checkpoint::from_json(&raw)?;
        if &checkpoint.challenge != challenge {
            return Ok(None);
        }

        self.set(&checkpoint_key(challenge), &checkpoint.to_json()?)?;
        self.remove(LEGACY_KEY)?;
        info!("migrated legacy mining progress for {}", challenge);
        Ok(Some(checkpoint))
    }
}

impl Default for LocalStorageCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage key of a challenge's checkpoint.
pub fn checkpoint_key(challenge: &Challenge) -> String {
    format!("{}{}", CHECKPOINT_KEY_PREFIX, challenge)
}

impl CheckpointStore for LocalStorageCheckpointStore {
    fn save(&mut self, challenge: &Challenge, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.set(&checkpoint_key(challenge), &checkpoint.to_json()?)
    }

    fn load(&self, challenge: &Challenge) -> Result<Option<Checkpoint>, StoreError> {
        match self.get(&checkpoint_key(challenge))? {
            Some(raw) => Ok(Some(Checkpoint::from_json(&raw)?)),
            None => self.migrate_legacy(challenge),
        }
    }

    fn clear(&mut self, challenge: &Challenge) -> Result<(), StoreError> {
        self.remove(&checkpoint_key(challenge))
    }

    fn save_mode(&mut self, mode: MiningMode) -> Result<(), StoreError> {
        self.set(MODE_KEY, mode.name())
    }

    fn load_mode(&self) -> Result<Option<MiningMode>, StoreError> {
        if let Some(mode) = self.get(MODE_KEY)? {
            return Ok(MiningMode::from_str(&mode));
        }
        // Older pages kept the mode inside the progress record
        Ok(self
            .get(LEGACY_KEY)?
            .and_then(|raw| Checkpoint::from_json(&raw).ok())
            .map(|checkpoint| checkpoint.mode))
    }
}
