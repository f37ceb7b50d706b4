//! Secure storage abstraction for key material and advisory metadata.
//!
//! The storage primitive is an external collaborator; failures surface as
//! `false` or `None`, never as errors, and "not found" is never an error.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret bytes read back from storage. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyData {
    data: Vec<u8>,
}

impl KeyData {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Slots hold key material; the key/value side holds small metadata strings.
pub trait SecureStorage: Send + Sync {
    fn store(&self, slot: &str, key_material: &[u8]) -> bool;
    fn load(&self, slot: &str) -> Option<KeyData>;
    /// Returns whether something was deleted.
    fn delete(&self, slot: &str) -> bool;

    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> bool;
    /// Returns false only on a failed write; an absent key counts as removed.
    fn remove(&self, key: &str) -> bool;
}

// ============================================================================
// In-memory storage
// ============================================================================

/// In-memory secure storage for tests and ephemeral agents.
#[derive(Default)]
pub struct MemorySecureStorage {
    slots: Mutex<HashMap<String, KeyData>>,
    values: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemorySecureStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write report failure.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn writes_failing(&self) -> bool {
        self.fail_writes.load(Ordering::SeqCst)
    }
}

impl SecureStorage for MemorySecureStorage {
    fn store(&self, slot: &str, key_material: &[u8]) -> bool {
        if self.writes_failing() {
            return false;
        }
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(slot.to_string(), KeyData::new(key_material.to_vec()));
        true
    }

    fn load(&self, slot: &str) -> Option<KeyData> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(slot).map(|k| KeyData::new(k.as_bytes().to_vec()))
    }

    fn delete(&self, slot: &str) -> bool {
        if self.writes_failing() {
            return false;
        }
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(slot).is_some()
    }

    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        if self.writes_failing() {
            return false;
        }
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        true
    }

    fn remove(&self, key: &str) -> bool {
        if self.writes_failing() {
            return false;
        }
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        true
    }
}

// ============================================================================
// File storage
// ============================================================================

/// File-backed storage: `<dir>/<slot>.key` for key material and
/// `<dir>/<key>.meta` for metadata.
///
/// Files are created owner-only on Unix. Key files are overwritten with zeros
/// before removal.
pub struct FileSecureStorage {
    key_dir: PathBuf,
}

impl FileSecureStorage {
    pub fn new(key_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let key_dir = key_dir.into();
        fs::create_dir_all(&key_dir)?;
        Ok(Self { key_dir })
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.key_dir.join(format!("{}.key", sanitize(slot)))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.key_dir.join(format!("{}.meta", sanitize(key)))
    }

    fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(data)?;
        file.sync_data()
    }

    fn zeroize_and_remove(path: &Path) -> std::io::Result<()> {
        if let Ok(mut file) = fs::OpenOptions::new().write(true).open(path) {
            if let Ok(metadata) = file.metadata() {
                let zeros = vec![0u8; metadata.len() as usize];
                let _ = file.write_all(&zeros);
                let _ = file.sync_data();
            }
        }
        fs::remove_file(path)
    }
}

/// Keep storage names inside the key directory.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl SecureStorage for FileSecureStorage {
    fn store(&self, slot: &str, key_material: &[u8]) -> bool {
        match Self::write_private(&self.slot_path(slot), key_material) {
            Ok(()) => true,
            Err(e) => {
                warn!(slot, error = %e, "failed to write key slot");
                false
            }
        }
    }

    fn load(&self, slot: &str) -> Option<KeyData> {
        match fs::read(self.slot_path(slot)) {
            Ok(data) => Some(KeyData::new(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(slot, error = %e, "failed to read key slot");
                None
            }
        }
    }

    fn delete(&self, slot: &str) -> bool {
        let path = self.slot_path(slot);
        if !path.exists() {
            return false;
        }
        match Self::zeroize_and_remove(&path) {
            Ok(()) => {
                debug!(slot, "key slot deleted");
                true
            }
            Err(e) => {
                warn!(slot, error = %e, "failed to delete key slot");
                false
            }
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.meta_path(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        match Self::write_private(&self.meta_path(key), value.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "failed to write metadata");
                false
            }
        }
    }

    fn remove(&self, key: &str) -> bool {
        match fs::remove_file(self.meta_path(key)) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(key, error = %e, "failed to remove metadata");
                false
            }
        }
    }
}
