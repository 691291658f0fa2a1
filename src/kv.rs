//! Persistent key/value store contract (component B) and two test doubles.
//!
//! The concrete flash/filesystem backing is an external collaborator per
//! spec.md §1 — this module specifies only the trait, plus an in-memory
//! double (grounded on `neuron-state-memory`) and a filesystem-backed
//! double (grounded on `neuron-state-fs`) used by this crate's own tests
//! and by hosts without a real flash layer yet.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::KvError;

/// `write(key, bytes)`, `read(key, buf) -> size`, `list_keys()` (§2 component B).
pub trait KvStore: Send + Sync {
    /// Persist `value` under `key`, overwriting any prior value
    /// (last-writer-wins per §1 Non-goals).
    fn write(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// Read the bytes stored under `key`, or `Ok(None)` if absent.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// List every key currently stored. Callers filter by prefix
    /// themselves (§6 "Persistent storage keys").
    fn list_keys(&self) -> Result<Vec<String>, KvError>;

    /// Remove a key. Absent keys are not an error.
    fn delete(&self, key: &str) -> Result<(), KvError>;
}

/// In-memory `KvStore`, for tests and hosts without persistence.
///
/// Grounded on `neuron-state-memory::MemoryStore`, minus the async
/// wrapper — the core here is specified single-threaded (§5), so a
/// `Mutex<HashMap<..>>` guards against accidental concurrent host use
/// without requiring an async runtime.
#[derive(Default)]
pub struct MemoryKvStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn write(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn list_keys(&self) -> Result<Vec<String>, KvError> {
        Ok(self.data.lock().unwrap().keys().cloned().collect())
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Filesystem-backed `KvStore`: one file per key under a root directory.
///
/// Grounded on `neuron-state-fs::FsStore`'s key-to-filename encoding, made
/// synchronous to match this crate's single-threaded core.
pub struct FsKvStore {
    root: PathBuf,
}

impl FsKvStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key_to_filename(key))
    }
}

fn key_to_filename(key: &str) -> String {
    let mut encoded = String::new();
    for ch in key.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => encoded.push(ch),
            _ => {
                for byte in ch.to_string().as_bytes() {
                    encoded.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    format!("{encoded}.bin")
}

fn filename_to_key(filename: &str) -> Option<String> {
    let name = filename.strip_suffix(".bin")?;
    let mut result = Vec::new();
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok()?;
            result.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(result).ok()
}

impl KvStore for FsKvStore {
    fn write(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        std::fs::create_dir_all(&self.root).map_err(|e| KvError::WriteFailed(e.to_string()))?;
        std::fs::write(self.path_for(key), value).map_err(|e| KvError::WriteFailed(e.to_string()))
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KvError::WriteFailed(e.to_string())),
        }
    }

    fn list_keys(&self) -> Result<Vec<String>, KvError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(KvError::WriteFailed(e.to_string())),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KvError::WriteFailed(e.to_string()))?;
            if let Some(name) = entry.file_name().to_str().and_then(filename_to_key) {
                keys.push(name);
            }
        }
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) | Err(_) => Ok(()),
        }
    }
}

/// Helper used by hosts to check a key's namespace prefix (§6).
pub fn is_tool_key(key: &str) -> Option<&str> {
    key.strip_prefix("tool.")
}

/// The fixed key under which the auth snapshot is persisted (§6).
pub const AUTH_CONFIG_KEY: &str = "mcp_auth_config";
