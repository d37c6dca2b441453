//! Persisted VIN -> decoded-vehicle/discovered-module cache, consumed and
//! written through an abstract interface (spec.md §3 "VIN Cache Entry", §6,
//! §4.8 step 8).
//!
//! VIN keys are normalized to uppercase-trimmed, each entry carries a
//! `cached_at` timestamp, a missing or corrupt file is treated as an empty
//! cache, and writes are last-writer-wins, sorted-key pretty JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One cached VIN's payload: caller-defined decoded attributes and an
/// optional discovered-module map, both opaque JSON values, plus the time
/// this entry was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VinCacheEntry {
    /// Decoded vehicle attributes (year/make/model/etc.), caller-defined shape.
    pub attributes: serde_json::Value,
    /// Discovered-module map from a UDS discovery run, if one has been
    /// attached to this VIN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_modules: Option<serde_json::Value>,
    /// When this entry was last written.
    pub cached_at: DateTime<Utc>,
}

/// Error reading or writing a [VinCache].
#[derive(Debug, thiserror::Error)]
pub enum VinCacheError {
    /// The cache file couldn't be written.
    #[error("failed to write VIN cache: {0}")]
    Io(#[from] std::io::Error),
    /// The cache entries couldn't be serialized to JSON.
    #[error("failed to serialize VIN cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Normalizes a VIN to its cache key form: uppercase, leading/trailing
/// whitespace trimmed.
pub fn normalize_vin(vin: &str) -> String {
    vin.trim().to_ascii_uppercase()
}

/// Abstract VIN -> entry persistence, so callers may swap in their own
/// storage engine without this crate depending on one. See spec.md §3 "VIN
/// Cache Entry" and §6 ("persisted JSON configuration" is an external
/// concern; only this trait boundary is in-core).
pub trait VinCache: Send + Sync {
    /// Looks up a previously-cached entry for `vin` (normalized internally).
    fn get(&self, vin: &str) -> Option<VinCacheEntry>;
    /// Writes (or overwrites) the entry for `vin` (normalized internally).
    fn set(&self, vin: &str, entry: VinCacheEntry) -> Result<(), VinCacheError>;
}

/// A [VinCache] backed by a single JSON file, keyed by normalized VIN.
#[derive(Debug, Clone)]
pub struct JsonFileVinCache {
    path: PathBuf,
}

impl JsonFileVinCache {
    /// Points the cache at `path`; the file is not required to exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the whole file, tolerating a missing or corrupt file as an
    /// empty map (never an error - matching `original_source`'s
    /// "file absence/corruption means no cache yet" behaviour).
    fn read_all(&self) -> BTreeMap<String, VinCacheEntry> {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        }
    }

    fn write_all(&self, map: &BTreeMap<String, VinCacheEntry>) -> Result<(), VinCacheError> {
        let text = serde_json::to_string_pretty(map)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, text)?;
        Ok(())
    }
}

impl VinCache for JsonFileVinCache {
    fn get(&self, vin: &str) -> Option<VinCacheEntry> {
        self.read_all().remove(&normalize_vin(vin))
    }

    fn set(&self, vin: &str, entry: VinCacheEntry) -> Result<(), VinCacheError> {
        let mut map = self.read_all();
        map.insert(normalize_vin(vin), entry);
        self.write_all(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("elm_diag_core_vin_cache_test_{name}_{:?}", std::thread::current().id()))
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let cache = JsonFileVinCache::new(tmp_path("missing"));
        assert!(cache.get("1C4RJFAG105KL573206").is_none());
    }

    #[test]
    fn set_then_get_round_trips_with_normalized_key() {
        let path = tmp_path("roundtrip");
        let _ = fs::remove_file(&path);
        let cache = JsonFileVinCache::new(&path);
        let entry = VinCacheEntry {
            attributes: serde_json::json!({"make": "Jeep", "year": 2010}),
            discovered_modules: None,
            cached_at: Utc::now(),
        };
        cache.set("  1c4rjfag105kl573206 ", entry.clone()).unwrap();
        let got = cache.get("1C4RJFAG105KL573206").unwrap();
        assert_eq!(got.attributes, entry.attributes);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let path = tmp_path("corrupt");
        fs::write(&path, b"not json").unwrap();
        let cache = JsonFileVinCache::new(&path);
        assert!(cache.get("ANY").is_none());
        let _ = fs::remove_file(&path);
    }
}
