//! Cache Tiers - Fast (memory) and Durable (filesystem) Stores
//!
//! Tiers store opaque strings with a TTL. Expiry is judged against an
//! injected [`Clock`] so tests can move time forward.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::hashing::sha256_hex;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache tier unavailable: {0}")]
    Unavailable(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Zero TTL never expires.
fn expiry(clock: &dyn Clock, ttl: Duration) -> Option<DateTime<Utc>> {
    if ttl.is_zero() {
        return None;
    }
    chrono::Duration::from_std(ttl).ok().map(|d| clock.now() + d)
}

fn is_expired(clock: &dyn Clock, expires_at: Option<DateTime<Utc>>) -> bool {
    expires_at.is_some_and(|at| at <= clock.now())
}

/// In-process tier. `group` is the namespace used for bulk flushes.
pub trait FastTier: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, group: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// `Ok(None)` when the tier cannot flush by group.
    fn flush_group(&self, _group: &str) -> Result<Option<usize>, CacheError> {
        Ok(None)
    }
}

/// Persistent tier. No group flush; bulk removal is by key prefix.
pub trait DurableTier: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    fn delete(&self, key: &str) -> Result<bool, CacheError>;
    fn delete_by_prefix(&self, prefix: &str) -> Result<usize, CacheError>;
}

// --- Memory ---

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    group: String,
    expires_at: Option<DateTime<Utc>>,
}

pub struct MemoryTier {
    entries: DashMap<String, MemoryEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryTier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if !is_expired(self.clock.as_ref(), entry.expires_at) {
                return Some(entry.value.clone());
            }
        }
        // Re-checked under the shard lock: a fresh entry written since the read stays.
        self.entries
            .remove_if(key, |_, entry| is_expired(self.clock.as_ref(), entry.expires_at));
        None
    }

    fn insert(&self, key: &str, group: &str, value: String, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                group: group.to_string(),
                expires_at: expiry(self.clock.as_ref(), ttl),
            },
        );
    }
}

impl FastTier for MemoryTier {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.lookup(key))
    }

    fn set(&self, key: &str, group: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.insert(key, group, value, ttl);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn flush_group(&self, group: &str) -> Result<Option<usize>, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.group != group);
        Ok(Some(before - self.entries.len()))
    }
}

impl DurableTier for MemoryTier {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.lookup(key))
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.insert(key, "", value, ttl);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn delete_by_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - self.entries.len())
    }
}

// --- Filesystem ---

#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    key: String,
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// One JSON file per key. File names are key hashes; the key lives inside.
pub struct FileTier {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileTier {
    pub fn open(dir: &Path, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            clock,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sha256_hex(key.as_bytes())))
    }

    fn read_record(path: &Path) -> Result<Option<FileRecord>, CacheError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(path: &Path) -> Result<bool, CacheError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl DurableTier for FileTier {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.path_for(key);
        let Some(record) = Self::read_record(&path)? else {
            return Ok(None);
        };
        if record.key != key {
            return Ok(None);
        }
        if is_expired(self.clock.as_ref(), record.expires_at) {
            Self::remove(&path)?;
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let record = FileRecord {
            key: key.to_string(),
            value,
            expires_at: expiry(self.clock.as_ref(), ttl),
        };
        let hash = sha256_hex(key.as_bytes());
        let path = self.dir.join(format!("{}.json", hash));
        // Each writer stages its own file; the last rename wins whole.
        let tmp = self.dir.join(format!("{}.{}.tmp", hash, Uuid::new_v4()));
        fs::write(&tmp, serde_json::to_vec(&record)?)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Self::remove(&self.path_for(key))
    }

    fn delete_by_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut deleted = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(Some(record)) if record.key.starts_with(prefix) => {
                    if Self::remove(&path)? {
                        deleted += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable cache file {}: {}", path.display(), e),
            }
        }
        Ok(deleted)
    }
}
