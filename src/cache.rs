//! Render Cache - Two Tiers, Write-Through
//!
//! Reads try the fast tier, then the durable tier (re-priming the fast tier
//! on a durable hit). Writes go to both under one derived key. Every tier
//! failure degrades to a miss; caching never fails a render.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CacheSettings;
use crate::fragment::FragmentId;
use crate::hashing::fingerprint;
use crate::renderer::RenderResult;
use crate::tiers::{Clock, DurableTier, FastTier};
use crate::ENGINE_VERSION;

/// Derives every key this crate writes, all under one namespace.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    namespace: String,
}

impl CacheKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into() }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn render(&self, id: FragmentId) -> String {
        format!("{}:render:{}", self.namespace, id)
    }

    pub fn object(&self, id: FragmentId) -> String {
        format!("{}:object:{}", self.namespace, id)
    }

    /// Matches every key in the namespace
    pub fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }
}

/// Envelope stored in both tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub fragment_id: FragmentId,
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub engine_version: String,
    pub fingerprint: String,
}

impl<T: Serialize + DeserializeOwned> CacheEntry<T> {
    pub fn seal(
        fragment_id: FragmentId,
        value: T,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self, serde_json::Error> {
        let fingerprint = fingerprint(&value)?;
        Ok(Self {
            fragment_id,
            value,
            created_at,
            ttl_secs: ttl.as_secs(),
            engine_version: ENGINE_VERSION.to_string(),
            fingerprint,
        })
    }

    /// The value, if it is intact and was written by a compatible engine.
    pub fn open(self) -> Option<T> {
        if !is_compatible_engine(&self.engine_version) {
            debug!(version = %self.engine_version, "discarding entry from incompatible engine");
            return None;
        }
        match fingerprint(&self.value) {
            Ok(fp) if fp == self.fingerprint => Some(self.value),
            _ => {
                warn!(fragment_id = self.fragment_id, "Discarding cache entry with bad fingerprint");
                None
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn is_compatible_engine(written_by: &str) -> bool {
    match (semver::Version::parse(written_by), semver::Version::parse(ENGINE_VERSION)) {
        (Ok(theirs), Ok(ours)) => theirs.major == ours.major,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(RenderResult),
    Miss,
}

impl CacheLookup {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheLookup::Miss)
    }

    pub fn into_hit(self) -> Option<RenderResult> {
        match self {
            CacheLookup::Hit(result) => Some(result),
            CacheLookup::Miss => None,
        }
    }
}

pub struct RenderCache {
    fast: Arc<dyn FastTier>,
    durable: Arc<dyn DurableTier>,
    clock: Arc<dyn Clock>,
    keys: CacheKeys,
    ttl: Duration,
}

impl RenderCache {
    /// The effective TTL is resolved here, once.
    pub fn new(
        fast: Arc<dyn FastTier>,
        durable: Arc<dyn DurableTier>,
        clock: Arc<dyn Clock>,
        settings: &CacheSettings,
    ) -> Self {
        Self {
            fast,
            durable,
            clock,
            keys: CacheKeys::new(settings.namespace.clone()),
            ttl: settings.effective_ttl(),
        }
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn effective_ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, id: FragmentId) -> CacheLookup {
        let key = self.keys.render(id);

        match self.fast.get(&key) {
            Ok(Some(raw)) => {
                if let Some(entry) = decode(&raw) {
                    if let Some(result) = entry.open() {
                        debug!(fragment_id = id, "render cache fast hit");
                        return CacheLookup::Hit(result);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!(fragment_id = id, "Fast cache tier unavailable: {}", e),
        }

        let raw = match self.durable.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheLookup::Miss,
            Err(e) => {
                warn!(fragment_id = id, "Durable cache tier unavailable: {}", e);
                return CacheLookup::Miss;
            }
        };

        let Some(entry) = decode(&raw) else {
            return CacheLookup::Miss;
        };
        let ttl = entry.ttl();
        let Some(result) = entry.open() else {
            return CacheLookup::Miss;
        };

        if let Err(e) = self.fast.set(&key, self.keys.namespace(), raw, ttl) {
            warn!(fragment_id = id, "Failed to re-prime fast cache tier: {}", e);
        }
        debug!(fragment_id = id, "render cache durable hit, fast tier re-primed");
        CacheLookup::Hit(result)
    }

    /// Write-through to both tiers with the effective TTL.
    pub fn store(&self, id: FragmentId, result: &RenderResult) {
        self.set(id, result, self.ttl);
    }

    pub fn set(&self, id: FragmentId, result: &RenderResult, ttl: Duration) {
        let raw = match CacheEntry::seal(id, result.clone(), self.clock.now(), ttl)
            .and_then(|entry| serde_json::to_string(&entry))
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(fragment_id = id, "Failed to encode render result: {}", e);
                return;
            }
        };

        let key = self.keys.render(id);
        if let Err(e) = self.fast.set(&key, self.keys.namespace(), raw.clone(), ttl) {
            warn!(fragment_id = id, "Fast cache tier write failed: {}", e);
        }
        if let Err(e) = self.durable.set(&key, raw, ttl) {
            warn!(fragment_id = id, "Durable cache tier write failed: {}", e);
        }
    }

    /// Drop the render entry from both tiers and the fragment object entry.
    pub fn delete(&self, id: FragmentId) {
        let render_key = self.keys.render(id);
        let object_key = self.keys.object(id);

        if let Err(e) = self.fast.delete(&render_key) {
            warn!(fragment_id = id, "Fast cache tier delete failed: {}", e);
        }
        if let Err(e) = self.durable.delete(&render_key) {
            warn!(fragment_id = id, "Durable cache tier delete failed: {}", e);
        }
        if let Err(e) = self.fast.delete(&object_key) {
            warn!(fragment_id = id, "Fragment object cache delete failed: {}", e);
        }
        debug!(fragment_id = id, "render cache entry invalidated");
    }

    /// Returns the number of durable entries removed.
    pub fn clear_all(&self) -> usize {
        match self.fast.flush_group(self.keys.namespace()) {
            Ok(Some(n)) => debug!(flushed = n, "fast cache tier group flushed"),
            Ok(None) => debug!("fast cache tier has no group flush; entries will expire"),
            Err(e) => warn!("Fast cache tier flush failed: {}", e),
        }

        match self.durable.delete_by_prefix(&self.keys.prefix()) {
            Ok(n) => {
                info!(deleted = n, "render cache cleared");
                n
            }
            Err(e) => {
                warn!("Durable cache tier clear failed: {}", e);
                0
            }
        }
    }
}

fn decode(raw: &str) -> Option<CacheEntry<RenderResult>> {
    match serde_json::from_str(raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("Discarding undecodable cache entry: {}", e);
            None
        }
    }
}
