//! Fragments - Read-Only View of the Content Store

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKeys};
use crate::tiers::{Clock, FastTier};

pub type FragmentId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentStatus {
    Publish,
    #[default]
    Draft,
    Pending,
    Private,
    Future,
    Trash,
}

impl FragmentStatus {
    pub fn is_publicly_visible(&self) -> bool {
        matches!(self, FragmentStatus::Publish)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub id: FragmentId,
    pub content: String,
    #[serde(default)]
    pub status: FragmentStatus,
    #[serde(default)]
    pub access_password: Option<String>,
    #[serde(default)]
    pub shareable: bool,
}

impl Fragment {
    pub fn is_access_restricted(&self) -> bool {
        self.access_password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// All four gates at once; callers never learn which one failed.
    pub fn is_renderable(&self) -> bool {
        self.status.is_publicly_visible() && !self.is_access_restricted() && self.shareable
    }
}

pub trait ContentProvider: Send + Sync {
    fn get_fragment(&self, id: FragmentId) -> Option<Fragment>;
}

/// Content provider backed by a fast-tier "fragment object" entry.
///
/// The entry has its own TTL, independent of the render cache, and is
/// cleared together with the render entry by `RenderCache::delete`.
pub struct CachedContentProvider {
    inner: Arc<dyn ContentProvider>,
    fast: Arc<dyn FastTier>,
    clock: Arc<dyn Clock>,
    keys: CacheKeys,
    ttl: Duration,
}

impl CachedContentProvider {
    pub fn new(
        inner: Arc<dyn ContentProvider>,
        fast: Arc<dyn FastTier>,
        clock: Arc<dyn Clock>,
        keys: CacheKeys,
        ttl: Duration,
    ) -> Self {
        Self { inner, fast, clock, keys, ttl }
    }

    fn cached(&self, key: &str) -> Option<Fragment> {
        match self.fast.get(key) {
            Ok(Some(raw)) => serde_json::from_str::<CacheEntry<Fragment>>(&raw)
                .ok()
                .and_then(CacheEntry::open),
            Ok(None) => None,
            Err(e) => {
                warn!("Fragment object cache unavailable: {}", e);
                None
            }
        }
    }
}

impl ContentProvider for CachedContentProvider {
    fn get_fragment(&self, id: FragmentId) -> Option<Fragment> {
        let key = self.keys.object(id);
        if let Some(fragment) = self.cached(&key) {
            debug!(fragment_id = id, "fragment object cache hit");
            return Some(fragment);
        }

        let fragment = self.inner.get_fragment(id)?;
        match CacheEntry::seal(id, fragment.clone(), self.clock.now(), self.ttl)
            .and_then(|entry| serde_json::to_string(&entry))
        {
            Ok(raw) => {
                if let Err(e) = self.fast.set(&key, self.keys.namespace(), raw, self.ttl) {
                    warn!(fragment_id = id, "Failed to cache fragment object: {}", e);
                }
            }
            Err(e) => warn!(fragment_id = id, "Failed to encode fragment object: {}", e),
        }
        Some(fragment)
    }
}
