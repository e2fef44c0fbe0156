//! Invalidation - Content Store Changes to Cache Deletes
//!
//! Shareability is read from the content store at the time of the change,
//! never from a cached copy. Invalidation never fails the caller.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::cache::RenderCache;
use crate::fragment::{ContentProvider, FragmentId, FragmentStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FragmentChange {
    Saved { id: FragmentId },
    StatusChanged { id: FragmentId, from: FragmentStatus, to: FragmentStatus },
    AccessChanged { id: FragmentId },
}

impl FragmentChange {
    pub fn id(&self) -> FragmentId {
        match self {
            FragmentChange::Saved { id }
            | FragmentChange::StatusChanged { id, .. }
            | FragmentChange::AccessChanged { id } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotShareable,
    VisibilityUnchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationOutcome {
    Invalidated,
    Skipped(SkipReason),
}

pub struct Invalidator {
    content: Arc<dyn ContentProvider>,
    cache: Arc<RenderCache>,
}

impl Invalidator {
    /// `content` must be the uncached store.
    pub fn new(content: Arc<dyn ContentProvider>, cache: Arc<RenderCache>) -> Self {
        Self { content, cache }
    }

    pub fn handle(&self, change: &FragmentChange) -> InvalidationOutcome {
        let id = change.id();

        // A fragment that no longer exists is invalidated unconditionally.
        let shareable = self
            .content
            .get_fragment(id)
            .map_or(true, |f| f.shareable);
        if !shareable {
            debug!(fragment_id = id, "change ignored: fragment not shareable");
            return InvalidationOutcome::Skipped(SkipReason::NotShareable);
        }

        if let FragmentChange::StatusChanged { from, to, .. } = change {
            if from.is_publicly_visible() == to.is_publicly_visible() {
                debug!(fragment_id = id, ?from, ?to, "change ignored: visibility unchanged");
                return InvalidationOutcome::Skipped(SkipReason::VisibilityUnchanged);
            }
        }

        self.cache.delete(id);
        InvalidationOutcome::Invalidated
    }
}
