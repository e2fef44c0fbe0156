//! Asset Handles - Queues, Registries, Ordered Sets
//!
//! A handle is an opaque id for a style or script asset. Order matters
//! everywhere in this module: it is part of the wire contract.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type Handle = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Style,
    Script,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Style => "style",
            AssetKind::Script => "script",
        }
    }
}

/// Registry entry for a handle, as the host registered it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
}

/// A global dependency registry (one for styles, one for scripts).
pub trait DependencyRegistry: Send + Sync {
    /// Handles currently enqueued, in enqueue order
    fn current_queue(&self) -> Vec<Handle>;

    fn record_for(&self, handle: &str) -> Option<AssetRecord>;
}

/// Insertion-ordered set of handles (first-seen wins).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedHandleSet {
    order: Vec<Handle>,
    seen: HashSet<Handle>,
}

impl OrderedHandleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the handle was not already present.
    pub fn insert(&mut self, handle: impl Into<Handle>) -> bool {
        let handle = handle.into();
        if self.seen.contains(&handle) {
            return false;
        }
        self.seen.insert(handle.clone());
        self.order.push(handle);
        true
    }

    pub fn extend<I, H>(&mut self, handles: I)
    where
        I: IntoIterator<Item = H>,
        H: Into<Handle>,
    {
        for handle in handles {
            self.insert(handle);
        }
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.seen.contains(handle)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[Handle] {
        &self.order
    }

    pub fn into_vec(self) -> Vec<Handle> {
        self.order
    }
}

/// An ordered queue of activated handles. Enqueuing an active handle is a no-op.
#[derive(Debug, Clone, Default)]
pub struct HandleQueue {
    active: OrderedHandleSet,
}

impl HandleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(handles: Vec<Handle>) -> Self {
        let mut queue = Self::new();
        queue.active.extend(handles);
        queue
    }

    pub fn enqueue(&mut self, handle: impl Into<Handle>) {
        self.active.insert(handle);
    }

    pub fn snapshot(&self) -> Vec<Handle> {
        self.active.as_slice().to_vec()
    }

    pub fn is_active(&self, handle: &str) -> bool {
        self.active.contains(handle)
    }
}

/// The style and script queues one render call enqueues into.
#[derive(Debug, Clone, Default)]
pub struct DependencyQueues {
    pub styles: HandleQueue,
    pub scripts: HandleQueue,
}

impl DependencyQueues {
    /// Seed a call-local queue pair from the registries' current queues.
    pub fn seeded_from(styles: &dyn DependencyRegistry, scripts: &dyn DependencyRegistry) -> Self {
        Self {
            styles: HandleQueue::seeded(styles.current_queue()),
            scripts: HandleQueue::seeded(scripts.current_queue()),
        }
    }

    pub fn queue_mut(&mut self, kind: AssetKind) -> &mut HandleQueue {
        match kind {
            AssetKind::Style => &mut self.styles,
            AssetKind::Script => &mut self.scripts,
        }
    }
}
