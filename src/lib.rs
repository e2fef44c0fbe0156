//! Fragment Render Core - Standalone Fragment Rendering
//!
//! # Guarantees
//! 1. Restricted Content Is Indistinguishable From Missing Content
//! 2. Discovery Order Is Wire Order
//! 3. One Bad Asset Never Fails A Render
//! 4. Caching Is An Optimization, Never A Dependency
//! 5. Gallery Order Is All-Or-Nothing

pub mod handles;
pub mod differ;
pub mod markup;
pub mod scanner;
pub mod materializer;
pub mod pipeline;
pub mod renderer;
pub mod fragment;
pub mod tiers;
pub mod cache;
pub mod invalidation;
pub mod gallery;
pub mod hashing;
pub mod config;
pub mod memory;

pub use handles::{AssetKind, AssetRecord, DependencyQueues, DependencyRegistry, Handle, OrderedHandleSet};
pub use differ::{CaptureError, CapturedHandles, SnapshotDiffer};
pub use scanner::{RenderedComponent, StructuralScanner, StyleVariationRegistry};
pub use materializer::{AssetMaterialization, AssetMaterializer, UrlFilter};
pub use pipeline::{NestedComponentStage, NestedRenderer, PipelineError, RenderScope, TransformPipeline, TransformStage};
pub use renderer::{FragmentRenderer, RenderError, RenderPayload, RenderResult, StyleEngine};
pub use fragment::{CachedContentProvider, ContentProvider, Fragment, FragmentId, FragmentStatus};
pub use tiers::{CacheError, Clock, DurableTier, FastTier, FileTier, ManualClock, MemoryTier, SystemClock};
pub use cache::{CacheKeys, CacheLookup, RenderCache};
pub use invalidation::{FragmentChange, InvalidationOutcome, Invalidator};
pub use gallery::{GalleryDataset, GalleryItem, GalleryReconciler, ReconcileOutcome};
pub use hashing::{canonical_json, fingerprint};
pub use config::Settings;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
