//! Fragment Renderer - Single Entry Point
//!
//! CRITICAL: a fragment that is missing, not public, password-protected or
//! not shareable is NotFound. Which of the four failed is never surfaced.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::cache::{CacheLookup, RenderCache};
use crate::config::AssetSettings;
use crate::fragment::{ContentProvider, Fragment, FragmentId};
use crate::handles::{AssetKind, DependencyQueues, Handle};
use crate::materializer::{AssetMaterialization, AssetMaterializer};
use crate::pipeline::{PipelineError, RenderScope, TransformPipeline};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static RENDER_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_render_call_count() -> u32 {
    RENDER_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_render_call_count() {
    RENDER_CALL_COUNT.store(0, Ordering::SeqCst);
}

pub const BLOCK_SUPPORTS_CONTEXT: &str = "block-supports";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Content not available")]
    NotFound,

    #[error("Render failed: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Source of the CSS blobs computed outside the pipeline.
pub trait StyleEngine: Send + Sync {
    fn computed_css(&self, context: &str) -> String;
    fn variation_css(&self, name: &str) -> String;
    fn global_stylesheet(&self) -> String;
}

/// Kept apart so callers can inject them as distinct style elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralCss {
    pub block_supports_css: String,
    pub variation_css: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedAssets {
    pub styles: Vec<AssetMaterialization>,
    pub scripts: Vec<AssetMaterialization>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderResult {
    pub html: String,
    pub style_handles: Vec<Handle>,
    pub script_handles: Vec<Handle>,
    pub structural_css: StructuralCss,
    pub global_stylesheet: String,
    pub assets: MaterializedAssets,
}

/// Client wire format. Field names are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPayload {
    pub html: String,
    pub styles: Vec<Handle>,
    pub block_supports_css: String,
    pub block_style_variation_css: String,
    pub global_stylesheet: String,
    pub asset_data: MaterializedAssets,
}

impl RenderResult {
    pub fn to_payload(&self) -> RenderPayload {
        RenderPayload {
            html: self.html.clone(),
            styles: self.style_handles.clone(),
            block_supports_css: self.structural_css.block_supports_css.clone(),
            block_style_variation_css: self.structural_css.variation_css.clone(),
            global_stylesheet: self.global_stylesheet.clone(),
            asset_data: self.assets.clone(),
        }
    }
}

pub struct FragmentRenderer {
    content: Arc<dyn ContentProvider>,
    pipeline: TransformPipeline,
    style_engine: Arc<dyn StyleEngine>,
    materializer: AssetMaterializer,
    variation_css_name: String,
}

impl FragmentRenderer {
    pub fn new(
        content: Arc<dyn ContentProvider>,
        pipeline: TransformPipeline,
        style_engine: Arc<dyn StyleEngine>,
        materializer: AssetMaterializer,
        settings: &AssetSettings,
    ) -> Self {
        Self {
            content,
            pipeline,
            style_engine,
            materializer,
            variation_css_name: settings.variation_css_name.clone(),
        }
    }

    pub fn materializer(&self) -> &AssetMaterializer {
        &self.materializer
    }

    pub fn render(&self, id: FragmentId) -> Result<RenderResult, RenderError> {
        let span = tracing::debug_span!("render_fragment", fragment_id = id, render_id = %Uuid::new_v4());
        let _enter = span.enter();

        let fragment = self.renderable_fragment(id)?;
        self.render_fragment(fragment)
    }

    /// Serve from cache, rendering and storing on a miss. NotFound is never cached.
    ///
    /// The visibility gate runs against current content before the cache is
    /// consulted, so a fragment that stopped being renderable is never served
    /// from a stale entry.
    pub fn render_cached(&self, id: FragmentId, cache: &RenderCache) -> Result<RenderResult, RenderError> {
        let span = tracing::debug_span!("render_fragment", fragment_id = id, render_id = %Uuid::new_v4());
        let _enter = span.enter();

        let fragment = self.renderable_fragment(id)?;
        if let CacheLookup::Hit(result) = cache.get(id) {
            return Ok(result);
        }
        let result = self.render_fragment(fragment)?;
        cache.store(id, &result);
        Ok(result)
    }

    fn renderable_fragment(&self, id: FragmentId) -> Result<Fragment, RenderError> {
        match self.content.get_fragment(id) {
            Some(f) if f.is_renderable() => Ok(f),
            Some(f) => {
                debug!(
                    status = ?f.status,
                    restricted = f.is_access_restricted(),
                    shareable = f.shareable,
                    "fragment not renderable"
                );
                Err(RenderError::NotFound)
            }
            None => {
                debug!("fragment not found");
                Err(RenderError::NotFound)
            }
        }
    }

    fn render_fragment(&self, fragment: Fragment) -> Result<RenderResult, RenderError> {
        #[cfg(feature = "test-hooks")]
        RENDER_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let queues = DependencyQueues::seeded_from(
            self.materializer.registry(AssetKind::Style),
            self.materializer.registry(AssetKind::Script),
        );
        let mut scope = RenderScope::new(fragment.id, queues);
        let html = self.pipeline.run(fragment.content, &mut scope)?;

        let structural_css = StructuralCss {
            block_supports_css: self.style_engine.computed_css(BLOCK_SUPPORTS_CONTEXT),
            variation_css: self.style_engine.variation_css(&self.variation_css_name),
        };

        let style_handles = self
            .materializer
            .filter_style_handles(scope.discovered.styles.as_slice());
        let script_handles = scope.discovered.scripts.into_vec();

        let assets = MaterializedAssets {
            styles: self.materializer.materialize_all(&style_handles, AssetKind::Style),
            scripts: self.materializer.materialize_all(&script_handles, AssetKind::Script),
        };

        debug!(
            styles = style_handles.len(),
            scripts = script_handles.len(),
            "fragment rendered"
        );

        Ok(RenderResult {
            html,
            style_handles,
            script_handles,
            structural_css,
            global_stylesheet: self.style_engine.global_stylesheet(),
            assets,
        })
    }
}
