//! In-Memory Site - Collaborators Backed by a JSON Fixture
//!
//! Stands in for the host system: content store, dependency registries,
//! variation registry, style engine and nested-component renderer. Nested
//! components are written in content as `<!-- component:NAME /-->`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::config::{ConfigError, Settings};
use crate::fragment::{ContentProvider, Fragment, FragmentId};
use crate::handles::{AssetRecord, DependencyQueues, DependencyRegistry, Handle};
use crate::materializer::{AssetMaterializer, PassthroughUrlFilter};
use crate::pipeline::{ComponentObserver, NestedComponentStage, NestedRenderer, PipelineError, TransformPipeline};
use crate::renderer::{FragmentRenderer, StyleEngine};
use crate::scanner::{RenderedComponent, StructuralScanner, StyleVariationRegistry};

pub const NESTED_STAGE_PRIORITY: i32 = 9;

const PLACEHOLDER_OPEN: &str = "<!-- component:";
const PLACEHOLDER_CLOSE: &str = "/-->";

#[derive(Default)]
pub struct MemoryContentStore {
    fragments: RwLock<HashMap<FragmentId, Fragment>>,
}

impl MemoryContentStore {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self {
            fragments: RwLock::new(fragments.into_iter().map(|f| (f.id, f)).collect()),
        }
    }

    pub fn put(&self, fragment: Fragment) {
        if let Ok(mut map) = self.fragments.write() {
            map.insert(fragment.id, fragment);
        }
    }

    pub fn remove(&self, id: FragmentId) -> Option<Fragment> {
        self.fragments.write().ok()?.remove(&id)
    }
}

impl ContentProvider for MemoryContentStore {
    fn get_fragment(&self, id: FragmentId) -> Option<Fragment> {
        self.fragments.read().ok()?.get(&id).cloned()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryRegistry {
    #[serde(default)]
    pub queue: Vec<Handle>,
    #[serde(default)]
    pub records: HashMap<Handle, AssetRecord>,
}

impl MemoryRegistry {
    pub fn with_record(mut self, handle: &str, record: AssetRecord) -> Self {
        self.records.insert(handle.to_string(), record);
        self
    }
}

impl DependencyRegistry for MemoryRegistry {
    fn current_queue(&self) -> Vec<Handle> {
        self.queue.clone()
    }

    fn record_for(&self, handle: &str) -> Option<AssetRecord> {
        self.records.get(handle).cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationEntry {
    pub component_type: String,
    pub slug: String,
    pub handle: Handle,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryVariationRegistry {
    entries: HashMap<(String, String), Handle>,
}

impl MemoryVariationRegistry {
    pub fn new(entries: &[VariationEntry]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|e| ((e.component_type.clone(), e.slug.clone()), e.handle.clone()))
                .collect(),
        }
    }
}

impl StyleVariationRegistry for MemoryVariationRegistry {
    fn lookup(&self, component_type: &str, slug: &str) -> Option<Handle> {
        self.entries
            .get(&(component_type.to_string(), slug.to_string()))
            .cloned()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticStyleEngine {
    #[serde(default)]
    pub block_supports_css: String,
    #[serde(default)]
    pub variation_css: HashMap<String, String>,
    #[serde(default)]
    pub global_stylesheet: String,
}

impl StyleEngine for StaticStyleEngine {
    fn computed_css(&self, _context: &str) -> String {
        self.block_supports_css.clone()
    }

    fn variation_css(&self, name: &str) -> String {
        self.variation_css.get(name).cloned().unwrap_or_default()
    }

    fn global_stylesheet(&self) -> String {
        self.global_stylesheet.clone()
    }
}

/// A nested component and what rendering it activates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentFixture {
    pub name: String,
    pub component: RenderedComponent,
    #[serde(default)]
    pub enqueue_styles: Vec<Handle>,
    #[serde(default)]
    pub enqueue_scripts: Vec<Handle>,
}

#[derive(Debug, Clone, Default)]
pub struct PlaceholderRenderer {
    components: HashMap<String, ComponentFixture>,
}

impl PlaceholderRenderer {
    pub fn new(components: Vec<ComponentFixture>) -> Self {
        Self {
            components: components.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }
}

impl NestedRenderer for PlaceholderRenderer {
    fn render_nested(
        &self,
        content: &str,
        queues: &mut DependencyQueues,
        observer: &mut dyn ComponentObserver,
    ) -> Result<String, PipelineError> {
        let mut out = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find(PLACEHOLDER_OPEN) {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + PLACEHOLDER_OPEN.len()..];
            let end = after_open.find(PLACEHOLDER_CLOSE).ok_or_else(|| PipelineError::Stage {
                stage: "nested_components".to_string(),
                message: "unterminated component placeholder".to_string(),
            })?;
            let name = after_open[..end].trim();

            match self.components.get(name) {
                Some(fixture) => {
                    for handle in &fixture.enqueue_styles {
                        queues.styles.enqueue(handle.clone());
                    }
                    for handle in &fixture.enqueue_scripts {
                        queues.scripts.enqueue(handle.clone());
                    }
                    out.push_str(&fixture.component.markup);
                    observer.component_rendered(&fixture.component, queues);
                }
                None => tracing::debug!(component = name, "unknown component placeholder dropped"),
            }
            rest = &after_open[end + PLACEHOLDER_CLOSE.len()..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Everything a site fixture file holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteFixture {
    #[serde(default)]
    pub fragments: Vec<Fragment>,
    #[serde(default)]
    pub styles: MemoryRegistry,
    #[serde(default)]
    pub scripts: MemoryRegistry,
    #[serde(default)]
    pub variations: Vec<VariationEntry>,
    #[serde(default)]
    pub components: Vec<ComponentFixture>,
    #[serde(default)]
    pub css: StaticStyleEngine,
}

impl SiteFixture {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// A fixture wired into live collaborators.
pub struct MemorySite {
    pub content: Arc<MemoryContentStore>,
    pub styles: Arc<MemoryRegistry>,
    pub scripts: Arc<MemoryRegistry>,
    pub variations: Arc<MemoryVariationRegistry>,
    pub nested: Arc<PlaceholderRenderer>,
    pub css: Arc<StaticStyleEngine>,
}

impl MemorySite {
    pub fn from_fixture(fixture: SiteFixture) -> Self {
        Self {
            content: Arc::new(MemoryContentStore::new(fixture.fragments)),
            styles: Arc::new(fixture.styles),
            scripts: Arc::new(fixture.scripts),
            variations: Arc::new(MemoryVariationRegistry::new(&fixture.variations)),
            nested: Arc::new(PlaceholderRenderer::new(fixture.components)),
            css: Arc::new(fixture.css),
        }
    }

    pub fn materializer(&self, settings: &Settings) -> AssetMaterializer {
        AssetMaterializer::new(
            self.styles.clone(),
            self.scripts.clone(),
            Arc::new(PassthroughUrlFilter),
            &settings.assets,
        )
    }

    /// Renderer with the nested-component stage as its only stage.
    pub fn renderer(&self, settings: &Settings) -> Result<FragmentRenderer, PipelineError> {
        let scanner = StructuralScanner::new(self.variations.clone(), settings.assets.variation_handle.clone());
        let mut builder = TransformPipeline::builder();
        builder.register(
            NestedComponentStage::new(self.nested.clone(), scanner),
            NESTED_STAGE_PRIORITY,
        )?;

        Ok(FragmentRenderer::new(
            self.content.clone(),
            builder.build(),
            self.css.clone(),
            self.materializer(settings),
            &settings.assets,
        ))
    }
}
