//! Transform Pipeline - Priority-Ordered Stages
//!
//! Stages run in ascending priority; ties keep registration order. At most
//! one stage renders nested components, and the dependency capture is active
//! only around that stage.

use std::sync::Arc;
use thiserror::Error;
use tracing::{trace, warn};

use crate::differ::{CaptureError, CapturedHandles, SnapshotDiffer};
use crate::fragment::FragmentId;
use crate::handles::DependencyQueues;
use crate::scanner::{RenderedComponent, StructuralScanner};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage '{0}' renders nested components but another such stage is already registered")]
    DuplicateNestedStage(String),

    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Dependency capture error: {0}")]
    Capture(#[from] CaptureError),
}

/// Per-call state. Each render owns one; nothing here is shared.
#[derive(Debug)]
pub struct RenderScope {
    pub fragment_id: FragmentId,
    pub queues: DependencyQueues,
    pub differ: SnapshotDiffer,
    pub discovered: CapturedHandles,
}

impl RenderScope {
    pub fn new(fragment_id: FragmentId, queues: DependencyQueues) -> Self {
        Self {
            fragment_id,
            queues,
            differ: SnapshotDiffer::new(),
            discovered: CapturedHandles::default(),
        }
    }
}

pub trait TransformStage: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, content: String, scope: &mut RenderScope) -> Result<String, PipelineError>;

    fn renders_nested(&self) -> bool {
        false
    }
}

/// Wraps a plain content transform.
pub struct FnStage<F> {
    name: String,
    transform: F,
}

impl<F> FnStage<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    pub fn new(name: impl Into<String>, transform: F) -> Self {
        Self {
            name: name.into(),
            transform,
        }
    }
}

impl<F> TransformStage for FnStage<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, content: String, _scope: &mut RenderScope) -> Result<String, PipelineError> {
        Ok((self.transform)(&content))
    }
}

/// Notified after each nested component finishes rendering.
pub trait ComponentObserver {
    fn component_rendered(&mut self, component: &RenderedComponent, queues: &DependencyQueues);
}

/// Host collaborator that renders the nested components inside content.
///
/// Implementations enqueue whatever the component activates into `queues`
/// and call the observer once per component, after it has rendered.
pub trait NestedRenderer: Send + Sync {
    fn render_nested(
        &self,
        content: &str,
        queues: &mut DependencyQueues,
        observer: &mut dyn ComponentObserver,
    ) -> Result<String, PipelineError>;
}

struct CaptureObserver<'a> {
    differ: &'a mut SnapshotDiffer,
    scanner: &'a StructuralScanner,
}

impl ComponentObserver for CaptureObserver<'_> {
    fn component_rendered(&mut self, component: &RenderedComponent, queues: &DependencyQueues) {
        if let Err(e) = self.differ.checkpoint(queues) {
            warn!(component = %component.component_type, "Dependency checkpoint failed: {}", e);
            return;
        }
        match self.differ.collected_mut() {
            Ok(collected) => self.scanner.scan(component, collected),
            Err(e) => warn!("Structural scan skipped: {}", e),
        }
    }
}

pub struct NestedComponentStage {
    renderer: Arc<dyn NestedRenderer>,
    scanner: StructuralScanner,
}

impl NestedComponentStage {
    pub fn new(renderer: Arc<dyn NestedRenderer>, scanner: StructuralScanner) -> Self {
        Self { renderer, scanner }
    }
}

impl TransformStage for NestedComponentStage {
    fn name(&self) -> &str {
        "nested_components"
    }

    fn renders_nested(&self) -> bool {
        true
    }

    fn apply(&self, content: String, scope: &mut RenderScope) -> Result<String, PipelineError> {
        scope.differ.start_capture(&scope.queues)?;

        let rendered = {
            let mut observer = CaptureObserver {
                differ: &mut scope.differ,
                scanner: &self.scanner,
            };
            self.renderer.render_nested(&content, &mut scope.queues, &mut observer)
        };

        // Finish even when rendering failed so the scope is reusable.
        let captured = scope.differ.finish_capture()?;
        let rendered = rendered?;

        scope.discovered.styles.extend(captured.styles.into_vec());
        scope.discovered.scripts.extend(captured.scripts.into_vec());
        Ok(rendered)
    }
}

struct RegisteredStage {
    priority: i32,
    order: usize,
    stage: Box<dyn TransformStage>,
}

#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<RegisteredStage>,
}

impl PipelineBuilder {
    pub fn register(
        &mut self,
        stage: impl TransformStage + 'static,
        priority: i32,
    ) -> Result<&mut Self, PipelineError> {
        if stage.renders_nested() && self.stages.iter().any(|s| s.stage.renders_nested()) {
            return Err(PipelineError::DuplicateNestedStage(stage.name().to_string()));
        }
        let order = self.stages.len();
        self.stages.push(RegisteredStage {
            priority,
            order,
            stage: Box::new(stage),
        });
        Ok(self)
    }

    pub fn build(mut self) -> TransformPipeline {
        self.stages.sort_by_key(|s| (s.priority, s.order));
        TransformPipeline { stages: self.stages }
    }
}

pub struct TransformPipeline {
    stages: Vec<RegisteredStage>,
}

impl TransformPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage.name()).collect()
    }

    pub fn run(&self, initial: String, scope: &mut RenderScope) -> Result<String, PipelineError> {
        let mut content = initial;
        for registered in &self.stages {
            trace!(
                stage = registered.stage.name(),
                priority = registered.priority,
                fragment_id = scope.fragment_id,
                "running stage"
            );
            content = registered.stage.apply(content, scope)?;
        }
        Ok(content)
    }
}
