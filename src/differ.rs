//! Dependency Snapshot Differ
//!
//! Diffs the style/script queues before and after each nested render to find
//! the handles that render activated. Baseline advances on every checkpoint so
//! an activation is collected exactly once.

use std::collections::HashSet;
use thiserror::Error;

use crate::handles::{DependencyQueues, Handle, OrderedHandleSet};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("A dependency capture is already in progress")]
    AlreadyActive,

    #[error("No dependency capture is in progress")]
    NotActive,
}

/// Handles collected by one capture, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedHandles {
    pub styles: OrderedHandleSet,
    pub scripts: OrderedHandleSet,
}

#[derive(Debug)]
struct Capture {
    baseline_styles: HashSet<Handle>,
    baseline_scripts: HashSet<Handle>,
    collected: CapturedHandles,
}

#[derive(Debug, Default)]
pub struct SnapshotDiffer {
    active: Option<Capture>,
}

impl SnapshotDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn start_capture(&mut self, queues: &DependencyQueues) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyActive);
        }
        self.active = Some(Capture {
            baseline_styles: queues.styles.snapshot().into_iter().collect(),
            baseline_scripts: queues.scripts.snapshot().into_iter().collect(),
            collected: CapturedHandles::default(),
        });
        Ok(())
    }

    /// Collect `now - baseline` for both queues, then advance the baseline.
    pub fn checkpoint(&mut self, queues: &DependencyQueues) -> Result<(), CaptureError> {
        let capture = self.active.as_mut().ok_or(CaptureError::NotActive)?;

        let styles_now = queues.styles.snapshot();
        collect_new(&styles_now, &capture.baseline_styles, &mut capture.collected.styles);
        capture.baseline_styles = styles_now.into_iter().collect();

        let scripts_now = queues.scripts.snapshot();
        collect_new(&scripts_now, &capture.baseline_scripts, &mut capture.collected.scripts);
        capture.baseline_scripts = scripts_now.into_iter().collect();

        Ok(())
    }

    /// Direct access to the collected sets, for structural additions.
    pub fn collected_mut(&mut self) -> Result<&mut CapturedHandles, CaptureError> {
        self.active
            .as_mut()
            .map(|c| &mut c.collected)
            .ok_or(CaptureError::NotActive)
    }

    pub fn finish_capture(&mut self) -> Result<CapturedHandles, CaptureError> {
        self.active
            .take()
            .map(|c| c.collected)
            .ok_or(CaptureError::NotActive)
    }
}

fn collect_new(now: &[Handle], baseline: &HashSet<Handle>, into: &mut OrderedHandleSet) {
    for handle in now {
        if !baseline.contains(handle) {
            into.insert(handle.clone());
        }
    }
}
