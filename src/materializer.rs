//! Asset Materializer - Rule/Resolution Separation
//!
//! Exclusion rules decide which style handles may ship to a standalone render.
//! Resolution turns the surviving handles into URLs and inline snippets.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{trace, warn};

use crate::config::AssetSettings;
use crate::handles::{AssetKind, DependencyRegistry, Handle};

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("URL filter rejected {handle}: {reason}")]
    Filter { handle: String, reason: String },
}

/// A handle resolved into something a client can load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMaterialization {
    pub handle: Handle,
    pub src: String,
    pub inline_before: String,
    pub inline_after: String,
}

impl AssetMaterialization {
    fn is_empty(&self) -> bool {
        self.src.is_empty() && self.inline_before.is_empty() && self.inline_after.is_empty()
    }
}

/// Host-provided hook applied to every resolved URL.
pub trait UrlFilter: Send + Sync {
    fn filter_url(&self, url: &str, handle: &str, kind: AssetKind) -> Result<String, MaterializeError>;
}

pub struct PassthroughUrlFilter;

impl UrlFilter for PassthroughUrlFilter {
    fn filter_url(&self, url: &str, _handle: &str, _kind: AssetKind) -> Result<String, MaterializeError> {
        Ok(url.to_string())
    }
}

// --- Exclusion Rules ---

pub trait ExclusionRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn excludes(&self, handle: &str) -> bool;
}

pub struct ExactMatchRule {
    name: &'static str,
    handles: HashSet<String>,
}

impl ExactMatchRule {
    pub fn new(name: &'static str, handles: &[String]) -> Self {
        Self {
            name,
            handles: handles.iter().cloned().collect(),
        }
    }
}

impl ExclusionRule for ExactMatchRule {
    fn name(&self) -> &'static str { self.name }

    fn excludes(&self, handle: &str) -> bool {
        self.handles.contains(handle)
    }
}

pub struct PrefixRule {
    name: &'static str,
    prefixes: Vec<String>,
}

impl PrefixRule {
    pub fn new(name: &'static str, prefixes: &[String]) -> Self {
        Self {
            name,
            prefixes: prefixes.to_vec(),
        }
    }
}

impl ExclusionRule for PrefixRule {
    fn name(&self) -> &'static str { self.name }

    fn excludes(&self, handle: &str) -> bool {
        self.prefixes.iter().any(|p| handle.starts_with(p.as_str()))
    }
}

/// Ordered exclusion rules; the first match removes a handle.
pub struct StyleHandleFilter {
    rules: Vec<Box<dyn ExclusionRule>>,
}

impl StyleHandleFilter {
    pub fn from_settings(settings: &AssetSettings) -> Self {
        Self {
            rules: vec![
                Box::new(ExactMatchRule::new("baseline", &settings.baseline_excluded)),
                Box::new(ExactMatchRule::new("editor_only", &settings.editor_only)),
                Box::new(PrefixRule::new("editor_only_prefix", &settings.editor_only_prefixes)),
            ],
        }
    }

    pub fn filter(&self, handles: &[Handle]) -> Vec<Handle> {
        handles
            .iter()
            .filter(|handle| match self.rules.iter().find(|r| r.excludes(handle)) {
                Some(rule) => {
                    trace!(handle = %handle, rule = rule.name(), "style handle excluded");
                    false
                }
                None => true,
            })
            .cloned()
            .collect()
    }
}

// --- Resolution ---

pub struct AssetMaterializer {
    styles: Arc<dyn DependencyRegistry>,
    scripts: Arc<dyn DependencyRegistry>,
    url_filter: Arc<dyn UrlFilter>,
    base_url: String,
    style_filter: StyleHandleFilter,
}

impl AssetMaterializer {
    pub fn new(
        styles: Arc<dyn DependencyRegistry>,
        scripts: Arc<dyn DependencyRegistry>,
        url_filter: Arc<dyn UrlFilter>,
        settings: &AssetSettings,
    ) -> Self {
        Self {
            styles,
            scripts,
            url_filter,
            base_url: settings.base_url.clone(),
            style_filter: StyleHandleFilter::from_settings(settings),
        }
    }

    pub fn filter_style_handles(&self, handles: &[Handle]) -> Vec<Handle> {
        self.style_filter.filter(handles)
    }

    pub fn registry(&self, kind: AssetKind) -> &dyn DependencyRegistry {
        match kind {
            AssetKind::Style => self.styles.as_ref(),
            AssetKind::Script => self.scripts.as_ref(),
        }
    }

    /// Resolve one handle. `None` means there is nothing worth shipping.
    pub fn materialize(&self, handle: &str, kind: AssetKind) -> Option<AssetMaterialization> {
        let Some(record) = self.registry(kind).record_for(handle) else {
            trace!(handle, kind = kind.as_str(), "no registry record, skipping");
            return None;
        };

        let src = match record.src.as_deref().filter(|s| !s.is_empty()) {
            Some(src) => {
                let url = with_version(&absolutize(src, &self.base_url), record.version.as_deref());
                match self.url_filter.filter_url(&url, handle, kind) {
                    Ok(filtered) => sanitize_url(&filtered),
                    Err(e) => {
                        warn!(handle, kind = kind.as_str(), "Skipping asset: {}", e);
                        return None;
                    }
                }
            }
            None => String::new(),
        };

        let asset = AssetMaterialization {
            handle: handle.to_string(),
            src,
            inline_before: record.before.join("\n"),
            inline_after: record.after.join("\n"),
        };

        (!asset.is_empty()).then_some(asset)
    }

    pub fn materialize_all(&self, handles: &[Handle], kind: AssetKind) -> Vec<AssetMaterialization> {
        handles
            .iter()
            .filter_map(|h| self.materialize(h, kind))
            .collect()
    }
}

fn has_scheme(url: &str) -> bool {
    match url.find(':') {
        Some(idx) => {
            let scheme = &url[..idx];
            !scheme.is_empty()
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

pub fn absolutize(src: &str, base_url: &str) -> String {
    if src.starts_with("//") || has_scheme(src) || base_url.is_empty() {
        return src.to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), src.trim_start_matches('/'))
}

pub fn with_version(url: &str, version: Option<&str>) -> String {
    match version.filter(|v| !v.is_empty()) {
        Some(ver) => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{}{}ver={}", url, sep, ver)
        }
        None => url.to_string(),
    }
}

/// Make a URL safe to embed in an attribute. Unsafe schemes yield "".
pub fn sanitize_url(url: &str) -> String {
    let trimmed = url.trim();
    if has_scheme(trimmed) {
        let scheme = trimmed[..trimmed.find(':').unwrap_or(0)].to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return String::new();
        }
    }

    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            c if c.is_control() => {}
            ' ' => out.push_str("%20"),
            '"' => out.push_str("%22"),
            '\'' => out.push_str("%27"),
            '<' => out.push_str("%3C"),
            '>' => out.push_str("%3E"),
            c => out.push(c),
        }
    }
    out
}
