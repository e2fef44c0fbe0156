//! Structural Asset Scanner
//!
//! Adds handles implied by what a nested component *is* rather than by what it
//! enqueued: its static declarations and its style-variation class names.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::differ::CapturedHandles;
use crate::handles::Handle;
use crate::markup;

pub const VARIATION_CLASS_PREFIX: &str = "is-style-";

/// One nested sub-component as it was rendered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedComponent {
    pub component_type: String,
    #[serde(default)]
    pub style_handles: Vec<Handle>,
    #[serde(default)]
    pub script_handles: Vec<Handle>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub markup: String,
}

/// Legacy per-variation stylesheet lookup.
pub trait StyleVariationRegistry: Send + Sync {
    fn lookup(&self, component_type: &str, slug: &str) -> Option<Handle>;
}

pub struct StructuralScanner {
    variations: Arc<dyn StyleVariationRegistry>,
    variation_handle: Handle,
}

impl StructuralScanner {
    pub fn new(variations: Arc<dyn StyleVariationRegistry>, variation_handle: impl Into<Handle>) -> Self {
        Self {
            variations,
            variation_handle: variation_handle.into(),
        }
    }

    pub fn scan(&self, component: &RenderedComponent, into: &mut CapturedHandles) {
        into.styles.extend(component.style_handles.iter().cloned());
        into.scripts.extend(component.script_handles.iter().cloned());

        let Some(slug) = self.variation_slug(component) else {
            return;
        };

        // The host bundles every variation into one stylesheet.
        into.styles.insert(self.variation_handle.clone());

        if let Some(handle) = self.variations.lookup(&component.component_type, &slug) {
            debug!(
                component = %component.component_type,
                slug = %slug,
                handle = %handle,
                "legacy variation handle matched"
            );
            into.styles.insert(handle);
        }
    }

    /// First `is-style-<slug>` across the declared class and emitted markup.
    fn variation_slug(&self, component: &RenderedComponent) -> Option<String> {
        let mut class_text = component.class_name.clone().unwrap_or_default();

        if !component.markup.is_empty() {
            match markup::class_attributes(&component.markup) {
                Ok(found) => {
                    for class in found {
                        class_text.push(' ');
                        class_text.push_str(&class);
                    }
                }
                Err(e) => warn!(
                    component = %component.component_type,
                    "Skipping class scan of unparseable component markup: {}", e
                ),
            }
        }

        class_text
            .split_whitespace()
            .filter_map(|token| token.strip_prefix(VARIATION_CLASS_PREFIX))
            .find(|slug| is_valid_slug(slug))
            .map(str::to_string)
    }
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Legacy(HashMap<(String, String), Handle>);

    impl StyleVariationRegistry for Legacy {
        fn lookup(&self, component_type: &str, slug: &str) -> Option<Handle> {
            self.0.get(&(component_type.to_string(), slug.to_string())).cloned()
        }
    }

    fn scanner() -> StructuralScanner {
        let mut map = HashMap::new();
        map.insert(
            ("core/button".to_string(), "outline".to_string()),
            "button-outline-style".to_string(),
        );
        StructuralScanner::new(Arc::new(Legacy(map)), "block-style-variation-styles")
    }

    #[test]
    fn test_declared_handles_added() {
        let component = RenderedComponent {
            component_type: "core/quote".into(),
            style_handles: vec!["quote-style".into()],
            script_handles: vec!["quote-js".into()],
            ..Default::default()
        };
        let mut captured = CapturedHandles::default();
        scanner().scan(&component, &mut captured);
        assert_eq!(captured.styles.as_slice(), &["quote-style".to_string()]);
        assert_eq!(captured.scripts.as_slice(), &["quote-js".to_string()]);
    }

    #[test]
    fn test_variation_in_markup_adds_shared_and_legacy_handles() {
        let component = RenderedComponent {
            component_type: "core/button".into(),
            markup: r#"<div class="wp-block-button is-style-outline"><a>Go</a></div>"#.into(),
            ..Default::default()
        };
        let mut captured = CapturedHandles::default();
        scanner().scan(&component, &mut captured);
        assert_eq!(
            captured.styles.as_slice(),
            &[
                "block-style-variation-styles".to_string(),
                "button-outline-style".to_string()
            ]
        );
    }

    #[test]
    fn test_declared_class_without_legacy_match() {
        let component = RenderedComponent {
            component_type: "core/image".into(),
            class_name: Some("is-style-rounded".into()),
            ..Default::default()
        };
        let mut captured = CapturedHandles::default();
        scanner().scan(&component, &mut captured);
        assert_eq!(captured.styles.as_slice(), &["block-style-variation-styles".to_string()]);
    }

    #[test]
    fn test_no_variation_class_adds_nothing() {
        let component = RenderedComponent {
            component_type: "core/paragraph".into(),
            class_name: Some("is-style-".into()),
            markup: "<p class=\"has-text\">x</p>".into(),
            ..Default::default()
        };
        let mut captured = CapturedHandles::default();
        scanner().scan(&component, &mut captured);
        assert!(captured.styles.is_empty());
    }
}
