//! Gallery Order Reconciler
//!
//! Galleries may render their items in random order. The markup, with each
//! item container tagged by stable id, is the source of truth; the dataset
//! sent to the client is reordered to match it, or left alone entirely.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::GallerySettings;
use crate::markup::{self, MarkupEvent};

const IMAGE_ID_CLASS_PREFIX: &str = "wp-image-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    #[serde(default)]
    pub id: Option<u64>,
    pub full_url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub alt: String,
    #[serde(default)]
    pub original_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryViewSettings {
    pub modal_size: String,
    pub close_buttons: String,
    pub image_navigation: String,
}

impl From<&GallerySettings> for GalleryViewSettings {
    fn from(settings: &GallerySettings) -> Self {
        Self {
            modal_size: settings.modal_size.clone(),
            close_buttons: settings.close_buttons.clone(),
            image_navigation: settings.image_navigation.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryDataset {
    pub items: Vec<GalleryItem>,
    pub settings: GalleryViewSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryImage {
    pub id: Option<u64>,
    pub full_url: String,
    pub caption: String,
    pub alt: String,
}

/// Client wire format. Field names are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryPayload {
    pub images: Vec<GalleryImage>,
    pub modal_size: String,
    pub close_buttons: String,
    pub image_navigation: String,
}

impl GalleryDataset {
    /// Items get `original_index` from their position here.
    pub fn new(items: Vec<GalleryItem>, settings: GalleryViewSettings) -> Self {
        let items = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| GalleryItem {
                original_index: index,
                ..item
            })
            .collect();
        Self { items, settings }
    }

    pub fn to_payload(&self) -> GalleryPayload {
        GalleryPayload {
            images: self
                .items
                .iter()
                .map(|item| GalleryImage {
                    id: item.id,
                    full_url: item.full_url.clone(),
                    caption: item.caption.clone(),
                    alt: item.alt.clone(),
                })
                .collect(),
            modal_size: self.settings.modal_size.clone(),
            close_buttons: self.settings.close_buttons.clone(),
            image_navigation: self.settings.image_navigation.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnchangedReason {
    Unparseable,
    NoTaggedItems,
    CountMismatch { found: usize, expected: usize },
    UnknownId(u64),
    DuplicateId(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Reordered,
    Unchanged(UnchangedReason),
}

pub struct GalleryReconciler {
    container_class: String,
    id_attribute: String,
}

impl GalleryReconciler {
    pub fn new(settings: &GallerySettings) -> Self {
        Self {
            container_class: settings.container_class.clone(),
            id_attribute: settings.id_attribute.clone(),
        }
    }

    /// Stable ids of tagged item containers, left to right.
    pub fn display_order(&self, markup: &str) -> Result<Vec<u64>, markup::MarkupError> {
        let mut order = vec![];
        markup::walk(markup, |event| {
            if let MarkupEvent::Open(tag) = event {
                if tag.has_class(&self.container_class) {
                    if let Some(id) = tag.attr(&self.id_attribute).and_then(parse_stable_id) {
                        order.push(id);
                    }
                }
            }
        })?;
        Ok(order)
    }

    /// All-or-nothing: on any mismatch the dataset is left untouched.
    pub fn reconcile(&self, dataset: &mut GalleryDataset, markup: &str) -> ReconcileOutcome {
        let outcome = self.try_reconcile(dataset, markup);
        if let ReconcileOutcome::Unchanged(reason) = &outcome {
            debug!(?reason, "gallery order left unchanged");
        }
        outcome
    }

    fn try_reconcile(&self, dataset: &mut GalleryDataset, markup: &str) -> ReconcileOutcome {
        let order = match self.display_order(markup) {
            Ok(order) => order,
            Err(e) => {
                warn!("Gallery markup could not be scanned: {}", e);
                return ReconcileOutcome::Unchanged(UnchangedReason::Unparseable);
            }
        };

        if order.is_empty() {
            return ReconcileOutcome::Unchanged(UnchangedReason::NoTaggedItems);
        }
        if order.len() != dataset.items.len() {
            return ReconcileOutcome::Unchanged(UnchangedReason::CountMismatch {
                found: order.len(),
                expected: dataset.items.len(),
            });
        }

        let mut by_id: HashMap<u64, usize> = HashMap::with_capacity(dataset.items.len());
        for (index, item) in dataset.items.iter().enumerate() {
            if let Some(id) = item.id {
                if by_id.insert(id, index).is_some() {
                    return ReconcileOutcome::Unchanged(UnchangedReason::DuplicateId(id));
                }
            }
        }

        let mut taken = vec![false; dataset.items.len()];
        let mut positions = Vec::with_capacity(order.len());
        for id in &order {
            let Some(&index) = by_id.get(id) else {
                return ReconcileOutcome::Unchanged(UnchangedReason::UnknownId(*id));
            };
            if taken[index] {
                return ReconcileOutcome::Unchanged(UnchangedReason::DuplicateId(*id));
            }
            taken[index] = true;
            positions.push(index);
        }

        let reordered = positions
            .into_iter()
            .map(|index| dataset.items[index].clone())
            .collect();
        dataset.items = reordered;
        ReconcileOutcome::Reordered
    }

    /// Tag each untagged item container with the stable id of its image,
    /// taken from the image's id attribute or its `wp-image-<n>` class.
    pub fn tag_items(&self, markup: &str) -> String {
        let mut inserts = vec![];
        let mut open: Option<(String, usize)> = None;

        let walked = markup::walk(markup, |event| match event {
            MarkupEvent::Open(tag) => {
                if tag.has_class(&self.container_class) {
                    open = (tag.attr(&self.id_attribute).is_none())
                        .then(|| (tag.name.clone(), tag.name_end));
                } else if tag.name == "img" {
                    if let Some((_, at)) = open.take() {
                        if let Some(id) = image_id(tag, &self.id_attribute) {
                            inserts.push((at, self.id_attribute.clone(), id.to_string()));
                        }
                    }
                }
            }
            MarkupEvent::Close(name) => {
                if open.as_ref().is_some_and(|(container, _)| container == name) {
                    open = None;
                }
            }
        });

        if let Err(e) = walked {
            warn!("Gallery markup left untagged: {}", e);
            return markup.to_string();
        }
        markup::splice_attributes(markup, inserts)
    }
}

fn parse_stable_id(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|id| *id > 0)
}

fn image_id(tag: &markup::ElementTag, id_attribute: &str) -> Option<u64> {
    tag.attr(id_attribute)
        .and_then(parse_stable_id)
        .or_else(|| {
            tag.classes()
                .filter_map(|c| c.strip_prefix(IMAGE_ID_CLASS_PREFIX))
                .find_map(parse_stable_id)
        })
}
