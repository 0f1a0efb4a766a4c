//! Per-pose collections of accepted image variants.
//!
//! Iteration order is insertion order, so the last item is always the most
//! recently produced variant. The `original` item, when present, is first.

use serde::{Deserialize, Serialize};

use crate::types::ImageRef;

/// Item id reserved for the unmodified generated image of a pose.
pub const ORIGINAL_ITEM_ID: &str = "original";

/// One saved variant of a pose's image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionItem {
    /// Either [`ORIGINAL_ITEM_ID`] or the background id that produced it.
    pub id: String,
    pub image_ref: ImageRef,
}

impl CollectionItem {
    pub fn original(image_ref: impl Into<ImageRef>) -> Self {
        Self {
            id: ORIGINAL_ITEM_ID.to_string(),
            image_ref: image_ref.into(),
        }
    }

    pub fn variant(background_id: impl Into<String>, image_ref: impl Into<ImageRef>) -> Self {
        Self {
            id: background_id.into(),
            image_ref: image_ref.into(),
        }
    }

    pub fn is_original(&self) -> bool {
        self.id == ORIGINAL_ITEM_ID
    }
}

/// Ordered sequence of [`CollectionItem`]s for one pose.
///
/// Deserialization goes through [`Collection::from_items`], so a persisted
/// record can never yield more than one `original` item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CollectionItem>", into = "Vec<CollectionItem>")]
pub struct Collection(Vec<CollectionItem>);

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from items, collapsing duplicate `original` entries.
    ///
    /// Persisted data may have been written by older code; the first
    /// `original` wins and is moved to the front.
    pub fn from_items(items: Vec<CollectionItem>) -> Self {
        let mut original = None;
        let mut rest = Vec::with_capacity(items.len());
        for item in items {
            if item.is_original() {
                if original.is_none() {
                    original = Some(item);
                }
            } else {
                rest.push(item);
            }
        }
        let mut collection = Vec::with_capacity(rest.len() + 1);
        collection.extend(original);
        collection.extend(rest);
        Self(collection)
    }

    pub fn items(&self) -> &[CollectionItem] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CollectionItem> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The most recently produced variant.
    pub fn last(&self) -> Option<&CollectionItem> {
        self.0.last()
    }

    pub fn get(&self, item_id: &str) -> Option<&CollectionItem> {
        self.0.iter().find(|i| i.id == item_id)
    }

    pub fn original(&self) -> Option<&CollectionItem> {
        self.0.first().filter(|i| i.is_original())
    }

    pub fn has_original(&self) -> bool {
        self.original().is_some()
    }

    /// Insert the `original` item at the front unless one exists.
    ///
    /// Returns `true` when the collection changed.
    pub fn ensure_original(&mut self, image_ref: &str) -> bool {
        if self.has_original() {
            return false;
        }
        self.0.insert(0, CollectionItem::original(image_ref));
        true
    }

    /// Record a background variant as the newest item.
    ///
    /// Re-applying a background id replaces its earlier item, which moves to
    /// the end and is returned. The `original` item cannot be replaced this
    /// way.
    pub fn push_variant(
        &mut self,
        background_id: &str,
        image_ref: impl Into<ImageRef>,
    ) -> Option<CollectionItem> {
        if background_id == ORIGINAL_ITEM_ID {
            return None;
        }
        let replaced = self.remove_variant(background_id);
        self.0.push(CollectionItem::variant(background_id, image_ref));
        replaced
    }

    /// Remove a background variant. The `original` item is never removed.
    pub fn remove_variant(&mut self, background_id: &str) -> Option<CollectionItem> {
        if background_id == ORIGINAL_ITEM_ID {
            return None;
        }
        let index = self.0.iter().position(|i| i.id == background_id)?;
        Some(self.0.remove(index))
    }

    /// Image references held by this collection.
    pub fn image_refs(&self) -> impl Iterator<Item = &ImageRef> {
        self.0.iter().map(|i| &i.image_ref)
    }
}

impl From<Vec<CollectionItem>> for Collection {
    fn from(items: Vec<CollectionItem>) -> Self {
        Self::from_items(items)
    }
}

impl From<Collection> for Vec<CollectionItem> {
    fn from(collection: Collection) -> Self {
        collection.0
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a CollectionItem;
    type IntoIter = std::slice::Iter<'a, CollectionItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
