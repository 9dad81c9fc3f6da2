//! Captured-image gallery and the current selection.

use crate::emotion::Classification;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A labeled still taken by the booth. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub id: Uuid,
    /// PNG-encoded frame at the camera's native resolution.
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub label: String,
    /// Mean score of `label` across all faces in the still.
    pub strength: f32,
    pub created_at: DateTime<Utc>,
}

impl CapturedImage {
    pub fn new(image: Vec<u8>, width: u32, height: u32, classification: &Classification) -> Self {
        Self {
            id: Uuid::new_v4(),
            image,
            width,
            height,
            label: classification.emotion.as_str().to_string(),
            strength: classification.strength,
            created_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            id: self.id.to_string(),
            label: self.label.clone(),
            strength: self.strength,
            width: self.width,
            height: self.height,
            created_at: Some(self.created_at),
        }
    }
}

/// Wire form of a gallery entry. The default value is the empty selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ImageSummary {
    pub id: String,
    pub label: String,
    pub strength: f32,
    pub width: u32,
    pub height: u32,
    pub created_at: Option<DateTime<Utc>>,
}

/// Ordered collection of captures plus an optional selection by id.
#[derive(Debug, Default)]
pub struct Gallery {
    images: Vec<CapturedImage>,
    selected: Option<Uuid>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a capture and return its id.
    pub fn push(&mut self, image: CapturedImage) -> Uuid {
        let id = image.id;
        self.images.push(image);
        id
    }

    /// Select an image by id. Unknown ids leave the selection unchanged.
    pub fn select(&mut self, id: Uuid) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.selected = Some(id);
        true
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&CapturedImage> {
        self.selected.and_then(|id| self.get(id))
    }

    pub fn selected_id(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn is_selected(&self, id: Uuid) -> bool {
        self.selected == Some(id)
    }

    /// Selected entry in wire form, or the empty sentinel.
    pub fn selected_summary(&self) -> ImageSummary {
        self.selected().map(CapturedImage::summary).unwrap_or_default()
    }

    pub fn get(&self, id: Uuid) -> Option<&CapturedImage> {
        self.images.iter().find(|img| img.id == id)
    }

    /// Remove by id; clears the selection if it pointed at the removed image.
    pub fn remove(&mut self, id: Uuid) -> Option<CapturedImage> {
        let index = self.images.iter().position(|img| img.id == id)?;
        self.remove_at(index)
    }

    /// Remove by position; clears the selection if it pointed at the removed image.
    pub fn remove_at(&mut self, index: usize) -> Option<CapturedImage> {
        if index >= self.images.len() {
            return None;
        }
        let removed = self.images.remove(index);
        if self.selected == Some(removed.id) {
            self.selected = None;
        }
        Some(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapturedImage> {
        self.images.iter()
    }

    pub fn summaries(&self) -> Vec<ImageSummary> {
        self.images.iter().map(CapturedImage::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
