//! moodbooth-core: Expression-driven photo booth logic.
//!
//! Aggregates per-face expression scores into a dominant emotion, gates
//! captures behind a countdown, keeps the gallery of labeled stills, and maps
//! each emotion to reference artworks for style transfer. The detection and
//! style-transfer collaborators run on ONNX Runtime.

pub mod catalog;
pub mod countdown;
pub mod detector;
pub mod emotion;
pub mod gallery;
pub mod overlay;
pub mod stylizer;
pub mod types;

pub use catalog::{
    resolve_style_path, style_for_slider, CatalogError, EmotionConfig, StyleCatalog, StylePolicy,
    StyleRef, SLIDER_MAX,
};
pub use countdown::{Countdown, CountdownState, Presence, Tick};
pub use detector::{DetectorError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use emotion::{classify, Classification, Emotion, ExpressionScores};
pub use gallery::{CapturedImage, Gallery, ImageSummary};
pub use overlay::Overlay;
pub use stylizer::{ArbitraryStylizer, StyleTransfer, StylizeError};
pub use types::{BoundingBox, FaceDetection};

use std::path::PathBuf;

/// System-wide model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/moodbooth/models")
}

/// System-wide style image directory used when none is configured.
pub fn default_asset_dir() -> PathBuf {
    PathBuf::from("/usr/share/moodbooth/styles")
}
