//! Arbitrary style transfer via ONNX Runtime.
//!
//! Two networks: a style predictor that condenses a 256×256 style image into
//! a 100-dimensional bottleneck, and a transformer that repaints the content
//! image with that bottleneck. Both take NHWC float tensors in [0, 1].

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const STYLE_INPUT_SIZE: u32 = 256;
const BOTTLENECK_DIM: usize = 100;

#[derive(Error, Debug)]
pub enum StylizeError {
    #[error("model file not found: {0}; place the ONNX models in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty image: {0}x{1}")]
    EmptyImage(u32, u32),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Style-transfer collaborator: repaint `content` in the manner of `style`.
pub trait StyleTransfer: Send {
    fn stylize(&mut self, content: &RgbImage, style: &RgbImage) -> Result<RgbImage, StylizeError>;
}

/// Style predictor + transformer pair.
pub struct ArbitraryStylizer {
    predictor: Session,
    transformer: Session,
    /// 1.0 uses the style bottleneck alone; lower values blend in the
    /// content image's own bottleneck.
    strength: f32,
}

impl ArbitraryStylizer {
    pub fn load(
        predictor_path: &str,
        transformer_path: &str,
        strength: f32,
    ) -> Result<Self, StylizeError> {
        let predictor = load_session(predictor_path, "style predictor")?;
        let transformer = load_session(transformer_path, "style transformer")?;
        Ok(Self {
            predictor,
            transformer,
            strength: strength.clamp(0.0, 1.0),
        })
    }

    fn predict_bottleneck(&mut self, image: &RgbImage) -> Result<Vec<f32>, StylizeError> {
        let resized = imageops::resize(
            image,
            STYLE_INPUT_SIZE,
            STYLE_INPUT_SIZE,
            FilterType::Triangle,
        );
        let input = to_nhwc(&resized);

        let outputs = self
            .predictor
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| StylizeError::InferenceFailed(format!("style bottleneck: {e}")))?;

        if data.len() != BOTTLENECK_DIM {
            return Err(StylizeError::InferenceFailed(format!(
                "expected {BOTTLENECK_DIM}-dim style bottleneck, got {}",
                data.len()
            )));
        }
        Ok(data.to_vec())
    }
}

impl StyleTransfer for ArbitraryStylizer {
    fn stylize(&mut self, content: &RgbImage, style: &RgbImage) -> Result<RgbImage, StylizeError> {
        for img in [content, style] {
            if img.width() == 0 || img.height() == 0 {
                return Err(StylizeError::EmptyImage(img.width(), img.height()));
            }
        }

        let style_bottleneck = self.predict_bottleneck(style)?;
        let bottleneck = if self.strength < 1.0 {
            let content_bottleneck = self.predict_bottleneck(content)?;
            blend_bottlenecks(&style_bottleneck, &content_bottleneck, self.strength)
        } else {
            style_bottleneck
        };

        let content_input = to_nhwc(content);
        let bottleneck_input = Array4::from_shape_vec((1, 1, 1, BOTTLENECK_DIM), bottleneck)
            .map_err(|e| StylizeError::InferenceFailed(format!("bottleneck shape: {e}")))?;

        let started = std::time::Instant::now();
        let outputs = self.transformer.run(ort::inputs![
            TensorRef::from_array_view(content_input.view())?,
            TensorRef::from_array_view(bottleneck_input.view())?
        ])?;
        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| StylizeError::InferenceFailed(format!("stylized image: {e}")))?;

        let image = from_nhwc(data, content.width(), content.height())?;
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stylized"
        );
        Ok(image)
    }
}

fn load_session(model_path: &str, what: &str) -> Result<Session, StylizeError> {
    if !Path::new(model_path).exists() {
        return Err(StylizeError::ModelNotFound(model_path.to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(4)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = model_path,
        inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
        "loaded {what} model"
    );
    Ok(session)
}

/// `strength * style + (1 - strength) * content`, element-wise.
fn blend_bottlenecks(style: &[f32], content: &[f32], strength: f32) -> Vec<f32> {
    style
        .iter()
        .zip(content)
        .map(|(s, c)| strength * s + (1.0 - strength) * c)
        .collect()
}

fn to_nhwc(image: &RgbImage) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, h, w, 3));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Convert a `[1, H, W, 3]` buffer in [0, 1] back to an RGB image.
fn from_nhwc(data: &[f32], width: u32, height: u32) -> Result<RgbImage, StylizeError> {
    let expected = width as usize * height as usize * 3;
    if data.len() != expected {
        return Err(StylizeError::InferenceFailed(format!(
            "stylized output has {} values, expected {expected} for {width}x{height}",
            data.len()
        )));
    }

    let bytes = data
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    RgbImage::from_raw(width, height, bytes)
        .ok_or_else(|| StylizeError::InferenceFailed("stylized buffer size mismatch".into()))
}
