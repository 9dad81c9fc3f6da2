//! Face and expression analysis via ONNX Runtime.
//!
//! Faces and their five keypoints are found with the SCRFD detector
//! (3-stride anchor decoding, letterboxed input); each face crop is then
//! scored by the FER+ expression classifier. Both are wrapped behind
//! [`FaceAnalyzer`] so the booth never depends on a particular model.

use crate::emotion::{Emotion, ExpressionScores};
use crate::types::{BoundingBox, FaceDetection};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- SCRFD ---
const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_KEYPOINTS: usize = 5;

// --- FER+ ---
const FERPLUS_INPUT_SIZE: u32 = 64;
/// FER+ output order. Contempt has no booth category and is dropped.
const FERPLUS_LABELS: [Option<Emotion>; 8] = [
    Some(Emotion::Neutral),
    Some(Emotion::Happy),
    Some(Emotion::Surprised),
    Some(Emotion::Sad),
    Some(Emotion::Angry),
    Some(Emotion::Disgusted),
    Some(Emotion::Fearful),
    None,
];

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; place the ONNX models in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detection collaborator: every face in a frame with its expression scores.
pub trait FaceAnalyzer: Send {
    fn detect_all(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, DetectorError>;
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// Maps letterboxed detector coordinates back to frame pixels.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// A decoded face before expression scoring.
#[derive(Debug, Clone)]
struct Candidate {
    bbox: BoundingBox,
    landmarks: Option<Vec<(f32, f32)>>,
}

fn load_session(model_path: &str, what: &str) -> Result<Session, DetectorError> {
    if !Path::new(model_path).exists() {
        return Err(DetectorError::ModelNotFound(model_path.to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = model_path,
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded {what} model"
    );

    Ok(session)
}

/// SCRFD face detector + FER+ expression classifier.
pub struct OnnxFaceAnalyzer {
    detector: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_outputs: [StrideOutputs; 3],
    classifier: Session,
}

impl OnnxFaceAnalyzer {
    pub fn load(detector_path: &str, classifier_path: &str) -> Result<Self, DetectorError> {
        let detector = load_session(detector_path, "SCRFD")?;

        let output_names: Vec<String> = detector
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps per stride), got {}",
                output_names.len()
            )));
        }
        let stride_outputs = discover_output_indices(&output_names);
        tracing::debug!(?stride_outputs, "SCRFD output tensor mapping");

        Ok(Self {
            detector,
            stride_outputs,
            classifier: load_session(classifier_path, "FER+")?,
        })
    }

    fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<Candidate>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess_detector(frame);
        let outputs = self
            .detector
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in
            SCRFD_STRIDES.iter().zip(&self.stride_outputs)
        {
            let extract = |idx: usize, what: &'static str| {
                outputs[idx].try_extract_tensor::<f32>().map_err(|e| {
                    DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                })
            };
            let (_, scores) = extract(score_idx, "scores")?;
            let (_, bboxes) = extract(bbox_idx, "bboxes")?;
            let (_, kps) = extract(kps_idx, "kps")?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                SCRFD_INPUT_SIZE as usize,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }

    fn classify_face(
        &mut self,
        frame: &RgbImage,
        bbox: &BoundingBox,
    ) -> Result<Option<ExpressionScores>, DetectorError> {
        let Some(input) = preprocess_classifier(frame, bbox) else {
            return Ok(None);
        };
        let outputs = self
            .classifier
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("expression logits: {e}")))?;

        if logits.len() != FERPLUS_LABELS.len() {
            return Err(DetectorError::InferenceFailed(format!(
                "expected {} expression logits, got {}",
                FERPLUS_LABELS.len(),
                logits.len()
            )));
        }

        Ok(Some(ferplus_scores(logits)))
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect_all(&mut self, frame: &RgbImage) -> Result<Vec<FaceDetection>, DetectorError> {
        let candidates = self.detect_faces(frame)?;

        let mut faces = Vec::with_capacity(candidates.len());
        for Candidate { bbox, landmarks } in candidates {
            match self.classify_face(frame, &bbox)? {
                Some(expressions) => faces.push(FaceDetection {
                    bbox,
                    landmarks,
                    expressions,
                }),
                None => tracing::debug!(?bbox, "face box outside frame; skipped"),
            }
        }

        Ok(faces)
    }
}

/// Find the score/bbox/kps outputs by name ("score_8", "bbox_16", ...).
///
/// Exports with generic numeric names fall back to the standard positional
/// order: scores 8/16/32, then bboxes, then keypoints.
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some((
                find("score", stride)?,
                find("bbox", stride)?,
                find("kps", stride)?,
            ))
        })
        .collect();

    match named.and_then(|v| <[StrideOutputs; 3]>::try_from(v).ok()) {
        Some(indices) => indices,
        None => {
            tracing::info!(?names, "SCRFD output names not recognized; using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Letterbox into the square detector input and normalize into NCHW.
///
/// Padding is left at zero, which is the normalized mean.
fn preprocess_detector(frame: &RgbImage) -> (Array4<f32>, Letterbox) {
    let size = SCRFD_INPUT_SIZE as f32;
    let scale = (size / frame.width() as f32).min(size / frame.height() as f32);
    let new_w = ((frame.width() as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((frame.height() as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let pad_x = (SCRFD_INPUT_SIZE - new_w) / 2;
    let pad_y = (SCRFD_INPUT_SIZE - new_h) / 2;

    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let n = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (tensor, letterbox)
}

/// Grayscale 64×64 face crop, raw 0–255 values, as FER+ expects.
fn preprocess_classifier(frame: &RgbImage, bbox: &BoundingBox) -> Option<Array4<f32>> {
    let (x, y, w, h) = bbox.clamp_to(frame.width(), frame.height())?;
    let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
    let gray = imageops::grayscale(&crop);
    let face = imageops::resize(
        &gray,
        FERPLUS_INPUT_SIZE,
        FERPLUS_INPUT_SIZE,
        FilterType::Triangle,
    );

    let size = FERPLUS_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for (x, y, pixel) in face.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel.0[0] as f32;
    }
    Some(tensor)
}

/// Decode one stride level.
///
/// Each grid cell carries two anchors. Box outputs are distances from the
/// anchor centre to the four edges and keypoint outputs are offsets from it,
/// both in units of the stride.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Candidate> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut candidates = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(dist) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_frame(anchor_x - dist[0] * step, anchor_y - dist[1] * step);
        let (x2, y2) = letterbox.to_frame(anchor_x + dist[2] * step, anchor_y + dist[3] * step);
        let bbox = BoundingBox::from_corners(x1, y1, x2, y2, score);
        if bbox.area() <= 0.0 {
            continue;
        }

        let kps_len = SCRFD_KEYPOINTS * 2;
        let landmarks = kps.get(idx * kps_len..(idx + 1) * kps_len).map(|offsets| {
            offsets
                .chunks_exact(2)
                .map(|p| letterbox.to_frame(anchor_x + p[0] * step, anchor_y + p[1] * step))
                .collect()
        });

        candidates.push(Candidate { bbox, landmarks });
    }
    candidates
}

/// Greedy non-maximum suppression, highest confidence first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.bbox.confidence.total_cmp(&a.bbox.confidence));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Softmax over the FER+ logits, then renormalize over the booth categories.
fn ferplus_scores(logits: &[f32]) -> ExpressionScores {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();

    let mut scores = ExpressionScores::default();
    let mut kept_total = 0.0f32;
    for (label, &e) in FERPLUS_LABELS.iter().zip(&exps) {
        if let Some(emotion) = label {
            scores.set(*emotion, e);
            kept_total += e;
        }
    }

    if kept_total > 0.0 {
        for emotion in Emotion::ALL {
            scores.set(emotion, scores.get(emotion) / kept_total);
        }
    }
    scores
}
