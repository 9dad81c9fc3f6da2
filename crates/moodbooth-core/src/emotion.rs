//! Expression categories and per-frame aggregation.
//!
//! Every face reports one score per category. A frame (or captured still) is
//! classified by averaging each category across all faces and taking the
//! highest average; ties go to the category that comes first in
//! [`Emotion::ALL`].

use crate::types::FaceDetection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The fixed set of expression categories, in enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Emotion {
    pub const COUNT: usize = 7;

    /// Enumeration order; also the tie-break order for classification.
    pub const ALL: [Emotion; Emotion::COUNT] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Fearful,
        Emotion::Disgusted,
        Emotion::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Fearful => "fearful",
            Emotion::Disgusted => "disgusted",
            Emotion::Surprised => "surprised",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown emotion: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    /// Case-insensitive parse of a category label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// One score per [`Emotion`], indexed in enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpressionScores([f32; Emotion::COUNT]);

impl ExpressionScores {
    pub fn new(scores: [f32; Emotion::COUNT]) -> Self {
        Self(scores)
    }

    /// Build from `(category, score)` pairs; missing categories score 0.
    pub fn from_pairs(pairs: &[(Emotion, f32)]) -> Self {
        let mut scores = Self::default();
        for &(emotion, score) in pairs {
            scores.set(emotion, score);
        }
        scores
    }

    pub fn get(&self, emotion: Emotion) -> f32 {
        self.0[emotion.index()]
    }

    pub fn set(&mut self, emotion: Emotion, score: f32) {
        self.0[emotion.index()] = score;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.into_iter().zip(self.0.iter().copied())
    }

    /// Highest-scoring category; the first maximum in enumeration order wins.
    pub fn dominant(&self) -> (Emotion, f32) {
        let mut best = (Emotion::ALL[0], self.0[0]);
        for (emotion, score) in self.iter().skip(1) {
            if score > best.1 {
                best = (emotion, score);
            }
        }
        best
    }
}

/// Per-category mean across all faces, or `None` for an empty frame.
pub fn average_expressions(faces: &[FaceDetection]) -> Option<ExpressionScores> {
    if faces.is_empty() {
        return None;
    }

    let mut sums = [0.0f32; Emotion::COUNT];
    for face in faces {
        for (slot, (_, score)) in sums.iter_mut().zip(face.expressions.iter()) {
            *slot += score;
        }
    }

    let n = faces.len() as f32;
    Some(ExpressionScores(sums.map(|s| s / n)))
}

/// Outcome of classifying a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub emotion: Emotion,
    /// Mean score of `emotion` across all faces, in [0, 1].
    pub strength: f32,
    pub averages: ExpressionScores,
}

/// Classify a frame's faces by their averaged expression scores.
pub fn classify(faces: &[FaceDetection]) -> Option<Classification> {
    let averages = average_expressions(faces)?;
    let (emotion, strength) = averages.dominant();
    Some(Classification {
        emotion,
        strength,
        averages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn face(pairs: &[(Emotion, f32)]) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
                confidence: 0.9,
            },
            landmarks: None,
            expressions: ExpressionScores::from_pairs(pairs),
        }
    }

    #[test]
    fn test_two_faces_surprised() {
        let a = face(&[(Emotion::Happy, 0.1), (Emotion::Sad, 0.0), (Emotion::Surprised, 0.8)]);
        let b = face(&[(Emotion::Happy, 0.3), (Emotion::Sad, 0.0), (Emotion::Surprised, 0.5)]);

        let result = classify(&[a, b]).unwrap();
        assert_eq!(result.emotion, Emotion::Surprised);
        assert!((result.strength - 0.65).abs() < 1e-6);
        assert!((result.averages.get(Emotion::Happy) - 0.2).abs() < 1e-6);
        assert_eq!(result.averages.get(Emotion::Sad), 0.0);
    }

    #[test]
    fn test_strength_is_mean_not_max() {
        let a = face(&[(Emotion::Angry, 0.9)]);
        let b = face(&[(Emotion::Angry, 0.3)]);
        let result = classify(&[a, b]).unwrap();
        assert_eq!(result.emotion, Emotion::Angry);
        assert!((result.strength - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_tie_goes_to_first_in_enumeration_order() {
        let f = face(&[(Emotion::Surprised, 0.5), (Emotion::Happy, 0.5)]);
        assert_eq!(classify(&[f]).unwrap().emotion, Emotion::Happy);
    }

    #[test]
    fn test_all_zero_scores_pick_neutral() {
        let f = face(&[]);
        let result = classify(&[f]).unwrap();
        assert_eq!(result.emotion, Emotion::Neutral);
        assert_eq!(result.strength, 0.0);
    }

    #[test]
    fn test_no_faces_no_classification() {
        assert!(classify(&[]).is_none());
        assert!(average_expressions(&[]).is_none());
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("Happy".parse::<Emotion>(), Ok(Emotion::Happy));
        assert_eq!("SURPRISED".parse::<Emotion>(), Ok(Emotion::Surprised));
        assert_eq!(" sad ".parse::<Emotion>(), Ok(Emotion::Sad));
        assert!("confused".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for emotion in Emotion::ALL {
            assert_eq!(emotion.to_string().parse::<Emotion>(), Ok(emotion));
        }
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Emotion::Disgusted).unwrap();
        assert_eq!(json, "\"disgusted\"");
    }
}
