use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, with optional five-point keypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point keypoints: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn top_left(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn top_right(&self) -> (f32, f32) {
        (self.x + self.width, self.y)
    }

    pub fn bottom_left(&self) -> (f32, f32) {
        (self.x, self.y + self.height)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Scale all geometry by independent x/y factors.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|pts| pts.map(|(x, y)| (x * sx, y * sy))),
        }
    }
}

/// Face descriptor vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two descriptors.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Element-wise mean of several descriptors. `None` for an empty slice.
    pub fn mean(descriptors: &[Descriptor]) -> Option<Descriptor> {
        let first = descriptors.first()?;
        let mut acc = vec![0.0f32; first.values.len()];
        for d in descriptors {
            for (slot, v) in acc.iter_mut().zip(d.values.iter()) {
                *slot += v;
            }
        }
        let n = descriptors.len() as f32;
        acc.iter_mut().for_each(|v| *v /= n);
        Some(Descriptor {
            values: acc,
            model_version: first.model_version.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Female => f.write_str("female"),
            Gender::Male => f.write_str("male"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenderEstimate {
    pub gender: Gender,
    /// Confidence of `gender`, in [0, 1].
    pub probability: f32,
}

/// Expression classes, in the output order of the FER+ model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Neutral,
    Happy,
    Surprised,
    Sad,
    Angry,
    Disgusted,
    Fearful,
    Contempt,
}

impl Expression {
    pub const ALL: [Expression; 8] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Surprised,
        Expression::Sad,
        Expression::Angry,
        Expression::Disgusted,
        Expression::Fearful,
        Expression::Contempt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Surprised => "surprised",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Disgusted => "disgusted",
            Expression::Fearful => "fearful",
            Expression::Contempt => "contempt",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-expression probabilities for one face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expressions {
    pub scores: Vec<(Expression, f32)>,
}

impl Expressions {
    /// Expressions scoring at least `min_score`, best first.
    pub fn above(&self, min_score: f32) -> Vec<(Expression, f32)> {
        let mut kept: Vec<_> = self
            .scores
            .iter()
            .copied()
            .filter(|(_, s)| *s >= min_score)
            .collect();
        kept.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        kept
    }
}

/// Everything the analyzer reports for one face in one frame.
///
/// Lives for a single tick: produced by the analyzer, rendered, dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    /// 68-point landmark set, in frame coordinates.
    pub landmarks: Vec<(f32, f32)>,
    /// Estimated age in years (continuous).
    pub age: f32,
    pub gender: GenderEstimate,
    pub expressions: Expressions,
    pub descriptor: Descriptor,
}

impl DetectedFace {
    /// Map geometry from a `from` resolution to a `to` resolution.
    pub fn rescaled(&self, from: (u32, u32), to: (u32, u32)) -> Self {
        if from == to || from.0 == 0 || from.1 == 0 {
            return self.clone();
        }
        let sx = to.0 as f32 / from.0 as f32;
        let sy = to.1 as f32 / from.1 as f32;
        Self {
            bbox: self.bbox.scaled(sx, sy),
            landmarks: self.landmarks.iter().map(|&(x, y)| (x * sx, y * sy)).collect(),
            ..self.clone()
        }
    }

    pub fn age_text(&self) -> String {
        format!("{} years", self.age.round() as i32)
    }

    pub fn gender_text(&self) -> String {
        format!(
            "{} ({}%)",
            self.gender.gender,
            (self.gender.probability * 100.0).round() as i32
        )
    }
}

#[cfg(test)]
pub(crate) fn sample_face(x: f32, y: f32, descriptor: Vec<f32>) -> DetectedFace {
    DetectedFace {
        bbox: BoundingBox {
            x,
            y,
            width: 100.0,
            height: 120.0,
            confidence: 0.9,
            landmarks: None,
        },
        landmarks: vec![(x + 10.0, y + 20.0), (x + 90.0, y + 20.0)],
        age: 31.6,
        gender: GenderEstimate {
            gender: Gender::Male,
            probability: 0.874,
        },
        expressions: Expressions {
            scores: vec![
                (Expression::Neutral, 0.7),
                (Expression::Happy, 0.25),
                (Expression::Sad, 0.05),
            ],
        },
        descriptor: Descriptor::new(descriptor),
    }
}
