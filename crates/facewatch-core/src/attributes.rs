//! Age and gender estimation (InsightFace `genderage`).
//!
//! Output is three values: two gender logits (female, male) and age / 100.

use crate::alignment::CropTransform;
use crate::tensor::{gray_to_nchw, softmax};
use crate::types::{BoundingBox, Gender, GenderEstimate};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const GENDERAGE_INPUT_SIZE: usize = 96;
const GENDERAGE_MARGIN: f32 = 1.5;
const GENDERAGE_MEAN: f32 = 0.0;
const GENDERAGE_STD: f32 = 1.0;

#[derive(Error, Debug)]
pub enum AttributeError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Age/gender estimate for one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeGender {
    pub age: f32,
    pub gender: GenderEstimate,
}

pub struct AgeGenderModel {
    session: Session,
}

impl AgeGenderModel {
    pub fn load(model_path: &Path) -> Result<Self, AttributeError> {
        if !model_path.exists() {
            return Err(AttributeError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded age/gender model");
        Ok(Self { session })
    }

    pub fn predict(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<AgeGender, AttributeError> {
        let transform = CropTransform::centered(
            face.center(),
            face.width.max(face.height),
            GENDERAGE_MARGIN,
            GENDERAGE_INPUT_SIZE,
        );
        let crop = transform.warp(frame, width, height, GENDERAGE_INPUT_SIZE);
        let input = gray_to_nchw(&crop, GENDERAGE_INPUT_SIZE, 3, GENDERAGE_MEAN, GENDERAGE_STD);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AttributeError::InferenceFailed(format!("genderage output: {e}")))?;

        decode(raw)
    }
}

fn decode(raw: &[f32]) -> Result<AgeGender, AttributeError> {
    let [female, male, age, ..] = raw else {
        return Err(AttributeError::InferenceFailed(format!(
            "expected 3 values, got {}",
            raw.len()
        )));
    };
    let probs = softmax(&[*female, *male]);
    let gender = if probs[1] > probs[0] {
        GenderEstimate {
            gender: Gender::Male,
            probability: probs[1],
        }
    } else {
        GenderEstimate {
            gender: Gender::Female,
            probability: probs[0],
        }
    };
    Ok(AgeGender {
        age: (age * 100.0).max(0.0),
        gender,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_male() {
        let ag = decode(&[-1.0, 2.0, 0.284]).unwrap();
        assert_eq!(ag.gender.gender, Gender::Male);
        assert!(ag.gender.probability > 0.9 && ag.gender.probability <= 1.0);
        assert!((ag.age - 28.4).abs() < 1e-4);
    }

    #[test]
    fn test_decode_female_tie_break() {
        let ag = decode(&[0.5, 0.5, 0.3]).unwrap();
        assert_eq!(ag.gender.gender, Gender::Female);
        assert!((ag.gender.probability - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_negative_age_clamped() {
        assert_eq!(decode(&[1.0, 0.0, -0.02]).unwrap().age, 0.0);
    }

    #[test]
    fn test_decode_short_output() {
        assert!(decode(&[1.0, 0.0]).is_err());
    }
}
