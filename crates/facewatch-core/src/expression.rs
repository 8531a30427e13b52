//! Facial expression classifier (FER+ `emotion-ferplus-8`).
//!
//! Input is a single-channel 64×64 crop of raw pixel values; output is eight
//! logits in [`Expression::ALL`] order.

use crate::alignment::CropTransform;
use crate::tensor::{gray_to_nchw, softmax};
use crate::types::{BoundingBox, Expression, Expressions};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FERPLUS_INPUT_SIZE: usize = 64;
const FERPLUS_MARGIN: f32 = 1.0;

#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ExpressionModel {
    session: Session,
}

impl ExpressionModel {
    pub fn load(model_path: &Path) -> Result<Self, ExpressionError> {
        if !model_path.exists() {
            return Err(ExpressionError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded expression model");
        Ok(Self { session })
    }

    pub fn predict(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Expressions, ExpressionError> {
        let transform = CropTransform::centered(
            face.center(),
            face.width.max(face.height),
            FERPLUS_MARGIN,
            FERPLUS_INPUT_SIZE,
        );
        let crop = transform.warp(frame, width, height, FERPLUS_INPUT_SIZE);
        let input = gray_to_nchw(&crop, FERPLUS_INPUT_SIZE, 1, 0.0, 1.0);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExpressionError::InferenceFailed(format!("expression output: {e}")))?;

        decode(logits)
    }
}

fn decode(logits: &[f32]) -> Result<Expressions, ExpressionError> {
    if logits.len() < Expression::ALL.len() {
        return Err(ExpressionError::InferenceFailed(format!(
            "expected {} logits, got {}",
            Expression::ALL.len(),
            logits.len()
        )));
    }
    let probs = softmax(&logits[..Expression::ALL.len()]);
    Ok(Expressions {
        scores: Expression::ALL.iter().copied().zip(probs).collect(),
    })
}
