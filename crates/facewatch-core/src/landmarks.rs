//! 68-point facial landmark regressor (InsightFace `1k3d68`).
//!
//! The face box is expanded by 1.5×, cropped to 192×192 and regressed; the
//! model emits normalized (x, y, z) triples whose trailing 68 rows are the
//! classic 68-point layout.

use crate::alignment::CropTransform;
use crate::tensor::gray_to_nchw;
use crate::types::BoundingBox;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: usize = 192;
const LANDMARK_MARGIN: f32 = 1.5;
const LANDMARK_MEAN: f32 = 0.0;
const LANDMARK_STD: f32 = 1.0;
pub const LANDMARK_POINTS: usize = 68;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct LandmarkModel {
    session: Session,
}

impl LandmarkModel {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded 68-point landmark model");
        Ok(Self { session })
    }

    /// Regress 68 landmarks for `face`, in frame coordinates.
    pub fn predict(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Vec<(f32, f32)>, LandmarkError> {
        let transform = CropTransform::centered(
            face.center(),
            face.width.max(face.height),
            LANDMARK_MARGIN,
            LANDMARK_INPUT_SIZE,
        );
        let crop = transform.warp(frame, width, height, LANDMARK_INPUT_SIZE);
        let input = gray_to_nchw(&crop, LANDMARK_INPUT_SIZE, 3, LANDMARK_MEAN, LANDMARK_STD);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark output: {e}")))?;

        decode_points(raw, &transform)
    }
}

/// Take the trailing 68 (x, y, z) rows, map from [-1, 1] crop space back to the frame.
fn decode_points(raw: &[f32], transform: &CropTransform) -> Result<Vec<(f32, f32)>, LandmarkError> {
    let rows = raw.len() / 3;
    if rows < LANDMARK_POINTS {
        return Err(LandmarkError::InferenceFailed(format!(
            "expected at least {} values, got {}",
            LANDMARK_POINTS * 3,
            raw.len()
        )));
    }

    let half = (LANDMARK_INPUT_SIZE / 2) as f32;
    let points = raw[(rows - LANDMARK_POINTS) * 3..rows * 3]
        .chunks_exact(3)
        .map(|p| transform.invert(((p[0] + 1.0) * half, (p[1] + 1.0) * half)))
        .collect();
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_points_uses_trailing_rows() {
        // 2 leading rows of junk, then 68 rows at the crop centre.
        let mut raw = vec![9.0f32; 6];
        raw.extend(std::iter::repeat([0.0f32, 0.0, 0.5]).take(LANDMARK_POINTS).flatten());

        let transform = CropTransform::centered((300.0, 200.0), 100.0, LANDMARK_MARGIN, LANDMARK_INPUT_SIZE);
        let points = decode_points(&raw, &transform).unwrap();

        assert_eq!(points.len(), LANDMARK_POINTS);
        // (0, 0) normalized is the crop centre, which is the box centre.
        for (x, y) in points {
            assert!((x - 300.0).abs() < 1e-3 && (y - 200.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_points_rejects_short_output() {
        let transform = CropTransform::centered((0.0, 0.0), 10.0, 1.5, 192);
        assert!(decode_points(&[0.0; 30], &transform).is_err());
    }
}
