//! ArcFace face recognizer via ONNX Runtime.
//!
//! Produces 512-dimensional, L2-normalized descriptors from keypoint-aligned
//! 112×112 crops, using the w600k_r50 model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::tensor::gray_to_nchw;
use crate::types::{BoundingBox, Descriptor};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128.0
pub const ARCFACE_DESCRIPTOR_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no keypoints; the detector must supply them for alignment")]
    NoKeypoints,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based descriptor extractor.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded ArcFace recognizer"
        );

        Ok(Self { session })
    }

    /// Extract the descriptor of a detected face from a grayscale frame.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Descriptor, RecognizerError> {
        let keypoints = face.landmarks.as_ref().ok_or(RecognizerError::NoKeypoints)?;
        let aligned = alignment::align_face(frame, width, height, keypoints);
        let input = gray_to_nchw(&aligned, ALIGNED_SIZE, 3, ARCFACE_MEAN, ARCFACE_STD);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        normalize(raw.to_vec())
    }
}

fn normalize(raw: Vec<f32>) -> Result<Descriptor, RecognizerError> {
    if raw.len() != ARCFACE_DESCRIPTOR_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {ARCFACE_DESCRIPTOR_DIM}-dim descriptor, got {}",
            raw.len()
        )));
    }

    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    let values = if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    };

    Ok(Descriptor {
        values,
        model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let mut raw = vec![0.0f32; ARCFACE_DESCRIPTOR_DIM];
        raw[0] = 3.0;
        raw[1] = 4.0;
        let d = normalize(raw).unwrap();
        let norm: f32 = d.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((d.values[0] - 0.6).abs() < 1e-6);
        assert_eq!(d.model_version.as_deref(), Some(ARCFACE_MODEL_VERSION));
    }

    #[test]
    fn test_normalize_zero_vector_kept() {
        let d = normalize(vec![0.0; ARCFACE_DESCRIPTOR_DIM]).unwrap();
        assert!(d.values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_normalize_rejects_wrong_dim() {
        assert!(matches!(
            normalize(vec![1.0; 128]),
            Err(RecognizerError::InferenceFailed(_))
        ));
    }
}
