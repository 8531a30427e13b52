//! Model bundle loading and the analyzer capability.
//!
//! All five bundles load from one directory, in a fixed order. A
//! [`ModelSet`] only exists once every bundle has loaded, so holding one is
//! the proof that detection may start.

use crate::attributes::{AgeGenderModel, AttributeError};
use crate::detector::{DetectorError, FaceDetector};
use crate::expression::{ExpressionError, ExpressionModel};
use crate::landmarks::{LandmarkError, LandmarkModel};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{DetectedFace, Descriptor};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The five named model bundles, in load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBundle {
    Detector,
    Landmarks68,
    Recognizer,
    AgeGender,
    Expression,
}

impl ModelBundle {
    pub const ALL: [ModelBundle; 5] = [
        ModelBundle::Detector,
        ModelBundle::Landmarks68,
        ModelBundle::Recognizer,
        ModelBundle::AgeGender,
        ModelBundle::Expression,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            ModelBundle::Detector => "det_10g.onnx",
            ModelBundle::Landmarks68 => "1k3d68.onnx",
            ModelBundle::Recognizer => "w600k_r50.onnx",
            ModelBundle::AgeGender => "genderage.onnx",
            ModelBundle::Expression => "emotion-ferplus-8.onnx",
        }
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl fmt::Display for ModelBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelBundle::Detector => "detector",
            ModelBundle::Landmarks68 => "landmarks68",
            ModelBundle::Recognizer => "recognizer",
            ModelBundle::AgeGender => "age_gender",
            ModelBundle::Expression => "expression",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("failed to load {bundle} bundle: {reason}")]
pub struct ModelLoadError {
    pub bundle: ModelBundle,
    pub reason: String,
}

impl ModelLoadError {
    fn new(bundle: ModelBundle, err: impl fmt::Display) -> Self {
        Self {
            bundle,
            reason: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmarks: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("age/gender: {0}")]
    Attributes(#[from] AttributeError),
    #[error("expression: {0}")]
    Expression(#[from] ExpressionError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Face analysis capability: the seam between the loop and the models.
pub trait FaceAnalyzer {
    /// Detect every face in a grayscale frame with full attributes.
    fn analyze(&mut self, frame: &[u8], width: u32, height: u32)
        -> Result<Vec<DetectedFace>, AnalyzerError>;

    /// Descriptors of every face in a reference image; feeds the matcher.
    fn describe(&mut self, frame: &[u8], width: u32, height: u32)
        -> Result<Vec<Descriptor>, AnalyzerError>;
}

/// All five loaded bundles.
pub struct ModelSet {
    detector: FaceDetector,
    landmarks: LandmarkModel,
    recognizer: FaceRecognizer,
    age_gender: AgeGenderModel,
    expression: ExpressionModel,
}

impl ModelSet {
    /// Load every bundle from `dir`, stopping at the first failure.
    pub fn load(dir: &Path) -> Result<Self, ModelLoadError> {
        tracing::info!(dir = %dir.display(), bundles = ModelBundle::ALL.len(), "loading model bundles");

        let path = |b: ModelBundle| b.path_in(dir);
        let detector = FaceDetector::load(&path(ModelBundle::Detector))
            .map_err(|e| ModelLoadError::new(ModelBundle::Detector, e))?;
        let landmarks = LandmarkModel::load(&path(ModelBundle::Landmarks68))
            .map_err(|e| ModelLoadError::new(ModelBundle::Landmarks68, e))?;
        let recognizer = FaceRecognizer::load(&path(ModelBundle::Recognizer))
            .map_err(|e| ModelLoadError::new(ModelBundle::Recognizer, e))?;
        let age_gender = AgeGenderModel::load(&path(ModelBundle::AgeGender))
            .map_err(|e| ModelLoadError::new(ModelBundle::AgeGender, e))?;
        let expression = ExpressionModel::load(&path(ModelBundle::Expression))
            .map_err(|e| ModelLoadError::new(ModelBundle::Expression, e))?;

        tracing::info!("all model bundles loaded");
        Ok(Self {
            detector,
            landmarks,
            recognizer,
            age_gender,
            expression,
        })
    }
}

impl FaceAnalyzer for ModelSet {
    fn analyze(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let boxes = self.detector.detect(frame, width, height)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let landmarks = self.landmarks.predict(frame, width, height, &bbox)?;
            let attrs = self.age_gender.predict(frame, width, height, &bbox)?;
            let expressions = self.expression.predict(frame, width, height, &bbox)?;
            let descriptor = self.recognizer.extract(frame, width, height, &bbox)?;
            faces.push(DetectedFace {
                bbox,
                landmarks,
                age: attrs.age,
                gender: attrs.gender,
                expressions,
                descriptor,
            });
        }
        Ok(faces)
    }

    fn describe(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Descriptor>, AnalyzerError> {
        let boxes = self.detector.detect(frame, width, height)?;
        boxes
            .iter()
            .map(|b| {
                self.recognizer
                    .extract(frame, width, height, b)
                    .map_err(AnalyzerError::from)
            })
            .collect()
    }
}

/// Default model directory: `$XDG_DATA_HOME/facewatch/models`.
pub fn default_model_dir() -> PathBuf {
    crate::data_dir().join("models")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_order_and_files() {
        let files: Vec<&str> = ModelBundle::ALL.iter().map(|b| b.file_name()).collect();
        assert_eq!(
            files,
            vec![
                "det_10g.onnx",
                "1k3d68.onnx",
                "w600k_r50.onnx",
                "genderage.onnx",
                "emotion-ferplus-8.onnx"
            ]
        );
    }

    #[test]
    fn test_missing_dir_fails_on_first_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelSet::load(dir.path()).err().unwrap();
        assert_eq!(err.bundle, ModelBundle::Detector);
        assert!(err.to_string().contains("detector"));
        assert!(err.reason.contains("det_10g.onnx"));
    }
}
