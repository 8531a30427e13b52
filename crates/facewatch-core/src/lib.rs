//! facewatch-core — face analysis, matching and overlay rendering.
//!
//! Detection (SCRFD), 68-point landmarks, age/gender, expression and
//! ArcFace descriptors all run via ONNX Runtime on CPU. Everything else in
//! this crate is plain data: the reference store, the matcher, the session
//! state machine and the overlay canvas.

pub mod alignment;
pub mod attributes;
pub mod detector;
pub mod expression;
pub mod landmarks;
pub mod matcher;
pub mod models;
pub mod overlay;
pub mod recognizer;
pub mod reference;
pub mod state;
pub mod tensor;
pub mod types;
pub mod ui;
pub mod upload;

use std::path::PathBuf;

pub use matcher::{BestMatch, FaceMatcher, MatchVerdict};
pub use models::{AnalyzerError, FaceAnalyzer, ModelBundle, ModelLoadError, ModelSet};
pub use overlay::{render_faces, Canvas, DrawOp};
pub use reference::{MatcherCache, ReferenceImage, ReferenceState, ReferenceStore};
pub use state::{CameraFailure, SessionEvent, SessionState, StatusFlags, StatusReport};
pub use types::{BoundingBox, Descriptor, DetectedFace, Expression, Expressions, Gender};

/// `$XDG_DATA_HOME/facewatch`, falling back to `~/.local/share/facewatch`.
pub fn data_dir() -> PathBuf {
    let base = std::env::var_os("XDG_DATA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("/usr/share"));
    base.join("facewatch")
}

/// Bundled default match target.
pub fn default_reference_path() -> PathBuf {
    data_dir().join("assets").join("defaultFaceToMatch.png")
}
