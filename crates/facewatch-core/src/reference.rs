//! The reference image ("face to match") and the matcher derived from it.

use crate::matcher::FaceMatcher;
use crate::models::FaceAnalyzer;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const DATA_URI_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("failed to read reference asset {path}: {source}")]
    Asset {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed data URI: {0}")]
    MalformedDataUri(String),
    #[error("not an image: {0}")]
    NotAnImage(String),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Where the active reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceOrigin {
    Default,
    Upload,
}

/// SHA-256 of the decoded image bytes.
pub type Fingerprint = [u8; 32];

/// A decoded reference image. Replaced wholesale, never edited.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub origin: ReferenceOrigin,
    pub mime: String,
    bytes: Arc<[u8]>,
    fingerprint: Fingerprint,
}

impl ReferenceImage {
    fn new(origin: ReferenceOrigin, mime: String, bytes: Vec<u8>) -> Self {
        let fingerprint: Fingerprint = Sha256::digest(&bytes).into();
        Self {
            origin,
            mime,
            bytes: bytes.into(),
            fingerprint,
        }
    }

    /// Load the bundled default asset from disk.
    pub fn from_asset(path: &Path) -> Result<Self, ReferenceError> {
        let bytes = std::fs::read(path).map_err(|source| ReferenceError::Asset {
            path: path.display().to_string(),
            source,
        })?;
        let mime = image::guess_format(&bytes)
            .map(|f| f.to_mime_type().to_string())
            .map_err(|e| ReferenceError::NotAnImage(format!("{}: {e}", path.display())))?;
        Ok(Self::new(ReferenceOrigin::Default, mime, bytes))
    }

    /// Decode an uploaded `data:image/...;base64,...` URI.
    pub fn from_data_uri(uri: &str) -> Result<Self, ReferenceError> {
        let (mime, bytes) = parse_data_uri(uri)?;
        Ok(Self::new(ReferenceOrigin::Upload, mime, bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// Encode bytes as `data:<mime>;base64,<payload>`.
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!(
        "{DATA_URI_PREFIX}{mime}{BASE64_MARKER}{}",
        base64::prelude::BASE64_STANDARD.encode(bytes)
    )
}

/// Split a base64 image data URI into its MIME type and decoded bytes.
pub fn parse_data_uri(uri: &str) -> Result<(String, Vec<u8>), ReferenceError> {
    let rest = uri
        .trim()
        .strip_prefix(DATA_URI_PREFIX)
        .ok_or_else(|| ReferenceError::MalformedDataUri("missing `data:` scheme".into()))?;
    let (mime, payload) = rest
        .split_once(BASE64_MARKER)
        .ok_or_else(|| ReferenceError::MalformedDataUri("missing `;base64,` marker".into()))?;
    if !mime.starts_with("image/") || mime.len() == "image/".len() {
        return Err(ReferenceError::NotAnImage(format!("MIME type `{mime}`")));
    }
    let bytes = base64::prelude::BASE64_STANDARD.decode(payload)?;
    if bytes.is_empty() {
        return Err(ReferenceError::MalformedDataUri("empty payload".into()));
    }
    Ok((mime.to_string(), bytes))
}

/// Holds the bundled default and the currently active reference.
#[derive(Debug, Clone, Default)]
pub struct ReferenceStore {
    default: Option<ReferenceImage>,
    active: Option<ReferenceImage>,
}

impl ReferenceStore {
    /// `default` is `None` when the bundled asset could not be read.
    pub fn new(default: Option<ReferenceImage>) -> Self {
        Self {
            active: default.clone(),
            default,
        }
    }

    pub fn active(&self) -> Option<&ReferenceImage> {
        self.active.as_ref()
    }

    pub fn set(&mut self, image: ReferenceImage) {
        tracing::info!(origin = ?image.origin, mime = %image.mime, bytes = image.bytes.len(), "reference image replaced");
        self.active = Some(image);
    }

    /// Make the bundled default the active reference again.
    pub fn restore_default(&mut self) {
        tracing::info!(available = self.default.is_some(), "reference image restored to default");
        self.active = self.default.clone();
    }
}

/// User-visible state of the active reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReferenceState {
    /// Not analyzed yet.
    Pending,
    /// A matcher exists for `faces` reference faces.
    Active { origin: ReferenceOrigin, faces: usize },
    /// The reference image contains no detectable face.
    NoFaceFound { origin: ReferenceOrigin },
    /// There is no usable reference at all.
    Unavailable { reason: String },
}

impl ReferenceState {
    pub fn has_matcher(&self) -> bool {
        matches!(self, ReferenceState::Active { .. })
    }
}

/// Matcher for the active reference, rebuilt only when the reference changes.
#[derive(Default)]
pub struct MatcherCache {
    key: Option<Fingerprint>,
    matcher: Option<FaceMatcher>,
    state: Option<ReferenceState>,
}

impl MatcherCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matcher(&self) -> Option<&FaceMatcher> {
        self.matcher.as_ref()
    }

    /// Bring the cache in line with the store's active reference and report its state.
    pub fn resolve<A: FaceAnalyzer + ?Sized>(
        &mut self,
        store: &ReferenceStore,
        analyzer: &mut A,
    ) -> ReferenceState {
        let Some(image) = store.active() else {
            self.key = None;
            self.matcher = None;
            let state = ReferenceState::Unavailable {
                reason: "no reference image".into(),
            };
            self.state = Some(state.clone());
            return state;
        };

        if self.key.as_ref() == Some(image.fingerprint()) {
            if let Some(state) = &self.state {
                return state.clone();
            }
        }

        let derived = derive(image, analyzer);
        // Analyzer failures are transient; leave the key unset so the next call retries.
        self.key = derived.settled.then(|| *image.fingerprint());
        self.matcher = derived.matcher;
        let state = derived.state;
        self.state = Some(state.clone());
        state
    }
}

struct Derived {
    matcher: Option<FaceMatcher>,
    state: ReferenceState,
    /// False when the outcome may differ on retry.
    settled: bool,
}

fn derive<A: FaceAnalyzer + ?Sized>(image: &ReferenceImage, analyzer: &mut A) -> Derived {
    let gray = match image::load_from_memory(image.bytes()) {
        Ok(img) => img.to_luma8(),
        Err(e) => {
            tracing::warn!(error = %e, "reference image could not be decoded");
            return Derived {
                matcher: None,
                state: ReferenceState::Unavailable {
                    reason: format!("reference image could not be decoded: {e}"),
                },
                settled: true,
            };
        }
    };

    let descriptors = match analyzer.describe(gray.as_raw(), gray.width(), gray.height()) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "reference analysis failed");
            return Derived {
                matcher: None,
                state: ReferenceState::Unavailable {
                    reason: format!("reference analysis failed: {e}"),
                },
                settled: false,
            };
        }
    };

    let faces = descriptors.len();
    let matcher = FaceMatcher::from_reference(descriptors);
    let state = if matcher.is_some() {
        tracing::info!(faces, origin = ?image.origin, "matcher derived from reference");
        ReferenceState::Active {
            origin: image.origin,
            faces,
        }
    } else {
        tracing::warn!(origin = ?image.origin, "no face found in reference image");
        ReferenceState::NoFaceFound {
            origin: image.origin,
        }
    };
    Derived {
        matcher,
        state,
        settled: true,
    }
}
