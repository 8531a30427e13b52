//! Nearest-descriptor matching against the reference image.

use crate::types::Descriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label reported when no reference is close enough.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Euclidean distance above which a face is reported as unknown.
///
/// ArcFace descriptors are unit length, so this is equivalent to a cosine
/// similarity floor of 1 - d²/2 ≈ 0.40.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 1.095;

/// One identity: a label and every descriptor observed for it.
#[derive(Debug, Clone)]
pub struct LabeledDescriptors {
    pub label: String,
    pub descriptors: Vec<Descriptor>,
}

/// Best match for a probe descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestMatch {
    pub label: String,
    pub distance: f32,
}

impl BestMatch {
    pub fn is_unknown(&self) -> bool {
        self.label.contains(UNKNOWN_LABEL)
    }

    pub fn verdict(&self) -> MatchVerdict {
        if self.is_unknown() {
            MatchVerdict::Unknown
        } else {
            MatchVerdict::Recognized
        }
    }
}

impl fmt::Display for BestMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2})", self.label, self.distance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchVerdict {
    Recognized,
    Unknown,
}

impl MatchVerdict {
    pub fn text(&self) -> &'static str {
        match self {
            MatchVerdict::Recognized => "Face Recognized / Matched",
            MatchVerdict::Unknown => "Unknown Human...",
        }
    }
}

/// Maps probe descriptors to the closest reference identity.
///
/// Each identity is represented by the mean of its descriptors.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    identities: Vec<(String, Descriptor)>,
    threshold: f32,
}

impl FaceMatcher {
    /// Build from labeled identities. Identities without descriptors are dropped;
    /// `None` when nothing remains.
    pub fn new(references: Vec<LabeledDescriptors>, threshold: f32) -> Option<Self> {
        let identities: Vec<(String, Descriptor)> = references
            .into_iter()
            .filter_map(|r| Descriptor::mean(&r.descriptors).map(|d| (r.label, d)))
            .collect();
        if identities.is_empty() {
            return None;
        }
        Some(Self {
            identities,
            threshold,
        })
    }

    /// One identity per face found in the reference image, labeled
    /// `person 1`, `person 2`, ...
    pub fn from_reference(descriptors: Vec<Descriptor>) -> Option<Self> {
        let references = descriptors
            .into_iter()
            .enumerate()
            .map(|(i, d)| LabeledDescriptors {
                label: format!("person {}", i + 1),
                descriptors: vec![d],
            })
            .collect();
        Self::new(references, DEFAULT_DISTANCE_THRESHOLD)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn find_best_match(&self, probe: &Descriptor) -> BestMatch {
        let (label, distance) = self
            .identities
            .iter()
            .map(|(label, d)| (label, probe.euclidean_distance(d)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(label, d)| (label.as_str(), d))
            .unwrap_or((UNKNOWN_LABEL, f32::INFINITY));

        BestMatch {
            label: if distance > self.threshold {
                UNKNOWN_LABEL.to_string()
            } else {
                label.to_string()
            },
            distance,
        }
    }
}
