//! Session lifecycle as a finite-state machine with a single reducer.

use crate::reference::ReferenceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the camera could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFailure {
    PermissionDenied,
    NoDevice,
    Busy,
    Unknown,
}

impl fmt::Display for CameraFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CameraFailure::PermissionDenied => "permission denied",
            CameraFailure::NoDevice => "no device",
            CameraFailure::Busy => "device busy",
            CameraFailure::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    LoadingModels,
    ModelsFailed { reason: String },
    StartingCamera,
    CameraFailed { failure: CameraFailure, reason: String },
    Detecting,
    FaceFound,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Start,
    ModelsLoaded,
    ModelsFailed(String),
    /// Also used to retry after a camera failure.
    CameraStarting,
    CameraStarted,
    CameraFailed(CameraFailure, String),
    FacesDetected(usize),
    NoFaces,
    Shutdown,
}

impl SessionState {
    /// The one place session transitions are decided. Events that make no
    /// sense in the current state leave it unchanged.
    pub fn reduce(&self, event: &SessionEvent) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (_, E::Shutdown) => S::Stopped,
            (S::Idle, E::Start) => S::LoadingModels,
            (S::LoadingModels, E::ModelsLoaded) => S::StartingCamera,
            (S::LoadingModels, E::ModelsFailed(reason)) => S::ModelsFailed {
                reason: reason.clone(),
            },
            (S::CameraFailed { .. }, E::CameraStarting) => S::StartingCamera,
            (S::Detecting | S::FaceFound, E::CameraStarting) => S::StartingCamera,
            (S::StartingCamera, E::CameraStarted) => S::Detecting,
            (S::StartingCamera | S::Detecting | S::FaceFound, E::CameraFailed(failure, reason)) => {
                S::CameraFailed {
                    failure: *failure,
                    reason: reason.clone(),
                }
            }
            (S::Detecting, E::FacesDetected(n)) if *n > 0 => S::FaceFound,
            (state, _) => state.clone(),
        }
    }

    pub fn flags(&self) -> StatusFlags {
        StatusFlags {
            models_loading: matches!(self, SessionState::LoadingModels),
            detecting: matches!(self, SessionState::Detecting),
            face_detected: matches!(self, SessionState::FaceFound),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::LoadingModels => "loading_models",
            SessionState::ModelsFailed { .. } => "models_failed",
            SessionState::StartingCamera => "starting_camera",
            SessionState::CameraFailed { .. } => "camera_failed",
            SessionState::Detecting => "detecting",
            SessionState::FaceFound => "face_found",
            SessionState::Stopped => "stopped",
        }
    }

    /// True once the loop may run ticks.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Detecting | SessionState::FaceFound)
    }
}

/// Legacy three-flag view of the session, derived and therefore consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    pub models_loading: bool,
    pub detecting: bool,
    pub face_detected: bool,
}

/// Everything a client needs to render the status UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub version: String,
    pub session: SessionState,
    pub flags: StatusFlags,
    pub reference: ReferenceState,
    pub video: Option<(u32, u32)>,
    pub ticks: u64,
    pub frames_with_faces: u64,
    pub last_face_at: Option<DateTime<Utc>>,
}
