//! Status banners shown above the feed.

use crate::reference::{ReferenceOrigin, ReferenceState};
use crate::state::{CameraFailure, SessionState, StatusReport};

#[derive(Debug, Clone, PartialEq)]
pub enum Banner {
    Idle,
    ModelsLoading,
    ModelsFailed,
    CameraFailed(CameraFailure),
    Detecting,
    FaceDetected,
}

impl Banner {
    pub fn for_status(report: &StatusReport) -> Self {
        match &report.session {
            SessionState::LoadingModels => Banner::ModelsLoading,
            SessionState::ModelsFailed { .. } => Banner::ModelsFailed,
            SessionState::CameraFailed { failure, .. } => Banner::CameraFailed(*failure),
            SessionState::Detecting => Banner::Detecting,
            SessionState::FaceFound => Banner::FaceDetected,
            SessionState::Idle | SessionState::StartingCamera | SessionState::Stopped => {
                Banner::Idle
            }
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Banner::Idle => "",
            Banner::ModelsLoading => "Modules Loading...",
            Banner::ModelsFailed => "Models failed to load: reload",
            Banner::CameraFailed(CameraFailure::PermissionDenied) => {
                "Camera permission denied: grant access and retry"
            }
            Banner::CameraFailed(CameraFailure::NoDevice) => "No camera found: connect one and retry",
            Banner::CameraFailed(CameraFailure::Busy) => {
                "Camera is in use by another application: retry"
            }
            Banner::CameraFailed(CameraFailure::Unknown) => "Camera unavailable: retry",
            Banner::Detecting => "Detecting Face...",
            Banner::FaceDetected => "Face Detected!",
        }
    }
}

/// Extra line about the match target, when there is something to say.
pub fn reference_hint(state: &ReferenceState) -> Option<String> {
    match state {
        ReferenceState::Pending | ReferenceState::Active { .. } => None,
        ReferenceState::NoFaceFound {
            origin: ReferenceOrigin::Upload,
        } => Some("No face found in reference image: upload a clearer photo".into()),
        ReferenceState::NoFaceFound {
            origin: ReferenceOrigin::Default,
        } => Some("No face found in the default reference image".into()),
        ReferenceState::Unavailable { reason } => Some(format!("Matching disabled: {reason}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StatusFlags;

    fn report(session: SessionState) -> StatusReport {
        StatusReport {
            version: "test".into(),
            flags: session.flags(),
            session,
            reference: ReferenceState::Pending,
            video: None,
            ticks: 0,
            frames_with_faces: 0,
            last_face_at: None,
        }
    }

    #[test]
    fn test_banner_texts() {
        assert_eq!(
            Banner::for_status(&report(SessionState::LoadingModels)).text(),
            "Modules Loading..."
        );
        assert_eq!(
            Banner::for_status(&report(SessionState::Detecting)).text(),
            "Detecting Face..."
        );
        assert_eq!(
            Banner::for_status(&report(SessionState::FaceFound)).text(),
            "Face Detected!"
        );
        assert_eq!(
            Banner::for_status(&report(SessionState::ModelsFailed {
                reason: "x".into()
            }))
            .text(),
            "Models failed to load: reload"
        );
    }

    #[test]
    fn test_camera_banner_is_specific() {
        let r = report(SessionState::CameraFailed {
            failure: CameraFailure::PermissionDenied,
            reason: "EACCES".into(),
        });
        let banner = Banner::for_status(&r);
        assert_eq!(banner, Banner::CameraFailed(CameraFailure::PermissionDenied));
        assert!(banner.text().contains("permission"));
        assert_ne!(
            Banner::CameraFailed(CameraFailure::Busy).text(),
            Banner::CameraFailed(CameraFailure::NoDevice).text()
        );
    }

    #[test]
    fn test_idle_has_no_text() {
        let r = report(SessionState::Idle);
        assert_eq!(r.flags, StatusFlags::default());
        assert_eq!(Banner::for_status(&r).text(), "");
    }

    #[test]
    fn test_reference_hints() {
        assert!(reference_hint(&ReferenceState::Active {
            origin: ReferenceOrigin::Upload,
            faces: 1
        })
        .is_none());
        assert_eq!(
            reference_hint(&ReferenceState::NoFaceFound {
                origin: ReferenceOrigin::Upload
            })
            .unwrap(),
            "No face found in reference image: upload a clearer photo"
        );
        assert!(reference_hint(&ReferenceState::Unavailable {
            reason: "no reference image".into()
        })
        .unwrap()
        .contains("no reference image"));
    }
}
