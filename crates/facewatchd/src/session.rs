//! Shared session state read by D-Bus handlers and written by the poller.

use crate::engine::{EngineError, EngineHandle, ReferenceSnapshot, TickReport};
use chrono::{DateTime, Utc};
use facewatch_core::{
    CameraFailure, Canvas, ReferenceState, SessionEvent, SessionState, StatusReport,
};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedSession = Arc<RwLock<Session>>;

pub struct Session {
    state: SessionState,
    reference: ReferenceState,
    reference_generation: u64,
    overlay: Option<Canvas>,
    video: Option<(u32, u32)>,
    ticks: u64,
    frames_with_faces: u64,
    last_face_at: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            reference: ReferenceState::Pending,
            reference_generation: 0,
            overlay: None,
            video: None,
            ticks: 0,
            frames_with_faces: 0,
            last_face_at: None,
        }
    }
}

impl Session {
    pub fn shared() -> SharedSession {
        Arc::new(RwLock::new(Session::default()))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn overlay(&self) -> Option<&Canvas> {
        self.overlay.as_ref()
    }

    pub fn dispatch(&mut self, event: SessionEvent) {
        let next = self.state.reduce(&event);
        if next != self.state {
            tracing::info!(from = self.state.name(), to = next.name(), "session state changed");
            self.state = next;
        }
    }

    /// Record a reference snapshot unless a newer generation is already held.
    ///
    /// Ticks and reference calls are answered in engine order but may reach
    /// the session in any order.
    pub fn set_reference(&mut self, snapshot: ReferenceSnapshot) {
        if snapshot.generation < self.reference_generation {
            tracing::debug!(
                stale = snapshot.generation,
                current = self.reference_generation,
                "ignoring stale reference state"
            );
            return;
        }
        if snapshot.state != self.reference {
            tracing::info!(reference = ?snapshot.state, generation = snapshot.generation, "reference state changed");
        }
        self.reference_generation = snapshot.generation;
        self.reference = snapshot.state;
    }

    pub fn set_video(&mut self, resolution: (u32, u32)) {
        self.video = Some(resolution);
    }

    /// Fold one tick's outcome into the session.
    pub fn apply_tick(&mut self, result: Result<TickReport, EngineError>) {
        match result {
            Ok(TickReport::NoSource) => {}
            Ok(TickReport::NoFaces) => {
                self.ticks += 1;
                self.dispatch(SessionEvent::NoFaces);
            }
            Ok(TickReport::Faces {
                count,
                canvas,
                reference,
            }) => {
                self.ticks += 1;
                self.frames_with_faces += 1;
                self.last_face_at = Some(Utc::now());
                self.overlay = Some(canvas);
                self.set_reference(reference);
                self.dispatch(SessionEvent::FacesDetected(count));
            }
            Err(EngineError::CameraLost {
                failure, reason, ..
            }) => {
                tracing::error!(%reason, "camera lost");
                self.video = None;
                self.dispatch(SessionEvent::CameraFailed(failure, reason));
            }
            Err(e) => {
                self.ticks += 1;
                tracing::warn!(error = %e, "detection tick failed");
            }
        }
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            session: self.state.clone(),
            flags: self.state.flags(),
            reference: self.reference.clone(),
            video: self.video,
            ticks: self.ticks,
            frames_with_faces: self.frames_with_faces,
            last_face_at: self.last_face_at,
        }
    }
}

/// Open the camera through the engine and record the outcome.
///
/// Used at startup and by the retry method.
pub async fn start_camera(session: &SharedSession, engine: &EngineHandle) {
    session.write().await.dispatch(SessionEvent::CameraStarting);
    match engine.open_source().await {
        Ok(resolution) => {
            let mut s = session.write().await;
            s.set_video(resolution);
            s.dispatch(SessionEvent::CameraStarted);
        }
        Err(e) => {
            let failure = match &e {
                EngineError::Camera(camera) => camera.failure(),
                _ => CameraFailure::Unknown,
            };
            tracing::error!(error = %e, failure = %failure, "camera failed to start");
            session
                .write()
                .await
                .dispatch(SessionEvent::CameraFailed(failure, e.to_string()));
        }
    }
}
