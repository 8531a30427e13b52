use crate::engine::EngineHandle;
use crate::session::{start_camera, SharedSession};
use facewatch_core::SessionState;
use std::sync::Arc;
use tokio::sync::OnceCell;
use zbus::interface;

pub const BUS_NAME: &str = "io.github.facewatch.Facewatch1";
pub const OBJECT_PATH: &str = "/io/github/facewatch/Facewatch1";

/// Filled once the models have loaded.
pub type EngineSlot = Arc<OnceCell<EngineHandle>>;

pub fn install_engine(slot: &EngineSlot, engine: EngineHandle) -> anyhow::Result<()> {
    slot.set(engine)
        .map_err(|_| anyhow::anyhow!("engine handle was already installed"))
}

/// D-Bus interface for the facewatch daemon.
///
/// Bus name: io.github.facewatch.Facewatch1 (session bus)
/// Object path: /io/github/facewatch/Facewatch1
///
/// Every method returns JSON. The engine slot is empty until the models
/// have loaded, so only `Status` and `Overlay` work before that.
pub struct FacewatchService {
    session: SharedSession,
    engine: EngineSlot,
}

impl FacewatchService {
    pub fn new(session: SharedSession, engine: EngineSlot) -> Self {
        Self { session, engine }
    }

    fn engine(&self) -> zbus::fdo::Result<&EngineHandle> {
        self.engine
            .get()
            .ok_or_else(|| zbus::fdo::Error::Failed("models are not loaded".into()))
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "io.github.facewatch.Facewatch1")]
impl FacewatchService {
    /// Replace the match target with an uploaded `data:image/...;base64,` URI.
    async fn set_reference(&self, data_uri: String) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = data_uri.len(), "set_reference requested");
        let snapshot = self
            .engine()?
            .set_reference(data_uri)
            .await
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        let json = to_json(&snapshot.state)?;
        self.session.write().await.set_reference(snapshot);
        Ok(json)
    }

    /// Drop the uploaded reference and match against the bundled default again.
    async fn deselect_reference(&self) -> zbus::fdo::Result<String> {
        tracing::info!("deselect_reference requested");
        let snapshot = self
            .engine()?
            .restore_default()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        let json = to_json(&snapshot.state)?;
        self.session.write().await.set_reference(snapshot);
        Ok(json)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.session.read().await.report())
    }

    /// Latest overlay canvas, or `null` before any face was seen.
    async fn overlay(&self) -> zbus::fdo::Result<String> {
        to_json(&self.session.read().await.overlay())
    }

    /// Reopen the camera after a failure.
    async fn retry_camera(&self) -> zbus::fdo::Result<String> {
        tracing::info!("retry_camera requested");
        let engine = self.engine()?;
        let state = self.session.read().await.state().clone();
        if !matches!(state, SessionState::CameraFailed { .. }) {
            return Err(zbus::fdo::Error::Failed(format!(
                "camera retry not possible in state {}",
                state.name()
            )));
        }
        start_camera(&self.session, engine).await;
        to_json(&self.session.read().await.report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_engine_installs_once() {
        let (tx, _rx) = mpsc::channel(1);
        let engine = EngineHandle::from_sender(tx);
        let slot: EngineSlot = Arc::default();
        install_engine(&slot, engine.clone()).unwrap();
        assert!(slot.get().is_some());
        assert!(install_engine(&slot, engine).is_err());
    }
}
