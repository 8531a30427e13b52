use anyhow::{Context, Result};
use facewatch_core::reference::{ReferenceImage, ReferenceStore};
use facewatch_core::{ModelSet, SessionEvent};
use facewatch_hw::Camera;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod poller;
mod session;

use config::Config;
use dbus_interface::{install_engine, EngineSlot, FacewatchService, BUS_NAME, OBJECT_PATH};
use engine::{spawn_engine, Pipeline, PipelineOptions, SourceOpener};
use session::{start_camera, Session};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facewatchd starting");

    let config = Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    let session = Session::shared();
    let engine_slot: EngineSlot = Arc::default();

    // Serve status right away so clients can watch models load.
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(
            OBJECT_PATH,
            FacewatchService::new(session.clone(), engine_slot.clone()),
        )?
        .build()
        .await
        .context("failed to register on the session bus")?;
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus service registered");

    session.write().await.dispatch(SessionEvent::Start);

    let model_dir = config.model_dir.clone();
    let models = tokio::task::spawn_blocking(move || ModelSet::load(&model_dir))
        .await
        .context("model loading task panicked")?;

    let cancel = CancellationToken::new();
    let mut poller = None;

    match models {
        Ok(models) => {
            session.write().await.dispatch(SessionEvent::ModelsLoaded);

            let default = match ReferenceImage::from_asset(&config.default_reference) {
                Ok(image) => Some(image),
                Err(e) => {
                    tracing::warn!(error = %e, "default reference unavailable; matching disabled until upload");
                    None
                }
            };

            let device = config.camera_device.clone();
            let opener: SourceOpener<Camera> = Box::new(move || Camera::open(&device));
            let pipeline = Pipeline::new(
                models,
                ReferenceStore::new(default),
                opener,
                PipelineOptions {
                    analysis_max_width: config.analysis_max_width,
                    max_capture_failures: config.max_capture_failures,
                    warmup_frames: config.warmup_frames,
                },
            );
            let engine = spawn_engine(pipeline)?;
            install_engine(&engine_slot, engine.clone())?;

            match engine.reference_state().await {
                Ok(snapshot) => session.write().await.set_reference(snapshot),
                Err(e) => tracing::warn!(error = %e, "reference state unavailable"),
            }

            start_camera(&session, &engine).await;

            poller = Some(tokio::spawn(poller::run(
                engine,
                session.clone(),
                config.poll_interval,
                cancel.clone(),
            )));
        }
        Err(e) => {
            tracing::error!(error = %e, "model loading failed; detection disabled");
            session
                .write()
                .await
                .dispatch(SessionEvent::ModelsFailed(e.to_string()));
        }
    }

    tracing::info!("facewatchd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facewatchd shutting down");

    cancel.cancel();
    if let Some(poller) = poller {
        if let Err(e) = poller.await {
            tracing::warn!(error = %e, "detection loop did not stop cleanly");
        }
    }
    session.write().await.dispatch(SessionEvent::Shutdown);

    Ok(())
}
