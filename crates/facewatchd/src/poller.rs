//! Fixed-cadence detection loop.

use crate::engine::{EngineError, EngineHandle};
use crate::session::SharedSession;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Drive the engine once per `interval` until `cancel` fires.
///
/// At most one tick is in flight: the next tick is not awaited until the
/// engine has replied, and ticks that fall due meanwhile are dropped.
/// Replies that arrive after cancellation are discarded unpublished.
pub async fn run(
    engine: EngineHandle,
    session: SharedSession,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(interval_ms = interval.as_millis() as u64, "detection loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Camera down or never started: idle until a retry brings it back.
        if !session.read().await.state().is_live() {
            continue;
        }

        let result = engine.tick().await;
        if cancel.is_cancelled() {
            tracing::debug!("discarding tick result after cancellation");
            break;
        }
        let closed = matches!(result, Err(EngineError::ChannelClosed));
        session.write().await.apply_tick(result);
        if closed {
            tracing::error!("engine gone, stopping detection loop");
            break;
        }
    }

    tracing::info!("detection loop stopped");
}
