//! Frame source seam between capture hardware and the detection loop.

use crate::camera::CameraError;
use crate::frame::Frame;

/// Anything that yields grayscale frames on demand.
pub trait FrameSource: Send {
    /// Grab the next frame.
    fn grab(&mut self) -> Result<Frame, CameraError>;

    /// Native resolution of the feed.
    fn resolution(&self) -> (u32, u32);

    /// Discard `count` frames so exposure can settle. Errors are ignored.
    fn warm_up(&mut self, count: usize) {
        for _ in 0..count {
            if let Err(e) = self.grab() {
                tracing::debug!(error = %e, "warmup frame failed");
            }
        }
    }
}
