//! facewatch-hw — V4L2 camera capture and frame conversion.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::FrameSource;
