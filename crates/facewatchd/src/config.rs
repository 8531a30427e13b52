use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the five ONNX model bundles.
    pub model_dir: PathBuf,
    /// Bundled default match target.
    pub default_reference: PathBuf,
    /// Tick cadence of the detection loop.
    pub poll_interval: Duration,
    /// Number of warmup frames to discard after the camera opens.
    pub warmup_frames: usize,
    /// Frames wider than this are downscaled before inference.
    pub analysis_max_width: u32,
    /// Consecutive capture failures before the camera is declared lost.
    pub max_capture_failures: u32,
}

impl Config {
    /// Load configuration from `FACEWATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEWATCH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facewatch_core::models::default_model_dir());

        let default_reference = std::env::var("FACEWATCH_DEFAULT_REFERENCE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facewatch_core::default_reference_path());

        Self {
            camera_device: std::env::var("FACEWATCH_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            default_reference,
            poll_interval: Duration::from_millis(env_u64("FACEWATCH_POLL_INTERVAL_MS", 200).max(1)),
            warmup_frames: env_usize("FACEWATCH_WARMUP_FRAMES", 4),
            analysis_max_width: env_u32("FACEWATCH_ANALYSIS_MAX_WIDTH", 640),
            max_capture_failures: env_u32("FACEWATCH_MAX_CAPTURE_FAILURES", 10).max(1),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
