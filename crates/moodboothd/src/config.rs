use moodbooth_core::StylePolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path; the first capture device is used when unset.
    pub camera_device: Option<String>,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Root directory of the style reference images.
    pub asset_dir: PathBuf,
    /// Optional catalog TOML replacing the built-in one.
    pub catalog_path: Option<PathBuf>,
    /// How a style is picked from an emotion's list.
    pub style_policy: StylePolicy,
    /// Style/content bottleneck blend, 1.0 = pure style.
    pub style_strength: f32,
    /// Seconds counted down before an automatic capture.
    pub countdown_secs: u32,
    /// Delay between detection ticks.
    pub frame_interval: Duration,
    /// Number of frames to discard after opening the camera.
    pub warmup_frames: usize,
}

impl Config {
    /// Load configuration from `MOODBOOTH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let style_policy = match std::env::var("MOODBOOTH_STYLE_POLICY") {
            Ok(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to random style policy");
                StylePolicy::Random
            }),
            Err(_) => StylePolicy::Random,
        };

        Self {
            camera_device: std::env::var("MOODBOOTH_CAMERA_DEVICE").ok(),
            model_dir: std::env::var("MOODBOOTH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| moodbooth_core::default_model_dir()),
            asset_dir: std::env::var("MOODBOOTH_ASSET_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| moodbooth_core::default_asset_dir()),
            catalog_path: std::env::var("MOODBOOTH_CATALOG").ok().map(PathBuf::from),
            style_policy,
            style_strength: env_f32("MOODBOOTH_STYLE_STRENGTH", 1.0),
            countdown_secs: env_u32("MOODBOOTH_COUNTDOWN_SECS", 5),
            frame_interval: Duration::from_millis(env_u64("MOODBOOTH_FRAME_INTERVAL_MS", 33)),
            warmup_frames: env_usize("MOODBOOTH_WARMUP_FRAMES", 4),
        }
    }

    /// Path to the SCRFD face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_path("det_10g.onnx")
    }

    /// Path to the FER+ expression model.
    pub fn expression_model_path(&self) -> String {
        self.model_path("emotion-ferplus-8.onnx")
    }

    /// Path to the style prediction network.
    pub fn style_predict_model_path(&self) -> String {
        self.model_path("style_predict.onnx")
    }

    /// Path to the style transformer network.
    pub fn style_transform_model_path(&self) -> String {
        self.model_path("style_transform.onnx")
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
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

fn env_u64(key: &str, default: u64) -> u64 {
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
