use std::path::PathBuf;

/// Application configuration, loaded from environment variables.
pub struct Config {
    /// Camera device index (default: 0 → /dev/video0).
    pub camera_index: u32,
    /// Path to the cascade detection model (JSON).
    pub model_path: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Combined-score threshold for a one-off recognition.
    pub single_shot_threshold: f32,
    /// Combined-score threshold for live-stream overlays.
    pub stream_threshold: f32,
    /// Signatures collected per enrollment.
    pub enroll_samples: usize,
    /// Run recognition on every Nth stream frame.
    pub recognition_interval: u32,
    /// Target stream frame rate.
    pub stream_fps: u32,
    /// Requested capture resolution.
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Config {
    /// Load configuration from `MIEN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("mien");

        let model_path = std::env::var("MIEN_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("cascade.json"));

        let db_path = std::env::var("MIEN_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("gallery.db"));

        Self {
            camera_index: env_u32("MIEN_CAMERA_INDEX", 0),
            model_path,
            db_path,
            single_shot_threshold: env_f32(
                "MIEN_MATCH_THRESHOLD",
                mien_core::types::SINGLE_SHOT_THRESHOLD,
            ),
            stream_threshold: env_f32("MIEN_STREAM_THRESHOLD", mien_core::types::STREAM_THRESHOLD),
            enroll_samples: env_usize("MIEN_ENROLL_SAMPLES", 5),
            recognition_interval: env_u32("MIEN_RECOGNITION_INTERVAL", 5),
            stream_fps: env_u32("MIEN_STREAM_FPS", 20),
            frame_width: env_u32("MIEN_FRAME_WIDTH", 640),
            frame_height: env_u32("MIEN_FRAME_HEIGHT", 480),
        }
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

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
