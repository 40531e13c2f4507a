use std::net::SocketAddr;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server listens on (default: 0.0.0.0:5000).
    pub bind: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory of enrollment photos, one per member.
    pub enrolled_dir: PathBuf,
    /// Path to the gallery cache file.
    pub cache_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f32,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
    /// Shell command run when a known member is recognized.
    pub unlock_command: Option<String>,
    pub unlock_timeout_secs: u64,
    /// Where to save the last frame received by `/recognize`.
    pub debug_frame_path: Option<PathBuf>,
}

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

impl Config {
    /// Load configuration from `DOORWARD_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = env_path("DOORWARD_MODEL_DIR").unwrap_or_else(doorward_vision::default_model_dir);

        let data_dir = env_path("DOORWARD_DATA_DIR").unwrap_or_else(|| {
            std::env::var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("doorward")
        });

        let bind = std::env::var("DOORWARD_BIND")
            .ok()
            .and_then(|v| match v.parse::<SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!(value = %v, error = %e, "ignoring invalid DOORWARD_BIND");
                    None
                }
            })
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)));

        Self {
            bind,
            model_dir,
            enrolled_dir: env_path("DOORWARD_ENROLLED_DIR").unwrap_or_else(|| data_dir.join("enrolled")),
            cache_path: env_path("DOORWARD_CACHE_PATH")
                .unwrap_or_else(|| data_dir.join("known_encodings.json")),
            tolerance: env_f32("DOORWARD_TOLERANCE", doorward_core::DEFAULT_TOLERANCE),
            max_upload_bytes: env_usize("DOORWARD_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            unlock_command: std::env::var("DOORWARD_UNLOCK_COMMAND")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            unlock_timeout_secs: env_u64("DOORWARD_UNLOCK_TIMEOUT_SECS", 5),
            debug_frame_path: env_path("DOORWARD_DEBUG_FRAME_PATH"),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_f32(key: &str, default: f32) -> f32 {
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
