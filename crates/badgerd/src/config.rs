use badger_core::{DetectionParams, MatchPolicy, Matcher, DEFAULT_CONFIDENCE_THRESHOLD};
use std::path::PathBuf;

/// Which detection/recognition backend the daemon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// ONNX detection + embedding models.
    #[default]
    Onnx,
    /// Deterministic mock backend; no model files required.
    Mock,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onnx" => Ok(Backend::Onnx),
            "mock" => Ok(Backend::Mock),
            other => Err(format!("unknown backend {other:?} (expected \"onnx\" or \"mock\")")),
        }
    }
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// HTTP bind address.
    pub bind_addr: String,
    /// Directory holding one subdirectory of reference photos per identity.
    pub photo_root: PathBuf,
    /// Path of the single trained model artifact.
    pub model_path: PathBuf,
    /// Detection/recognition backend.
    pub backend: Backend,
    /// Path to the ONNX face detection model.
    pub detector_model_path: String,
    /// Path to the ONNX face embedding model.
    pub embedding_model_path: String,
    /// Accept threshold for a match (distance-like, lower is stronger).
    pub confidence_threshold: f32,
    /// Detector scale factor tunable.
    pub scale_factor: f32,
    /// Detector minimum-neighbor tunable.
    pub min_neighbors: u32,
    /// First-acceptable vs best-of-all region policy.
    pub match_policy: MatchPolicy,
}

impl Config {
    /// Load configuration from `BADGER_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BADGER_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            photo_root: std::env::var("BADGER_PHOTO_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("photos")),
            model_path: std::env::var("BADGER_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("trained-model.json")),
            backend: env_parsed("BADGER_BACKEND"),
            detector_model_path: std::env::var("BADGER_DETECTOR_MODEL")
                .unwrap_or_else(|_| "models/face-detect.onnx".to_string()),
            embedding_model_path: std::env::var("BADGER_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "models/face-embed.onnx".to_string()),
            confidence_threshold: env_f32(
                "BADGER_CONFIDENCE_THRESHOLD",
                DEFAULT_CONFIDENCE_THRESHOLD,
            ),
            scale_factor: env_f32("BADGER_SCALE_FACTOR", 1.3),
            min_neighbors: env_u32("BADGER_MIN_NEIGHBORS", 5),
            match_policy: env_parsed("BADGER_MATCH_POLICY"),
        }
    }

    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
        }
    }

    pub fn matcher(&self) -> Matcher {
        Matcher::new(
            self.confidence_threshold,
            self.match_policy,
            self.detection_params(),
        )
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

fn env_parsed<T: std::str::FromStr + Default>(key: &str) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}
