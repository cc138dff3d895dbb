use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use config::{Config, ConfigError, Environment};

use crate::pipeline::AreaFormula;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: Server,
    pub model: ModelConfig,
    pub detection: DetectionConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub cors_allow_any_origin: bool,
    /// Largest accepted upload or websocket message, after continuation frames
    /// are joined.
    pub max_frame_bytes: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_filename: PathBuf,
    pub label_filename: PathBuf,
    pub num_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub class_aware: bool,
    pub area_formula: AreaFormula,
    pub max_detections: Option<usize>,
    /// Base64 frames shorter than this are rejected before decoding. This is a
    /// cheap sanity check on the payload, not a format validation.
    pub min_frame_len: usize,
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_allow_any_origin: true,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_filename: PathBuf::from("models/detect.tflite"),
            label_filename: PathBuf::from("models/labelmap.txt"),
            num_threads: 2,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.5,
            class_aware: true,
            area_formula: AreaFormula::Continuous,
            max_detections: None,
            min_frame_len: 100,
            acquire_timeout_ms: None,
        }
    }
}

impl DetectionConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl fmt::Display for DetectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "confidence >= {}, iou > {} suppressed, class aware {}, {:?} areas",
            self.confidence_threshold, self.iou_threshold, self.class_aware, self.area_formula
        )
    }
}

fn environment() -> Environment {
    Environment::with_prefix("detect")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl AppConfig {
    /// Loads `path` when given, then overlays `DETECT_*` environment variables
    /// (`DETECT_MODEL__MODEL_FILENAME`, `DETECT_SERVER__PORT`, ...).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: AppConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let detection = &self.detection;
        for (name, value) in [
            ("confidence_threshold", detection.confidence_threshold),
            ("iou_threshold", detection.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Message(format!(
                    "detection.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}
