use moodlens_core::{CanonicalEmotion, EmotionMapping, InputLayout, PipelineConfig, PolicyError, RawEmotion};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid policy file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("invalid pipeline settings: {0}")]
    Policy(#[from] PolicyError),
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address (default: 0.0.0.0).
    pub host: String,
    /// Listen port (default: 8000).
    pub port: u16,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Input tensor layout of the emotion model.
    pub input_layout: InputLayout,
    /// Upper bound on request body size.
    pub max_body_bytes: usize,
    pub pipeline: PipelineConfig,
}

/// Optional TOML overrides for the decision policy.
///
/// ```toml
/// confidence_threshold = 0.45
/// face_margin = 32
///
/// [mapping]
/// contempt = "angry"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    confidence_threshold: Option<f32>,
    face_margin: Option<u32>,
    #[serde(default)]
    mapping: HashMap<RawEmotion, CanonicalEmotion>,
}

impl Config {
    /// Load configuration from `MOODLENS_*` environment variables with
    /// defaults, then apply `MOODLENS_POLICY_FILE` if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let model_dir = std::env::var("MOODLENS_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| moodlens_core::default_model_dir());

        let input_layout = match std::env::var("MOODLENS_FER_LAYOUT") {
            Ok(v) => v.parse().map_err(|message| ConfigError::Invalid {
                key: "MOODLENS_FER_LAYOUT",
                message,
            })?,
            Err(_) => InputLayout::default(),
        };

        let defaults = PipelineConfig::default();
        let mut pipeline = PipelineConfig {
            face_margin: env_parse("MOODLENS_FACE_MARGIN", defaults.face_margin),
            confidence_threshold: env_parse("MOODLENS_CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            mapping: defaults.mapping,
        };

        if let Ok(path) = std::env::var("MOODLENS_POLICY_FILE") {
            apply_policy_file(&mut pipeline, Path::new(&path))?;
        }
        pipeline.validate()?;

        Ok(Self {
            host: std::env::var("MOODLENS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("MOODLENS_PORT", 8000),
            model_dir,
            input_layout,
            max_body_bytes: env_parse("MOODLENS_MAX_BODY_BYTES", 10 * 1024 * 1024),
            pipeline,
        })
    }
}

fn apply_policy_file(pipeline: &mut PipelineConfig, path: &Path) -> Result<(), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    apply_policy(pipeline, &text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "applied policy file");
    Ok(())
}

fn apply_policy(pipeline: &mut PipelineConfig, text: &str) -> Result<(), toml::de::Error> {
    let file: PolicyFile = toml::from_str(text)?;
    if let Some(t) = file.confidence_threshold {
        pipeline.confidence_threshold = t;
    }
    if let Some(m) = file.face_margin {
        pipeline.face_margin = m;
    }
    if !file.mapping.is_empty() {
        pipeline.mapping = EmotionMapping::with_overrides(file.mapping);
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
