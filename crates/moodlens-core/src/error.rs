use crate::frame::FrameError;
use crate::types::RawEmotion;
use std::fmt;
use thiserror::Error;

/// Failure inside an external inference capability.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("model file not found: {0} (place the ONNX model in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Pipeline stage that talks to an external capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FaceDetection,
    EmotionClassification,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::FaceDetection => f.write_str("face detection"),
            Stage::EmotionClassification => f.write_str("emotion classification"),
        }
    }
}

/// Why a detection fell back to the neutral result.
///
/// `Pipeline::detect` folds every variant into `DetectionResult::FALLBACK`;
/// `Pipeline::evaluate` hands them out for callers and tests that need to
/// tell them apart.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("invalid input frame: {0}")]
    InvalidInput(#[from] FrameError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("classifier returned no usable emotion distribution")]
    NoEmotionSignal,
    #[error("low confidence {confidence:.3} for '{label}' (threshold {threshold:.2})")]
    LowConfidence {
        label: RawEmotion,
        confidence: f32,
        threshold: f32,
    },
    #[error("{stage} failed: {message}")]
    ExternalCapabilityFailure { stage: Stage, message: String },
}

impl DetectError {
    pub fn capability(stage: Stage, err: impl fmt::Display) -> Self {
        DetectError::ExternalCapabilityFailure {
            stage,
            message: err.to_string(),
        }
    }

    /// Short machine-readable name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::InvalidInput(_) => "invalid_input",
            DetectError::NoFaceDetected => "no_face_detected",
            DetectError::NoEmotionSignal => "no_emotion_signal",
            DetectError::LowConfidence { .. } => "low_confidence",
            DetectError::ExternalCapabilityFailure { .. } => "external_capability_failure",
        }
    }
}
