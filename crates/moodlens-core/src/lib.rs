//! moodlens-core — Emotion detection pipeline.
//!
//! Normalises a frame, picks the principal face, classifies the face region
//! and reduces the classifier output to one of five canonical emotions.
//! Face detection (SCRFD) and emotion classification (FER) run via ONNX
//! Runtime behind capability traits, so either can be swapped out.

pub mod classifier;
pub mod detector;
pub mod error;
pub mod fer;
pub mod frame;
pub mod locator;
pub mod pipeline;
pub mod policy;
pub mod preprocess;
pub mod source;
pub mod types;

pub use classifier::{EmotionClassificationService, EmotionClassifier};
pub use detector::ScrfdFaceDetector;
pub use error::{CapabilityError, DetectError, Stage};
pub use fer::{FerClassifier, InputLayout};
pub use frame::{Frame, FrameError, PixelLayout};
pub use locator::{FaceDetectionService, FaceLocator};
pub use pipeline::{Pipeline, PipelineConfig, WatchSummary};
pub use policy::{validate_threshold, DecisionPolicy, EmotionMapping, PolicyError};
pub use preprocess::FramePreprocessor;
pub use source::{FrameSequence, FrameSource, SourceError};
pub use types::{BoundingBox, CanonicalEmotion, DetectionResult, EmotionScores, FaceCandidate, RawEmotion};

use std::path::PathBuf;

/// File name of the SCRFD detection model inside the model directory.
pub const FACE_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the FER classification model inside the model directory.
pub const EMOTION_MODEL_FILE: &str = "emotion_fer.onnx";

/// System-wide model location used when `MOODLENS_MODEL_DIR` is unset.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/moodlens/models")
}

/// Load both ONNX models from `model_dir` and assemble a pipeline.
pub fn load_pipeline(
    model_dir: &std::path::Path,
    layout: InputLayout,
    config: PipelineConfig,
) -> Result<Pipeline, CapabilityError> {
    let face_path = model_dir.join(FACE_MODEL_FILE);
    let emotion_path = model_dir.join(EMOTION_MODEL_FILE);

    let detector = ScrfdFaceDetector::load(&face_path.to_string_lossy())?;
    let classifier = FerClassifier::load(&emotion_path.to_string_lossy(), layout)?;

    Ok(Pipeline::new(Box::new(detector), Box::new(classifier), config))
}
