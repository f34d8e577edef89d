//! Confidence gate and canonical label mapping.

use crate::error::DetectError;
use crate::types::{CanonicalEmotion, DetectionResult, EmotionScores, RawEmotion};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Minimum argmax probability trusted as a real signal.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum PolicyError {
    #[error("confidence threshold {0} is outside [0, 1]")]
    InvalidThreshold(f32),
}

/// Accept a threshold only if it is a finite value in [0, 1].
pub fn validate_threshold(threshold: f32) -> Result<f32, PolicyError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(PolicyError::InvalidThreshold(threshold))
    }
}

/// Raw classifier label → canonical output label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionMapping(HashMap<RawEmotion, CanonicalEmotion>);

impl Default for EmotionMapping {
    fn default() -> Self {
        Self(HashMap::from([
            (RawEmotion::Happy, CanonicalEmotion::Happy),
            (RawEmotion::Sad, CanonicalEmotion::Sad),
            (RawEmotion::Angry, CanonicalEmotion::Angry),
            (RawEmotion::Fear, CanonicalEmotion::Sad),
            (RawEmotion::Surprise, CanonicalEmotion::Surprised),
            (RawEmotion::Neutral, CanonicalEmotion::Neutral),
            (RawEmotion::Disgust, CanonicalEmotion::Angry),
        ]))
    }
}

impl EmotionMapping {
    /// Default table with `overrides` applied on top.
    pub fn with_overrides(overrides: impl IntoIterator<Item = (RawEmotion, CanonicalEmotion)>) -> Self {
        let mut mapping = Self::default();
        mapping.0.extend(overrides);
        mapping
    }

    /// Labels missing from the table are treated as neutral.
    pub fn canonical(&self, raw: &RawEmotion) -> CanonicalEmotion {
        self.0.get(raw).copied().unwrap_or(CanonicalEmotion::Neutral)
    }
}

/// Turns a raw distribution into the final (label, confidence) pair.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    threshold: f32,
    mapping: EmotionMapping,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD, EmotionMapping::default())
    }
}

impl DecisionPolicy {
    pub fn new(threshold: f32, mapping: EmotionMapping) -> Self {
        Self { threshold, mapping }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Always yields a result; rejected distributions become the neutral fallback.
    pub fn decide(&self, scores: &EmotionScores) -> DetectionResult {
        self.judge(scores).unwrap_or(DetectionResult::FALLBACK)
    }

    /// Like [`decide`](Self::decide) but reports why a distribution was rejected.
    ///
    /// A sub-threshold argmax is reported as `LowConfidence` rather than
    /// carried forward with its low score: downstream, it is
    /// indistinguishable from "no face".
    pub fn judge(&self, scores: &EmotionScores) -> Result<DetectionResult, DetectError> {
        let (raw, confidence) = scores.argmax().ok_or(DetectError::NoEmotionSignal)?;

        // A NaN threshold rejects everything rather than disabling the gate.
        if confidence.is_nan() || self.threshold.is_nan() || confidence < self.threshold {
            return Err(DetectError::LowConfidence {
                label: raw.clone(),
                confidence,
                threshold: self.threshold,
            });
        }

        let label = self.mapping.canonical(raw);
        tracing::debug!(raw = %raw, mapped = %label, confidence, "policy: label mapped");
        Ok(DetectionResult::new(label, confidence))
    }
}
