use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Axis-aligned box in integer pixel coordinates of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector score in [0, 1], when the detector reports one.
    pub confidence: Option<f32>,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height, confidence: None }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// Restrict the box to `[0, frame_width) x [0, frame_height)`.
    pub fn clip_to(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let x = self.x.min(frame_width);
        let y = self.y.min(frame_height);
        let right = self.right().min(frame_width as u64) as u32;
        let bottom = self.bottom().min(frame_height as u64) as u32;
        BoundingBox {
            x,
            y,
            width: right - x,
            height: bottom - y,
            confidence: self.confidence,
        }
    }

    /// Grow by `margin` on every side, then clip to the frame.
    pub fn expand(&self, margin: u32, frame_width: u32, frame_height: u32) -> BoundingBox {
        let x_start = self.x.saturating_sub(margin);
        let y_start = self.y.saturating_sub(margin);
        let x_end = (self.right() + margin as u64).min(frame_width as u64) as u32;
        let y_end = (self.bottom() + margin as u64).min(frame_height as u64) as u32;
        BoundingBox {
            x: x_start,
            y: y_start,
            width: x_end.saturating_sub(x_start),
            height: y_end.saturating_sub(y_start),
            confidence: self.confidence,
        }
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.x <= other.x && self.y <= other.y && self.right() >= other.right() && self.bottom() >= other.bottom()
    }

    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.right() <= frame_width as u64 && self.bottom() <= frame_height as u64
    }
}

/// The principal face of a frame and the region handed to the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceCandidate {
    pub face: BoundingBox,
    /// `face` grown by the configured margin and clipped to the frame.
    pub roi: BoundingBox,
}

/// Label emitted by an emotion classifier, before canonicalisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawEmotion {
    Happy,
    Sad,
    Angry,
    Fear,
    Surprise,
    Neutral,
    Disgust,
    /// A label outside the known vocabulary, lowercased.
    Other(String),
}

impl RawEmotion {
    pub fn as_str(&self) -> &str {
        match self {
            RawEmotion::Happy => "happy",
            RawEmotion::Sad => "sad",
            RawEmotion::Angry => "angry",
            RawEmotion::Fear => "fear",
            RawEmotion::Surprise => "surprise",
            RawEmotion::Neutral => "neutral",
            RawEmotion::Disgust => "disgust",
            RawEmotion::Other(label) => label,
        }
    }
}

impl From<&str> for RawEmotion {
    fn from(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "happy" => RawEmotion::Happy,
            "sad" => RawEmotion::Sad,
            "angry" => RawEmotion::Angry,
            "fear" => RawEmotion::Fear,
            "surprise" => RawEmotion::Surprise,
            "neutral" => RawEmotion::Neutral,
            "disgust" => RawEmotion::Disgust,
            _ => RawEmotion::Other(normalized),
        }
    }
}

impl fmt::Display for RawEmotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for RawEmotion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RawEmotion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(RawEmotion::from(label.as_str()))
    }
}

/// Per-label probabilities reported by a classifier, in the order reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmotionScores {
    entries: Vec<(RawEmotion, f32)>,
}

impl EmotionScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probability of `label`, replacing an earlier value in place.
    pub fn insert(&mut self, label: RawEmotion, probability: f32) {
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = probability,
            None => self.entries.push((label, probability)),
        }
    }

    pub fn get(&self, label: &RawEmotion) -> Option<f32> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, p)| *p)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RawEmotion, f32)> {
        self.entries.iter().map(|(l, p)| (l, *p))
    }

    /// Every probability is a finite value in [0, 1].
    pub fn is_valid(&self) -> bool {
        self.entries.iter().all(|(_, p)| (0.0..=1.0).contains(p))
    }

    /// Highest-probability label; the earliest entry wins an exact tie.
    pub fn argmax(&self) -> Option<(&RawEmotion, f32)> {
        let mut best: Option<(&RawEmotion, f32)> = None;
        for (label, p) in self.iter() {
            match best {
                Some((_, best_p)) if p <= best_p => {}
                _ => best = Some((label, p)),
            }
        }
        best
    }
}

impl<L: Into<RawEmotion>> FromIterator<(L, f32)> for EmotionScores {
    fn from_iter<I: IntoIterator<Item = (L, f32)>>(iter: I) -> Self {
        let mut scores = EmotionScores::new();
        for (label, p) in iter {
            scores.insert(label.into(), p);
        }
        scores
    }
}

impl From<String> for RawEmotion {
    fn from(label: String) -> Self {
        RawEmotion::from(label.as_str())
    }
}

/// The output vocabulary exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalEmotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    Neutral,
}

impl CanonicalEmotion {
    pub const ALL: [CanonicalEmotion; 5] = [
        CanonicalEmotion::Happy,
        CanonicalEmotion::Sad,
        CanonicalEmotion::Angry,
        CanonicalEmotion::Surprised,
        CanonicalEmotion::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalEmotion::Happy => "happy",
            CanonicalEmotion::Sad => "sad",
            CanonicalEmotion::Angry => "angry",
            CanonicalEmotion::Surprised => "surprised",
            CanonicalEmotion::Neutral => "neutral",
        }
    }
}

impl fmt::Display for CanonicalEmotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for CanonicalEmotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalEmotion::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown emotion '{s}'"))
    }
}

/// Final (label, confidence) pair produced by the pipeline.
///
/// Fields are private so every value, deserialized ones included, goes
/// through [`DetectionResult::new`] and keeps its confidence in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "DetectionResultRepr")]
pub struct DetectionResult {
    #[serde(rename = "emotion")]
    label: CanonicalEmotion,
    confidence: f32,
}

#[derive(Deserialize)]
struct DetectionResultRepr {
    emotion: CanonicalEmotion,
    confidence: f32,
}

impl From<DetectionResultRepr> for DetectionResult {
    fn from(repr: DetectionResultRepr) -> Self {
        DetectionResult::new(repr.emotion, repr.confidence)
    }
}

impl DetectionResult {
    /// Returned whenever there is no reliable emotion signal.
    pub const FALLBACK: DetectionResult = DetectionResult {
        label: CanonicalEmotion::Neutral,
        confidence: 1.0,
    };

    pub fn new(label: CanonicalEmotion, confidence: f32) -> Self {
        Self {
            label,
            confidence: if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) },
        }
    }

    pub fn label(&self) -> CanonicalEmotion {
        self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn is_fallback(&self) -> bool {
        *self == Self::FALLBACK
    }
}
