//! Detection pipeline: preprocess, locate, classify, decide.
//!
//! Every stage that cannot produce usable output short-circuits to
//! [`DetectionResult::FALLBACK`]. [`Pipeline::detect`] never fails and never
//! panics; [`Pipeline::evaluate`] exposes the reason a frame fell back.

use crate::classifier::{EmotionClassificationService, EmotionClassifier};
use crate::error::{DetectError, Stage};
use crate::frame::Frame;
use crate::locator::{FaceDetectionService, FaceLocator, DEFAULT_FACE_MARGIN};
use crate::policy::{self, DecisionPolicy, EmotionMapping, PolicyError, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::preprocess::FramePreprocessor;
use crate::source::{FrameSource, SourceError};
use crate::types::DetectionResult;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};

/// Decision parameters fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pixels added on each side of the face before classification.
    pub face_margin: u32,
    /// Minimum argmax probability for a non-fallback result.
    pub confidence_threshold: f32,
    pub mapping: EmotionMapping,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            face_margin: DEFAULT_FACE_MARGIN,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            mapping: EmotionMapping::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject settings the decision gate cannot honour.
    pub fn validate(&self) -> Result<(), PolicyError> {
        policy::validate_threshold(self.confidence_threshold)?;
        Ok(())
    }
}

/// Counters reported when a [`Pipeline::watch`] loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub frames: usize,
    /// Frames that produced something other than the fallback.
    pub detections: usize,
}

pub struct Pipeline {
    preprocessor: FramePreprocessor,
    locator: FaceLocator,
    classifier: EmotionClassifier,
    policy: DecisionPolicy,
}

impl Pipeline {
    pub fn new(
        detector: Box<dyn FaceDetectionService>,
        classifier: Box<dyn EmotionClassificationService>,
        config: PipelineConfig,
    ) -> Self {
        if let Err(err) = config.validate() {
            tracing::warn!(error = %err, "invalid pipeline config, every frame will fall back");
        }
        tracing::info!(
            margin = config.face_margin,
            threshold = config.confidence_threshold,
            "pipeline configured"
        );
        Self {
            preprocessor: FramePreprocessor::new(),
            locator: FaceLocator::new(detector, config.face_margin),
            classifier: EmotionClassifier::new(classifier),
            policy: DecisionPolicy::new(config.confidence_threshold, config.mapping),
        }
    }

    /// Detect the principal face's emotion. Any failure yields the fallback.
    pub fn detect(&self, frame: &Frame) -> DetectionResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(frame))) {
            Ok(Ok(result)) => {
                tracing::info!(emotion = %result.label(), confidence = result.confidence(), "detected emotion");
                result
            }
            Ok(Err(err)) => {
                match &err {
                    DetectError::InvalidInput(_) => {
                        tracing::warn!(kind = err.kind(), error = %err, "rejected input frame")
                    }
                    DetectError::ExternalCapabilityFailure { .. } => {
                        tracing::error!(kind = err.kind(), error = %err, "capability failed")
                    }
                    _ => tracing::info!(kind = err.kind(), reason = %err, "no reliable emotion signal"),
                }
                DetectionResult::FALLBACK
            }
            Err(payload) => {
                tracing::error!(
                    kind = "external_capability_failure",
                    error = panic_message(payload.as_ref()),
                    "pipeline stage panicked"
                );
                DetectionResult::FALLBACK
            }
        }
    }

    /// Run every stage, reporting why the frame was rejected if it was.
    pub fn evaluate(&self, frame: &Frame) -> Result<DetectionResult, DetectError> {
        frame.validate()?;

        let frame = self.preprocessor.normalize(frame.clone());

        let candidate = self
            .locator
            .locate(&frame)
            .map_err(|e| DetectError::capability(Stage::FaceDetection, e))?
            .ok_or(DetectError::NoFaceDetected)?;

        let roi = frame.crop(&candidate.roi);
        let scores = self
            .classifier
            .classify(&roi)
            .map_err(|e| DetectError::capability(Stage::EmotionClassification, e))?
            .ok_or(DetectError::NoEmotionSignal)?;

        self.policy.judge(&scores)
    }

    /// Pull frames from `source` until it runs dry or `sink` breaks.
    ///
    /// The sink sees each frame alongside its result. Source errors end the
    /// loop and are returned; detection itself cannot fail.
    pub fn watch<F>(&self, source: &mut dyn FrameSource, mut sink: F) -> Result<WatchSummary, SourceError>
    where
        F: FnMut(&Frame, DetectionResult) -> ControlFlow<()>,
    {
        let mut summary = WatchSummary::default();

        while let Some(frame) = source.next_frame()? {
            summary.frames += 1;
            let result = self.detect(&frame);
            if !result.is_fallback() {
                summary.detections += 1;
            }
            if sink(&frame, result).is_break() {
                break;
            }
        }

        tracing::debug!(frames = summary.frames, detections = summary.detections, "watch loop finished");
        Ok(summary)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::frame::PixelLayout;
    use crate::source::FrameSequence;
    use crate::types::{BoundingBox, CanonicalEmotion, EmotionScores};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        detect: AtomicUsize,
        classify: AtomicUsize,
        roi_sizes: Mutex<Vec<(u32, u32)>>,
    }

    struct FakeDetector {
        boxes: Result<Vec<BoundingBox>, String>,
        calls: Arc<Calls>,
    }

    impl FaceDetectionService for FakeDetector {
        fn detect_faces(&self, _frame: &Frame) -> Result<Vec<BoundingBox>, CapabilityError> {
            self.calls.detect.fetch_add(1, Ordering::SeqCst);
            self.boxes.clone().map_err(CapabilityError::InferenceFailed)
        }
    }

    struct FakeClassifier {
        scores: Option<EmotionScores>,
        panic: bool,
        calls: Arc<Calls>,
    }

    impl EmotionClassificationService for FakeClassifier {
        fn classify(&self, roi: &Frame) -> Result<Option<EmotionScores>, CapabilityError> {
            self.calls.classify.fetch_add(1, Ordering::SeqCst);
            self.calls.roi_sizes.lock().unwrap().push((roi.width, roi.height));
            if self.panic {
                panic!("model crashed");
            }
            Ok(self.scores.clone())
        }
    }

    fn build(boxes: Vec<BoundingBox>, scores: Option<EmotionScores>) -> (Pipeline, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let p = Pipeline::new(
            Box::new(FakeDetector { boxes: Ok(boxes), calls: Arc::clone(&calls) }),
            Box::new(FakeClassifier { scores, panic: false, calls: Arc::clone(&calls) }),
            PipelineConfig::default(),
        );
        (p, calls)
    }

    fn pipeline(boxes: Vec<BoundingBox>, scores: &[(&str, f32)]) -> (Pipeline, Arc<Calls>) {
        build(boxes, Some(scores.iter().map(|&(l, p)| (l, p)).collect()))
    }

    fn frame(w: u32, h: u32) -> Frame {
        let data = (0..w * h * 3).map(|i| (i % 251) as u8).collect();
        Frame::new(data, w, h, PixelLayout::Rgb).unwrap()
    }

    fn face() -> Vec<BoundingBox> {
        vec![BoundingBox::new(100, 100, 80, 80).with_confidence(0.98)]
    }

    #[test]
    fn test_scenario_no_face() {
        let (p, calls) = pipeline(vec![], &[("happy", 0.9)]);
        assert!(matches!(p.evaluate(&frame(320, 240)), Err(DetectError::NoFaceDetected)));
        assert_eq!(p.detect(&frame(320, 240)), DetectionResult::FALLBACK);
        assert_eq!(calls.classify.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_scenario_confident_happy() {
        let (p, _) = pipeline(face(), &[("happy", 0.9), ("sad", 0.05), ("neutral", 0.05)]);
        let r = p.detect(&frame(320, 240));
        assert_eq!(r.label(), CanonicalEmotion::Happy);
        assert!((r.confidence() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_scenario_fear_becomes_sad() {
        let (p, _) = pipeline(face(), &[("fear", 0.5), ("neutral", 0.3), ("angry", 0.2)]);
        let r = p.detect(&frame(320, 240));
        assert_eq!(r.label(), CanonicalEmotion::Sad);
        assert!((r.confidence() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_scenario_low_confidence() {
        let (p, _) = pipeline(face(), &[("angry", 0.35), ("sad", 0.3), ("neutral", 0.35)]);
        assert!(matches!(p.evaluate(&frame(320, 240)), Err(DetectError::LowConfidence { .. })));
        assert_eq!(p.detect(&frame(320, 240)), DetectionResult::FALLBACK);
    }

    #[test]
    fn test_scenario_corner_face_roi() {
        let (p, calls) = pipeline(vec![BoundingBox::new(0, 0, 50, 50)], &[("surprise", 0.7)]);
        let r = p.detect(&frame(100, 100));
        assert_eq!(r.label(), CanonicalEmotion::Surprised);
        assert_eq!(*calls.roi_sizes.lock().unwrap(), vec![(90, 90)]);
    }

    #[test]
    fn test_no_scores_falls_back() {
        let (p, _) = build(face(), None);
        assert!(matches!(p.evaluate(&frame(320, 240)), Err(DetectError::NoEmotionSignal)));
        assert_eq!(p.detect(&frame(320, 240)), DetectionResult::FALLBACK);
    }

    #[test]
    fn test_invalid_input_skips_all_stages() {
        let (p, calls) = pipeline(face(), &[("happy", 0.9)]);
        let bad = Frame { data: vec![1, 2, 3], width: 10, height: 10, layout: PixelLayout::Rgb };
        assert!(matches!(p.evaluate(&bad), Err(DetectError::InvalidInput(_))));
        assert_eq!(p.detect(&bad), DetectionResult::FALLBACK);
        assert_eq!(calls.detect.load(Ordering::SeqCst), 0);
        assert_eq!(calls.classify.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detector_failure_falls_back() {
        let calls = Arc::new(Calls::default());
        let p = Pipeline::new(
            Box::new(FakeDetector { boxes: Err("session lost".into()), calls: Arc::clone(&calls) }),
            Box::new(FakeClassifier { scores: None, panic: false, calls: Arc::clone(&calls) }),
            PipelineConfig::default(),
        );
        match p.evaluate(&frame(64, 64)) {
            Err(DetectError::ExternalCapabilityFailure { stage, .. }) => assert_eq!(stage, Stage::FaceDetection),
            other => panic!("expected capability failure, got {other:?}"),
        }
        assert_eq!(p.detect(&frame(64, 64)), DetectionResult::FALLBACK);
    }

    #[test]
    fn test_classifier_failure_falls_back() {
        struct Failing;
        impl EmotionClassificationService for Failing {
            fn classify(&self, _roi: &Frame) -> Result<Option<EmotionScores>, CapabilityError> {
                Err(CapabilityError::InferenceFailed("output tensor missing".into()))
            }
        }
        let calls = Arc::new(Calls::default());
        let p = Pipeline::new(
            Box::new(FakeDetector { boxes: Ok(face()), calls: Arc::clone(&calls) }),
            Box::new(Failing),
            PipelineConfig::default(),
        );
        match p.evaluate(&frame(320, 240)) {
            Err(DetectError::ExternalCapabilityFailure { stage, message }) => {
                assert_eq!(stage, Stage::EmotionClassification);
                assert!(message.contains("output tensor missing"));
            }
            other => panic!("expected capability failure, got {other:?}"),
        }
        assert_eq!(p.detect(&frame(320, 240)), DetectionResult::FALLBACK);
    }

    #[test]
    fn test_invalid_threshold_rejected_and_fails_closed() {
        let config = PipelineConfig { confidence_threshold: f32::NAN, ..PipelineConfig::default() };
        assert!(config.validate().is_err());
        assert!(PipelineConfig { confidence_threshold: 5.0, ..PipelineConfig::default() }.validate().is_err());
        assert!(PipelineConfig::default().validate().is_ok());

        let calls = Arc::new(Calls::default());
        let scores: EmotionScores = [("fear", 0.05), ("happy", 0.04)].into_iter().collect();
        let p = Pipeline::new(
            Box::new(FakeDetector { boxes: Ok(face()), calls: Arc::clone(&calls) }),
            Box::new(FakeClassifier { scores: Some(scores), panic: false, calls: Arc::clone(&calls) }),
            config,
        );
        assert_eq!(p.detect(&frame(320, 240)), DetectionResult::FALLBACK);
    }

    #[test]
    fn test_panic_message_extraction() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("tensor shape mismatch"));
        assert_eq!(panic_message(owned.as_ref()), "tensor shape mismatch");
        let borrowed: Box<dyn Any + Send> = Box::new("model crashed");
        assert_eq!(panic_message(borrowed.as_ref()), "model crashed");
        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_panicking_classifier_falls_back() {
        let calls = Arc::new(Calls::default());
        let p = Pipeline::new(
            Box::new(FakeDetector { boxes: Ok(face()), calls: Arc::clone(&calls) }),
            Box::new(FakeClassifier { scores: None, panic: true, calls: Arc::clone(&calls) }),
            PipelineConfig::default(),
        );
        assert_eq!(p.detect(&frame(320, 240)), DetectionResult::FALLBACK);
    }

    #[test]
    fn test_grayscale_input_accepted() {
        let (p, _) = pipeline(face(), &[("disgust", 0.6)]);
        let gray = Frame::new((0..320 * 240).map(|i| (i % 200) as u8).collect(), 320, 240, PixelLayout::Gray).unwrap();
        assert_eq!(p.detect(&gray).label(), CanonicalEmotion::Angry);
    }

    #[test]
    fn test_outputs_always_in_vocabulary() {
        let cases: [&[(&str, f32)]; 4] = [
            &[("happy", 1.0)],
            &[("contempt", 0.9)],
            &[("neutral", 0.0)],
            &[("surprise", 0.4), ("fear", 0.4)],
        ];
        for scores in cases {
            let (p, _) = pipeline(face(), scores);
            let r = p.detect(&frame(320, 240));
            assert!(CanonicalEmotion::ALL.contains(&r.label()));
            assert!((0.0..=1.0).contains(&r.confidence()));
        }
    }

    #[test]
    fn test_watch_runs_until_exhausted() {
        let (p, _) = pipeline(face(), &[("happy", 0.8)]);
        let mut source = FrameSequence::new(vec![frame(320, 240), frame(320, 240), frame(320, 240)]);
        let mut seen = Vec::new();
        let summary = p
            .watch(&mut source, |_, r| {
                seen.push(r.label());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(summary, WatchSummary { frames: 3, detections: 3 });
        assert_eq!(seen, vec![CanonicalEmotion::Happy; 3]);
    }

    #[test]
    fn test_watch_stops_when_sink_breaks() {
        let (p, _) = build(vec![], None);
        let mut source = FrameSequence::new(vec![frame(32, 32); 5]);
        let summary = p.watch(&mut source, |_, _| ControlFlow::Break(())).unwrap();
        assert_eq!(summary, WatchSummary { frames: 1, detections: 0 });
    }

    #[test]
    fn test_watch_propagates_source_error() {
        struct Broken;
        impl FrameSource for Broken {
            fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
                Err(SourceError::CaptureFailed("unplugged".into()))
            }
        }
        let (p, _) = build(face(), None);
        assert!(p.watch(&mut Broken, |_, _| ControlFlow::Continue(())).is_err());
    }
}
