//! Emotion classification over a face ROI.

use crate::error::CapabilityError;
use crate::frame::Frame;
use crate::types::EmotionScores;

/// External emotion classifier.
pub trait EmotionClassificationService: Send + Sync {
    /// Per-label probabilities for the face in `roi`, or `None` when the model
    /// has nothing to report.
    fn classify(&self, roi: &Frame) -> Result<Option<EmotionScores>, CapabilityError>;
}

/// Thin guard around an [`EmotionClassificationService`]; it filters out
/// unusable output but never picks a winner.
pub struct EmotionClassifier {
    service: Box<dyn EmotionClassificationService>,
}

impl EmotionClassifier {
    pub fn new(service: Box<dyn EmotionClassificationService>) -> Self {
        Self { service }
    }

    pub fn classify(&self, roi: &Frame) -> Result<Option<EmotionScores>, CapabilityError> {
        if roi.data.is_empty() || roi.width == 0 || roi.height == 0 {
            tracing::debug!("classify: empty ROI, skipping classifier");
            return Ok(None);
        }

        let Some(scores) = self.service.classify(roi)? else {
            return Ok(None);
        };
        if scores.is_empty() {
            return Ok(None);
        }
        if !scores.is_valid() {
            tracing::warn!(?scores, "classify: probabilities outside [0, 1], discarding");
            return Ok(None);
        }

        Ok(Some(scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Canned {
        scores: Option<EmotionScores>,
        calls: Arc<AtomicUsize>,
    }

    impl EmotionClassificationService for Canned {
        fn classify(&self, _roi: &Frame) -> Result<Option<EmotionScores>, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.clone())
        }
    }

    fn classifier(scores: Option<EmotionScores>) -> (EmotionClassifier, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = Canned { scores, calls: Arc::clone(&calls) };
        (EmotionClassifier::new(Box::new(svc)), calls)
    }

    fn roi() -> Frame {
        Frame::new(vec![128u8; 8 * 8 * 3], 8, 8, PixelLayout::Rgb).unwrap()
    }

    #[test]
    fn test_scores_pass_through_unmodified() {
        let scores: EmotionScores = [("happy", 0.7), ("sad", 0.2), ("contempt", 0.1)].into_iter().collect();
        let (c, _) = classifier(Some(scores.clone()));
        assert_eq!(c.classify(&roi()).unwrap(), Some(scores));
    }

    #[test]
    fn test_empty_roi_skips_service() {
        let (c, calls) = classifier(Some([("happy", 1.0)].into_iter().collect()));
        let empty = Frame { data: vec![], width: 0, height: 0, layout: PixelLayout::Rgb };
        assert_eq!(c.classify(&empty).unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_absent_result() {
        let (c, calls) = classifier(None);
        assert_eq!(c.classify(&roi()).unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_distribution_is_absent() {
        let (c, _) = classifier(Some(EmotionScores::new()));
        assert_eq!(c.classify(&roi()).unwrap(), None);
    }

    #[test]
    fn test_out_of_range_distribution_is_absent() {
        let (c, _) = classifier(Some([("happy", 3.2), ("sad", -1.0)].into_iter().collect()));
        assert_eq!(c.classify(&roi()).unwrap(), None);
    }
}
