//! Principal-face selection and ROI extraction.

use crate::error::CapabilityError;
use crate::frame::Frame;
use crate::types::{BoundingBox, FaceCandidate};

/// Pixels of context added on each side of the detected face.
pub const DEFAULT_FACE_MARGIN: u32 = 40;

/// External face detector.
///
/// Implementations must be safe to call from several threads at once, either
/// natively or by serialising internally.
pub trait FaceDetectionService: Send + Sync {
    /// Detect faces in an RGB frame. An empty list means "no face".
    fn detect_faces(&self, frame: &Frame) -> Result<Vec<BoundingBox>, CapabilityError>;
}

/// Picks the largest detected face and derives its classification ROI.
pub struct FaceLocator {
    detector: Box<dyn FaceDetectionService>,
    margin: u32,
}

impl FaceLocator {
    pub fn new(detector: Box<dyn FaceDetectionService>, margin: u32) -> Self {
        Self { detector, margin }
    }

    pub fn margin(&self) -> u32 {
        self.margin
    }

    pub fn locate(&self, frame: &Frame) -> Result<Option<FaceCandidate>, CapabilityError> {
        let boxes = self.detector.detect_faces(frame)?;
        tracing::debug!(count = boxes.len(), "locate: detector returned faces");

        let Some(face) = select_principal(&boxes, frame.width, frame.height) else {
            return Ok(None);
        };
        let roi = face.expand(self.margin, frame.width, frame.height);

        tracing::debug!(
            face = ?(face.x, face.y, face.width, face.height),
            roi = ?(roi.x, roi.y, roi.width, roi.height),
            "locate: principal face selected"
        );

        Ok(Some(FaceCandidate { face, roi }))
    }
}

/// Largest box by area after clipping to the frame. Equal areas keep the box
/// the detector listed first; boxes that clip to nothing are skipped.
fn select_principal(boxes: &[BoundingBox], frame_width: u32, frame_height: u32) -> Option<BoundingBox> {
    boxes
        .iter()
        .map(|b| b.clip_to(frame_width, frame_height))
        .filter(|b| !b.is_empty())
        .fold(None, |best: Option<BoundingBox>, b| match best {
            Some(cur) if b.area() <= cur.area() => Some(cur),
            _ => Some(b),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetectionService for FixedDetector {
        fn detect_faces(&self, _frame: &Frame) -> Result<Vec<BoundingBox>, CapabilityError> {
            Ok(self.0.clone())
        }
    }

    fn frame(w: u32, h: u32) -> Frame {
        Frame::new(vec![0u8; (w * h * 3) as usize], w, h, PixelLayout::Rgb).unwrap()
    }

    fn locator(boxes: Vec<BoundingBox>) -> FaceLocator {
        FaceLocator::new(Box::new(FixedDetector(boxes)), DEFAULT_FACE_MARGIN)
    }

    #[test]
    fn test_no_faces() {
        assert!(locator(vec![]).locate(&frame(100, 100)).unwrap().is_none());
    }

    #[test]
    fn test_largest_face_wins() {
        let boxes = vec![
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(200, 100, 60, 80),
            BoundingBox::new(50, 50, 40, 40),
        ];
        let cand = locator(boxes).locate(&frame(640, 480)).unwrap().unwrap();
        assert_eq!(cand.face, BoundingBox::new(200, 100, 60, 80));
    }

    #[test]
    fn test_tie_keeps_detector_order() {
        let boxes = vec![
            BoundingBox::new(10, 10, 20, 30).with_confidence(0.6),
            BoundingBox::new(300, 200, 30, 20).with_confidence(0.9),
        ];
        let cand = locator(boxes).locate(&frame(640, 480)).unwrap().unwrap();
        assert_eq!((cand.face.x, cand.face.y), (10, 10));
    }

    #[test]
    fn test_roi_corner_face() {
        let cand = locator(vec![BoundingBox::new(0, 0, 50, 50)])
            .locate(&frame(100, 100))
            .unwrap()
            .unwrap();
        assert_eq!((cand.roi.x, cand.roi.y, cand.roi.width, cand.roi.height), (0, 0, 90, 90));
        assert!(cand.roi.contains(&cand.face));
    }

    #[test]
    fn test_roi_never_exceeds_frame_for_edge_faces() {
        let (w, h) = (120u32, 90u32);
        let edge_boxes = [
            BoundingBox::new(0, 20, 30, 30),
            BoundingBox::new(20, 0, 30, 30),
            BoundingBox::new(90, 20, 30, 30),
            BoundingBox::new(20, 60, 30, 30),
            BoundingBox::new(0, 0, 120, 90),
        ];
        for b in edge_boxes {
            let cand = locator(vec![b]).locate(&frame(w, h)).unwrap().unwrap();
            assert!(cand.roi.fits_within(w, h), "roi {:?} escapes {w}x{h}", cand.roi);
            assert!(cand.roi.contains(&cand.face));
        }
    }

    #[test]
    fn test_box_overhanging_frame_is_clipped() {
        let cand = locator(vec![BoundingBox::new(80, 80, 50, 50)])
            .locate(&frame(100, 100))
            .unwrap()
            .unwrap();
        assert_eq!(cand.face, BoundingBox::new(80, 80, 20, 20));
        assert!(cand.roi.fits_within(100, 100));
    }

    #[test]
    fn test_box_outside_frame_ignored() {
        let result = locator(vec![BoundingBox::new(500, 500, 50, 50)])
            .locate(&frame(100, 100))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_detector_error_propagates() {
        struct Failing;
        impl FaceDetectionService for Failing {
            fn detect_faces(&self, _frame: &Frame) -> Result<Vec<BoundingBox>, CapabilityError> {
                Err(CapabilityError::InferenceFailed("boom".into()))
            }
        }
        let loc = FaceLocator::new(Box::new(Failing), DEFAULT_FACE_MARGIN);
        assert!(loc.locate(&frame(10, 10)).is_err());
    }
}
