//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the RGB frame to 640×640, decodes the three anchor-free stride
//! heads and applies NMS. Implements [`FaceDetectionService`].

use crate::error::CapabilityError;
use crate::frame::{Frame, PixelLayout};
use crate::locator::FaceDetectionService;
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Scale and padding applied when fitting the frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (target as f32 - new_w) / 2.0,
            pad_y: (target as f32 - new_h) / 2.0,
        }
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Detection in frame coordinates, before integer conversion.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Round outward to whole pixels and clip to the frame.
    fn to_bounding_box(self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let x1 = self.x1.floor().clamp(0.0, frame_width as f32) as u32;
        let y1 = self.y1.floor().clamp(0.0, frame_height as f32) as u32;
        let x2 = self.x2.ceil().clamp(0.0, frame_width as f32) as u32;
        let y2 = self.y2.ceil().clamp(0.0, frame_height as f32) as u32;
        BoundingBox::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1)).with_confidence(self.score)
    }
}

/// Output tensor indices for one stride: (score, bbox).
type StrideOutputs = (usize, usize);

/// SCRFD-based face detector. The session is behind a mutex so one detector
/// can serve concurrent pipeline calls.
pub struct ScrfdFaceDetector {
    session: Mutex<Session>,
    stride_outputs: [StrideOutputs; 3],
}

impl ScrfdFaceDetector {
    /// Load the SCRFD ONNX model (e.g. `det_10g.onnx`).
    pub fn load(model_path: &str) -> Result<Self, CapabilityError> {
        if !Path::new(model_path).exists() {
            return Err(CapabilityError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = model_path, outputs = ?output_names, "loaded SCRFD model");

        if output_names.len() < 6 {
            return Err(CapabilityError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_outputs = discover_output_indices(&output_names);
        tracing::debug!(?stride_outputs, "SCRFD output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            stride_outputs,
        })
    }

    fn run(&self, frame: &Frame) -> Result<Vec<Candidate>, CapabilityError> {
        let (input, letterbox) = letterbox_tensor(frame);

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| CapabilityError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| CapabilityError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            candidates.extend(decode_stride(scores, bboxes, stride, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

impl FaceDetectionService for ScrfdFaceDetector {
    fn detect_faces(&self, frame: &Frame) -> Result<Vec<BoundingBox>, CapabilityError> {
        frame
            .validate()
            .map_err(|e| CapabilityError::InferenceFailed(format!("detector input: {e}")))?;

        let faces: Vec<BoundingBox> = self
            .run(frame)?
            .into_iter()
            .map(|c| c.to_bounding_box(frame.width, frame.height))
            .filter(|b| !b.is_empty())
            .collect();

        tracing::debug!(count = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

/// Bilinear-resize the frame into a letterboxed, normalised NCHW RGB tensor.
/// Padding uses the mean so it normalises to zero.
fn letterbox_tensor(frame: &Frame) -> (Array4<f32>, Letterbox) {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let size = SCRFD_INPUT_SIZE;
    let lb = Letterbox::fit(w, h, size);
    let ch = frame.channels();
    let inv_scale = 1.0 / lb.scale;

    let x_start = lb.pad_x.floor() as usize;
    let y_start = lb.pad_y.floor() as usize;
    let new_w = (w as f32 * lb.scale).round() as usize;
    let new_h = (h as f32 * lb.scale).round() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for ty in 0..size {
        for tx in 0..size {
            let inside = ty >= y_start && ty < y_start + new_h && tx >= x_start && tx < x_start + new_w;
            if !inside {
                continue; // zero == normalised mean
            }

            let src_y = ((ty - y_start) as f32 + 0.5) * inv_scale - 0.5;
            let src_x = ((tx - x_start) as f32 + 0.5) * inv_scale - 0.5;
            let y0 = (src_y.floor() as i64).clamp(0, h as i64 - 1) as usize;
            let x0 = (src_x.floor() as i64).clamp(0, w as i64 - 1) as usize;
            let y1 = (y0 + 1).min(h - 1);
            let x1 = (x0 + 1).min(w - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                // Gray frames replicate their single channel.
                let c_src = if frame.layout == PixelLayout::Gray { 0 } else { c };
                let at = |x: usize, y: usize| frame.data[(y * w + x) * ch + c_src] as f32;
                let val = at(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + at(x1, y0) * fx * (1.0 - fy)
                    + at(x0, y1) * (1.0 - fx) * fy
                    + at(x1, y1) * fx * fy;
                tensor[[0, c, ty, tx]] = (val - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }

    (tensor, lb)
}

/// Map SCRFD outputs to stride slots by name ("score_8", "bbox_16", ...), or
/// fall back to positional order: [0-2] scores, [3-5] bboxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode one stride head into frame-space candidates above `threshold`.
fn decode_stride(scores: &[f32], bboxes: &[f32], stride: usize, lb: &Letterbox, threshold: f32) -> Vec<Candidate> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let off = bboxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * s;
            let cy = (cell / grid) as f32 * s;

            let (x1, y1) = lb.unmap(cx - off[0] * s, cy - off[1] * s);
            let (x2, y2) = lb.unmap(cx + off[2] * s, cy + off[3] * s);
            Some(Candidate { x1, y1, x2, y2, score })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by descending score.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<Candidate> = Vec::new();
    for c in candidates {
        if keep.iter().all(|k| iou(k, &c) <= iou_threshold) {
            keep.push(c);
        }
    }
    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter = Candidate {
        x1: a.x1.max(b.x1),
        y1: a.y1.max(b.y1),
        x2: a.x2.min(b.x2),
        y2: a.y2.min(b.y2),
        score: 0.0,
    }
    .area();
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
