//! FER2013-style emotion classifier via ONNX Runtime.
//!
//! Expects a 7-way model over a 64×64 grayscale face crop, with outputs in
//! FER2013 order. Implements [`EmotionClassificationService`].

use crate::classifier::EmotionClassificationService;
use crate::error::CapabilityError;
use crate::frame::Frame;
use crate::types::{EmotionScores, RawEmotion};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

const FER_INPUT_SIZE: usize = 64;
const FER_LABELS: [RawEmotion; 7] = [
    RawEmotion::Angry,
    RawEmotion::Disgust,
    RawEmotion::Fear,
    RawEmotion::Happy,
    RawEmotion::Sad,
    RawEmotion::Surprise,
    RawEmotion::Neutral,
];

/// Memory layout of the model's input tensor. Keras exports are usually
/// NHWC, PyTorch exports NCHW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputLayout {
    #[default]
    Nchw,
    Nhwc,
}

impl FromStr for InputLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nchw" => Ok(InputLayout::Nchw),
            "nhwc" => Ok(InputLayout::Nhwc),
            other => Err(format!("unknown input layout '{other}' (expected nchw or nhwc)")),
        }
    }
}

pub struct FerClassifier {
    session: Mutex<Session>,
    layout: InputLayout,
}

impl FerClassifier {
    /// Load the emotion ONNX model from the given path.
    pub fn load(model_path: &str, layout: InputLayout) -> Result<Self, CapabilityError> {
        if !Path::new(model_path).exists() {
            return Err(CapabilityError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            ?layout,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded FER model"
        );

        Ok(Self {
            session: Mutex::new(session),
            layout,
        })
    }

    /// Grayscale, resize to 64×64 and scale to [-1, 1].
    fn preprocess(roi: &Frame, layout: InputLayout) -> Array4<f32> {
        let size = FER_INPUT_SIZE;
        let resized = resize_luma(&roi.to_luma(), roi.width as usize, roi.height as usize, size);

        let shape = match layout {
            InputLayout::Nchw => (1, 1, size, size),
            InputLayout::Nhwc => (1, size, size, 1),
        };
        let mut tensor = Array4::<f32>::zeros(shape);
        for y in 0..size {
            for x in 0..size {
                let v = (resized[y * size + x] as f32 / 255.0 - 0.5) * 2.0;
                match layout {
                    InputLayout::Nchw => tensor[[0, 0, y, x]] = v,
                    InputLayout::Nhwc => tensor[[0, y, x, 0]] = v,
                }
            }
        }
        tensor
    }
}

impl EmotionClassificationService for FerClassifier {
    fn classify(&self, roi: &Frame) -> Result<Option<EmotionScores>, CapabilityError> {
        if roi.validate().is_err() {
            return Ok(None);
        }
        let input = Self::preprocess(roi, self.layout);

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| CapabilityError::InferenceFailed(format!("emotion output: {e}")))?;

        if raw.len() != FER_LABELS.len() {
            return Err(CapabilityError::InferenceFailed(format!(
                "expected {} emotion scores, got {}",
                FER_LABELS.len(),
                raw.len()
            )));
        }

        let probs = to_probabilities(raw);
        Ok(Some(FER_LABELS.iter().cloned().zip(probs).collect()))
    }
}

/// Softmax, unless the model already emits a probability distribution.
fn to_probabilities(raw: &[f32]) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    let is_distribution = raw.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3;
    if is_distribution {
        return raw.to_vec();
    }

    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

/// Bilinear resize of a single-channel plane to `size`×`size`.
fn resize_luma(src: &[u8], width: usize, height: usize, size: usize) -> Vec<u8> {
    let sx = width as f32 / size as f32;
    let sy = height as f32 / size as f32;
    let mut out = vec![0u8; size * size];

    for y in 0..size {
        let fy_src = ((y as f32 + 0.5) * sy - 0.5).max(0.0);
        let y0 = (fy_src as usize).min(height - 1);
        let y1 = (y0 + 1).min(height - 1);
        let fy = fy_src - y0 as f32;

        for x in 0..size {
            let fx_src = ((x as f32 + 0.5) * sx - 0.5).max(0.0);
            let x0 = (fx_src as usize).min(width - 1);
            let x1 = (x0 + 1).min(width - 1);
            let fx = fx_src - x0 as f32;

            let top = src[y0 * width + x0] as f32 * (1.0 - fx) + src[y0 * width + x1] as f32 * fx;
            let bot = src[y1 * width + x0] as f32 * (1.0 - fx) + src[y1 * width + x1] as f32 * fx;
            out[y * size + x] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;

    #[test]
    fn test_preprocess_shapes() {
        let roi = Frame::new(vec![128u8; 30 * 20 * 3], 30, 20, PixelLayout::Rgb).unwrap();
        assert_eq!(FerClassifier::preprocess(&roi, InputLayout::Nchw).shape(), &[1, 1, 64, 64]);
        assert_eq!(FerClassifier::preprocess(&roi, InputLayout::Nhwc).shape(), &[1, 64, 64, 1]);
    }

    #[test]
    fn test_preprocess_scales_to_unit_range() {
        let black = Frame::new(vec![0u8; 10 * 10], 10, 10, PixelLayout::Gray).unwrap();
        let white = Frame::new(vec![255u8; 10 * 10], 10, 10, PixelLayout::Gray).unwrap();
        assert_eq!(FerClassifier::preprocess(&black, InputLayout::Nchw)[[0, 0, 5, 5]], -1.0);
        assert_eq!(FerClassifier::preprocess(&white, InputLayout::Nchw)[[0, 0, 5, 5]], 1.0);
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let out = resize_luma(&vec![77u8; 100 * 50], 100, 50, FER_INPUT_SIZE);
        assert!(out.iter().all(|&p| p == 77));
    }

    #[test]
    fn test_probabilities_pass_through() {
        let probs = to_probabilities(&[0.1, 0.0, 0.0, 0.7, 0.1, 0.05, 0.05]);
        assert!((probs[3] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_logits_are_softmaxed() {
        let probs = to_probabilities(&[2.0, -1.0, 0.5, 4.0, 0.0, 1.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        let argmax = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i);
        assert_eq!(argmax, Some(3));
    }

    #[test]
    fn test_input_layout_parse() {
        assert_eq!("NHWC".parse::<InputLayout>(), Ok(InputLayout::Nhwc));
        assert!("chw".parse::<InputLayout>().is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let err = FerClassifier::load("/nonexistent/emotion_fer.onnx", InputLayout::Nchw).err().unwrap();
        assert!(matches!(err, CapabilityError::ModelNotFound(_)));
    }
}
