//! Frame normalisation: canonical RGB layout and min/max contrast stretch.

use crate::frame::{Frame, PixelLayout};

/// Best-effort frame normaliser. Never fails: a frame it cannot handle is
/// passed through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramePreprocessor;

impl FramePreprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Convert to RGB and stretch intensities to the full 0–255 range.
    pub fn normalize(&self, frame: Frame) -> Frame {
        if let Err(err) = frame.validate() {
            tracing::warn!(error = %err, "preprocess: malformed frame, passing through unchanged");
            return frame;
        }

        let mut rgb = to_rgb(frame);
        stretch_contrast(&mut rgb.data);
        rgb
    }
}

/// Replicate gray into three channels or drop alpha.
fn to_rgb(frame: Frame) -> Frame {
    let data = match frame.layout {
        PixelLayout::Rgb => return frame,
        PixelLayout::Gray => frame.data.iter().flat_map(|&y| [y, y, y]).collect(),
        PixelLayout::Rgba => frame
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
    };
    Frame {
        data,
        width: frame.width,
        height: frame.height,
        layout: PixelLayout::Rgb,
    }
}

/// Global min/max stretch over all channels. A flat buffer has no range to
/// stretch and is left as is.
fn stretch_contrast(data: &mut [u8]) {
    let Some(&min) = data.iter().min() else {
        return;
    };
    let max = data.iter().copied().max().unwrap_or(min);
    if max == min || (min == 0 && max == 255) {
        return;
    }

    let scale = 255.0 / (max - min) as f32;
    let mut lut = [0u8; 256];
    for (v, out) in lut.iter_mut().enumerate().skip(min as usize).take((max - min) as usize + 1) {
        *out = ((v as f32 - min as f32) * scale).round().clamp(0.0, 255.0) as u8;
    }
    for px in data.iter_mut() {
        *px = lut[*px as usize];
    }
}
