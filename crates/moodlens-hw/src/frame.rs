//! Raw buffer conversion: YUYV to RGB, dark-frame detection.

use moodlens_core::{Frame, FrameError, PixelLayout};

/// Convert packed YUYV (4:2:2) to interleaved RGB using BT.601 limited-range
/// coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share the
/// chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Frame, FrameError> {
    let pixels = (width as usize).checked_mul(height as usize);
    let expected = pixels.and_then(|p| p.checked_mul(2)).unwrap_or(usize::MAX);
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            width,
            height,
            channels: 2,
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(expected / 2 * 3);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    Frame::new(rgb, width, height, PixelLayout::Rgb)
}

fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = cb as f32 - 128.0;
    let e = cr as f32 - 128.0;
    let px = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    [px(c + 1.596 * e), px(c - 0.392 * d - 0.813 * e), px(c + 2.017 * d)]
}

/// True if more than `threshold_pct` of the luma plane is in the darkest
/// bucket (0–31). Empty frames count as dark.
pub fn is_dark_frame(frame: &Frame, threshold_pct: f32) -> bool {
    let luma = frame.to_luma();
    if luma.is_empty() {
        return true;
    }
    let dark = luma.iter().filter(|&&p| p < 32).count();
    (dark as f32 / luma.len() as f32) > threshold_pct
}
