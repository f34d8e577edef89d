//! Frame type: an owned pixel buffer with an explicit color layout.

use crate::types::BoundingBox;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has zero extent ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("invalid buffer length for {width}x{height}x{channels}: expected {expected}, got {actual}")]
    InvalidLength {
        width: u32,
        height: u32,
        channels: usize,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported channel count: {0} (need 1, 3 or 4)")]
    UnsupportedChannels(usize),
}

/// Interleaved color layout of a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Gray,
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }

    pub fn from_channels(channels: usize) -> Result<Self, FrameError> {
        match channels {
            1 => Ok(PixelLayout::Gray),
            3 => Ok(PixelLayout::Rgb),
            4 => Ok(PixelLayout::Rgba),
            n => Err(FrameError::UnsupportedChannels(n)),
        }
    }
}

/// A row-major, interleaved 8-bit pixel buffer.
///
/// Fields are public so collaborators can hand over whatever they captured;
/// [`Frame::validate`] is the single place that decides whether the buffer
/// is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

impl Frame {
    /// Build a frame, rejecting buffers whose length does not match the extent.
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Result<Self, FrameError> {
        let frame = Self { data, width, height, layout };
        frame.validate()?;
        Ok(frame)
    }

    /// Build a frame from a raw channel count (1, 3 or 4).
    pub fn from_channels(data: Vec<u8>, width: u32, height: u32, channels: usize) -> Result<Self, FrameError> {
        Self::new(data, width, height, PixelLayout::from_channels(channels)?)
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    /// `width * height`, or `None` if the declared extent overflows `usize`.
    pub fn pixel_count(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }

    /// Buffer length implied by the extent and layout, `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        self.pixel_count()?.checked_mul(self.channels())
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        // An extent too large to address saturates, so it can never match.
        let expected = self.byte_len().unwrap_or(usize::MAX);
        if self.data.len() != expected {
            return Err(FrameError::InvalidLength {
                width: self.width,
                height: self.height,
                channels: self.channels(),
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok()
    }

    /// Copy out the sub-rectangle described by `region`.
    ///
    /// The region is clipped to the frame first, so the result may be smaller
    /// than requested (or empty when the region lies outside the frame).
    pub fn crop(&self, region: &BoundingBox) -> Frame {
        let clipped = region.clip_to(self.width, self.height);
        let ch = self.channels();
        let src_stride = self.width as usize * ch;
        let row_len = clipped.width as usize * ch;

        let mut data = Vec::with_capacity(row_len * clipped.height as usize);
        for y in clipped.y..clipped.y + clipped.height {
            let start = y as usize * src_stride + clipped.x as usize * ch;
            if let Some(row) = self.data.get(start..start + row_len) {
                data.extend_from_slice(row);
            }
        }

        Frame {
            data,
            width: clipped.width,
            height: clipped.height,
            layout: self.layout,
        }
    }

    /// Luma plane (BT.601 weights), one byte per pixel.
    pub fn to_luma(&self) -> Vec<u8> {
        match self.layout {
            PixelLayout::Gray => self.data.clone(),
            PixelLayout::Rgb | PixelLayout::Rgba => self
                .data
                .chunks_exact(self.channels())
                .map(|px| {
                    let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                    y.round().clamp(0.0, 255.0) as u8
                })
                .collect(),
        }
    }
}

impl From<DynamicImage> for Frame {
    /// Keep 8-bit gray, RGB and RGBA images in their native layout so the
    /// preprocessor sees what the producer sent; anything else goes to RGB.
    fn from(img: DynamicImage) -> Self {
        let (width, height) = (img.width(), img.height());
        let (data, layout) = match img {
            DynamicImage::ImageLuma8(buf) => (buf.into_raw(), PixelLayout::Gray),
            DynamicImage::ImageRgb8(buf) => (buf.into_raw(), PixelLayout::Rgb),
            DynamicImage::ImageRgba8(buf) => (buf.into_raw(), PixelLayout::Rgba),
            other => (other.to_rgb8().into_raw(), PixelLayout::Rgb),
        };
        Frame { data, width, height, layout }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_short_buffer() {
        let err = Frame::new(vec![0u8; 10], 2, 2, PixelLayout::Rgb).unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidLength { width: 2, height: 2, channels: 3, expected: 12, actual: 10 }
        );
    }

    #[test]
    fn test_new_rejects_zero_extent() {
        assert!(matches!(
            Frame::new(vec![], 0, 5, PixelLayout::Gray),
            Err(FrameError::Empty { .. })
        ));
    }

    #[test]
    fn test_from_channels_unsupported() {
        assert_eq!(
            Frame::from_channels(vec![0u8; 8], 2, 2, 2).unwrap_err(),
            FrameError::UnsupportedChannels(2)
        );
    }

    #[test]
    fn test_crop_copies_rows() {
        // 4x3 grayscale, pixel value = y * 10 + x
        let data: Vec<u8> = (0..3).flat_map(|y| (0..4).map(move |x| y * 10 + x)).collect();
        let frame = Frame::new(data, 4, 3, PixelLayout::Gray).unwrap();

        let roi = frame.crop(&BoundingBox::new(1, 1, 2, 2));
        assert_eq!((roi.width, roi.height), (2, 2));
        assert_eq!(roi.data, vec![11, 12, 21, 22]);
        assert!(roi.is_well_formed());
    }

    #[test]
    fn test_crop_clips_to_frame() {
        let frame = Frame::new(vec![7u8; 4 * 4 * 3], 4, 4, PixelLayout::Rgb).unwrap();
        let roi = frame.crop(&BoundingBox::new(2, 3, 10, 10));
        assert_eq!((roi.width, roi.height), (2, 1));
        assert_eq!(roi.data.len(), 2 * 3);
    }

    #[test]
    fn test_to_luma_rgb() {
        let frame = Frame::new(vec![255, 255, 255, 0, 0, 0], 2, 1, PixelLayout::Rgb).unwrap();
        assert_eq!(frame.to_luma(), vec![255, 0]);
    }

    #[test]
    fn test_from_dynamic_image_keeps_layout() {
        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(3, 2, image::Luma([9])));
        let frame = Frame::from(gray);
        assert_eq!(frame.layout, PixelLayout::Gray);
        assert_eq!(frame.data, vec![9u8; 6]);

        let rgba = DynamicImage::ImageRgba8(image::RgbaImage::new(2, 2));
        assert_eq!(Frame::from(rgba).layout, PixelLayout::Rgba);
    }

    #[test]
    fn test_validate_huge_extent_is_error() {
        let frame = Frame {
            data: vec![],
            width: u32::MAX,
            height: u32::MAX,
            layout: PixelLayout::Rgba,
        };
        assert!(matches!(
            frame.validate(),
            Err(FrameError::InvalidLength { expected: usize::MAX, actual: 0, .. })
        ));
        assert!(Frame::new(vec![], u32::MAX, u32::MAX, PixelLayout::Rgb).is_err());
    }
}
