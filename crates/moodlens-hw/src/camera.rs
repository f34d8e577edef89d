//! V4L2 camera capture via the `v4l` crate.

use crate::frame;
use moodlens_core::{Frame, FrameSource, PixelLayout, SourceError};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Fraction of near-black pixels above which a frame is discarded.
const DARK_FRAME_THRESHOLD: f32 = 0.95;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("video capture not supported")]
    CaptureNotSupported,
}

impl From<CameraError> for SourceError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::CaptureFailed(msg) => SourceError::CaptureFailed(msg),
            other => SourceError::Unavailable(other.to_string()),
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB.
    Yuyv,
    /// 8-bit grayscale, passed through as a gray frame.
    Grey,
    /// Packed 24-bit RGB.
    Rgb24,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            b"RGB3" => Some(PixelFormat::Rgb24),
            _ => None,
        }
    }
}

/// V4L2 camera device handle. The device is closed when the handle drops.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and negotiate
    /// 640x480, preferring YUYV.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = 640;
        fmt.height = 480;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY or RGB3)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    /// Capture a single frame.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = self.mmap_stream()?;
        let (buf, _) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        self.to_frame(buf)
    }

    /// Start a continuous stream that skips dark frames.
    ///
    /// `limit` caps the number of frames delivered; `None` streams until the
    /// consumer stops pulling.
    pub fn stream(&self, limit: Option<usize>) -> Result<CameraStream<'_>, CameraError> {
        Ok(CameraStream {
            camera: self,
            stream: self.mmap_stream()?,
            remaining: limit,
            dark_skipped: 0,
        })
    }

    fn mmap_stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    /// Convert a raw buffer according to the negotiated format.
    fn to_frame(&self, buf: &[u8]) -> Result<Frame, CameraError> {
        let pixels = self.width as usize * self.height as usize;
        let short = |need: usize| {
            CameraError::CaptureFailed(format!(
                "{:?} buffer too short: expected {need}, got {}",
                self.pixel_format,
                buf.len()
            ))
        };

        let frame = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Grey => {
                let data = buf.get(..pixels).ok_or_else(|| short(pixels))?;
                Frame::new(data.to_vec(), self.width, self.height, PixelLayout::Gray)
            }
            PixelFormat::Rgb24 => {
                let data = buf.get(..pixels * 3).ok_or_else(|| short(pixels * 3))?;
                Frame::new(data.to_vec(), self.width, self.height, PixelLayout::Rgb)
            }
        };
        frame.map_err(|e| CameraError::CaptureFailed(format!("frame conversion failed: {e}")))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Live capture stream borrowed from a [`Camera`].
pub struct CameraStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
    remaining: Option<usize>,
    dark_skipped: usize,
}

impl CameraStream<'_> {
    /// Frames dropped so far because they were too dark to use.
    pub fn dark_skipped(&self) -> usize {
        self.dark_skipped
    }
}

impl FrameSource for CameraStream<'_> {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.remaining == Some(0) {
            return Ok(None);
        }

        loop {
            let (buf, meta) = self
                .stream
                .next()
                .map_err(|e| SourceError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
            let frame = self.camera.to_frame(buf)?;

            if frame::is_dark_frame(&frame, DARK_FRAME_THRESHOLD) {
                self.dark_skipped += 1;
                tracing::debug!(seq = meta.sequence, "skipping dark frame");
                continue;
            }

            if let Some(n) = self.remaining.as_mut() {
                *n -= 1;
            }
            return Ok(Some(frame));
        }
    }
}
