//! moodlens-hw — Camera frame source.
//!
//! Provides V4L2-based capture that feeds `moodlens_core::Pipeline::watch`
//! through the `FrameSource` trait.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
