//! Frame producers feeding the pipeline (camera, image sequence, ...).

use crate::frame::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// A producer of frames. Opening happens at construction and closing on drop,
/// so the pipeline only ever sees `next_frame`.
pub trait FrameSource {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Replays a fixed list of frames. Useful for still images and tests.
pub struct FrameSequence {
    frames: std::vec::IntoIter<Frame>,
}

impl FrameSequence {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames: frames.into_iter() }
    }
}

impl FrameSource for FrameSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(self.frames.next())
    }
}
