//! Request payload decoding: base64 (optionally a data URL) to [`Frame`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use moodlens_core::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("undecodable image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a base64 image, accepting both raw base64 and
/// `data:image/...;base64,` URLs.
pub fn decode_image(payload: &str) -> Result<Frame, DecodeError> {
    let encoded = match payload.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = STANDARD.decode(encoded)?;
    let image = image::load_from_memory(&bytes)?;
    tracing::debug!(
        bytes = bytes.len(),
        width = image.width(),
        height = image.height(),
        "decoded request image"
    );
    Ok(Frame::from(image))
}
