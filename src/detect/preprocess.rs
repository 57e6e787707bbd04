//! Image payload normalization ahead of real detection.
//!
//! Callers send base64 image data, optionally wrapped in a data URL. With the
//! `preprocess` feature the image is also resized to the model input size and
//! re-encoded as JPEG. Resizing is a normalization step only; backends accept
//! images of any size.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{GatewayError, GatewayResult};

/// Strip a `data:image/...;base64,` prefix if present.
pub fn strip_data_url(data: &str) -> &str {
    let trimmed = data.trim();
    if trimmed.starts_with("data:") {
        if let Some((_, payload)) = trimmed.split_once(',') {
            return payload;
        }
    }
    trimmed
}

/// Decode caller-supplied base64 image data.
pub fn decode_image_data(data: &str) -> GatewayResult<Vec<u8>> {
    let payload = strip_data_url(data);
    if payload.is_empty() {
        return Err(GatewayError::invalid_input("No image data provided"));
    }
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| GatewayError::invalid_input(format!("imageData is not valid base64: {}", e)))?;
    if bytes.is_empty() {
        return Err(GatewayError::invalid_input("No image data provided"));
    }
    Ok(bytes)
}

pub fn encode_image(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Validate and optionally resize an image payload to `input_size` x `input_size`.
///
/// Returns plain base64 (no data URL prefix), ready for a backend request.
pub fn prepare_image(data: &str, input_size: Option<u32>) -> GatewayResult<String> {
    let bytes = decode_image_data(data)?;
    match input_size {
        Some(size) => resize_to_input(&bytes, size),
        None => Ok(encode_image(&bytes)),
    }
}

#[cfg(feature = "preprocess")]
fn resize_to_input(bytes: &[u8], size: u32) -> GatewayResult<String> {
    use image::codecs::jpeg::JpegEncoder;
    use image::imageops::FilterType;

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| GatewayError::invalid_input(format!("unsupported image data: {}", e)))?;
    let resized = decoded
        .resize_exact(size, size, FilterType::Triangle)
        .into_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&resized)
        .map_err(|e| GatewayError::invalid_input(format!("failed to encode image: {}", e)))?;
    Ok(encode_image(&out))
}

#[cfg(not(feature = "preprocess"))]
fn resize_to_input(bytes: &[u8], _size: u32) -> GatewayResult<String> {
    Ok(encode_image(bytes))
}
