use crate::error::FrameError;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;

/// JPEG SOI 标记
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// 将 JPEG 字节编码为 camera_frame 负载
pub fn encode_frame_payload(jpeg: &[u8]) -> String {
    general_purpose::STANDARD.encode(jpeg)
}

/// 解码 camera_frame 负载，容忍 data URL 前缀
pub fn decode_frame_payload(image: &str) -> Result<Bytes, FrameError> {
    let encoded = image.trim();
    let encoded = encoded.strip_prefix(DATA_URL_PREFIX).unwrap_or(encoded);
    if encoded.is_empty() {
        return Err(FrameError::Empty);
    }

    let data = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| FrameError::InvalidBase64(e.to_string()))?;

    if !is_jpeg(&data) {
        return Err(FrameError::NotJpeg);
    }

    Ok(Bytes::from(data))
}

pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() > JPEG_SOI.len() && data.starts_with(&JPEG_SOI)
}
