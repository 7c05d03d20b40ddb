//! Image codec capability.
//!
//! Frames arrive and leave as encoded bytes; the rest of the session only
//! ever sees decoded RGB buffers.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use squat_core::{Error, Result};

/// Trait for frame codecs
pub trait FrameCodec: Send + Sync {
    /// Decode transport bytes into an RGB frame
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage>;

    /// Encode an RGB frame for the transport
    fn encode(&self, frame: &RgbImage) -> Result<Vec<u8>>;

    /// MIME type of encoded frames
    fn content_type(&self) -> &'static str;
}

/// Decodes any format the `image` crate recognises, encodes JPEG
#[derive(Debug, Clone)]
pub struct JpegCodec {
    quality: u8,
}

impl JpegCodec {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self::new(80)
    }
}

impl FrameCodec for JpegCodec {
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage> {
        if bytes.is_empty() {
            return Err(Error::Render("empty frame".into()));
        }
        image::load_from_memory(bytes)
            .map(|img| img.to_rgb8())
            .map_err(|e| Error::Render(format!("undecodable frame: {}", e)))
    }

    fn encode(&self, frame: &RgbImage) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(frame)
            .map_err(|e| Error::Render(format!("JPEG encoding failed: {}", e)))?;
        Ok(out.into_inner())
    }

    fn content_type(&self) -> &'static str {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_encoded_frame_decodes_to_same_size() {
        let codec = JpegCodec::default();
        let frame = RgbImage::from_pixel(64, 48, Rgb([120, 30, 200]));

        let bytes = codec.encode(&frame).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn test_garbage_is_render_error() {
        let codec = JpegCodec::default();
        assert!(matches!(codec.decode(b"not an image"), Err(Error::Render(_))));
        assert!(matches!(codec.decode(&[]), Err(Error::Render(_))));
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(JpegCodec::new(0).quality(), 1);
        assert_eq!(JpegCodec::new(255).quality(), 100);
    }
}
