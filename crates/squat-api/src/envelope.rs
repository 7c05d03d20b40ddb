//! Frame envelope wire format.
//!
//! ```text
//! [u32 LE header length][JSON header][encoded image bytes]
//! ```
//!
//! The header carries an optional capture timestamp and an optional landmark
//! list in frame pixel space. A bare JPEG or PNG without an envelope is also
//! accepted and treated as a frame without landmarks.

use serde::{Deserialize, Serialize};

use squat_core::{Error, Pose, Result, Timestamp};
use squat_session::FrameRequest;

/// Headers larger than this are rejected. Keeping it below the value of any
/// image magic read as a length keeps bare images unambiguous.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

const LENGTH_PREFIX: usize = 4;
const JPEG_MAGIC: [u8; 2] = [0xff, 0xd8];
const PNG_MAGIC: [u8; 4] = [0x89, b'P', b'N', b'G'];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    /// `None` or missing means no pose was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Pose>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameEnvelope {
    pub header: FrameHeader,
    pub image: Vec<u8>,
}

impl FrameEnvelope {
    /// Frames without a capture time are stamped with `received`
    pub fn into_request(self, received: Timestamp) -> FrameRequest {
        FrameRequest {
            image: self.image,
            landmarks: self.header.landmarks,
            timestamp: self
                .header
                .timestamp_ms
                .map(Timestamp::from_millis)
                .unwrap_or(received),
        }
    }
}

fn is_bare_image(bytes: &[u8]) -> bool {
    bytes.starts_with(&JPEG_MAGIC) || bytes.starts_with(&PNG_MAGIC)
}

pub fn decode_envelope(bytes: &[u8], max_frame_bytes: usize) -> Result<FrameEnvelope> {
    if bytes.len() > max_frame_bytes {
        return Err(Error::InvalidInput(format!(
            "frame of {} bytes exceeds limit of {max_frame_bytes}",
            bytes.len()
        )));
    }

    if is_bare_image(bytes) {
        return Ok(FrameEnvelope {
            header: FrameHeader::default(),
            image: bytes.to_vec(),
        });
    }

    let Some((prefix, rest)) = bytes.split_first_chunk::<LENGTH_PREFIX>() else {
        return Err(Error::InvalidInput("frame shorter than length prefix".into()));
    };
    let header_len = u32::from_le_bytes(*prefix) as usize;
    if header_len > MAX_HEADER_BYTES {
        return Err(Error::InvalidInput(format!(
            "header length {header_len} exceeds {MAX_HEADER_BYTES}"
        )));
    }
    if rest.len() < header_len {
        return Err(Error::InvalidInput(format!(
            "header length {header_len} past end of {}-byte frame",
            bytes.len()
        )));
    }

    let (header, image) = rest.split_at(header_len);
    let header: FrameHeader = serde_json::from_slice(header)
        .map_err(|e| Error::InvalidInput(format!("bad frame header: {e}")))?;
    if image.is_empty() {
        return Err(Error::InvalidInput("frame carries no image".into()));
    }

    Ok(FrameEnvelope {
        header,
        image: image.to_vec(),
    })
}

pub fn encode_envelope(header: &FrameHeader, image: &[u8]) -> Result<Vec<u8>> {
    let header = serde_json::to_vec(header)?;
    if header.len() > MAX_HEADER_BYTES {
        return Err(Error::InvalidInput(format!(
            "header length {} exceeds {MAX_HEADER_BYTES}",
            header.len()
        )));
    }

    let mut out = Vec::with_capacity(LENGTH_PREFIX + header.len() + image.len());
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(image);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use squat_core::BodyLandmark;

    const LIMIT: usize = 1024 * 1024;

    #[test]
    fn test_decode_header_json() {
        let header = br#"{"timestamp_ms": 1500, "landmarks": [
            {"name": "left_knee", "x": 210.5, "y": 300.0, "visibility": 0.9},
            {"name": "nose", "x": 190.0, "y": 20.0, "visibility": 0.99}
        ]}"#;
        let mut bytes = (header.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(b"IMG");

        let envelope = decode_envelope(&bytes, LIMIT).unwrap();
        assert_eq!(envelope.image, b"IMG");
        let pose = envelope.header.landmarks.as_ref().unwrap();
        assert_eq!(pose.len(), 2);
        assert_eq!(pose.get(BodyLandmark::LeftKnee).unwrap().position.x, 210.5);

        let request = envelope.into_request(Timestamp::from_millis(9));
        assert_eq!(request.timestamp, Timestamp::from_millis(1500));
    }

    #[test]
    fn test_null_landmarks_mean_no_pose() {
        let bytes = encode_envelope(&FrameHeader::default(), b"IMG").unwrap();
        let envelope = decode_envelope(&bytes, LIMIT).unwrap();
        assert!(envelope.header.landmarks.is_none());

        let header = br#"{"landmarks": null}"#;
        let mut bytes = (header.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        bytes.push(0);
        let request = decode_envelope(&bytes, LIMIT)
            .unwrap()
            .into_request(Timestamp::from_millis(7));
        assert!(request.landmarks.is_none());
        assert_eq!(request.timestamp, Timestamp::from_millis(7));
    }

    #[test]
    fn test_bare_jpeg_accepted() {
        let bytes = [0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];
        let envelope = decode_envelope(&bytes, LIMIT).unwrap();
        assert_eq!(envelope.header, FrameHeader::default());
        assert_eq!(envelope.image, bytes);
    }

    #[test]
    fn test_malformed_envelopes_rejected() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![1, 0],
            // Header runs past the end
            vec![50, 0, 0, 0, b'{', b'}'],
            // Header too large
            vec![0, 0, 1, 0, b'{'],
            // Not JSON
            vec![3, 0, 0, 0, b'a', b'b', b'c', 1],
            // No image after header
            vec![2, 0, 0, 0, b'{', b'}'],
        ];
        for bytes in cases {
            assert!(
                matches!(decode_envelope(&bytes, LIMIT), Err(Error::InvalidInput(_))),
                "accepted {bytes:?}"
            );
        }

        let big = vec![0u8; 64];
        assert!(matches!(decode_envelope(&big, 32), Err(Error::InvalidInput(_))));
    }
}
