//! Frame codec: the fixed 9-byte header and its payload.
//!
//! ```text
//! offset  size  field
//! 0       1     version       (u8)
//! 1       2     code          (u16, little-endian)
//! 3       2     payload_size  (u16, little-endian)
//! 5       4     checksum      (u32, little-endian)
//! 9       n     payload       (n == payload_size)
//! ```
//!
//! The checksum is the byte sum of the payload modulo 2^32. It is an
//! integrity hint, not a MAC.

use crate::FrameError;

/// Size of the encoded header.
pub const HEADER_SIZE: usize = 9;

/// The only protocol version spoken by the relay.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest payload a header can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version.
    pub version: u8,
    /// Request or response code.
    pub code: u16,
    /// Number of payload bytes following the header.
    pub payload_size: u16,
    /// Byte sum of the payload.
    pub checksum: u32,
}

impl Header {
    /// Encode to the 9-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.version;
        out[1..3].copy_from_slice(&self.code.to_le_bytes());
        out[3..5].copy_from_slice(&self.payload_size.to_le_bytes());
        out[5..9].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }
}

/// A header plus exactly `payload_size` bytes of payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header.
    pub header: Header,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Code carried by this frame.
    pub fn code(&self) -> u16 {
        self.header.code
    }

    /// Whether the header checksum matches the payload.
    pub fn checksum_matches(&self) -> bool {
        checksum(&self.payload) == self.header.checksum
    }
}

/// Byte sum of `payload` modulo 2^32.
pub fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b)))
}

/// Decode a header from the first 9 bytes of `bytes`.
///
/// Extra trailing bytes are ignored.
///
/// # Errors
///
/// [`FrameError::Incomplete`] if fewer than 9 bytes are supplied.
pub fn decode_header(bytes: &[u8]) -> Result<Header, FrameError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameError::Incomplete {
            needed: HEADER_SIZE,
            got: bytes.len(),
        });
    }

    Ok(Header {
        version: bytes[0],
        code: u16::from_le_bytes([bytes[1], bytes[2]]),
        payload_size: u16::from_le_bytes([bytes[3], bytes[4]]),
        checksum: u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
    })
}

/// Assemble a frame from a decoded header and its payload.
///
/// Validates the version and the payload length. The checksum is advisory
/// and is not checked here; see [`decode_frame_strict`].
///
/// # Errors
///
/// [`FrameError::VersionMismatch`] or [`FrameError::LengthMismatch`].
pub fn decode_frame(header: Header, payload: Vec<u8>) -> Result<Frame, FrameError> {
    if header.version != PROTOCOL_VERSION {
        return Err(FrameError::VersionMismatch {
            got: header.version,
            supported: PROTOCOL_VERSION,
        });
    }

    if payload.len() != header.payload_size as usize {
        return Err(FrameError::LengthMismatch {
            declared: header.payload_size as usize,
            actual: payload.len(),
        });
    }

    Ok(Frame { header, payload })
}

/// Like [`decode_frame`], additionally rejecting checksum mismatches.
///
/// # Errors
///
/// Everything [`decode_frame`] returns, plus [`FrameError::ChecksumMismatch`].
pub fn decode_frame_strict(header: Header, payload: Vec<u8>) -> Result<Frame, FrameError> {
    let frame = decode_frame(header, payload)?;
    let actual = checksum(&frame.payload);
    if actual != frame.header.checksum {
        return Err(FrameError::ChecksumMismatch {
            expected: frame.header.checksum,
            actual,
        });
    }
    Ok(frame)
}

/// Encode `header ‖ payload` for `code`.
///
/// # Errors
///
/// [`FrameError::PayloadTooLarge`] if the payload exceeds [`MAX_PAYLOAD_SIZE`].
pub fn encode_frame(code: u16, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let payload_size = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        limit: MAX_PAYLOAD_SIZE,
    })?;

    let header = Header {
        version: PROTOCOL_VERSION,
        code,
        payload_size,
        checksum: checksum(payload),
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
