//! Error types for the postbox wire format.

use thiserror::Error;

/// Errors raised while framing or unframing bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than a complete header.
    #[error("incomplete header: need {needed} bytes, got {got}")]
    Incomplete {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        got: usize,
    },

    /// Header carries a protocol version this relay does not speak.
    #[error("unsupported protocol version: {got} (supported: {supported})")]
    VersionMismatch {
        /// Version found in the header.
        got: u8,
        /// The single supported version.
        supported: u8,
    },

    /// Payload bytes do not sum to the header checksum.
    #[error("checksum mismatch: header={expected}, computed={actual}")]
    ChecksumMismatch {
        /// Checksum declared in the header.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// Payload length differs from the declared `payload_size`.
    #[error("payload length mismatch: declared {declared}, got {actual}")]
    LengthMismatch {
        /// Size declared in the header.
        declared: usize,
        /// Bytes supplied.
        actual: usize,
    },

    /// Payload cannot be described by a 16-bit size field.
    #[error("payload too large: {size} bytes (limit: {limit} bytes)")]
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Maximum encodable size.
        limit: usize,
    },
}

/// Errors raised while decoding a request or response payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Payload shorter than the fixed-width prefix.
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum length of the fixed prefix.
        expected: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// A length-prefixed field runs past the end of the payload.
    #[error("{field} length {declared} exceeds remaining {remaining} bytes")]
    FieldOverrun {
        /// Field name.
        field: &'static str,
        /// Declared length.
        declared: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// A required field is empty.
    #[error("{field} must not be empty")]
    EmptyField {
        /// Field name.
        field: &'static str,
    },

    /// A text field is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidText {
        /// Field name.
        field: &'static str,
    },

    /// A value does not fit its fixed-width field.
    #[error("{field} is {len} bytes (limit: {limit} bytes)")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Field width.
        limit: usize,
    },

    /// Item type discriminator outside the known set.
    #[error("unknown item type: {0}")]
    UnknownItemType(u8),
}
