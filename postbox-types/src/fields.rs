//! Fixed-width field codec.
//!
//! Text fields are UTF-8, null-padded to their width on encode and
//! null-trimmed on decode. Integers are little-endian.

use crate::{ClientId, PayloadError};

/// Width of a name field.
pub const NAME_SIZE: usize = 255;

/// Width of a public key field.
pub const PUBLIC_KEY_SIZE: usize = 1024;

/// Width of an error or confirmation text field.
pub const TEXT_SIZE: usize = 255;

/// Width of a length prefix.
pub const LEN_SIZE: usize = 4;

/// Sequential reader over a payload.
#[derive(Debug)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    /// Create a reader over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Create a reader after checking that `buf` holds a fixed prefix of `min_len` bytes.
    ///
    /// # Errors
    ///
    /// [`PayloadError::TooShort`] if the payload is shorter than `min_len`.
    pub fn with_prefix(buf: &'a [u8], min_len: usize) -> Result<Self, PayloadError> {
        if buf.len() < min_len {
            return Err(PayloadError::TooShort {
                expected: min_len,
                actual: buf.len(),
            });
        }
        Ok(Self::new(buf))
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take the next `len` bytes.
    pub fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], PayloadError> {
        if len > self.remaining() {
            return Err(PayloadError::FieldOverrun {
                field,
                declared: len,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, PayloadError> {
        Ok(self.take(field, 1)?[0])
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, PayloadError> {
        let bytes = self.take(field, LEN_SIZE)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a null-padded text field of `width` bytes.
    pub fn read_text(&mut self, field: &'static str, width: usize) -> Result<String, PayloadError> {
        let raw = self.take(field, width)?;
        decode_text(field, raw)
    }

    /// Read a 16-byte client id.
    pub fn read_client_id(&mut self, field: &'static str) -> Result<ClientId, PayloadError> {
        let raw = self.take(field, ClientId::SIZE)?;
        ClientId::from_bytes(raw).ok_or(PayloadError::InvalidText { field })
    }

    /// Read a u32 length prefix followed by that many bytes.
    pub fn read_len_prefixed(&mut self, field: &'static str) -> Result<&'a [u8], PayloadError> {
        let len = self.read_u32(field)? as usize;
        self.take(field, len)
    }
}

/// Decode a null-padded text field.
///
/// Everything from the first NUL onwards is padding.
pub fn decode_text(field: &'static str, raw: &[u8]) -> Result<String, PayloadError> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_owned)
        .map_err(|_| PayloadError::InvalidText { field })
}

/// Payload builder.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append a single byte.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Append a little-endian u32.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a client id.
    pub fn put_client_id(&mut self, id: &ClientId) -> &mut Self {
        self.put_bytes(id.as_bytes())
    }

    /// Append `text` null-padded to `width`, truncating at a char boundary if longer.
    pub fn put_text(&mut self, text: &str, width: usize) -> &mut Self {
        let bytes = truncate_utf8(text, width).as_bytes();
        self.buf.extend_from_slice(bytes);
        self.buf.resize(self.buf.len() + (width - bytes.len()), 0);
        self
    }

    /// Append a u32 length prefix and the bytes.
    pub fn put_len_prefixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_u32(bytes.len() as u32);
        self.put_bytes(bytes)
    }

    /// Finish and return the payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Validate that `text` fits a fixed-width field without loss.
pub fn check_fits(field: &'static str, text: &str, width: usize) -> Result<(), PayloadError> {
    if text.len() > width {
        return Err(PayloadError::FieldTooLong {
            field,
            len: text.len(),
            limit: width,
        });
    }
    Ok(())
}

/// Longest prefix of `text` that is at most `max_bytes` long.
///
/// Uses char boundaries to avoid splitting multi-byte UTF-8.
fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
