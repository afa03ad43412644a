//! Identity and item types.

use crate::PayloadError;
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of a registered client.
///
/// 16 lowercase hex characters, transmitted as their ASCII bytes. Derived
/// deterministically from the registered name and public key, so the same
/// pair always maps to the same id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId([u8; ClientId::SIZE]);

impl ClientId {
    /// Encoded width in bytes.
    pub const SIZE: usize = 16;

    /// Derive the id for a (name, public key) pair.
    ///
    /// First 16 hex characters of `SHA-256(name ‖ 0x00 ‖ public_key)`.
    pub fn derive(name: &str, public_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(public_key.as_bytes());
        let digest = hex::encode(hasher.finalize());

        let mut bytes = [0u8; Self::SIZE];
        bytes.copy_from_slice(&digest.as_bytes()[..Self::SIZE]);
        Self(bytes)
    }

    /// Create a ClientId from its 16-byte wire form.
    ///
    /// Returns `None` unless `bytes` is exactly 16 lowercase hex digits.
    /// Uppercase digits are rejected, so matching an id is always exact.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let lower_hex = |b: &u8| matches!(*b, b'0'..=b'9' | b'a'..=b'f');
        if bytes.len() != Self::SIZE || !bytes.iter().all(lower_hex) {
            return None;
        }
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }

    /// Parse the textual form.
    pub fn parse(s: &str) -> Option<Self> {
        Self::from_bytes(s.as_bytes())
    }

    /// Get the raw bytes of this ClientId.
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }

    /// Textual form (always valid ASCII).
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.as_str())
    }
}

/// Kind of a queued mailbox item. The relay treats both as opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ItemType {
    /// Encrypted message content
    Message = 1,
    /// Symmetric-key material
    SymmetricKey = 2,
}

impl ItemType {
    /// Numeric wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ItemType {
    type Error = PayloadError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ItemType::Message),
            2 => Ok(ItemType::SymmetricKey),
            other => Err(PayloadError::UnknownItemType(other)),
        }
    }
}
