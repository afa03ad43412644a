//! # postbox-types
//!
//! Wire format types for the postbox store-and-forward relay.
//!
//! This crate is pure: no sockets, no storage, no async. It provides:
//! - [`Header`], [`Frame`], [`decode_header`], [`decode_frame`], [`encode_frame`] - the 9-byte framing
//! - [`RequestCode`], [`ResponseCode`] - protocol code tables
//! - [`ClientId`], [`ItemType`] - identity and mailbox item types
//! - [`fields`] - fixed-width, null-padded field codec
//! - [`payloads`] - typed request and response payloads
//! - [`FrameError`], [`PayloadError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codes;
mod error;
pub mod fields;
mod frame;
mod ids;
pub mod payloads;

pub use codes::{RequestCode, ResponseCode};
pub use error::{FrameError, PayloadError};
pub use frame::{
    checksum, decode_frame, decode_frame_strict, decode_header, encode_frame, Frame, Header,
    HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
pub use ids::{ClientId, ItemType};
