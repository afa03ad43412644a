//! # postbox-relay
//!
//! Store-and-forward relay for end-to-end encrypted messaging.
//!
//! This crate implements a relay server that:
//! - Accepts plain TCP connections, one task per connection
//! - Registers identities (name + public key) and answers key lookups
//! - Queues opaque encrypted items in per-recipient mailboxes
//! - Delivers each queued item at most once (retrieval deletes)
//! - Never sees plaintext (relay is a "dumb pipe")
//!
//! ## Architecture
//!
//! ```text
//!  Client A ──┐                    ┌── Client B
//!             │   9-byte framing   │
//!             ├───────────────────►│
//!             │                    │
//!         ┌───┴────────────────────┴───┐
//!         │       postbox-relay        │
//!         │  connection → dispatcher   │
//!         │  ┌─────────────────────┐   │
//!         │  │ SQLite (clients,    │   │
//!         │  │         messages)   │   │
//!         │  └─────────────────────┘   │
//!         └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Every request carries its own claimed identity; there is no session.
//! - REGISTER → REGISTRATION_SUCCESS / FAILURE
//! - SEND_MESSAGE, SEND_SYMMETRIC_KEY → queued / failure
//! - REQUEST_MESSAGES → drained mailbox
//! - REQUEST_USERS → identity listing
//! - REQUEST_PUBLIC_KEY → key / failure
//! - LOGOUT → unsupported failure

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod metrics;
pub mod retry;
pub mod server;
pub mod storage;
