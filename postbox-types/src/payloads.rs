//! Typed request and response payloads.
//!
//! Requests are decoded by the relay and encoded by clients (and tests);
//! responses the other way round. Every decoder checks the fixed-width
//! prefix first, then any length-prefixed field against what remains.

use crate::fields::{
    check_fits, FieldReader, FieldWriter, LEN_SIZE, NAME_SIZE, PUBLIC_KEY_SIZE, TEXT_SIZE,
};
use crate::{ClientId, ItemType, PayloadError};

/// `Register`: name[255] + public_key[1024].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Display name.
    pub name: String,
    /// Public key text, opaque to the relay.
    pub public_key: String,
}

impl RegisterRequest {
    /// Fixed payload width.
    pub const SIZE: usize = NAME_SIZE + PUBLIC_KEY_SIZE;

    /// Decode from a request payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = FieldReader::with_prefix(payload, Self::SIZE)?;
        let name = r.read_text("name", NAME_SIZE)?;
        let public_key = r.read_text("public_key", PUBLIC_KEY_SIZE)?;

        if name.is_empty() {
            return Err(PayloadError::EmptyField { field: "name" });
        }
        if public_key.is_empty() {
            return Err(PayloadError::EmptyField {
                field: "public_key",
            });
        }
        Ok(Self { name, public_key })
    }

    /// Encode to a request payload.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        check_fits("name", &self.name, NAME_SIZE)?;
        check_fits("public_key", &self.public_key, PUBLIC_KEY_SIZE)?;
        let mut w = FieldWriter::with_capacity(Self::SIZE);
        w.put_text(&self.name, NAME_SIZE)
            .put_text(&self.public_key, PUBLIC_KEY_SIZE);
        Ok(w.into_bytes())
    }
}

/// `SendMessage` / `SendSymmetricKey`:
/// sender_id[16] + recipient_name[255] + len[4] + bytes[len].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Claimed sender.
    pub sender: ClientId,
    /// Recipient name (or id).
    pub recipient: String,
    /// Opaque content: ciphertext or key material.
    pub content: Vec<u8>,
}

impl SendRequest {
    /// Fixed prefix width (before the variable content).
    pub const PREFIX_SIZE: usize = ClientId::SIZE + NAME_SIZE + LEN_SIZE;

    /// Decode from a request payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = FieldReader::with_prefix(payload, Self::PREFIX_SIZE)?;
        let sender = r.read_client_id("sender_id")?;
        let recipient = r.read_text("recipient_name", NAME_SIZE)?;
        let content = r.read_len_prefixed("content")?.to_vec();

        if recipient.is_empty() {
            return Err(PayloadError::EmptyField {
                field: "recipient_name",
            });
        }
        if content.is_empty() {
            return Err(PayloadError::EmptyField { field: "content" });
        }
        Ok(Self {
            sender,
            recipient,
            content,
        })
    }

    /// Encode to a request payload.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        check_fits("recipient_name", &self.recipient, NAME_SIZE)?;
        let mut w = FieldWriter::with_capacity(Self::PREFIX_SIZE + self.content.len());
        w.put_client_id(&self.sender)
            .put_text(&self.recipient, NAME_SIZE)
            .put_len_prefixed(&self.content);
        Ok(w.into_bytes())
    }
}

/// `RequestMessages`: requester_id[16].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagesRequest {
    /// Mailbox owner.
    pub requester: ClientId,
}

impl MessagesRequest {
    /// Fixed payload width.
    pub const SIZE: usize = ClientId::SIZE;

    /// Decode from a request payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = FieldReader::with_prefix(payload, Self::SIZE)?;
        Ok(Self {
            requester: r.read_client_id("requester_id")?,
        })
    }

    /// Encode to a request payload.
    pub fn encode(&self) -> Vec<u8> {
        self.requester.as_bytes().to_vec()
    }
}

/// `RequestPublicKey`: identifier[255] (a name or a client id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyRequest {
    /// Name or id of the identity to look up.
    pub identifier: String,
}

impl PublicKeyRequest {
    /// Fixed payload width.
    pub const SIZE: usize = NAME_SIZE;

    /// Decode from a request payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = FieldReader::with_prefix(payload, Self::SIZE)?;
        let identifier = r.read_text("identifier", NAME_SIZE)?;
        if identifier.is_empty() {
            return Err(PayloadError::EmptyField {
                field: "identifier",
            });
        }
        Ok(Self { identifier })
    }

    /// Encode to a request payload.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        check_fits("identifier", &self.identifier, NAME_SIZE)?;
        let mut w = FieldWriter::with_capacity(Self::SIZE);
        w.put_text(&self.identifier, NAME_SIZE);
        Ok(w.into_bytes())
    }
}

/// Success or failure text: text[255].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextResponse {
    /// Human-readable text.
    pub text: String,
}

impl TextResponse {
    /// Fixed payload width.
    pub const SIZE: usize = TEXT_SIZE;

    /// Wrap a message.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Encode, truncating overlong text.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FieldWriter::with_capacity(Self::SIZE);
        w.put_text(&self.text, TEXT_SIZE);
        w.into_bytes()
    }

    /// Decode from a response payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = FieldReader::with_prefix(payload, Self::SIZE)?;
        Ok(Self {
            text: r.read_text("text", TEXT_SIZE)?,
        })
    }
}

/// `RegistrationSuccess`: client_id[16] + text[255].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResponse {
    /// The id assigned to the new identity.
    pub client_id: ClientId,
    /// Confirmation text.
    pub text: String,
}

impl RegistrationResponse {
    /// Fixed payload width.
    pub const SIZE: usize = ClientId::SIZE + TEXT_SIZE;

    /// Encode to a response payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FieldWriter::with_capacity(Self::SIZE);
        w.put_client_id(&self.client_id).put_text(&self.text, TEXT_SIZE);
        w.into_bytes()
    }

    /// Decode from a response payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = FieldReader::with_prefix(payload, Self::SIZE)?;
        Ok(Self {
            client_id: r.read_client_id("client_id")?,
            text: r.read_text("text", TEXT_SIZE)?,
        })
    }
}

/// One drained mailbox item as sent to its recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredItem {
    /// Sender id.
    pub from: ClientId,
    /// Store-assigned id (low 32 bits).
    pub item_id: u32,
    /// Message or symmetric key.
    pub item_type: ItemType,
    /// Opaque content bytes.
    pub content: Vec<u8>,
}

impl DeliveredItem {
    /// Fixed per-item overhead: from_id[16] + item_id[4] + item_type[1] + len[4].
    pub const OVERHEAD: usize = ClientId::SIZE + 4 + 1 + LEN_SIZE;

    /// Encoded size of an item carrying `content_len` bytes.
    pub fn encoded_len_for(content_len: usize) -> usize {
        Self::OVERHEAD + content_len
    }
}

/// `MessagesResponse`: count[4] + items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagesResponse {
    /// Items in FIFO order.
    pub items: Vec<DeliveredItem>,
}

impl MessagesResponse {
    /// Size of the count prefix.
    pub const HEADER_SIZE: usize = LEN_SIZE;

    /// Encode to a response payload.
    pub fn encode(&self) -> Vec<u8> {
        let len = Self::HEADER_SIZE
            + self
                .items
                .iter()
                .map(|i| DeliveredItem::encoded_len_for(i.content.len()))
                .sum::<usize>();
        let mut w = FieldWriter::with_capacity(len);
        w.put_u32(self.items.len() as u32);
        for item in &self.items {
            w.put_client_id(&item.from)
                .put_u32(item.item_id)
                .put_u8(item.item_type.as_u8())
                .put_len_prefixed(&item.content);
        }
        w.into_bytes()
    }

    /// Decode from a response payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = FieldReader::with_prefix(payload, Self::HEADER_SIZE)?;
        let count = r.read_u32("count")? as usize;
        let mut items = Vec::with_capacity(count.min(r.remaining() / DeliveredItem::OVERHEAD));
        for _ in 0..count {
            let from = r.read_client_id("from_id")?;
            let item_id = r.read_u32("item_id")?;
            let item_type = ItemType::try_from(r.read_u8("item_type")?)?;
            let content = r.read_len_prefixed("content")?.to_vec();
            items.push(DeliveredItem {
                from,
                item_id,
                item_type,
                content,
            });
        }
        Ok(Self { items })
    }
}

/// One entry of a `UsersResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    /// Client id.
    pub client_id: ClientId,
    /// Display name.
    pub name: String,
}

impl UserEntry {
    /// Encoded width: client_id[16] + name[255].
    pub const SIZE: usize = ClientId::SIZE + NAME_SIZE;
}

/// `UsersResponse`: count[4] + entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsersResponse {
    /// Entries, ordered by name.
    pub users: Vec<UserEntry>,
}

impl UsersResponse {
    /// Size of the count prefix.
    pub const HEADER_SIZE: usize = LEN_SIZE;

    /// Encode to a response payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut w =
            FieldWriter::with_capacity(Self::HEADER_SIZE + self.users.len() * UserEntry::SIZE);
        w.put_u32(self.users.len() as u32);
        for user in &self.users {
            w.put_client_id(&user.client_id).put_text(&user.name, NAME_SIZE);
        }
        w.into_bytes()
    }

    /// Decode from a response payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = FieldReader::with_prefix(payload, Self::HEADER_SIZE)?;
        let count = r.read_u32("count")? as usize;
        let mut users = Vec::with_capacity(count.min(r.remaining() / UserEntry::SIZE));
        for _ in 0..count {
            users.push(UserEntry {
                client_id: r.read_client_id("client_id")?,
                name: r.read_text("name", NAME_SIZE)?,
            });
        }
        Ok(Self { users })
    }
}

/// `PublicKeyResponse`: client_id[16] + public_key[1024] + text[255].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyResponse {
    /// Id of the identity found.
    pub client_id: ClientId,
    /// Its public key.
    pub public_key: String,
    /// Confirmation text.
    pub text: String,
}

impl PublicKeyResponse {
    /// Fixed payload width.
    pub const SIZE: usize = ClientId::SIZE + PUBLIC_KEY_SIZE + TEXT_SIZE;

    /// Encode to a response payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FieldWriter::with_capacity(Self::SIZE);
        w.put_client_id(&self.client_id)
            .put_text(&self.public_key, PUBLIC_KEY_SIZE)
            .put_text(&self.text, TEXT_SIZE);
        w.into_bytes()
    }

    /// Decode from a response payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = FieldReader::with_prefix(payload, Self::SIZE)?;
        Ok(Self {
            client_id: r.read_client_id("client_id")?,
            public_key: r.read_text("public_key", PUBLIC_KEY_SIZE)?,
            text: r.read_text("text", TEXT_SIZE)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ClientId {
        ClientId::derive("alice", "PK_A")
    }

    #[test]
    fn register_request_layout() {
        let req = RegisterRequest {
            name: "alice".into(),
            public_key: "PK_A".into(),
        };
        let bytes = req.encode().unwrap();
        assert_eq!(bytes.len(), 255 + 1024);
        assert_eq!(&bytes[..5], b"alice");
        assert_eq!(&bytes[255..259], b"PK_A");
        assert_eq!(RegisterRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn register_request_rejects_short_and_empty() {
        assert!(matches!(
            RegisterRequest::decode(&[0u8; 300]),
            Err(PayloadError::TooShort {
                expected: 1279,
                actual: 300
            })
        ));
        assert_eq!(
            RegisterRequest::decode(&[0u8; RegisterRequest::SIZE]),
            Err(PayloadError::EmptyField { field: "name" })
        );
    }

    #[test]
    fn register_request_rejects_oversized_key() {
        let req = RegisterRequest {
            name: "alice".into(),
            public_key: "k".repeat(1025),
        };
        assert!(matches!(
            req.encode(),
            Err(PayloadError::FieldTooLong {
                field: "public_key",
                ..
            })
        ));
    }

    #[test]
    fn send_request_layout() {
        let req = SendRequest {
            sender: alice(),
            recipient: "bob".into(),
            content: b"hi".to_vec(),
        };
        let bytes = req.encode().unwrap();
        assert_eq!(bytes.len(), 16 + 255 + 4 + 2);
        assert_eq!(&bytes[271..275], &2u32.to_le_bytes());
        assert_eq!(SendRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn send_request_length_overrun() {
        let mut bytes = SendRequest {
            sender: alice(),
            recipient: "bob".into(),
            content: b"hi".to_vec(),
        }
        .encode()
        .unwrap();
        bytes[271..275].copy_from_slice(&50u32.to_le_bytes());

        assert_eq!(
            SendRequest::decode(&bytes),
            Err(PayloadError::FieldOverrun {
                field: "content",
                declared: 50,
                remaining: 2
            })
        );
    }

    #[test]
    fn send_request_short_prefix_checked_first() {
        // Prefix too short even though a huge length would also overrun.
        let bytes = vec![0xFFu8; 40];
        assert!(matches!(
            SendRequest::decode(&bytes),
            Err(PayloadError::TooShort { expected: 275, .. })
        ));
    }

    #[test]
    fn send_request_rejects_empty_content() {
        let mut w = FieldWriter::new();
        w.put_client_id(&alice())
            .put_text("bob", NAME_SIZE)
            .put_u32(0);
        assert_eq!(
            SendRequest::decode(&w.into_bytes()),
            Err(PayloadError::EmptyField { field: "content" })
        );
    }

    #[test]
    fn messages_response_roundtrip() {
        let resp = MessagesResponse {
            items: vec![
                DeliveredItem {
                    from: alice(),
                    item_id: 1,
                    item_type: ItemType::Message,
                    content: b"hi".to_vec(),
                },
                DeliveredItem {
                    from: alice(),
                    item_id: 2,
                    item_type: ItemType::SymmetricKey,
                    content: vec![9; 32],
                },
            ],
        };
        let bytes = resp.encode();
        assert_eq!(bytes.len(), 4 + (25 + 2) + (25 + 32));
        assert_eq!(MessagesResponse::decode(&bytes).unwrap(), resp);
    }

    #[test]
    fn empty_messages_response_is_count_only() {
        let bytes = MessagesResponse::default().encode();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
    }

    #[test]
    fn users_response_layout() {
        let resp = UsersResponse {
            users: vec![UserEntry {
                client_id: alice(),
                name: "alice".into(),
            }],
        };
        let bytes = resp.encode();
        assert_eq!(bytes.len(), 4 + 271);
        assert_eq!(UsersResponse::decode(&bytes).unwrap(), resp);
    }

    #[test]
    fn public_key_response_layout() {
        let resp = PublicKeyResponse {
            client_id: alice(),
            public_key: "PK_A".into(),
            text: "public key for alice".into(),
        };
        let bytes = resp.encode();
        assert_eq!(bytes.len(), 16 + 1024 + 255);
        assert_eq!(PublicKeyResponse::decode(&bytes).unwrap(), resp);
    }

    #[test]
    fn text_response_truncates() {
        let long = "e".repeat(400);
        let bytes = TextResponse::new(long).encode();
        assert_eq!(bytes.len(), TEXT_SIZE);
        assert_eq!(TextResponse::decode(&bytes).unwrap().text.len(), TEXT_SIZE);
    }
}
