//! Storage layer for postbox-relay.
//!
//! Two stores share one backend: the identity registry (who is registered,
//! with which public key) and the mailbox store (opaque items waiting for
//! pickup, deleted on retrieval).

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use postbox_types::{ClientId, ItemType};

/// A registered participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Unique id derived from name and key.
    pub client_id: ClientId,
    /// Display name (not unique).
    pub name: String,
    /// Public key text, opaque to the relay.
    pub public_key: String,
    /// Unix timestamp (seconds) of the last request naming this client.
    pub last_seen: i64,
}

/// An item waiting in a recipient's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    /// Store-assigned, monotonically increasing id.
    pub id: u64,
    /// Sender.
    pub from_client_id: ClientId,
    /// Recipient (mailbox owner).
    pub to_client_id: ClientId,
    /// Message or symmetric key.
    pub item_type: ItemType,
    /// Opaque content bytes.
    pub content: Vec<u8>,
    /// Unix timestamp (milliseconds) when queued.
    pub created_at: i64,
}

impl QueuedItem {
    /// Encoded size of this item in a messages response.
    pub fn wire_len(&self) -> usize {
        postbox_types::payloads::DeliveredItem::encoded_len_for(self.content.len())
    }
}

/// Registry of identities, keyed by unique client id.
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// Register a (name, public key) pair.
    ///
    /// Returns the derived id. Fails with [`StorageError::AlreadyExists`] if
    /// that id is taken and [`StorageError::Invalid`] if either field is
    /// empty, too long or contains NUL bytes.
    async fn register(&self, name: &str, public_key: &str) -> Result<ClientId, StorageError>;

    /// Look up an identity by exact id.
    async fn lookup_by_id(&self, id: &ClientId) -> Result<Option<Identity>, StorageError>;

    /// Look up by exact id, then by exact name.
    ///
    /// When several identities share a name, the earliest registered wins.
    async fn lookup_by_name_or_id(&self, identifier: &str)
        -> Result<Option<Identity>, StorageError>;

    /// All identities ordered by name ascending (registration order on ties).
    async fn list_all(&self) -> Result<Vec<Identity>, StorageError>;

    /// Refresh `last_seen`. Callers treat failure as non-fatal.
    async fn touch_last_seen(&self, id: &ClientId) -> Result<(), StorageError>;

    /// Number of registered identities.
    async fn count(&self) -> Result<u64, StorageError>;
}

/// Per-recipient FIFO queues with destructive reads.
#[async_trait]
pub trait MailboxStore: Send + Sync {
    /// Append an item to `to`'s mailbox. Returns the assigned item id.
    async fn enqueue(
        &self,
        from: &ClientId,
        to: &ClientId,
        item_type: ItemType,
        content: &[u8],
    ) -> Result<u64, StorageError>;

    /// Remove and return every item queued for `to`, oldest first.
    async fn drain(&self, to: &ClientId) -> Result<Vec<QueuedItem>, StorageError> {
        self.drain_within(to, usize::MAX).await
    }

    /// Remove and return the oldest items for `to` whose combined
    /// [`QueuedItem::wire_len`] fits in `budget` bytes.
    ///
    /// The first item is always taken when it fits on its own. Items not
    /// taken stay queued in order. Every returned item has been deleted;
    /// on error nothing may be treated as delivered.
    async fn drain_within(
        &self,
        to: &ClientId,
        budget: usize,
    ) -> Result<Vec<QueuedItem>, StorageError>;

    /// Total items waiting across all mailboxes.
    async fn pending_total(&self) -> Result<u64, StorageError>;

    /// Release storage resources. Idempotent.
    async fn close(&self);
}
