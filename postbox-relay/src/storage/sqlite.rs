//! SQLite storage backend for postbox-relay.

use super::{Identity, IdentityRegistry, MailboxStore, QueuedItem};
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use postbox_types::fields::{NAME_SIZE, PUBLIC_KEY_SIZE};
use postbox_types::payloads::DeliveredItem;
use postbox_types::{ClientId, ItemType};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-backed identity registry and mailbox store.
///
/// Uses WAL mode for concurrent reads/writes. Item content is kept
/// base64-encoded in a TEXT column.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    retry: RetryPolicy,
    #[cfg(test)]
    faults: std::sync::Arc<DrainFaults>,
}

/// Test hooks for the drain path.
#[cfg(test)]
#[derive(Debug, Default)]
struct DrainFaults {
    /// Delete attempts still to fail as busy.
    busy_deletes: std::sync::atomic::AtomicU32,
    /// Mailbox selects run so far.
    selects: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl DrainFaults {
    fn take_busy_delete(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.busy_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Upper bound on how many items can fit in `budget` bytes.
fn max_items_within(budget: usize) -> i64 {
    i64::try_from(budget / DeliveredItem::encoded_len_for(0)).unwrap_or(i64::MAX)
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path, config: &StorageConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self {
            pool,
            retry: RetryPolicy::from_config(config),
            #[cfg(test)]
            faults: Default::default(),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection: every pooled connection would otherwise
        // open its own empty in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self {
            pool,
            retry: RetryPolicy::default(),
            #[cfg(test)]
            faults: Default::default(),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                public_key TEXT NOT NULL,
                last_seen INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_client_id TEXT NOT NULL,
                to_client_id TEXT NOT NULL,
                message_type INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_clients_name ON clients(name)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_to ON messages(to_client_id, id)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn current_timestamp_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Delete `to`'s items up to and including `last_id`, returning the ids
    /// actually removed.
    ///
    /// Callers select a FIFO prefix ending at `last_id`. Ids are never
    /// reused, so the range holds no rows outside that prefix. Ids missing
    /// from the result were claimed by a concurrent drain.
    async fn delete_through(
        &self,
        to: &ClientId,
        last_id: i64,
    ) -> Result<HashSet<i64>, StorageError> {
        let pool = &self.pool;
        #[cfg(test)]
        let faults = &self.faults;
        let deleted = self
            .retry
            .run("mailbox delete", move || async move {
                #[cfg(test)]
                if faults.take_busy_delete() {
                    return Err(StorageError::Database(sqlx::Error::PoolTimedOut));
                }

                sqlx::query_scalar::<_, i64>(
                    "DELETE FROM messages WHERE to_client_id = ?1 AND id <= ?2 RETURNING id",
                )
                .bind(to.as_str())
                .bind(last_id)
                .fetch_all(pool)
                .await
                .map_err(StorageError::Database)
            })
            .await?;

        Ok(deleted.into_iter().collect())
    }
}

fn validate_field(field: &'static str, value: &str, limit: usize) -> Result<(), StorageError> {
    if value.is_empty() {
        return Err(StorageError::Invalid {
            field,
            reason: "must not be empty".into(),
        });
    }
    if value.len() > limit {
        return Err(StorageError::Invalid {
            field,
            reason: format!("{} bytes exceeds limit of {}", value.len(), limit),
        });
    }
    if value.contains('\0') {
        return Err(StorageError::Invalid {
            field,
            reason: "must not contain NUL bytes".into(),
        });
    }
    Ok(())
}

#[async_trait]
impl IdentityRegistry for SqliteStorage {
    async fn register(&self, name: &str, public_key: &str) -> Result<ClientId, StorageError> {
        validate_field("name", name, NAME_SIZE)?;
        validate_field("public key", public_key, PUBLIC_KEY_SIZE)?;

        let client_id = ClientId::derive(name, public_key);

        let result = sqlx::query(
            r#"
            INSERT INTO clients (client_id, name, public_key, last_seen)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(client_id.as_str())
        .bind(name)
        .bind(public_key)
        .bind(Self::current_timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(client_id),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::AlreadyExists {
                    client_id: client_id.to_string(),
                })
            }
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    async fn lookup_by_id(&self, id: &ClientId) -> Result<Option<Identity>, StorageError> {
        let row = sqlx::query_as::<_, ClientRow>(
            r#"
            SELECT client_id, name, public_key, last_seen
            FROM clients
            WHERE client_id = ?1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    async fn lookup_by_name_or_id(
        &self,
        identifier: &str,
    ) -> Result<Option<Identity>, StorageError> {
        if let Some(id) = ClientId::parse(identifier) {
            if let Some(identity) = self.lookup_by_id(&id).await? {
                return Ok(Some(identity));
            }
        }

        let row = sqlx::query_as::<_, ClientRow>(
            r#"
            SELECT client_id, name, public_key, last_seen
            FROM clients
            WHERE name = ?1
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    async fn list_all(&self) -> Result<Vec<Identity>, StorageError> {
        let rows = sqlx::query_as::<_, ClientRow>(
            r#"
            SELECT client_id, name, public_key, last_seen
            FROM clients
            ORDER BY name ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn touch_last_seen(&self, id: &ClientId) -> Result<(), StorageError> {
        sqlx::query("UPDATE clients SET last_seen = ?1 WHERE client_id = ?2")
            .bind(Self::current_timestamp())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clients")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }
}

#[async_trait]
impl MailboxStore for SqliteStorage {
    async fn enqueue(
        &self,
        from: &ClientId,
        to: &ClientId,
        item_type: ItemType,
        content: &[u8],
    ) -> Result<u64, StorageError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (from_client_id, to_client_id, message_type, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id
            "#,
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(item_type.as_u8() as i64)
        .bind(BASE64.encode(content))
        .bind(Self::current_timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(id as u64)
    }

    async fn drain_within(
        &self,
        to: &ClientId,
        budget: usize,
    ) -> Result<Vec<QueuedItem>, StorageError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, from_client_id, to_client_id, message_type, content, created_at
            FROM messages
            WHERE to_client_id = ?1
            ORDER BY id ASC
            LIMIT ?2
            "#,
        )
        .bind(to.as_str())
        .bind(max_items_within(budget))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        #[cfg(test)]
        self.faults
            .selects
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let mut selected = Vec::new();
        let mut used = 0usize;
        for row in rows {
            let item = QueuedItem::try_from(row)?;
            let next = used.saturating_add(item.wire_len());
            if next > budget {
                break;
            }
            used = next;
            selected.push(item);
        }

        let Some(last_id) = selected.last().map(|item| item.id as i64) else {
            return Ok(selected);
        };
        let deleted = self.delete_through(to, last_id).await?;

        if deleted.len() != selected.len() {
            tracing::debug!(
                "Drain for {} claimed {} of {} selected items",
                to,
                deleted.len(),
                selected.len()
            );
        }

        selected.retain(|item| deleted.contains(&(item.id as i64)));
        Ok(selected)
    }

    async fn pending_total(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Internal row type for the clients table.
#[derive(sqlx::FromRow)]
struct ClientRow {
    client_id: String,
    name: String,
    public_key: String,
    last_seen: i64,
}

impl TryFrom<ClientRow> for Identity {
    type Error = StorageError;

    fn try_from(row: ClientRow) -> Result<Self, Self::Error> {
        Ok(Identity {
            client_id: ClientId::parse(&row.client_id)
                .ok_or_else(|| StorageError::Corrupt(format!("client_id {:?}", row.client_id)))?,
            name: row.name,
            public_key: row.public_key,
            last_seen: row.last_seen,
        })
    }
}

/// Internal row type for the messages table.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    from_client_id: String,
    to_client_id: String,
    message_type: i64,
    content: String,
    created_at: i64,
}

impl TryFrom<MessageRow> for QueuedItem {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let item_type = u8::try_from(row.message_type)
            .ok()
            .and_then(|t| ItemType::try_from(t).ok())
            .ok_or_else(|| {
                StorageError::Corrupt(format!(
                    "message {} has type {}",
                    row.id, row.message_type
                ))
            })?;

        Ok(QueuedItem {
            id: row.id as u64,
            from_client_id: ClientId::parse(&row.from_client_id).ok_or_else(|| {
                StorageError::Corrupt(format!("message {} sender", row.id))
            })?,
            to_client_id: ClientId::parse(&row.to_client_id).ok_or_else(|| {
                StorageError::Corrupt(format!("message {} recipient", row.id))
            })?,
            item_type,
            content: BASE64
                .decode(row.content.as_bytes())
                .map_err(|e| StorageError::Corrupt(format!("message {} content: {}", row.id, e)))?,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn registered(storage: &SqliteStorage, name: &str) -> ClientId {
        storage
            .register(name, &format!("{name}-public-key"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_derives_stable_id() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        let id = storage.register("alice", "key-a").await.unwrap();
        assert_eq!(id, ClientId::derive("alice", "key-a"));
        assert_eq!(id.as_str().len(), 16);

        let identity = storage.lookup_by_id(&id).await.unwrap().unwrap();
        assert_eq!(identity.name, "alice");
        assert_eq!(identity.public_key, "key-a");
        assert!(identity.last_seen > 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        storage.register("alice", "key-a").await.unwrap();
        let err = storage.register("alice", "key-a").await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(storage.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_name_with_different_keys_registers_twice() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        let first = storage.register("alice", "key-1").await.unwrap();
        let second = storage.register("alice", "key-2").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(storage.count().await.unwrap(), 2);

        // Earliest registration wins name lookups.
        let found = storage.lookup_by_name_or_id("alice").await.unwrap().unwrap();
        assert_eq!(found.client_id, first);

        // Exact id still reaches the later one.
        let found = storage
            .lookup_by_name_or_id(second.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.public_key, "key-2");
    }

    #[tokio::test]
    async fn register_rejects_invalid_fields() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        for (name, key) in [
            ("", "key"),
            ("alice", ""),
            ("al\0ice", "key"),
        ] {
            let err = storage.register(name, key).await.unwrap_err();
            assert!(matches!(err, StorageError::Invalid { .. }), "{name:?}/{key:?}");
        }

        let long_name = "n".repeat(NAME_SIZE + 1);
        assert!(matches!(
            storage.register(&long_name, "key").await,
            Err(StorageError::Invalid { field: "name", .. })
        ));

        let long_key = "k".repeat(PUBLIC_KEY_SIZE + 1);
        assert!(matches!(
            storage.register("alice", &long_key).await,
            Err(StorageError::Invalid {
                field: "public key",
                ..
            })
        ));

        assert_eq!(storage.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lookup_unknown_returns_none() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        registered(&storage, "alice").await;

        assert!(storage.lookup_by_name_or_id("bob").await.unwrap().is_none());
        let stranger = ClientId::derive("carol", "k");
        assert!(storage.lookup_by_id(&stranger).await.unwrap().is_none());
        assert!(storage
            .lookup_by_name_or_id(stranger.as_str())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn list_all_is_sorted_by_name() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        registered(&storage, "carol").await;
        registered(&storage, "alice").await;
        registered(&storage, "bob").await;

        let names: Vec<String> = storage
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn touch_last_seen_updates_timestamp() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let id = registered(&storage, "alice").await;

        sqlx::query("UPDATE clients SET last_seen = 0")
            .execute(&storage.pool)
            .await
            .unwrap();
        storage.touch_last_seen(&id).await.unwrap();

        let identity = storage.lookup_by_id(&id).await.unwrap().unwrap();
        assert!(identity.last_seen > 0);

        // Unknown ids are a no-op.
        storage
            .touch_last_seen(&ClientId::derive("nobody", "k"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn drain_is_fifo_and_destructive() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = registered(&storage, "alice").await;
        let bob = registered(&storage, "bob").await;

        let first = storage
            .enqueue(&alice, &bob, ItemType::SymmetricKey, b"key")
            .await
            .unwrap();
        let second = storage
            .enqueue(&alice, &bob, ItemType::Message, b"hi bob")
            .await
            .unwrap();
        assert!(second > first);

        let items = storage.drain(&bob).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, first);
        assert_eq!(items[0].item_type, ItemType::SymmetricKey);
        assert_eq!(items[0].content, b"key");
        assert_eq!(items[1].item_type, ItemType::Message);
        assert_eq!(items[1].content, b"hi bob");
        assert_eq!(items[1].from_client_id, alice);
        assert_eq!(items[1].to_client_id, bob);

        assert!(storage.drain(&bob).await.unwrap().is_empty());
        assert_eq!(storage.pending_total().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drain_only_touches_own_mailbox() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = registered(&storage, "alice").await;
        let bob = registered(&storage, "bob").await;

        storage
            .enqueue(&alice, &bob, ItemType::Message, b"for bob")
            .await
            .unwrap();
        storage
            .enqueue(&bob, &alice, ItemType::Message, b"for alice")
            .await
            .unwrap();

        let items = storage.drain(&alice).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, b"for alice");
        assert_eq!(storage.pending_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn binary_content_survives_storage() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = registered(&storage, "alice").await;
        let bob = registered(&storage, "bob").await;

        let content: Vec<u8> = (0..=255u8).collect();
        storage
            .enqueue(&alice, &bob, ItemType::Message, &content)
            .await
            .unwrap();

        let items = storage.drain(&bob).await.unwrap();
        assert_eq!(items[0].content, content);
    }

    #[tokio::test]
    async fn drain_within_leaves_remainder_queued() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = registered(&storage, "alice").await;
        let bob = registered(&storage, "bob").await;

        for body in [&b"aaaa"[..], b"bbbb", b"cccc"] {
            storage
                .enqueue(&alice, &bob, ItemType::Message, body)
                .await
                .unwrap();
        }

        // Room for exactly two items.
        let per_item = postbox_types::payloads::DeliveredItem::encoded_len_for(4);
        let items = storage.drain_within(&bob, per_item * 2 + 1).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, b"aaaa");
        assert_eq!(items[1].content, b"bbbb");
        assert_eq!(storage.pending_total().await.unwrap(), 1);

        let rest = storage.drain(&bob).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, b"cccc");
    }

    #[tokio::test]
    async fn drain_within_does_not_skip_ahead() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = registered(&storage, "alice").await;
        let bob = registered(&storage, "bob").await;

        storage
            .enqueue(&alice, &bob, ItemType::Message, &[1u8; 100])
            .await
            .unwrap();
        storage
            .enqueue(&alice, &bob, ItemType::Message, b"x")
            .await
            .unwrap();

        // The small second item would fit, but FIFO forbids overtaking.
        let budget = postbox_types::payloads::DeliveredItem::encoded_len_for(50);
        assert!(storage.drain_within(&bob, budget).await.unwrap().is_empty());
        assert_eq!(storage.pending_total().await.unwrap(), 2);
    }

    /// Queue `count` one-byte items for `to` in a single statement.
    async fn bulk_enqueue(storage: &SqliteStorage, from: &ClientId, to: &ClientId, count: i64) {
        sqlx::query(
            r#"
            WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < ?3)
            INSERT INTO messages (from_client_id, to_client_id, message_type, content, created_at)
            SELECT ?1, ?2, 1, ?4, 0 FROM seq
            "#,
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(count)
        .bind(BASE64.encode(b"x"))
        .execute(&storage.pool)
        .await
        .unwrap();
    }

    #[test]
    fn item_limit_follows_budget() {
        let min = DeliveredItem::encoded_len_for(0);
        assert_eq!(max_items_within(0), 0);
        assert_eq!(max_items_within(min * 3 + min - 1), 3);
        assert!(max_items_within(usize::MAX) > 0);
    }

    #[tokio::test]
    async fn drains_mailbox_larger_than_sqlite_variable_limit() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = registered(&storage, "alice").await;
        let bob = registered(&storage, "bob").await;
        bulk_enqueue(&storage, &alice, &bob, 33_000).await;

        let items = storage.drain(&bob).await.unwrap();
        assert_eq!(items.len(), 33_000);
        assert!(items.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(storage.pending_total().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn frame_sized_drains_empty_a_large_mailbox_in_order() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = registered(&storage, "alice").await;
        let bob = registered(&storage, "bob").await;
        bulk_enqueue(&storage, &alice, &bob, 6_000).await;

        let budget = postbox_types::MAX_PAYLOAD_SIZE - 4;
        let per_frame = budget / DeliveredItem::encoded_len_for(1);

        let mut last_id = 0;
        let mut total = 0;
        loop {
            let items = storage.drain_within(&bob, budget).await.unwrap();
            if items.is_empty() {
                break;
            }
            assert!(items.len() <= per_frame);
            assert!(items[0].id > last_id);
            last_id = items[items.len() - 1].id;
            total += items.len();
        }
        assert_eq!(total, 6_000);
        assert_eq!(storage.pending_total().await.unwrap(), 0);
    }

    async fn storage_with_three_items() -> (SqliteStorage, ClientId) {
        let mut storage = SqliteStorage::in_memory().await.unwrap();
        storage.retry = RetryPolicy {
            max_attempts: 3,
            delay: std::time::Duration::from_millis(1),
        };
        let alice = registered(&storage, "alice").await;
        let bob = registered(&storage, "bob").await;
        for body in [&b"one"[..], b"two", b"three"] {
            storage
                .enqueue(&alice, &bob, ItemType::Message, body)
                .await
                .unwrap();
        }
        (storage, bob)
    }

    #[tokio::test]
    async fn busy_delete_is_retried_without_reselecting() {
        use std::sync::atomic::Ordering;
        let (storage, bob) = storage_with_three_items().await;
        storage.faults.busy_deletes.store(2, Ordering::SeqCst);

        let items = storage.drain(&bob).await.unwrap();
        let bodies: Vec<&[u8]> = items.iter().map(|i| i.content.as_slice()).collect();
        assert_eq!(bodies, vec![&b"one"[..], b"two", b"three"]);
        assert_eq!(storage.faults.selects.load(Ordering::SeqCst), 1);
        assert_eq!(storage.faults.busy_deletes.load(Ordering::SeqCst), 0);
        assert_eq!(storage.pending_total().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn exhausted_delete_retries_leave_items_queued() {
        use std::sync::atomic::Ordering;
        let (storage, bob) = storage_with_three_items().await;
        storage.faults.busy_deletes.store(u32::MAX, Ordering::SeqCst);

        let err = storage.drain(&bob).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(storage.faults.selects.load(Ordering::SeqCst), 1);
        assert_eq!(storage.pending_total().await.unwrap(), 3);

        storage.faults.busy_deletes.store(0, Ordering::SeqCst);
        let items = storage.drain(&bob).await.unwrap();
        let bodies: Vec<&[u8]> = items.iter().map(|i| i.content.as_slice()).collect();
        assert_eq!(bodies, vec![&b"one"[..], b"two", b"three"]);
    }

    #[tokio::test]
    async fn uppercase_id_does_not_match_and_falls_back_to_name() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = registered(&storage, "alice").await;
        let upper = alice.as_str().to_ascii_uppercase();

        if upper != alice.as_str() {
            assert!(storage.lookup_by_name_or_id(&upper).await.unwrap().is_none());
        }

        let named = storage.register("ABCDEF0123456789", "key-u").await.unwrap();
        let found = storage
            .lookup_by_name_or_id("ABCDEF0123456789")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.client_id, named);
    }

    #[tokio::test]
    async fn concurrent_enqueues_are_all_kept() {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let alice = registered(&storage, "alice").await;
        let bob = registered(&storage, "bob").await;

        let mut handles = Vec::new();
        for i in 0..20u8 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage
                    .enqueue(&alice, &bob, ItemType::Message, &[i])
                    .await
                    .unwrap()
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 20);

        let items = storage.drain(&bob).await.unwrap();
        assert_eq!(items.len(), 20);
        assert!(items.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn concurrent_drains_deliver_each_item_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::default();
        let storage = Arc::new(
            SqliteStorage::new(&dir.path().join("relay.db"), &config)
                .await
                .unwrap(),
        );
        let alice = registered(&storage, "alice").await;
        let bob = registered(&storage, "bob").await;

        for i in 0..50u8 {
            storage
                .enqueue(&alice, &bob, ItemType::Message, &[i])
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move { storage.drain(&bob).await.unwrap() }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.extend(handle.await.unwrap().into_iter().map(|item| item.id));
        }
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(seen.len(), 50);
        assert_eq!(unique.len(), 50);
        assert_eq!(storage.pending_total().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn file_storage_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        let config = StorageConfig::default();

        let alice;
        {
            let storage = SqliteStorage::new(&path, &config).await.unwrap();
            alice = registered(&storage, "alice").await;
            storage
                .enqueue(&alice, &alice, ItemType::Message, b"note to self")
                .await
                .unwrap();
            storage.close().await;
            storage.close().await;
        }

        let storage = SqliteStorage::new(&path, &config).await.unwrap();
        assert!(storage.lookup_by_id(&alice).await.unwrap().is_some());
        let items = storage.drain(&alice).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, b"note to self");
    }
}
