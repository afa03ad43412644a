//! Error types for postbox-relay.

use postbox_types::PayloadError;

/// Main error type for relay startup and shutdown.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An identity with this id is already registered.
    #[error("client already registered: {client_id}")]
    AlreadyExists {
        /// The derived client id.
        client_id: String,
    },

    /// Input rejected before reaching the database.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A busy/locked operation kept failing.
    #[error("storage busy after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The last busy error.
        last: Box<StorageError>,
    },

    /// A stored row could not be converted back into a record.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

impl StorageError {
    /// Whether this is a transient SQLITE_BUSY / SQLITE_LOCKED condition.
    pub fn is_busy(&self) -> bool {
        match self {
            StorageError::Database(sqlx::Error::Database(db)) => {
                let code = db.code();
                // Extended codes keep the primary code in the low byte.
                let primary = code
                    .as_deref()
                    .and_then(|c| c.parse::<u32>().ok())
                    .map(|c| c & 0xFF);
                matches!(primary, Some(5) | Some(6))
                    || db.message().contains("database is locked")
            }
            StorageError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

/// Why a request handler refused a request.
///
/// Everything except [`HandlerError::Internal`] is answered with the
/// handler's own failure code and a descriptive text.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Payload failed length or format checks.
    #[error("invalid request: {0}")]
    Validation(#[from] PayloadError),

    /// Claimed sender id is not registered.
    #[error("unknown sender: {0}")]
    UnknownSender(String),

    /// No identity matches the recipient name or id.
    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    /// Registration for an id that already exists.
    #[error("client already registered: {0}")]
    AlreadyRegistered(String),

    /// Registration input rejected by the registry.
    #[error("invalid registration: {0}")]
    InvalidIdentity(String),

    /// Operation the relay does not implement.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// Storage failure; never described on the wire.
    #[error("internal error: {0}")]
    Internal(#[source] StorageError),
}

impl From<StorageError> for HandlerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AlreadyExists { client_id } => HandlerError::AlreadyRegistered(client_id),
            StorageError::Invalid { field, reason } => {
                HandlerError::InvalidIdentity(format!("{field}: {reason}"))
            }
            other => HandlerError::Internal(other),
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for request handlers.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;
