//! Store errors.

use thiserror::Error;

/// Errors surfaced by the bucket and document stores.
///
/// Every variant renders into the `error` field of a response frame; none of
/// them is fatal to a session.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The bucket does not exist.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// The key is absent from the bucket.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The default bucket cannot be deleted.
    #[error("can't delete protected bucket: {0}")]
    ProtectedBucket(String),

    /// Bucket and collection names must be non-empty and printable.
    #[error("invalid bucket name: {0:?}")]
    InvalidName(String),

    /// The collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// No document with this id.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The payload is not a JSON object or lacks a required field.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The predicate is not a JSON object.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Underlying persistence failure.
    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    /// Stored data failed to (de)serialize.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

macro_rules! storage_error_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for StoreError {
                fn from(err: $source) -> Self {
                    Self::Storage(err.into())
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::CommitError,
    redb::StorageError,
);

/// Store result type.
pub type Result<T> = std::result::Result<T, StoreError>;
