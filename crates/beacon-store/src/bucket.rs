//! Named key/value buckets persisted in a single redb file.
//!
//! Each bucket is one redb table named `kv_<bucket>` with string keys and
//! string values. The default bucket always exists and cannot be deleted.

use crate::error::{Result, StoreError};
use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableTable, TableDefinition, TableError,
    TableHandle, WriteTransaction,
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Bucket used when a key names none.
pub const DEFAULT_BUCKET: &str = "store";

const TABLE_PREFIX: &str = "kv_";

pub(crate) type Bucket = ReadOnlyTable<&'static str, &'static str>;

pub(crate) fn table_name(bucket: &str) -> String {
    format!("{TABLE_PREFIX}{bucket}")
}

pub(crate) fn table_def(table: &str) -> TableDefinition<'_, &'static str, &'static str> {
    TableDefinition::new(table)
}

/// Check a bucket or collection name.
///
/// # Errors
///
/// Returns [`StoreError::InvalidName`] for empty names and names with
/// control characters.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_control) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Open a bucket inside a read transaction.
pub(crate) fn open_bucket(txn: &ReadTransaction, bucket: &str) -> Result<Bucket> {
    let table = table_name(bucket);
    match txn.open_table(table_def(&table)) {
        Ok(t) => Ok(t),
        Err(TableError::TableDoesNotExist(_)) => Err(StoreError::BucketNotFound(bucket.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Whether a bucket exists, as seen by a write transaction.
pub(crate) fn bucket_exists(txn: &WriteTransaction, bucket: &str) -> Result<bool> {
    let table = table_name(bucket);
    Ok(txn.list_tables()?.any(|t| t.name() == table))
}

/// Persistent bucket store.
pub struct BucketStore {
    db: Database,
}

impl BucketStore {
    /// Open or create the store file and ensure the default bucket exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)?;
        let store = Self { db };
        store.create_bucket(DEFAULT_BUCKET)?;
        info!(path = %path.display(), "Bucket store opened");
        Ok(store)
    }

    /// Run `f` in a write transaction and commit it if `f` succeeds.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&WriteTransaction) -> Result<R>) -> Result<R> {
        let txn = self.db.begin_write()?;
        let out = f(&txn)?;
        txn.commit()?;
        Ok(out)
    }

    /// Run `f` in a read transaction.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&ReadTransaction) -> Result<R>) -> Result<R> {
        let txn = self.db.begin_read()?;
        f(&txn)
    }

    /// Create a bucket. Creating an existing bucket is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names or storage failures.
    pub fn create_bucket(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let table = table_name(name);
        self.write(|txn| {
            txn.open_table(table_def(&table))?;
            Ok(())
        })?;
        debug!(bucket = %name, "Bucket created");
        Ok(())
    }

    /// Delete a bucket and everything in it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProtectedBucket`] for the default bucket and
    /// [`StoreError::BucketNotFound`] if the bucket does not exist.
    pub fn delete_bucket(&self, name: &str) -> Result<()> {
        if name == DEFAULT_BUCKET {
            return Err(StoreError::ProtectedBucket(name.to_string()));
        }
        let table = table_name(name);
        self.write(|txn| {
            if txn.delete_table(table_def(&table))? {
                Ok(())
            } else {
                Err(StoreError::BucketNotFound(name.to_string()))
            }
        })?;
        debug!(bucket = %name, "Bucket deleted");
        Ok(())
    }

    /// Whether a bucket exists.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn has_bucket(&self, name: &str) -> Result<bool> {
        let table = table_name(name);
        self.read(|txn| Ok(txn.list_tables()?.any(|t| t.name() == table)))
    }

    /// Names of all buckets.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub fn buckets(&self) -> Result<Vec<String>> {
        self.read(|txn| {
            Ok(txn
                .list_tables()?
                .filter_map(|t| t.name().strip_prefix(TABLE_PREFIX).map(str::to_string))
                .collect())
        })
    }

    /// Store a value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BucketNotFound`] if the bucket does not exist.
    pub fn put(&self, bucket: &str, key: &str, value: &str) -> Result<()> {
        let table = table_name(bucket);
        self.write(|txn| {
            if !bucket_exists(txn, bucket)? {
                return Err(StoreError::BucketNotFound(bucket.to_string()));
            }
            txn.open_table(table_def(&table))?.insert(key, value)?;
            Ok(())
        })
    }

    /// Fetch a value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BucketNotFound`] or [`StoreError::KeyNotFound`].
    pub fn get(&self, bucket: &str, key: &str) -> Result<String> {
        self.read(|txn| {
            let table = open_bucket(txn, bucket)?;
            let value = table.get(key)?.map(|v| v.value().to_string());
            value.ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
        })
    }

    /// Remove a key. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BucketNotFound`] if the bucket does not exist.
    pub fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let table = table_name(bucket);
        self.write(|txn| {
            if !bucket_exists(txn, bucket)? {
                return Err(StoreError::BucketNotFound(bucket.to_string()));
            }
            txn.open_table(table_def(&table))?.remove(key)?;
            Ok(())
        })
    }

    /// Collect every pair accepted by `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BucketNotFound`] if the bucket does not exist.
    pub fn list<F>(&self, bucket: &str, filter: F) -> Result<BTreeMap<String, String>>
    where
        F: Fn(&str, &str) -> bool,
    {
        self.read(|txn| {
            let table = open_bucket(txn, bucket)?;
            let mut out = BTreeMap::new();
            for item in table.iter()? {
                let (key, value) = item?;
                if filter(key.value(), value.value()) {
                    out.insert(key.value().to_string(), value.value().to_string());
                }
            }
            Ok(out)
        })
    }
}
