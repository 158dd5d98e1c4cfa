//! Collection-oriented document store.
//!
//! Each collection is a bucket of JSON documents keyed by a store-assigned
//! id. Index maintenance happens under the same lock that serializes the
//! storage write it describes, so readers never see a document without its
//! index entries or the reverse.

use crate::bucket::{bucket_exists, open_bucket, table_def, table_name, validate_name, BucketStore};
use crate::error::{Result, StoreError};
use crate::index::{IndexManager, IndexState};
use crate::query::{is_operator, matches, Predicate};
use parking_lot::{Mutex, RwLock};
use redb::ReadableTable;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// A stored document.
pub type Document = Map<String, Value>;

/// Reserved field holding the document id.
pub const ID_FIELD: &str = "_id";

/// Reserved field holding the owning collection.
pub const COLLECTION_FIELD: &str = "_collection";

type Indexes = Arc<RwLock<HashMap<String, IndexManager>>>;

/// Parse a document payload.
///
/// # Errors
///
/// Returns [`StoreError::InvalidDocument`] unless the payload is a JSON object.
pub fn parse_document(payload: &str) -> Result<Document> {
    match serde_json::from_str(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::InvalidDocument("expected a JSON object".to_string())),
        Err(e) => Err(StoreError::InvalidDocument(e.to_string())),
    }
}

fn collection_error(err: StoreError) -> StoreError {
    match err {
        StoreError::BucketNotFound(name) => StoreError::CollectionNotFound(name),
        other => other,
    }
}

/// Document store layered on a [`BucketStore`].
pub struct DocumentStore {
    buckets: Arc<BucketStore>,
    indexes: Indexes,
    backfills: Mutex<HashMap<(String, String), JoinHandle<()>>>,
    last_id: AtomicU64,
    next_generation: AtomicU64,
}

impl DocumentStore {
    /// Create a document store over `buckets`.
    #[must_use]
    pub fn new(buckets: Arc<BucketStore>) -> Self {
        Self {
            buckets,
            indexes: Arc::new(RwLock::new(HashMap::new())),
            backfills: Mutex::new(HashMap::new()),
            last_id: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
        }
    }

    /// The underlying bucket store.
    #[must_use]
    pub fn buckets(&self) -> &Arc<BucketStore> {
        &self.buckets
    }

    /// Nanosecond timestamp, bumped past the last id handed out.
    fn next_id(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let mut last = self.last_id.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self.last_id.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate.to_string(),
                Err(actual) => last = actual,
            }
        }
    }

    /// Create a collection. Existing collections are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names or storage failures.
    pub fn create_collection(&self, collection: &str) -> Result<()> {
        self.buckets.create_bucket(collection)
    }

    /// Insert a document, returning its new id.
    ///
    /// The collection is created if needed. Reserved fields in `doc` are
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid collection names or storage failures.
    pub fn insert(&self, collection: &str, mut doc: Document) -> Result<String> {
        validate_name(collection)?;
        let id = self.next_id();
        doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        doc.insert(COLLECTION_FIELD.to_string(), Value::String(collection.to_string()));
        let encoded = serde_json::to_string(&doc)?;

        let mut indexes = self.indexes.write();
        let table = table_name(collection);
        self.buckets.write(|txn| {
            txn.open_table(table_def(&table))?
                .insert(id.as_str(), encoded.as_str())?;
            Ok(())
        })?;
        if let Some(manager) = indexes.get_mut(collection) {
            manager.update(&id, &doc);
        }

        debug!(collection = %collection, id = %id, "Document inserted");
        Ok(id)
    }

    /// Fetch one document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CollectionNotFound`] or
    /// [`StoreError::DocumentNotFound`].
    pub fn find_one(&self, collection: &str, id: &str) -> Result<Document> {
        self.buckets
            .read(|txn| {
                let table = open_bucket(txn, collection)?;
                let raw = table.get(id)?.map(|v| v.value().to_string());
                match raw {
                    Some(raw) => Ok(serde_json::from_str(&raw)?),
                    None => Err(StoreError::DocumentNotFound(id.to_string())),
                }
            })
            .map_err(collection_error)
    }

    /// Every document in storage order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CollectionNotFound`] if the collection does not
    /// exist.
    pub fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        self.scan(collection, |_| true)
    }

    fn scan(&self, collection: &str, keep: impl Fn(&Document) -> bool) -> Result<Vec<Document>> {
        self.buckets
            .read(|txn| {
                let table = open_bucket(txn, collection)?;
                let mut docs = Vec::new();
                for item in table.iter()? {
                    let (_, raw) = item?;
                    let doc: Document = serde_json::from_str(raw.value())?;
                    if keep(&doc) {
                        docs.push(doc);
                    }
                }
                Ok(docs)
            })
            .map_err(collection_error)
    }

    /// Merge `patch` into a stored document. Reserved fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CollectionNotFound`] or
    /// [`StoreError::DocumentNotFound`].
    pub fn update(&self, collection: &str, id: &str, patch: Document) -> Result<()> {
        let mut indexes = self.indexes.write();
        let table = table_name(collection);
        let merged = self.buckets.write(|txn| {
            if !bucket_exists(txn, collection)? {
                return Err(StoreError::CollectionNotFound(collection.to_string()));
            }
            let mut t = txn.open_table(table_def(&table))?;
            let current = t.get(id)?.map(|v| v.value().to_string());
            let Some(current) = current else {
                return Err(StoreError::DocumentNotFound(id.to_string()));
            };

            let mut doc: Document = serde_json::from_str(&current)?;
            for (field, value) in patch {
                if field != ID_FIELD && field != COLLECTION_FIELD {
                    doc.insert(field, value);
                }
            }
            t.insert(id, serde_json::to_string(&doc)?.as_str())?;
            Ok(doc)
        })?;

        if let Some(manager) = indexes.get_mut(collection) {
            manager.update(id, &merged);
        }
        debug!(collection = %collection, id = %id, "Document updated");
        Ok(())
    }

    /// Delete a document and its index entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CollectionNotFound`] or
    /// [`StoreError::DocumentNotFound`].
    pub fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut indexes = self.indexes.write();
        let table = table_name(collection);
        self.buckets.write(|txn| {
            if !bucket_exists(txn, collection)? {
                return Err(StoreError::CollectionNotFound(collection.to_string()));
            }
            let removed = txn.open_table(table_def(&table))?.remove(id)?.is_some();
            if removed {
                Ok(())
            } else {
                Err(StoreError::DocumentNotFound(id.to_string()))
            }
        })?;

        if let Some(manager) = indexes.get_mut(collection) {
            manager.remove(id);
        }
        debug!(collection = %collection, id = %id, "Document deleted");
        Ok(())
    }

    /// Documents matching `predicate`.
    ///
    /// A ready index on any literal-equality field narrows the candidates;
    /// candidates are still checked against the whole predicate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CollectionNotFound`] if the collection does not
    /// exist.
    pub fn query(&self, collection: &str, predicate: &Predicate) -> Result<Vec<Document>> {
        let indexes = self.indexes.read();
        let candidates = indexes.get(collection).and_then(|manager| {
            predicate
                .iter()
                .filter(|(_, condition)| !is_operator(condition))
                .find_map(|(field, value)| manager.query(field, value))
        });

        let Some(ids) = candidates else {
            return self.scan(collection, |doc| matches(doc, predicate));
        };

        debug!(collection = %collection, candidates = ids.len(), "Query using index");
        self.buckets
            .read(|txn| {
                let table = open_bucket(txn, collection)?;
                let mut docs = Vec::with_capacity(ids.len());
                for id in &ids {
                    let raw = table.get(id.as_str())?.map(|v| v.value().to_string());
                    if let Some(raw) = raw {
                        let doc: Document = serde_json::from_str(&raw)?;
                        if matches(&doc, predicate) {
                            docs.push(doc);
                        }
                    }
                }
                Ok(docs)
            })
            .map_err(collection_error)
    }

    /// Create an equality index on `field` and backfill it in the
    /// background. The collection is created if needed.
    ///
    /// Creating an existing index is a no-op. Queries fall back to scanning
    /// until the backfill completes.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names or storage failures.
    pub fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        self.create_collection(collection)?;
        if field.is_empty() {
            return Err(StoreError::InvalidDocument("index field cannot be empty".to_string()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut indexes = self.indexes.write();
            if !indexes
                .entry(collection.to_string())
                .or_default()
                .create(field, generation)
            {
                return Ok(());
            }
        }

        let handle = Backfill {
            buckets: self.buckets.clone(),
            indexes: self.indexes.clone(),
            collection: collection.to_string(),
            field: field.to_string(),
            generation,
        }
        .spawn();

        self.backfills
            .lock()
            .insert((collection.to_string(), field.to_string()), handle);
        info!(collection = %collection, field = %field, "Index created, backfilling");
        Ok(())
    }

    /// State of the index on `field`, if one exists.
    #[must_use]
    pub fn index_state(&self, collection: &str, field: &str) -> Option<IndexState> {
        self.indexes
            .read()
            .get(collection)
            .and_then(|m| m.get(field).map(|i| i.state()))
    }

    /// Block until the backfill of `field` finishes.
    pub fn wait_for_index(&self, collection: &str, field: &str) {
        let handle = self
            .backfills
            .lock()
            .remove(&(collection.to_string(), field.to_string()));
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(collection = %collection, field = %field, "Index backfill panicked");
            }
        }
    }

    /// Drop the index on `field`, abandoning its backfill. Returns whether
    /// it existed.
    pub fn drop_index(&self, collection: &str, field: &str) -> bool {
        let dropped = self
            .indexes
            .write()
            .get_mut(collection)
            .is_some_and(|manager| manager.drop_field(field));
        self.backfills
            .lock()
            .remove(&(collection.to_string(), field.to_string()));
        if dropped {
            debug!(collection = %collection, field = %field, "Index dropped");
        }
        dropped
    }

    /// Drop every index of a collection. Returns whether any existed.
    pub fn drop_indexes(&self, collection: &str) -> bool {
        let dropped = self.indexes.write().remove(collection).is_some();
        self.backfills.lock().retain(|(c, _), _| c != collection);
        if dropped {
            debug!(collection = %collection, "Indexes dropped");
        }
        dropped
    }

    /// Drop a collection with all its documents and indexes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CollectionNotFound`] if it does not exist.
    pub fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut indexes = self.indexes.write();
        self.buckets
            .delete_bucket(collection)
            .map_err(collection_error)?;
        indexes.remove(collection);
        drop(indexes);
        self.backfills.lock().retain(|(c, _), _| c != collection);
        info!(collection = %collection, "Collection dropped");
        Ok(())
    }
}

/// Background job indexing the documents that existed when an index was
/// created. Documents written afterwards are indexed by their writers.
struct Backfill {
    buckets: Arc<BucketStore>,
    indexes: Indexes,
    collection: String,
    field: String,
    generation: u64,
}

impl Backfill {
    fn spawn(self) -> JoinHandle<()> {
        std::thread::spawn(move || {
            if let Err(e) = self.run() {
                warn!(collection = %self.collection, field = %self.field, error = %e, "Index backfill failed");
            }
        })
    }

    fn run(&self) -> Result<()> {
        let ids: Vec<String> = self.buckets.read(|txn| {
            let table = open_bucket(txn, &self.collection)?;
            let mut ids = Vec::new();
            for item in table.iter()? {
                let (key, _) = item?;
                ids.push(key.value().to_string());
            }
            Ok(ids)
        })?;

        for id in &ids {
            // Re-read under the lock so concurrent writers cannot be undone.
            let mut indexes = self.indexes.write();
            let Some(manager) = indexes.get_mut(&self.collection) else {
                return Ok(());
            };
            let current = self.buckets.read(|txn| {
                let table = open_bucket(txn, &self.collection)?;
                let raw = table.get(id.as_str())?.map(|v| v.value().to_string());
                Ok(raw)
            })?;
            if let Some(raw) = current {
                let doc: Document = serde_json::from_str(&raw)?;
                if !manager.backfill(&self.field, self.generation, id, &doc) {
                    debug!(collection = %self.collection, field = %self.field, "Index dropped during backfill");
                    return Ok(());
                }
            }
        }

        let mut indexes = self.indexes.write();
        let ready = indexes
            .get_mut(&self.collection)
            .is_some_and(|m| m.mark_ready(&self.field, self.generation));
        if ready {
            info!(collection = %self.collection, field = %self.field, documents = ids.len(), "Index ready");
        }
        Ok(())
    }
}
