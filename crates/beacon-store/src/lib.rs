//! # beacon-store
//!
//! Embedded persistence for the Beacon broker: named key/value buckets and
//! a document store with equality indexes, both backed by one redb file.
//!
//! ```no_run
//! use beacon_store::{BucketStore, DocumentStore};
//! use std::sync::Arc;
//!
//! let buckets = Arc::new(BucketStore::open("beacon.redb")?);
//! buckets.put("store", "greeting", "hello")?;
//!
//! let docs = DocumentStore::new(buckets);
//! let doc = beacon_store::parse_document(r#"{"name": "alice"}"#)?;
//! let id = docs.insert("users", doc)?;
//! assert_eq!(docs.find_one("users", &id)?["name"], "alice");
//! # Ok::<(), beacon_store::StoreError>(())
//! ```

pub mod bucket;
pub mod document;
pub mod error;
pub mod index;
pub mod query;

pub use bucket::{validate_name, BucketStore, DEFAULT_BUCKET};
pub use document::{parse_document, Document, DocumentStore, COLLECTION_FIELD, ID_FIELD};
pub use error::{Result, StoreError};
pub use index::{FieldIndex, IndexManager, IndexState};
pub use query::{matches, parse_predicate, Predicate};
