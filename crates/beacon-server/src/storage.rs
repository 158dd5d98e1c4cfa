//! Key/value and document commands.
//!
//! Every storage command is answered with a frame carrying the same command,
//! topic and correlation id. Failures travel in the `error` field; the
//! session keeps running.

use beacon_protocol::{Command, Frame};
use beacon_store::{
    parse_document, parse_predicate, DocumentStore, StoreError, DEFAULT_BUCKET, ID_FIELD,
};
use serde_json::Value;
use tracing::debug;

use crate::metrics;

/// Payload acknowledging a successful write.
const ACK: &str = "ok";

/// Split `bucket:key` on the first colon. A missing or empty bucket is the
/// default bucket.
fn split_key(topic: &str) -> (&str, &str) {
    match topic.split_once(':') {
        Some(("", key)) => (DEFAULT_BUCKET, key),
        Some((bucket, key)) => (bucket, key),
        None => (DEFAULT_BUCKET, topic),
    }
}

/// Bucket named by a filter command's topic.
fn filter_bucket(topic: &str) -> &str {
    let bucket = topic.split_once(':').map_or(topic, |(bucket, _)| bucket);
    if bucket.is_empty() {
        DEFAULT_BUCKET
    } else {
        bucket
    }
}

/// Execute a storage command and build its reply, addressed to `session`.
///
/// Returns `None` for commands that are not storage commands.
pub fn handle(docs: &DocumentStore, frame: &Frame, session: &str) -> Option<Frame> {
    if !frame.command.is_kv() && !frame.command.is_document() {
        return None;
    }
    let reply = Frame::reply(frame, session);
    Some(match execute(docs, frame) {
        Ok(payload) => reply.with_payload(payload),
        Err(e) => {
            debug!(command = %frame.command, topic = %frame.topic, error = %e, "Storage command failed");
            metrics::record_error("storage");
            reply.with_error(e.to_string())
        }
    })
}

fn execute(docs: &DocumentStore, frame: &Frame) -> Result<String, StoreError> {
    let buckets = docs.buckets();
    let topic = frame.topic.as_str();
    let payload = frame.payload.as_str();

    match &frame.command {
        Command::Get => {
            let (bucket, key) = split_key(topic);
            buckets.get(bucket, key)
        }
        Command::Set => {
            let (bucket, key) = split_key(topic);
            buckets.put(bucket, key, payload)?;
            Ok(ACK.to_string())
        }
        Command::Del => {
            let (bucket, key) = split_key(topic);
            buckets.delete(bucket, key)?;
            Ok(ACK.to_string())
        }
        Command::BucketAdd => {
            buckets.create_bucket(topic)?;
            Ok(ACK.to_string())
        }
        Command::BucketDel => {
            buckets.delete_bucket(topic)?;
            Ok(String::new())
        }
        Command::BucketFilterKey => {
            let pairs = buckets.list(filter_bucket(topic), |k, _| k.starts_with(payload))?;
            Ok(serde_json::to_string(&pairs)?)
        }
        Command::BucketFilterValue => {
            let pairs = buckets.list(filter_bucket(topic), |_, v| v.starts_with(payload))?;
            Ok(serde_json::to_string(&pairs)?)
        }
        Command::DbCreate => {
            if payload.is_empty() {
                docs.create_collection(topic)?;
            } else {
                docs.create_index(topic, payload)?;
            }
            Ok(String::new())
        }
        Command::DbDrop => {
            if payload.is_empty() {
                docs.drop_collection(topic)?;
            } else if !docs.drop_index(topic, payload) {
                return Err(StoreError::InvalidQuery(format!(
                    "no index on {payload} in {topic}"
                )));
            }
            Ok(String::new())
        }
        Command::DbInsert => docs.insert(topic, parse_document(payload)?),
        Command::DbGet => Ok(serde_json::to_string(&docs.find_one(topic, payload)?)?),
        Command::DbRemove => {
            docs.delete(topic, payload)?;
            Ok(payload.to_string())
        }
        Command::DbFind => {
            let predicate = parse_predicate(payload)?;
            Ok(serde_json::to_string(&docs.query(topic, &predicate)?)?)
        }
        Command::DbUpdate => {
            let patch = parse_document(payload)?;
            let id = match patch.get(ID_FIELD) {
                Some(Value::String(id)) => id.clone(),
                _ => {
                    return Err(StoreError::InvalidDocument(format!(
                        "update requires a string {ID_FIELD}"
                    )))
                }
            };
            docs.update(topic, &id, patch)?;
            Ok(id)
        }
        Command::DbList => Ok(serde_json::to_string(&docs.find_all(topic)?)?),
        other => Err(StoreError::InvalidQuery(format!(
            "{other} is not a storage command"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_store::BucketStore;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store() -> (TempDir, DocumentStore) {
        let dir = TempDir::new().unwrap();
        let buckets = BucketStore::open(dir.path().join("beacon.redb")).unwrap();
        (dir, DocumentStore::new(Arc::new(buckets)))
    }

    fn run(docs: &DocumentStore, command: Command, topic: &str, payload: &str) -> Frame {
        let frame = Frame::new(command)
            .with_topic(topic)
            .with_payload(payload)
            .with_correlation("c1");
        handle(docs, &frame, "s1").unwrap()
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("users:42"), ("users", "42"));
        assert_eq!(split_key(":42"), ("store", "42"));
        assert_eq!(split_key("42"), ("store", "42"));
        assert_eq!(split_key("a:b:c"), ("a", "b:c"));
        assert_eq!(filter_bucket(""), "store");
        assert_eq!(filter_bucket("users:ignored"), "users");
    }

    #[test]
    fn test_reply_mirrors_request() {
        let (_dir, docs) = store();
        let reply = run(&docs, Command::Set, "k", "v");
        assert_eq!(reply.command, Command::Set);
        assert_eq!(reply.topic, "k");
        assert_eq!(reply.correlation_id, "c1");
        assert_eq!(reply.reply_route, "s1");
        assert_eq!(reply.payload, "ok");
        assert!(!reply.is_error());
    }

    #[test]
    fn test_kv_commands() {
        let (_dir, docs) = store();
        run(&docs, Command::Set, "greeting", "hello");
        assert_eq!(run(&docs, Command::Get, "store:greeting", "").payload, "hello");

        assert_eq!(run(&docs, Command::Del, "greeting", "").payload, "ok");
        let missing = run(&docs, Command::Get, "greeting", "");
        assert_eq!(missing.error, "key not found: greeting");

        let no_bucket = run(&docs, Command::Set, "nope:k", "v");
        assert!(no_bucket.error.contains("bucket not found"));
    }

    #[test]
    fn test_bucket_commands() {
        let (_dir, docs) = store();
        assert_eq!(run(&docs, Command::BucketAdd, "users", "").payload, "ok");
        run(&docs, Command::Set, "users:u1", "alice");
        run(&docs, Command::Set, "users:u2", "bob");
        run(&docs, Command::Set, "users:a1", "alina");

        let by_key = run(&docs, Command::BucketFilterKey, "users", "u");
        let parsed: Value = serde_json::from_str(&by_key.payload).unwrap();
        assert_eq!(parsed, json!({"u1": "alice", "u2": "bob"}));

        let by_value = run(&docs, Command::BucketFilterValue, "users", "al");
        let parsed: Value = serde_json::from_str(&by_value.payload).unwrap();
        assert_eq!(parsed, json!({"a1": "alina", "u1": "alice"}));

        let deleted = run(&docs, Command::BucketDel, "users", "");
        assert!(!deleted.is_error());
        assert_eq!(deleted.payload, "");

        let protected = run(&docs, Command::BucketDel, "store", "");
        assert_eq!(protected.error, "can't delete protected bucket: store");
    }

    #[test]
    fn test_document_commands() {
        let (_dir, docs) = store();
        let id = run(&docs, Command::DbInsert, "people", r#"{"name":"ada","age":36}"#).payload;
        assert!(!id.is_empty());

        let got: Value = serde_json::from_str(&run(&docs, Command::DbGet, "people", &id).payload).unwrap();
        assert_eq!(got["name"], "ada");
        assert_eq!(got["_id"], id.as_str());
        assert_eq!(got["_collection"], "people");

        let patch = json!({"_id": id.clone(), "age": 37}).to_string();
        assert_eq!(run(&docs, Command::DbUpdate, "people", &patch).payload, id);

        let found = run(&docs, Command::DbFind, "people", r#"{"age":{"$gt":36}}"#);
        let found: Vec<Value> = serde_json::from_str(&found.payload).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["age"], 37);

        let listed: Vec<Value> =
            serde_json::from_str(&run(&docs, Command::DbList, "people", "").payload).unwrap();
        assert_eq!(listed.len(), 1);

        assert_eq!(run(&docs, Command::DbRemove, "people", &id).payload, id);
        let gone = run(&docs, Command::DbGet, "people", &id);
        assert!(gone.error.starts_with("document not found"));
    }

    #[test]
    fn test_document_errors_stay_inline() {
        let (_dir, docs) = store();
        assert!(run(&docs, Command::DbInsert, "people", "[1,2]").is_error());
        assert!(run(&docs, Command::DbUpdate, "people", r#"{"age":1}"#).is_error());
        assert!(run(&docs, Command::DbFind, "people", "{").is_error());
        assert!(run(&docs, Command::DbGet, "ghosts", "1")
            .error
            .starts_with("collection not found"));
    }

    #[test]
    fn test_collection_and_index_lifecycle() {
        let (_dir, docs) = store();
        assert!(!run(&docs, Command::DbCreate, "things", "").is_error());
        assert_eq!(run(&docs, Command::DbList, "things", "").payload, "[]");

        assert!(!run(&docs, Command::DbCreate, "things", "kind").is_error());
        docs.wait_for_index("things", "kind");
        run(&docs, Command::DbInsert, "things", r#"{"kind":"bolt"}"#);
        let found: Vec<Value> =
            serde_json::from_str(&run(&docs, Command::DbFind, "things", r#"{"kind":"bolt"}"#).payload)
                .unwrap();
        assert_eq!(found.len(), 1);

        assert!(!run(&docs, Command::DbDrop, "things", "").is_error());
        assert!(run(&docs, Command::DbList, "things", "").is_error());
    }

    #[test]
    fn test_drop_single_index_keeps_collection() {
        let (_dir, docs) = store();
        for i in 0..100 {
            run(&docs, Command::DbInsert, "things", &json!({"kind": i % 4}).to_string());
        }
        run(&docs, Command::DbCreate, "things", "kind");
        assert!(!run(&docs, Command::DbDrop, "things", "kind").is_error());
        assert_eq!(docs.index_state("things", "kind"), None);
        assert!(run(&docs, Command::DbDrop, "things", "kind").is_error());

        run(&docs, Command::DbCreate, "things", "kind");
        docs.wait_for_index("things", "kind");
        let found: Vec<Value> =
            serde_json::from_str(&run(&docs, Command::DbFind, "things", r#"{"kind":2.0}"#).payload)
                .unwrap();
        assert_eq!(found.len(), 25);
    }

    #[test]
    fn test_non_storage_commands_are_skipped() {
        let (_dir, docs) = store();
        assert!(handle(&docs, &Frame::publish("a", "b"), "s1").is_none());
    }
}
