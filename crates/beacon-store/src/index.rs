//! Per-collection equality indexes.
//!
//! A [`FieldIndex`] maps each distinct value of one field to the ids of the
//! documents holding it. Values are keyed by their canonical JSON text, so
//! values equal under [`json_eq`](crate::query::json_eq) share an entry. A
//! reverse map from id to value makes every update replace exactly one
//! association.

use crate::document::Document;
use crate::query::normalize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Lifecycle of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Existing documents are still being backfilled.
    Building,
    /// Every document is indexed.
    Ready,
}

fn canonical(value: &Value) -> String {
    // Objects serialize with sorted keys, arrays in order.
    normalize(value).to_string()
}

/// Equality index over one field.
#[derive(Debug)]
pub struct FieldIndex {
    field: String,
    generation: u64,
    state: IndexState,
    entries: HashMap<String, BTreeSet<String>>,
    by_id: HashMap<String, String>,
}

impl FieldIndex {
    fn new(field: &str, generation: u64) -> Self {
        Self {
            field: field.to_string(),
            generation,
            state: IndexState::Building,
            entries: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Indexed field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Associate `id` with the document's current value, dropping any
    /// previous association. Documents without the field are unindexed.
    pub fn update(&mut self, id: &str, doc: &Document) {
        self.remove(id);
        if let Some(value) = doc.get(&self.field) {
            let key = canonical(value);
            self.entries
                .entry(key.clone())
                .or_default()
                .insert(id.to_string());
            self.by_id.insert(id.to_string(), key);
        }
    }

    /// Forget `id`.
    pub fn remove(&mut self, id: &str) {
        let Some(key) = self.by_id.remove(id) else {
            return;
        };
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    /// Ids holding `value`, or `None` while the index is still building.
    #[must_use]
    pub fn lookup(&self, value: &Value) -> Option<Vec<String>> {
        if self.state != IndexState::Ready {
            return None;
        }
        Some(
            self.entries
                .get(&canonical(value))
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no document is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// All indexes of one collection, keyed by field.
#[derive(Debug, Default)]
pub struct IndexManager {
    indexes: HashMap<String, FieldIndex>,
}

impl IndexManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an index on `field` in the building state.
    ///
    /// Returns `false` if the field is already indexed.
    pub fn create(&mut self, field: &str, generation: u64) -> bool {
        if self.indexes.contains_key(field) {
            return false;
        }
        self.indexes
            .insert(field.to_string(), FieldIndex::new(field, generation));
        true
    }

    /// Drop the index on `field`.
    pub fn drop_field(&mut self, field: &str) -> bool {
        self.indexes.remove(field).is_some()
    }

    /// Reindex a document in every index of the collection.
    pub fn update(&mut self, id: &str, doc: &Document) {
        for index in self.indexes.values_mut() {
            index.update(id, doc);
        }
    }

    /// Remove a document from every index of the collection.
    pub fn remove(&mut self, id: &str) {
        for index in self.indexes.values_mut() {
            index.remove(id);
        }
    }

    /// Ids whose `field` equals `value`, or `None` when no ready index
    /// covers the field.
    #[must_use]
    pub fn query(&self, field: &str, value: &Value) -> Option<Vec<String>> {
        self.indexes.get(field)?.lookup(value)
    }

    /// The index on `field`, if any.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldIndex> {
        self.indexes.get(field)
    }

    /// Index `id` into one field's index if it still belongs to `generation`.
    pub(crate) fn backfill(&mut self, field: &str, generation: u64, id: &str, doc: &Document) -> bool {
        match self.indexes.get_mut(field) {
            Some(index) if index.generation == generation => {
                index.update(id, doc);
                true
            }
            _ => false,
        }
    }

    /// Mark one field's index ready if it still belongs to `generation`.
    pub(crate) fn mark_ready(&mut self, field: &str, generation: u64) -> bool {
        match self.indexes.get_mut(field) {
            Some(index) if index.generation == generation => {
                index.state = IndexState::Ready;
                true
            }
            _ => false,
        }
    }

    /// Indexed field names.
    #[must_use]
    pub fn fields(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    /// Whether the collection has no index.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn ready(manager: &mut IndexManager, field: &str) {
        manager.create(field, 1);
        manager.mark_ready(field, 1);
    }

    #[test]
    fn test_update_replaces_previous_value() {
        let mut manager = IndexManager::new();
        ready(&mut manager, "city");

        manager.update("1", &doc(json!({"city": "Lisbon"})));
        manager.update("1", &doc(json!({"city": "Porto"})));

        assert_eq!(manager.query("city", &json!("Lisbon")), Some(vec![]));
        assert_eq!(manager.query("city", &json!("Porto")), Some(vec!["1".to_string()]));
        assert_eq!(manager.get("city").unwrap().len(), 1);
    }

    #[test]
    fn test_losing_the_field_unindexes() {
        let mut manager = IndexManager::new();
        ready(&mut manager, "tag");
        manager.update("1", &doc(json!({"tag": "a"})));
        manager.update("1", &doc(json!({"other": true})));
        assert_eq!(manager.query("tag", &json!("a")), Some(vec![]));
        assert!(manager.get("tag").unwrap().is_empty());
    }

    #[test]
    fn test_remove_from_all_indexes() {
        let mut manager = IndexManager::new();
        ready(&mut manager, "a");
        ready(&mut manager, "b");
        manager.update("1", &doc(json!({"a": 1, "b": [1, 2]})));
        manager.remove("1");
        assert_eq!(manager.query("a", &json!(1)), Some(vec![]));
        assert_eq!(manager.query("b", &json!([1, 2])), Some(vec![]));
    }

    #[test]
    fn test_structured_values_share_entries() {
        let mut manager = IndexManager::new();
        ready(&mut manager, "meta");
        manager.update("1", &doc(json!({"meta": {"x": 1, "y": 2}})));
        manager.update("2", &doc(json!({"meta": {"y": 2, "x": 1}})));
        assert_eq!(
            manager.query("meta", &json!({"x": 1, "y": 2})),
            Some(vec!["1".to_string(), "2".to_string()])
        );
    }

    #[test]
    fn test_numeric_forms_share_entries() {
        let mut manager = IndexManager::new();
        ready(&mut manager, "n");
        manager.update("1", &doc(json!({"n": 30})));
        manager.update("2", &doc(json!({"n": 30.0})));
        manager.update("3", &doc(json!({"n": -0.0})));

        let thirty = Some(vec!["1".to_string(), "2".to_string()]);
        assert_eq!(manager.query("n", &json!(30)), thirty);
        assert_eq!(manager.query("n", &json!(3e1)), thirty);
        assert_eq!(manager.query("n", &json!(0)), Some(vec!["3".to_string()]));
    }

    #[test]
    fn test_building_index_declines_queries() {
        let mut manager = IndexManager::new();
        assert!(manager.create("name", 7));
        assert!(!manager.create("name", 8));
        manager.update("1", &doc(json!({"name": "x"})));

        assert_eq!(manager.query("name", &json!("x")), None);
        assert!(!manager.mark_ready("name", 8));
        assert!(manager.mark_ready("name", 7));
        assert_eq!(manager.query("name", &json!("x")), Some(vec!["1".to_string()]));
    }

    #[test]
    fn test_unknown_field_has_no_index() {
        let manager = IndexManager::new();
        assert_eq!(manager.query("missing", &json!(1)), None);
    }
}
