//! Identity index: who carries which label, and which tweet matched which query.
//!
//! The index is filled live while search results come in, or rebuilt by
//! replaying a hit store. Replay understands both record shapes found in
//! collections: query hits (`user_id`, `tweet_id`, `label`, `query`) and
//! labeled profiles (`id`, `label`), the latter produced by the comparison
//! corpora.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use crate::models::Record;
use crate::store::{Mode, RecordStore};

/// Suffix of the corrected hit store.
pub const FIX_SUFFIX: &str = "_fix";

/// Lookup failures. These indicate an incomplete or mismatched earlier
/// pipeline stage and are never defaulted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("user {0} is not in the identity index")]
    UnknownUser(u64),
    #[error("tweet {0} is not a known query hit")]
    UnknownTweet(u64),
}

/// One replayed line, classified by schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityLine {
    Hit {
        user_id: u64,
        tweet_id: u64,
        label: String,
        query: String,
    },
    Profile {
        id: u64,
        label: String,
    },
}

impl IdentityLine {
    /// Classify a record as a hit or a labeled profile and extract its fields.
    pub fn classify(record: &Record) -> Result<Self> {
        if record.contains_key("user_id") {
            Ok(IdentityLine::Hit {
                user_id: id_field(record, "user_id")?,
                tweet_id: id_field(record, "tweet_id")?,
                label: string_field(record, "label")?,
                query: string_field(record, "query")?,
            })
        } else if record.contains_key("id") {
            Ok(IdentityLine::Profile {
                id: id_field(record, "id")?,
                label: string_field(record, "label")?,
            })
        } else {
            anyhow::bail!("record has neither 'user_id' nor 'id'")
        }
    }
}

/// Read an id stored either as a JSON number or a numeric string.
pub fn as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn id_field(record: &Record, key: &str) -> Result<u64> {
    let value = record
        .get(key)
        .ok_or_else(|| anyhow::anyhow!("record has no '{}'", key))?;
    as_id(value).ok_or_else(|| anyhow::anyhow!("'{}' is not an id: {}", key, value))
}

fn string_field(record: &Record, key: &str) -> Result<String> {
    match record.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => anyhow::bail!("'{}' is not a string: {}", key, other),
        None => anyhow::bail!("record has no '{}'", key),
    }
}

/// `user_id → label` and `tweet_id → query`, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityIndex {
    users: IndexMap<u64, String>,
    tweets: IndexMap<u64, String>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a query hit. A later hit for the same user overwrites its label.
    pub fn record_hit(&mut self, user_id: u64, tweet_id: u64, label: &str, query: &str) {
        self.users.insert(user_id, label.to_string());
        self.tweets.insert(tweet_id, query.to_string());
    }

    /// Record a labeled user without a matching tweet.
    pub fn record_user(&mut self, user_id: u64, label: &str) {
        self.users.insert(user_id, label.to_string());
    }

    pub fn apply(&mut self, line: IdentityLine) {
        match line {
            IdentityLine::Hit {
                user_id,
                tweet_id,
                label,
                query,
            } => self.record_hit(user_id, tweet_id, &label, &query),
            IdentityLine::Profile { id, label } => self.record_user(id, &label),
        }
    }

    /// Fold `other` into this index; its labels and queries win.
    pub fn merge(&mut self, other: IdentityIndex) {
        self.users.extend(other.users);
        self.tweets.extend(other.tweets);
    }

    pub fn label(&self, user_id: u64) -> Result<&str, IndexError> {
        self.users
            .get(&user_id)
            .map(|l| l.as_str())
            .ok_or(IndexError::UnknownUser(user_id))
    }

    pub fn query(&self, tweet_id: u64) -> Result<&str, IndexError> {
        self.tweets
            .get(&tweet_id)
            .map(|q| q.as_str())
            .ok_or(IndexError::UnknownTweet(tweet_id))
    }

    pub fn is_query_hit(&self, tweet_id: u64) -> bool {
        self.tweets.contains_key(&tweet_id)
    }

    /// User ids in discovery order.
    pub fn user_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.users.keys().copied()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn tweet_count(&self) -> usize {
        self.tweets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Replay every record of an open store into a fresh index.
    pub fn replay(store: &mut RecordStore) -> Result<Self> {
        let mut index = Self::new();
        let path = store.path().to_path_buf();
        for (n, record) in store.iterate()?.enumerate() {
            let record = record?;
            let line = IdentityLine::classify(&record).with_context(|| {
                format!("Unrecognized identity record #{} in {}", n + 1, path.display())
            })?;
            index.apply(line);
        }
        Ok(index)
    }

    /// Replay exactly the store `identifier`, without fallback.
    pub fn from_store(dir: &Path, identifier: &str) -> Result<Self> {
        let mut store = RecordStore::open(dir, identifier, Mode::Read)?;
        Self::replay(&mut store)
    }

    /// Rebuild the index for a collection.
    ///
    /// The corrected store `{identifier}_fix` is used when it has content;
    /// otherwise the raw store `{identifier}` is replayed.
    pub fn reconstruct(dir: &Path, identifier: &str) -> Result<Self> {
        let mut store = RecordStore::open(dir, &format!("{}{}", identifier, FIX_SUFFIX), Mode::Read)?;
        if !store.has_content()? {
            store = RecordStore::open(dir, identifier, Mode::Read)?;
        }
        tracing::debug!(store = %store.path().display(), "reconstructing identity index");
        Self::replay(&mut store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, id: &str, records: &[Value]) {
        let mut store = RecordStore::open(dir, id, Mode::Append).unwrap();
        for r in records {
            store.insert(r).unwrap();
        }
        store.commit().unwrap();
    }

    fn obj(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn classify_hit_and_profile() {
        let hit = obj(json!({"user_id": 1, "tweet_id": 10, "tweet_text": "x", "label": "f", "query": "m a girl"}));
        assert_eq!(
            IdentityLine::classify(&hit).unwrap(),
            IdentityLine::Hit {
                user_id: 1,
                tweet_id: 10,
                label: "f".into(),
                query: "m a girl".into()
            }
        );
        let profile = obj(json!({"id": 5, "id_str": "5", "label": "M"}));
        assert_eq!(
            IdentityLine::classify(&profile).unwrap(),
            IdentityLine::Profile {
                id: 5,
                label: "M".into()
            }
        );
    }

    #[test]
    fn merge_prefers_incoming_labels_and_keeps_order() {
        let mut live = IdentityIndex::new();
        live.record_hit(1, 10, "f", "m a girl");
        live.record_hit(2, 20, "f", "m a girl");
        let mut corrected = IdentityIndex::new();
        corrected.record_hit(2, 20, "m", "m a girl");
        corrected.record_hit(3, 30, "m", "m a boy");

        live.merge(corrected);
        assert_eq!(live.user_ids().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(live.label(2), Ok("m"));
        assert!(live.is_query_hit(30));
    }

    #[test]
    fn classify_accepts_string_ids() {
        let profile = obj(json!({"id": "77", "label": "f"}));
        assert!(matches!(
            IdentityLine::classify(&profile).unwrap(),
            IdentityLine::Profile { id: 77, .. }
        ));
    }

    #[test]
    fn classify_rejects_incomplete_records() {
        assert!(IdentityLine::classify(&obj(json!({"label": "f"}))).is_err());
        assert!(IdentityLine::classify(&obj(json!({"user_id": 1, "label": "f"}))).is_err());
        assert!(IdentityLine::classify(&obj(json!({"id": 1}))).is_err());
    }

    #[test]
    fn lookups_fail_on_unknown_ids() {
        let mut index = IdentityIndex::new();
        index.record_hit(1, 10, "f", "m a girl");
        assert_eq!(index.label(1), Ok("f"));
        assert_eq!(index.query(10), Ok("m a girl"));
        assert_eq!(index.label(2), Err(IndexError::UnknownUser(2)));
        assert_eq!(index.query(11), Err(IndexError::UnknownTweet(11)));
    }

    #[test]
    fn user_ids_follow_discovery_order() {
        let mut index = IdentityIndex::new();
        index.record_hit(30, 1, "f", "q");
        index.record_hit(10, 2, "m", "q");
        index.record_hit(30, 3, "m", "q");
        index.record_user(20, "f");
        assert_eq!(index.user_ids().collect::<Vec<_>>(), vec![30, 10, 20]);
        assert_eq!(index.label(30), Ok("m"));
        assert_eq!(index.tweet_count(), 3);
    }

    #[test]
    fn reconstruct_prefers_corrected_store() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "tg",
            &[
                json!({"user_id": 1, "tweet_id": 10, "tweet_text": "a", "label": "f", "query": "m a girl"}),
                json!({"user_id": 2, "tweet_id": 20, "tweet_text": "b", "label": "m", "query": "m a boy"}),
            ],
        );
        write(
            tmp.path(),
            "tg_fix",
            &[json!({"user_id": 1, "tweet_id": 10, "tweet_text": "a", "label": "m", "query": "m a girl"})],
        );

        let index = IdentityIndex::reconstruct(tmp.path(), "tg").unwrap();
        let expected = IdentityIndex::from_store(tmp.path(), "tg_fix").unwrap();
        assert_eq!(index, expected);
        assert_eq!(index.label(1), Ok("m"));
        assert!(index.label(2).is_err());
    }

    #[test]
    fn reconstruct_falls_back_to_raw_store() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "plank_gender",
            &[
                json!({"id": 4, "id_str": "4", "screen_name": "a", "label": "F"}),
                json!({"id": 9, "id_str": "9", "screen_name": "b", "label": "M"}),
            ],
        );
        let index = IdentityIndex::reconstruct(tmp.path(), "plank_gender").unwrap();
        assert_eq!(index.user_ids().collect::<Vec<_>>(), vec![4, 9]);
        assert_eq!(index.label(9), Ok("M"));
        assert_eq!(index.tweet_count(), 0);
    }

    #[test]
    fn reconstruct_mixed_schemas() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "mixed",
            &[
                json!({"id": 4, "label": "f"}),
                json!({"user_id": 5, "tweet_id": 50, "tweet_text": "t", "label": "m", "query": "m a man"}),
            ],
        );
        let index = IdentityIndex::reconstruct(tmp.path(), "mixed").unwrap();
        assert_eq!(index.user_count(), 2);
        assert!(index.is_query_hit(50));
    }

    #[test]
    fn reconstruct_of_unknown_collection_is_empty() {
        let tmp = TempDir::new().unwrap();
        let index = IdentityIndex::reconstruct(tmp.path(), "nothing").unwrap();
        assert!(index.is_empty());
    }
}
