//! Core data models used throughout the pipeline.
//!
//! These types represent the hits, messages, and profiles that flow from
//! the API through the record stores into the flat export. The stores
//! themselves are schema-less ([`Record`]); the structs here are the
//! contract between the stage that writes a store and the stages that
//! read it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One stored unit: an ordered mapping of field name to JSON value.
pub type Record = Map<String, Value>;

/// Label assigned to female users by the distant queries.
pub const FEMALE: &str = "f";
/// Label assigned to male users by the distant queries.
pub const MALE: &str = "m";

/// Reverse a distant label, keeping its case.
///
/// `f` and `m` swap, as do `F` and `M`. Any other value becomes `f`.
pub fn flip(label: &str) -> &'static str {
    match label {
        "f" => "m",
        "F" => "M",
        "M" => "F",
        _ => FEMALE,
    }
}

/// A tweet returned by a search query, labeled by the query that matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub user_id: u64,
    pub tweet_id: u64,
    pub tweet_text: String,
    pub label: String,
    pub query: String,
}

/// A tweet from a user's timeline.
///
/// Carries no label of its own; the cleaning pass joins one in through
/// the identity index and stores it as `distant_label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub tweet_id: u64,
    pub user_id: u64,
    pub tweet_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distant_label: Option<String>,
}

/// A user profile as returned by the API.
///
/// Only the identifiers are typed; every other profile field is kept
/// verbatim so the stored record is the full API object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_str: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// The string form of the user id (`id_str` when present).
    pub fn id_string(&self) -> String {
        self.id_str.clone().unwrap_or_else(|| self.id.to_string())
    }

    /// Convert the profile into a record with an attached `label` field.
    pub fn into_labeled_record(self, label: &str) -> Result<Record, serde_json::Error> {
        let mut record = match serde_json::to_value(&self)? {
            Value::Object(map) => map,
            other => {
                return Err(serde::ser::Error::custom(format!(
                    "user {} did not serialize to an object: {}",
                    self.id, other
                )))
            }
        };
        record.insert("label".to_string(), Value::String(label.to_string()));
        Ok(record)
    }
}

/// A tweet as returned by the search and timeline endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: u64,
    #[serde(alias = "full_text")]
    pub text: String,
    #[serde(default)]
    pub user: Option<User>,
}
