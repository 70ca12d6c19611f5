//! History cleaning: keep the labeling signal out of timeline features.
//!
//! A timeline that still contains "i'm a girl" would let a classifier learn
//! the query instead of the author. The cleaning pass rewrites
//! `{id}_msg_fix` from `{id}_msg`, attaching each message's distant label
//! and removing contaminated messages at one of two granularities.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

use crate::identity::IdentityIndex;
use crate::models::MessageRecord;
use crate::rules::QueryTable;
use crate::store::{Mode, RecordStore};

/// Suffix of the raw message store.
pub const MSG_SUFFIX: &str = "_msg";
/// Suffix of the cleaned message store.
pub const MSG_FIX_SUFFIX: &str = "_msg_fix";

/// How aggressively query mentions are removed.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Drop every message mentioning any query (the paper's setting).
    #[default]
    #[serde(alias = "historic")]
    Messages,
    /// Drop only the tweets that were themselves query hits.
    Query,
}

impl std::str::FromStr for Granularity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "messages" | "historic" => Ok(Granularity::Messages),
            "query" => Ok(Granularity::Query),
            other => anyhow::bail!(
                "Unknown clean level: '{}'. Must be messages or query.",
                other
            ),
        }
    }
}

/// Counts produced by one cleaning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanSummary {
    pub kept: u64,
    pub removed: u64,
}

/// Whether a message survives cleaning at `granularity`.
pub fn keep_message(
    message: &MessageRecord,
    index: &IdentityIndex,
    queries: &QueryTable,
    granularity: Granularity,
) -> bool {
    match granularity {
        Granularity::Messages => !queries.mentioned_in(&message.tweet_text),
        Granularity::Query => !index.is_query_hit(message.tweet_id),
    }
}

/// Rebuild `{identifier}_msg_fix` from `{identifier}_msg`.
///
/// Every message's user must be in `index`; an unknown user means the
/// timeline store and the index come from different collection runs.
/// All messages are checked before the cleaned store is truncated, so a
/// failing pass leaves the previous output in place.
pub fn remove_query_tweets(
    dir: &Path,
    identifier: &str,
    index: &IdentityIndex,
    queries: &QueryTable,
    granularity: Granularity,
) -> Result<CleanSummary> {
    let fix_id = format!("{}{}", identifier, MSG_FIX_SUFFIX);
    let mut messages = RecordStore::open(dir, &format!("{}{}", identifier, MSG_SUFFIX), Mode::Read)?;
    let mut summary = CleanSummary::default();
    let mut kept = Vec::new();

    for message in messages.iterate_as::<MessageRecord>()? {
        let mut message = message?;
        let label = index.label(message.user_id)?;
        if keep_message(&message, index, queries, granularity) {
            message.distant_label = Some(label.to_string());
            kept.push(message);
        } else {
            summary.removed += 1;
        }
    }
    summary.kept = kept.len() as u64;

    RecordStore::truncate(dir, &fix_id)?;
    let mut cleaned = RecordStore::open(dir, &fix_id, Mode::Append)?;
    for message in &kept {
        cleaned.insert(message)?;
    }
    cleaned.commit()?;

    tracing::info!(
        collection = identifier,
        granularity = ?granularity,
        kept = summary.kept,
        removed = summary.removed,
        "removed query tweets from timelines"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IndexError;
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn queries() -> QueryTable {
        let mut words = IndexMap::new();
        words.insert("girl".to_string(), "f".to_string());
        words.insert("boy".to_string(), "m".to_string());
        QueryTable::new("m a {0}", &words)
    }

    fn msg(tweet_id: u64, user_id: u64, text: &str) -> MessageRecord {
        MessageRecord {
            tweet_id,
            user_id,
            tweet_text: text.to_string(),
            distant_label: None,
        }
    }

    fn write_messages(dir: &Path, id: &str, messages: &[MessageRecord]) {
        let mut store = RecordStore::open(dir, &format!("{}_msg", id), Mode::Append).unwrap();
        for m in messages {
            store.insert(m).unwrap();
        }
        store.commit().unwrap();
    }

    fn read_cleaned(dir: &Path, id: &str) -> Vec<MessageRecord> {
        let mut store = RecordStore::open(dir, &format!("{}_msg_fix", id), Mode::Read).unwrap();
        store.iterate_as().unwrap().map(|r| r.unwrap()).collect()
    }

    fn index() -> IdentityIndex {
        let mut index = IdentityIndex::new();
        index.record_hit(1, 100, "f", "m a girl");
        index.record_hit(2, 200, "m", "m a boy");
        index
    }

    #[test]
    fn granularities_disagree_on_incidental_mention() {
        let index = index();
        let queries = queries();
        let incidental = msg(101, 1, "My sister said I'M A GIRL scout once");
        let hit = msg(100, 1, "i'm a girl");

        assert!(!keep_message(&incidental, &index, &queries, Granularity::Messages));
        assert!(keep_message(&incidental, &index, &queries, Granularity::Query));
        assert!(!keep_message(&hit, &index, &queries, Granularity::Messages));
        assert!(!keep_message(&hit, &index, &queries, Granularity::Query));
    }

    #[test]
    fn messages_granularity_cleans_whole_history() {
        let tmp = TempDir::new().unwrap();
        write_messages(
            tmp.path(),
            "tg",
            &[
                msg(100, 1, "i'm a girl"),
                msg(101, 1, "good morning"),
                msg(201, 2, "what a boy"),
                msg(202, 2, "i'm a boy, he said"),
            ],
        );

        let summary =
            remove_query_tweets(tmp.path(), "tg", &index(), &queries(), Granularity::Messages)
                .unwrap();
        assert_eq!(summary, CleanSummary { kept: 2, removed: 2 });

        let cleaned = read_cleaned(tmp.path(), "tg");
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].tweet_id, 101);
        assert_eq!(cleaned[0].distant_label.as_deref(), Some("f"));
        assert_eq!(cleaned[1].tweet_id, 201);
        assert_eq!(cleaned[1].distant_label.as_deref(), Some("m"));
    }

    #[test]
    fn query_granularity_removes_only_hits() {
        let tmp = TempDir::new().unwrap();
        write_messages(
            tmp.path(),
            "tg",
            &[
                msg(100, 1, "i'm a girl"),
                msg(101, 1, "told you i'm a girl"),
                msg(200, 2, "i'm a boy"),
            ],
        );

        let summary =
            remove_query_tweets(tmp.path(), "tg", &index(), &queries(), Granularity::Query)
                .unwrap();
        assert_eq!(summary, CleanSummary { kept: 1, removed: 2 });
        assert_eq!(read_cleaned(tmp.path(), "tg")[0].tweet_id, 101);
    }

    #[test]
    fn unknown_user_fails_loudly() {
        let tmp = TempDir::new().unwrap();
        write_messages(tmp.path(), "tg", &[msg(900, 9, "hello")]);
        let err = remove_query_tweets(tmp.path(), "tg", &index(), &queries(), Granularity::Messages)
            .unwrap_err();
        assert_eq!(err.downcast_ref::<IndexError>(), Some(&IndexError::UnknownUser(9)));
    }

    #[test]
    fn unknown_user_keeps_previous_output() {
        let tmp = TempDir::new().unwrap();
        write_messages(tmp.path(), "tg", &[msg(101, 1, "hello")]);
        remove_query_tweets(tmp.path(), "tg", &index(), &queries(), Granularity::Messages).unwrap();

        write_messages(tmp.path(), "tg", &[msg(900, 9, "stranger")]);
        assert!(
            remove_query_tweets(tmp.path(), "tg", &index(), &queries(), Granularity::Messages)
                .is_err()
        );
        let cleaned = read_cleaned(tmp.path(), "tg");
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].tweet_id, 101);
    }

    #[test]
    fn rerun_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        write_messages(
            tmp.path(),
            "tg",
            &[msg(101, 1, "hello"), msg(102, 2, "i'm a boy"), msg(103, 2, "bye")],
        );
        remove_query_tweets(tmp.path(), "tg", &index(), &queries(), Granularity::Messages).unwrap();
        let first = read_cleaned(tmp.path(), "tg");
        remove_query_tweets(tmp.path(), "tg", &index(), &queries(), Granularity::Messages).unwrap();
        assert_eq!(read_cleaned(tmp.path(), "tg"), first);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn parses_clean_levels() {
        assert_eq!("messages".parse::<Granularity>().unwrap(), Granularity::Messages);
        assert_eq!("historic".parse::<Granularity>().unwrap(), Granularity::Messages);
        assert_eq!("query".parse::<Granularity>().unwrap(), Granularity::Query);
        assert!("timeline".parse::<Granularity>().is_err());
    }
}
