//! Export labeled timelines as fastText batches and split them.
//!
//! Each output line is one author sample: `__label__{n} ` followed by
//! exactly `batch_size` of that author's messages joined by tabs. Messages
//! are consumed in store order, and a batch only grows while consecutive
//! messages belong to the same user; a user's remainder that does not fill
//! a batch is discarded.
//!
//! Files are written next to the stores:
//!
//! | File | Contents |
//! |------|----------|
//! | `{id}.dataf` | every batch |
//! | `{id}.train` | leading batches |
//! | `{id}.test` | trailing batches |

use anyhow::{Context, Result};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::clean::{MSG_FIX_SUFFIX, MSG_SUFFIX};
use crate::config::ExportConfig;
use crate::identity::IdentityIndex;
use crate::models::MessageRecord;
use crate::store::{Mode, RecordStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub lines: usize,
    pub users: usize,
    pub skipped_users: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitSummary {
    pub train: usize,
    pub test: usize,
}

pub fn batches_path(dir: &Path, identifier: &str) -> PathBuf {
    dir.join(format!("{}.dataf", identifier))
}

pub fn train_path(dir: &Path, identifier: &str) -> PathBuf {
    dir.join(format!("{}.train", identifier))
}

pub fn test_path(dir: &Path, identifier: &str) -> PathBuf {
    dir.join(format!("{}.test", identifier))
}

/// Flatten a message onto one line: newlines, tabs, and carriage returns
/// become spaces.
fn flatten_text(text: &str) -> String {
    text.replace(['\n', '\t', '\r'], " ")
}

fn format_line(label: i64, batch: &[String]) -> String {
    let joined = batch.join("\t");
    let body = joined.strip_prefix(' ').unwrap_or(&joined);
    format!("__label__{} {}", label, body)
}

/// The message store to export: the cleaned one when it has content.
fn open_messages(dir: &Path, identifier: &str) -> Result<RecordStore> {
    let mut cleaned = RecordStore::open(dir, &format!("{}{}", identifier, MSG_FIX_SUFFIX), Mode::Read)?;
    if cleaned.has_content()? {
        return Ok(cleaned);
    }
    Ok(RecordStore::open(dir, &format!("{}{}", identifier, MSG_SUFFIX), Mode::Read)?)
}

/// Write `{identifier}.dataf` from the collection's messages.
///
/// Labels come from the reconstructed identity index and are mapped to
/// integers through `config.label_mapping`. Users that are unknown to the
/// index or whose label has no mapping are skipped.
pub fn data_to_batches(dir: &Path, identifier: &str, config: &ExportConfig) -> Result<ExportSummary> {
    let index = IdentityIndex::reconstruct(dir, identifier)?;
    let mut messages = open_messages(dir, identifier)?;
    tracing::info!(collection = identifier, store = %messages.path().display(), "processing");

    let out_path = batches_path(dir, identifier);
    let file = std::fs::File::create(&out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let mut out = BufWriter::new(file);

    let mut summary = ExportSummary::default();
    let mut current: Option<u64> = None;
    let mut label: Option<i64> = None;
    let mut batch: Vec<String> = Vec::with_capacity(config.batch_size);

    for message in messages.iterate_as::<MessageRecord>()? {
        let message = message?;
        if current != Some(message.user_id) {
            current = Some(message.user_id);
            batch.clear();
            label = index
                .label(message.user_id)
                .ok()
                .and_then(|l| config.label_mapping.get(l).copied());
            match label {
                Some(_) => summary.users += 1,
                None => {
                    summary.skipped_users += 1;
                    tracing::debug!(user_id = message.user_id, "no label for user, skipping");
                }
            }
        }
        let Some(n) = label else { continue };

        batch.push(flatten_text(&message.tweet_text));
        if batch.len() == config.batch_size {
            writeln!(out, "{}", format_line(n, &batch))?;
            summary.lines += 1;
            batch.clear();
        }
    }
    out.flush()?;

    tracing::info!(
        collection = identifier,
        lines = summary.lines,
        users = summary.users,
        skipped = summary.skipped_users,
        "wrote batches"
    );
    Ok(summary)
}

/// Number of trailing lines that form the test set.
pub fn test_count(total: usize, test_size: f64) -> usize {
    ((total as f64) * test_size).round_ties_even() as usize
}

/// Split `{identifier}.dataf` into `.train` (leading lines) and `.test`
/// (trailing lines) without shuffling.
pub fn batches_to_sets(dir: &Path, identifier: &str, test_size: f64) -> Result<SplitSummary> {
    let path = batches_path(dir, identifier);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}; run export first", path.display()))?;
    let lines: Vec<&str> = content.lines().collect();

    let n_test = test_count(lines.len(), test_size).min(lines.len());
    let n_train = lines.len() - n_test;
    write_lines(&train_path(dir, identifier), &lines[..n_train])?;
    write_lines(&test_path(dir, identifier), &lines[n_train..])?;

    tracing::info!(collection = identifier, train = n_train, test = n_test, "split batches");
    Ok(SplitSummary {
        train: n_train,
        test: n_test,
    })
}

fn write_lines(path: &Path, lines: &[&str]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn export_config(batch_size: usize) -> ExportConfig {
        ExportConfig {
            batch_size,
            ..ExportConfig::default()
        }
    }

    fn write_profiles(dir: &Path, id: &str, users: &[(u64, &str)]) {
        let mut store = RecordStore::open(dir, id, Mode::Append).unwrap();
        for (uid, label) in users {
            store.insert(&json!({"id": uid, "label": label})).unwrap();
        }
        store.commit().unwrap();
    }

    fn write_messages(dir: &Path, store_id: &str, messages: &[(u64, &str)]) {
        let mut store = RecordStore::open(dir, store_id, Mode::Append).unwrap();
        for (n, (uid, text)) in messages.iter().enumerate() {
            store
                .insert(&MessageRecord {
                    tweet_id: n as u64,
                    user_id: *uid,
                    tweet_text: text.to_string(),
                    distant_label: None,
                })
                .unwrap();
        }
        store.commit().unwrap();
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn short_user_yields_no_line() {
        let tmp = TempDir::new().unwrap();
        write_profiles(tmp.path(), "pg", &[(1, "F")]);
        let texts: Vec<(u64, &str)> = (0..199).map(|_| (1, "hi")).collect();
        write_messages(tmp.path(), "pg_msg", &texts);

        let summary = data_to_batches(tmp.path(), "pg", &export_config(200)).unwrap();
        assert_eq!(summary.lines, 0);
        assert!(read_lines(&batches_path(tmp.path(), "pg")).is_empty());
    }

    #[test]
    fn full_batches_per_contiguous_user() {
        let tmp = TempDir::new().unwrap();
        write_profiles(tmp.path(), "pg", &[(1, "f"), (2, "M")]);
        let mut texts: Vec<(u64, &str)> = (0..5).map(|_| (1, "a")).collect();
        texts.extend((0..4).map(|_| (2, "b")));
        write_messages(tmp.path(), "pg_msg", &texts);

        let summary = data_to_batches(tmp.path(), "pg", &export_config(2)).unwrap();
        assert_eq!(summary.lines, 4);
        assert_eq!(
            read_lines(&batches_path(tmp.path(), "pg")),
            vec![
                "__label__1 a\ta",
                "__label__1 a\ta",
                "__label__0 b\tb",
                "__label__0 b\tb"
            ]
        );
    }

    #[test]
    fn interrupted_run_restarts_the_batch() {
        let tmp = TempDir::new().unwrap();
        write_profiles(tmp.path(), "pg", &[(1, "f"), (2, "m")]);
        write_messages(tmp.path(), "pg_msg", &[(1, "a"), (2, "b"), (1, "c"), (1, "d")]);

        data_to_batches(tmp.path(), "pg", &export_config(2)).unwrap();
        assert_eq!(read_lines(&batches_path(tmp.path(), "pg")), vec!["__label__1 c\td"]);
    }

    #[test]
    fn unknown_and_unmapped_users_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write_profiles(tmp.path(), "pg", &[(1, "x"), (2, "f")]);
        write_messages(tmp.path(), "pg_msg", &[(1, "a"), (9, "b"), (2, "c")]);

        let summary = data_to_batches(tmp.path(), "pg", &export_config(1)).unwrap();
        assert_eq!(
            summary,
            ExportSummary {
                lines: 1,
                users: 1,
                skipped_users: 2
            }
        );
        assert_eq!(read_lines(&batches_path(tmp.path(), "pg")), vec!["__label__1 c"]);
    }

    #[test]
    fn texts_are_flattened_and_leading_space_stripped() {
        let tmp = TempDir::new().unwrap();
        write_profiles(tmp.path(), "pg", &[(1, "m")]);
        write_messages(tmp.path(), "pg_msg", &[(1, "\nhello\tthere"), (1, "bye\r\nnow")]);

        data_to_batches(tmp.path(), "pg", &export_config(2)).unwrap();
        assert_eq!(
            read_lines(&batches_path(tmp.path(), "pg")),
            vec!["__label__0 hello there\tbye  now"]
        );
    }

    #[test]
    fn cleaned_messages_take_precedence() {
        let tmp = TempDir::new().unwrap();
        write_profiles(tmp.path(), "qg", &[(1, "f")]);
        write_messages(tmp.path(), "qg_msg", &[(1, "raw")]);
        write_messages(tmp.path(), "qg_msg_fix", &[(1, "clean")]);

        data_to_batches(tmp.path(), "qg", &export_config(1)).unwrap();
        assert_eq!(read_lines(&batches_path(tmp.path(), "qg")), vec!["__label__1 clean"]);
    }

    #[test]
    fn split_rounds_half_to_even() {
        assert_eq!(test_count(10, 0.2), 2);
        assert_eq!(test_count(5, 0.5), 2);
        assert_eq!(test_count(7, 0.5), 4);
        assert_eq!(test_count(3, 0.0), 0);
    }

    #[test]
    fn split_takes_trailing_lines_as_test() {
        let tmp = TempDir::new().unwrap();
        let lines: Vec<String> = (0..10).map(|n| format!("__label__0 t{}", n)).collect();
        std::fs::write(batches_path(tmp.path(), "pg"), lines.join("\n") + "\n").unwrap();

        let summary = batches_to_sets(tmp.path(), "pg", 0.2).unwrap();
        assert_eq!(summary, SplitSummary { train: 8, test: 2 });
        assert_eq!(read_lines(&train_path(tmp.path(), "pg")), lines[..8].to_vec());
        assert_eq!(read_lines(&test_path(tmp.path(), "pg")), lines[8..].to_vec());
    }

    #[test]
    fn zero_test_size_gives_empty_test_set() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(batches_path(tmp.path(), "pg"), "a\nb\nc\n").unwrap();
        let summary = batches_to_sets(tmp.path(), "pg", 0.0).unwrap();
        assert_eq!(summary, SplitSummary { train: 3, test: 0 });
        assert!(read_lines(&test_path(tmp.path(), "pg")).is_empty());
    }

    #[test]
    fn split_without_export_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(batches_to_sets(tmp.path(), "missing", 0.2).is_err());
    }
}
