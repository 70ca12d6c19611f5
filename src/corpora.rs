//! Comparison corpora.
//!
//! Three hand-labeled user sets are rehydrated through the API so the
//! distant corpus can be compared against them:
//!
//! | Corpus | File | Store | Cleaned |
//! |--------|------|-------|---------|
//! | Query | `query-gender.json` | `query_gender` | yes |
//! | Plank (TwiSty-EN) | `TwiSty-EN.json` | `plank_gender` | no |
//! | Volkova | `userIDToAttributes` | `volkova_gender` | no |
//!
//! Each corpus only ships user ids and labels. [`fetch_users`] looks the
//! profiles up in batches and stores them with a `label` field; timelines
//! are then collected by a [`DistantCollection`] whose index is replayed
//! from that profile store.

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::api::{with_backoff, SocialApi, MAX_LOOKUP_IDS};
use crate::collect::DistantCollection;
use crate::config::{default_query_string, default_query_words, Config, RunMode};
use crate::models::{FEMALE, MALE};
use crate::rules::QueryTable;
use crate::store::{Mode, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corpus {
    Query,
    Plank,
    Volkova,
}

impl Corpus {
    pub const ALL: [Corpus; 3] = [Corpus::Query, Corpus::Plank, Corpus::Volkova];

    pub fn db_id(self) -> &'static str {
        match self {
            Corpus::Query => "query_gender",
            Corpus::Plank => "plank_gender",
            Corpus::Volkova => "volkova_gender",
        }
    }

    /// Whether timelines are cleaned of the distant queries.
    pub fn cleans_history(self) -> bool {
        self == Corpus::Query
    }

    fn file<'c>(self, config: &'c Config) -> &'c str {
        match self {
            Corpus::Query => &config.corpora.query,
            Corpus::Plank => &config.corpora.plank,
            Corpus::Volkova => &config.corpora.volkova,
        }
    }

    fn download_hint(self) -> &'static str {
        match self {
            Corpus::Query => "re-download it from http://github.com/cmry/simple-queries",
            Corpus::Plank => {
                "request TwiSty-EN from http://www.clips.ua.ac.be/datasets/twisty-corpus"
            }
            Corpus::Volkova => {
                "request access to https://bitbucket.org/svolkova/psycho-demographics"
            }
        }
    }

    /// Load `user id → label` from the corpus file, in file order.
    pub fn load_labels(self, path: &Path) -> Result<IndexMap<u64, String>> {
        match self {
            Corpus::Query => {
                let annotations = load_annotations(path)?;
                annotations
                    .into_iter()
                    .map(|(id, a)| Ok::<_, anyhow::Error>((parse_user_id(&id)?, a.query_label2)))
                    .collect()
            }
            Corpus::Plank => load_plank(path),
            Corpus::Volkova => load_volkova(path),
        }
    }
}

impl std::str::FromStr for Corpus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "query" => Ok(Corpus::Query),
            "plank" => Ok(Corpus::Plank),
            "volkova" => Ok(Corpus::Volkova),
            other => bail!("Unknown corpus: '{}'. Must be query, plank, or volkova.", other),
        }
    }
}

impl std::fmt::Display for Corpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Corpus::Query => "query",
            Corpus::Plank => "plank",
            Corpus::Volkova => "volkova",
        };
        f.write_str(name)
    }
}

fn parse_user_id(raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid user id: '{}'", raw))
}

/// Accept strings, numbers, and booleans, keeping their text form.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    })
}

// ============ Query corpus ============

/// One annotated profile of the Query corpus.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Annotation {
    /// Label assigned by the distant queries.
    #[serde(deserialize_with = "lenient_string")]
    pub query_label2: String,
    /// Majority vote of the annotators: `m`, `f`, `o`ther, `-` unsure, `0` missing.
    #[serde(default, deserialize_with = "lenient_string")]
    pub majority: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bot: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ann1: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ann2: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ann3: String,
}

impl Annotation {
    pub fn is_bot(&self) -> bool {
        self.bot == "True"
    }

    /// Rating of annotator `n` (1-based).
    pub fn rater(&self, n: usize) -> &str {
        match n {
            1 => &self.ann1,
            2 => &self.ann2,
            _ => &self.ann3,
        }
    }
}

#[derive(Deserialize)]
struct QueryCorpusFile {
    annotations: IndexMap<String, Annotation>,
}

/// Load the Query corpus annotations keyed by user id string.
pub fn load_annotations(path: &Path) -> Result<IndexMap<String, Annotation>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: QueryCorpusFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(file.annotations)
}

// ============ Plank ============

#[derive(Deserialize)]
struct PlankEntry {
    #[serde(deserialize_with = "lenient_string")]
    user_id: String,
    gender: String,
}

fn load_plank(path: &Path) -> Result<IndexMap<u64, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let entries: IndexMap<String, PlankEntry> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    entries
        .into_values()
        .map(|e| Ok::<_, anyhow::Error>((parse_user_id(&e.user_id)?, e.gender)))
        .collect()
}

// ============ Volkova ============

fn load_volkova(path: &Path) -> Result<IndexMap<u64, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_volkova(&content.replace("::", ""))
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parse the tab-separated attribute table. The first column holds the
/// user id; the `gender` column holds `Female` or `Male`.
fn parse_volkova(content: &str) -> Result<IndexMap<u64, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(content.as_bytes());

    let gender_col = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == "gender")
        .ok_or_else(|| anyhow::anyhow!("missing 'gender' column"))?;

    let mut labels = IndexMap::new();
    for (n, row) in reader.records().enumerate() {
        let row = row?;
        let id = row
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("row {} is empty", n + 1))?;
        let label = if row.get(gender_col).map(str::trim) == Some("Female") {
            FEMALE
        } else {
            MALE
        };
        labels.insert(parse_user_id(id)?, label.to_string());
    }
    Ok(labels)
}

// ============ Rehydration ============

/// Look up every labeled user and store the profile with its `label`.
///
/// Ids go out in batches of `batch_size` (at most [`MAX_LOOKUP_IDS`]),
/// the last batch possibly smaller. In test mode only the first batch is
/// looked up. Returns the number of profiles stored.
pub fn fetch_users(
    api: &dyn SocialApi,
    dir: &Path,
    identifier: &str,
    labels: &IndexMap<u64, String>,
    batch_size: usize,
    test_mode: bool,
    backoff: Duration,
) -> Result<usize> {
    let batch_size = batch_size.clamp(1, MAX_LOOKUP_IDS);
    let ids: Vec<u64> = labels.keys().copied().collect();
    let by_id_str: HashMap<String, &str> = labels
        .iter()
        .map(|(id, label)| (id.to_string(), label.as_str()))
        .collect();

    let mut store = RecordStore::open(dir, identifier, Mode::Append)?;
    let mut stored = 0;

    for batch in ids.chunks(batch_size) {
        tracing::info!(collection = identifier, size = batch.len(), "getting user batch");
        let users = with_backoff(backoff, "user lookup", || api.lookup_users(batch))
            .with_context(|| format!("User lookup failed for '{}'", identifier))?;

        for user in users {
            let id_str = user.id_string();
            match by_id_str.get(&id_str) {
                Some(label) => {
                    let record = user
                        .into_labeled_record(label)
                        .with_context(|| format!("Failed to encode profile {}", id_str))?;
                    store.insert(&record)?;
                    stored += 1;
                }
                None => tracing::warn!(user = %id_str, "lookup returned an unrequested user"),
            }
        }

        if test_mode {
            break;
        }
    }
    store.commit()?;

    tracing::info!(
        collection = identifier,
        requested = ids.len(),
        stored,
        "stored user profiles"
    );
    Ok(stored)
}

/// Rehydrate one corpus: profiles first, then timelines.
pub fn collect_corpus(api: &dyn SocialApi, config: &Config, corpus: Corpus) -> Result<()> {
    let path = config.corpora.path(corpus.file(config));
    let labels = corpus.load_labels(&path).with_context(|| {
        format!(
            "Could not load the {} corpus; {} and store it in {}",
            corpus,
            corpus.download_hint(),
            config.corpora.dir.display()
        )
    })?;
    let test_mode = config.collection.mode == RunMode::Test;

    tracing::info!(%corpus, users = labels.len(), "fetching corpus users");
    fetch_users(
        api,
        &config.data.dir,
        corpus.db_id(),
        &labels,
        config.api.lookup_batch_size,
        test_mode,
        config.api.search_backoff(),
    )?;

    tracing::info!(%corpus, "fetching corpus tweets");
    let mut collection = DistantCollection::from_config(api, config)?
        .with_id(corpus.db_id())
        .with_queries(QueryTable::new(&default_query_string(), &default_query_words()));
    if !corpus.cleans_history() {
        collection = collection.without_cleaning();
    }
    collection.fetch_user_tweets()?;
    Ok(())
}
