//! TOML configuration parsing.
//!
//! Every section is optional and defaults to the settings used to
//! reproduce the paper, so an empty file describes the full paper run.
//!
//! ```toml
//! [data]
//! dir = "./data"
//!
//! [collection]
//! db_id = "twitter_gender"
//! query_string = "m a {0}"
//! clean_level = "messages"
//! mode = "test"
//!
//! [collection.query_words]
//! girl = "f"
//! boy = "m"
//! ```

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clean::Granularity;

/// Placeholder substituted by each query word in `query_string`.
pub const QUERY_PLACEHOLDER: &str = "{0}";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub corpora: CorporaConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub evaluate: EvaluateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_search_backoff_secs")]
    pub search_backoff_secs: u64,
    #[serde(default = "default_timeline_backoff_secs")]
    pub timeline_backoff_secs: u64,
    #[serde(default = "default_lookup_batch_size")]
    pub lookup_batch_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            search_backoff_secs: default_search_backoff_secs(),
            timeline_backoff_secs: default_timeline_backoff_secs(),
            lookup_batch_size: default_lookup_batch_size(),
        }
    }
}

impl ApiConfig {
    pub fn search_backoff(&self) -> Duration {
        Duration::from_secs(self.search_backoff_secs)
    }

    pub fn timeline_backoff(&self) -> Duration {
        Duration::from_secs(self.timeline_backoff_secs)
    }
}

fn default_base_url() -> String {
    "https://api.twitter.com/1.1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> u32 {
    200
}
fn default_search_backoff_secs() -> u64 {
    300
}
fn default_timeline_backoff_secs() -> u64 {
    5
}
fn default_lookup_batch_size() -> usize {
    100
}

/// Whether a run collects everything or only a single page per source.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Live,
    Test,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionConfig {
    #[serde(default = "default_db_id")]
    pub db_id: String,
    #[serde(default = "default_query_string")]
    pub query_string: String,
    #[serde(default = "default_query_words")]
    pub query_words: IndexMap<String, String>,
    #[serde(default = "default_filters")]
    pub filters: Vec<String>,
    #[serde(default = "default_flip_any")]
    pub flip_any: Vec<String>,
    #[serde(default = "default_flip_prefix")]
    pub flip_prefix: Vec<String>,
    #[serde(default)]
    pub clean_level: Granularity,
    #[serde(default)]
    pub mode: RunMode,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            db_id: default_db_id(),
            query_string: default_query_string(),
            query_words: default_query_words(),
            filters: default_filters(),
            flip_any: default_flip_any(),
            flip_prefix: default_flip_prefix(),
            clean_level: Granularity::default(),
            mode: RunMode::default(),
        }
    }
}

fn default_db_id() -> String {
    "twitter_gender".to_string()
}

/// Query template of the paper ("I'm a girl" and friends).
pub fn default_query_string() -> String {
    "m a {0}".to_string()
}

/// Query vocabulary of the paper, in collection order.
pub fn default_query_words() -> IndexMap<String, String> {
    [
        ("girl", "f"),
        ("boy", "m"),
        ("man", "m"),
        ("woman", "f"),
        ("guy", "m"),
        ("dude", "m"),
        ("gal", "f"),
        ("female", "f"),
        ("male", "m"),
    ]
    .into_iter()
    .map(|(w, l)| (w.to_string(), l.to_string()))
    .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_filters() -> Vec<String> {
    strings(&["rt ", "\"", ": "])
}

fn default_flip_any() -> Vec<String> {
    strings(&["according to", "deep down"])
}

fn default_flip_prefix() -> Vec<String> {
    strings(&[
        " feel like ",
        " where ",
        " as if ",
        " hoping ",
        " assumed ",
        " think ",
        " assumes ",
        " assume that ",
        " assumed that ",
        " then ",
        " expect that ",
        " expect ",
        "that means ",
        " means ",
        " implying ",
        " guess ",
        " thinks ",
        " tells me ",
        " learned ",
        " if ",
    ])
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorporaConfig {
    #[serde(default = "default_corpora_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_query_corpus")]
    pub query: String,
    #[serde(default = "default_plank_corpus")]
    pub plank: String,
    #[serde(default = "default_volkova_corpus")]
    pub volkova: String,
    #[serde(default = "default_lexicon")]
    pub lexicon: String,
}

impl Default for CorporaConfig {
    fn default() -> Self {
        Self {
            dir: default_corpora_dir(),
            query: default_query_corpus(),
            plank: default_plank_corpus(),
            volkova: default_volkova_corpus(),
            lexicon: default_lexicon(),
        }
    }
}

impl CorporaConfig {
    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }
}

fn default_corpora_dir() -> PathBuf {
    PathBuf::from("./corpora")
}
fn default_query_corpus() -> String {
    "query-gender.json".to_string()
}
fn default_plank_corpus() -> String {
    "TwiSty-EN.json".to_string()
}
fn default_volkova_corpus() -> String {
    "userIDToAttributes".to_string()
}
fn default_lexicon() -> String {
    "emnlp14gender.csv".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_label_mapping")]
    pub label_mapping: HashMap<String, i64>,
    #[serde(default = "default_export_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            label_mapping: default_label_mapping(),
            batch_size: default_export_batch_size(),
            test_size: default_test_size(),
        }
    }
}

fn default_label_mapping() -> HashMap<String, i64> {
    [("m", 0), ("f", 1), ("M", 0), ("F", 1)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
fn default_export_batch_size() -> usize {
    200
}
fn default_test_size() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluateConfig {
    #[serde(default = "default_trainer")]
    pub trainer: Vec<String>,
    #[serde(default = "default_sets")]
    pub sets: Vec<String>,
}

impl Default for EvaluateConfig {
    fn default() -> Self {
        Self {
            trainer: default_trainer(),
            sets: default_sets(),
        }
    }
}

fn default_trainer() -> Vec<String> {
    strings(&["sh", "sec4_exp.sh"])
}
fn default_sets() -> Vec<String> {
    strings(&["query_gender", "plank_gender", "volkova_gender"])
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate collection
    if !config.collection.query_string.contains(QUERY_PLACEHOLDER) {
        anyhow::bail!(
            "collection.query_string must contain '{}' (got '{}')",
            QUERY_PLACEHOLDER,
            config.collection.query_string
        );
    }
    if config.collection.query_words.is_empty() {
        anyhow::bail!("collection.query_words must not be empty");
    }
    if let Some((word, _)) = config
        .collection
        .query_words
        .iter()
        .find(|(_, label)| label.is_empty())
    {
        anyhow::bail!("collection.query_words.{} has an empty label", word);
    }

    // Validate api
    if !(1..=100).contains(&config.api.lookup_batch_size) {
        anyhow::bail!("api.lookup_batch_size must be in [1, 100]");
    }
    if config.api.page_size == 0 {
        anyhow::bail!("api.page_size must be > 0");
    }

    // Validate export
    if config.export.batch_size == 0 {
        anyhow::bail!("export.batch_size must be > 0");
    }
    if !(0.0..=1.0).contains(&config.export.test_size) {
        anyhow::bail!("export.test_size must be in [0.0, 1.0]");
    }

    if config.evaluate.trainer.is_empty() {
        anyhow::bail!("evaluate.trainer must name a command");
    }

    Ok(config)
}
