//! Collection orchestrator.
//!
//! [`DistantCollection`] drives the two collection phases against an
//! injected [`SocialApi`]:
//!
//! 1. **Query phase** ([`DistantCollection::fetch_query_tweets`]): search
//!    every query, store hits and author profiles, fill the identity
//!    index, then run label correction.
//! 2. **Timeline phase** ([`DistantCollection::fetch_user_tweets`]): pull
//!    every labeled user's timeline into `{id}_msg`, then clean it into
//!    `{id}_msg_fix`.
//!
//! The phases can run in separate processes; the timeline phase rebuilds
//! the index from disk when it starts empty.
//!
//! # Stores
//!
//! | Store | Contents |
//! |-------|----------|
//! | `{id}` | raw query hits |
//! | `{id}_usr` | author profiles of the hits |
//! | `{id}_fix` | corrected hits |
//! | `{id}_msg` | timeline messages |
//! | `{id}_msg_fix` | cleaned, labeled timeline messages |

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::{for_each_page, ApiError, SocialApi};
use crate::clean::{self, CleanSummary, Granularity, MSG_SUFFIX};
use crate::config::{Config, RunMode};
use crate::correct::{self, CorrectionSummary, Corrector};
use crate::identity::IdentityIndex;
use crate::models::{HitRecord, MessageRecord};
use crate::rules::{QueryTable, RuleSet};
use crate::store::{Mode, RecordStore};

/// Suffix of the hit authors' profile store.
pub const USR_SUFFIX: &str = "_usr";

/// Counts from one timeline sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineSummary {
    pub users: usize,
    pub skipped: usize,
    pub messages: u64,
}

pub struct DistantCollection<'a> {
    api: &'a dyn SocialApi,
    dir: PathBuf,
    id: String,
    queries: QueryTable,
    rules: RuleSet,
    index: IdentityIndex,
    granularity: Granularity,
    clean: bool,
    test_mode: bool,
    search_backoff: Duration,
    timeline_backoff: Duration,
}

impl<'a> DistantCollection<'a> {
    /// A query-driven collection configured from `[collection]` and `[api]`.
    pub fn from_config(api: &'a dyn SocialApi, config: &Config) -> Result<Self> {
        let c = &config.collection;
        let rules = RuleSet::new(&c.filters, &c.flip_any, &c.flip_prefix)
            .context("Invalid label-correction rules")?;
        Ok(Self {
            api,
            dir: config.data.dir.clone(),
            id: c.db_id.clone(),
            queries: QueryTable::new(&c.query_string, &c.query_words),
            rules,
            index: IdentityIndex::new(),
            granularity: c.clean_level,
            clean: true,
            test_mode: c.mode == RunMode::Test,
            search_backoff: config.api.search_backoff(),
            timeline_backoff: config.api.timeline_backoff(),
        })
    }

    /// Store under `id` instead of the configured collection id.
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    /// Replace the query table used for searching and cleaning.
    pub fn with_queries(mut self, queries: QueryTable) -> Self {
        self.queries = queries;
        self
    }

    /// Skip the cleaning pass after timelines are fetched.
    pub fn without_cleaning(mut self) -> Self {
        self.clean = false;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    /// Replace the live index with one rebuilt from disk.
    pub fn reconstruct_index(&mut self) -> Result<()> {
        self.index = IdentityIndex::reconstruct(&self.dir, &self.id)
            .with_context(|| format!("Failed to reconstruct identity index for '{}'", self.id))?;
        tracing::info!(
            collection = %self.id,
            users = self.index.user_count(),
            hits = self.index.tweet_count(),
            "reconstructed identity index"
        );
        Ok(())
    }

    /// Search every query and store hits and their authors.
    ///
    /// Returns the number of hits written. Search errors other than rate
    /// limits abort the phase.
    pub fn get_queries(&mut self) -> Result<u64> {
        let mut hits = RecordStore::open(&self.dir, &self.id, Mode::Append)?;
        let mut users =
            RecordStore::open(&self.dir, &format!("{}{}", self.id, USR_SUFFIX), Mode::Append)?;
        let mut written = 0;

        let queries: Vec<(String, String)> = self
            .queries
            .iter()
            .map(|(q, l)| (q.to_string(), l.to_string()))
            .collect();

        for (query, label) in &queries {
            tracing::info!(collection = %self.id, query = %query, "searching");
            let phrase = format!("\"{}\"", query);
            let mut cursor = self.api.search(&phrase);
            let index = &mut self.index;

            for_each_page(
                cursor.as_mut(),
                self.search_backoff,
                query,
                self.test_mode,
                |page| {
                    for tweet in page {
                        let Some(user) = tweet.user else {
                            tracing::warn!(tweet_id = tweet.id, "search hit without user, skipping");
                            continue;
                        };
                        index.record_hit(user.id, tweet.id, label, query);
                        hits.insert(&HitRecord {
                            user_id: user.id,
                            tweet_id: tweet.id,
                            tweet_text: tweet.text,
                            label: label.clone(),
                            query: query.clone(),
                        })?;
                        users.insert(&user)?;
                        written += 1;
                    }
                    Ok(())
                },
            )
            .with_context(|| format!("Search for {} failed", phrase))?;

            if self.test_mode {
                break;
            }
        }

        hits.commit()?;
        users.commit()?;
        tracing::info!(collection = %self.id, hits = written, users = self.index.user_count(), "query phase done");
        Ok(written)
    }

    /// Rewrite `{id}_fix` from the raw hits.
    ///
    /// The raw store also holds hits of earlier runs into the same data
    /// directory, so correction uses an index replayed from all of it
    /// rather than the live one.
    pub fn correct_query_tweets(&self) -> Result<CorrectionSummary> {
        let hits = IdentityIndex::from_store(&self.dir, &self.id)
            .with_context(|| format!("Failed to replay hits of '{}'", self.id))?;
        let mut corrector = Corrector::new(&self.rules, &hits);
        correct::correct_query_tweets(&self.dir, &self.id, &mut corrector)
    }

    /// Query phase: search, store, then correct.
    pub fn fetch_query_tweets(&mut self) -> Result<CorrectionSummary> {
        self.get_queries()?;
        self.correct_query_tweets()
    }

    /// Fetch the timeline of every indexed user, in discovery order.
    ///
    /// A failing timeline (protected or deleted account) is logged and
    /// that user skipped.
    pub fn get_timelines(&self) -> Result<TimelineSummary> {
        let mut messages =
            RecordStore::open(&self.dir, &format!("{}{}", self.id, MSG_SUFFIX), Mode::Append)?;
        let mut summary = TimelineSummary::default();

        for user_id in self.index.user_ids() {
            let mut cursor = self.api.timeline(user_id);
            let what = format!("timeline {}", user_id);
            let mut fetched = 0u64;

            let result = for_each_page(
                cursor.as_mut(),
                self.timeline_backoff,
                &what,
                self.test_mode,
                |page| {
                    for tweet in page {
                        messages.insert(&MessageRecord {
                            tweet_id: tweet.id,
                            user_id,
                            tweet_text: tweet.text,
                            distant_label: None,
                        })?;
                        fetched += 1;
                    }
                    Ok(())
                },
            );

            match result {
                Ok(_) => {
                    summary.users += 1;
                    tracing::debug!(user_id, messages = fetched, "fetched user");
                }
                Err(e) if e.downcast_ref::<ApiError>().is_some() => {
                    summary.skipped += 1;
                    tracing::warn!(user_id, error = %e, "timeline unavailable, skipping user");
                }
                Err(e) => return Err(e),
            }
            summary.messages += fetched;

            if self.test_mode {
                break;
            }
        }

        messages.commit()?;
        tracing::info!(
            collection = %self.id,
            users = summary.users,
            skipped = summary.skipped,
            messages = summary.messages,
            "timeline phase done"
        );
        Ok(summary)
    }

    /// Rewrite `{id}_msg_fix` from `{id}_msg` at the configured granularity.
    ///
    /// `{id}_msg` may hold timelines of users from earlier runs, so the
    /// live index is widened with the one on disk, whose corrected labels
    /// take precedence.
    pub fn remove_query_tweets(&self) -> Result<CleanSummary> {
        let mut index = self.index.clone();
        index.merge(
            IdentityIndex::reconstruct(&self.dir, &self.id)
                .with_context(|| format!("Failed to reconstruct identity index for '{}'", self.id))?,
        );
        clean::remove_query_tweets(&self.dir, &self.id, &index, &self.queries, self.granularity)
    }

    /// Timeline phase: rebuild the index if needed, fetch, then clean.
    pub fn fetch_user_tweets(&mut self) -> Result<TimelineSummary> {
        if self.index.is_empty() {
            tracing::warn!(
                collection = %self.id,
                "empty identity index, repopulating from disk; run the query phase first if this fails"
            );
            self.reconstruct_index()?;
        }
        let summary = self.get_timelines()?;
        if self.clean {
            self.remove_query_tweets()?;
        }
        Ok(summary)
    }
}
