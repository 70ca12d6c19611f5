//! Label correction over collected query hits.
//!
//! Joins each hit against the identity index and applies the [`RuleSet`],
//! writing surviving hits with their decided label to the corrected store
//! `{id}_fix`. The raw store is never modified.

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;

use crate::identity::{IdentityIndex, FIX_SUFFIX};
use crate::models::HitRecord;
use crate::rules::{Decision, Pattern, RuleSet};
use crate::store::{Mode, RecordStore};

/// Counts produced by one correction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrectionSummary {
    pub kept: u64,
    pub flipped: u64,
    pub dropped: u64,
}

impl CorrectionSummary {
    pub fn written(&self) -> u64 {
        self.kept + self.flipped
    }
}

/// The label-correction engine: rules plus the index they consult.
pub struct Corrector<'a> {
    rules: &'a RuleSet,
    index: &'a IdentityIndex,
    anchored: HashMap<String, Pattern>,
}

impl<'a> Corrector<'a> {
    pub fn new(rules: &'a RuleSet, index: &'a IdentityIndex) -> Self {
        Self {
            rules,
            index,
            anchored: HashMap::new(),
        }
    }

    /// Apply the rules to a hit, returning the full [`Decision`].
    ///
    /// Both ids must be known to the index; an unknown id is an error.
    pub fn decide(&mut self, user_id: u64, tweet_id: u64, text: &str) -> Result<Decision> {
        let label = self.index.label(user_id)?;
        let query = self.index.query(tweet_id)?;

        if !self.anchored.contains_key(query) {
            self.anchored
                .insert(query.to_string(), Pattern::anchored_query(query)?);
        }
        let pattern = &self.anchored[query];
        Ok(self.rules.decide_anchored(label, pattern, text))
    }

    /// The corrected label for a hit, or `None` when a filter vetoed it.
    pub fn decide_label(&mut self, user_id: u64, tweet_id: u64, text: &str) -> Result<Option<String>> {
        Ok(self.decide(user_id, tweet_id, text)?.into_label())
    }
}

/// Rebuild `{identifier}_fix` from the raw hit store `{identifier}`.
///
/// Every hit is decided before the corrected store is truncated, so an
/// unknown id leaves the previous output in place.
pub fn correct_query_tweets(
    dir: &Path,
    identifier: &str,
    corrector: &mut Corrector<'_>,
) -> Result<CorrectionSummary> {
    let fix_id = format!("{}{}", identifier, FIX_SUFFIX);
    let mut hits = RecordStore::open(dir, identifier, Mode::Read)?;
    let mut summary = CorrectionSummary::default();
    let mut survivors = Vec::new();

    for hit in hits.iterate_as::<HitRecord>()? {
        let mut hit = hit?;
        match corrector.decide(hit.user_id, hit.tweet_id, &hit.tweet_text)? {
            Decision::Drop => summary.dropped += 1,
            Decision::Keep(label) => {
                summary.kept += 1;
                hit.label = label;
                survivors.push(hit);
            }
            Decision::Flip(label) => {
                summary.flipped += 1;
                hit.label = label;
                survivors.push(hit);
            }
        }
    }

    RecordStore::truncate(dir, &fix_id)?;
    let mut fixed = RecordStore::open(dir, &fix_id, Mode::Append)?;
    for hit in &survivors {
        fixed.insert(hit)?;
    }
    fixed.commit()?;

    tracing::info!(
        collection = identifier,
        kept = summary.kept,
        flipped = summary.flipped,
        dropped = summary.dropped,
        "corrected query tweets"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IndexError;
    use tempfile::TempDir;

    fn s(items: &[&str]) -> Vec<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    fn hit(user_id: u64, tweet_id: u64, text: &str, label: &str, query: &str) -> HitRecord {
        HitRecord {
            user_id,
            tweet_id,
            tweet_text: text.to_string(),
            label: label.to_string(),
            query: query.to_string(),
        }
    }

    #[test]
    fn decide_label_examples() {
        let rules = RuleSet::new(&s(&["rt "]), &s(&["according to"]), &s(&[" guess "])).unwrap();
        let mut index = IdentityIndex::new();
        index.record_hit(1, 100, "f", "a girl");
        index.record_hit(2, 200, "f", "a girl");
        index.record_hit(3, 300, "f", "a girl");
        let mut corrector = Corrector::new(&rules, &index);

        assert_eq!(
            corrector.decide_label(1, 100, "i guess i'm a girl now").unwrap(),
            Some("m".to_string())
        );
        assert_eq!(corrector.decide_label(2, 200, "rt: i'm a girl").unwrap(), None);
        assert_eq!(
            corrector.decide_label(3, 300, "according to him i'm a girl").unwrap(),
            Some("m".to_string())
        );
    }

    #[test]
    fn unknown_ids_propagate() {
        let rules = RuleSet::empty();
        let mut index = IdentityIndex::new();
        index.record_hit(1, 100, "f", "a girl");
        let mut corrector = Corrector::new(&rules, &index);

        let err = corrector.decide_label(9, 100, "x").unwrap_err();
        assert_eq!(err.downcast_ref::<IndexError>(), Some(&IndexError::UnknownUser(9)));
        let err = corrector.decide_label(1, 999, "x").unwrap_err();
        assert_eq!(err.downcast_ref::<IndexError>(), Some(&IndexError::UnknownTweet(999)));
    }

    #[test]
    fn correction_pass_writes_only_surviving_hits() {
        let tmp = TempDir::new().unwrap();
        let hits = vec![
            hit(1, 10, "I'm a girl!", "f", "m a girl"),
            hit(2, 20, "RT @x: I'm a boy", "m", "m a boy"),
            hit(3, 30, "Deep down I'm a man", "m", "m a man"),
        ];
        let mut index = IdentityIndex::new();
        let mut raw = RecordStore::open(tmp.path(), "tg", Mode::Append).unwrap();
        for h in &hits {
            index.record_hit(h.user_id, h.tweet_id, &h.label, &h.query);
            raw.insert(h).unwrap();
        }
        raw.commit().unwrap();

        let config = crate::config::CollectionConfig::default();
        let rules = RuleSet::new(&config.filters, &config.flip_any, &config.flip_prefix).unwrap();
        let mut corrector = Corrector::new(&rules, &index);
        let summary = correct_query_tweets(tmp.path(), "tg", &mut corrector).unwrap();
        assert_eq!(
            summary,
            CorrectionSummary {
                kept: 1,
                flipped: 1,
                dropped: 1
            }
        );

        let mut fixed = RecordStore::open(tmp.path(), "tg_fix", Mode::Read).unwrap();
        let fixed: Vec<HitRecord> = fixed.iterate_as().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(fixed.len(), 2);
        assert_eq!(fixed[0], hits[0]);
        assert_eq!(fixed[1].user_id, 3);
        assert_eq!(fixed[1].label, "f");
        assert_eq!(fixed[1].tweet_text, "Deep down I'm a man");
    }

    #[test]
    fn rerunning_correction_does_not_duplicate() {
        let tmp = TempDir::new().unwrap();
        let h = hit(1, 10, "i'm a girl", "f", "m a girl");
        let mut index = IdentityIndex::new();
        index.record_hit(1, 10, "f", "m a girl");
        let mut raw = RecordStore::open(tmp.path(), "tg", Mode::Append).unwrap();
        raw.insert(&h).unwrap();
        raw.commit().unwrap();

        let rules = RuleSet::empty();
        for _ in 0..2 {
            let mut corrector = Corrector::new(&rules, &index);
            correct_query_tweets(tmp.path(), "tg", &mut corrector).unwrap();
        }
        let mut fixed = RecordStore::open(tmp.path(), "tg_fix", Mode::Read).unwrap();
        assert_eq!(fixed.iterate().unwrap().count(), 1);
    }

    #[test]
    fn failed_correction_keeps_previous_output() {
        let tmp = TempDir::new().unwrap();
        let mut raw = RecordStore::open(tmp.path(), "tg", Mode::Append).unwrap();
        raw.insert(&hit(1, 10, "i'm a girl", "f", "m a girl")).unwrap();
        raw.commit().unwrap();

        let rules = RuleSet::empty();
        let mut index = IdentityIndex::new();
        index.record_hit(1, 10, "f", "m a girl");
        correct_query_tweets(tmp.path(), "tg", &mut Corrector::new(&rules, &index)).unwrap();

        // A hit the next index does not know about.
        let mut raw = RecordStore::open(tmp.path(), "tg", Mode::Append).unwrap();
        raw.insert(&hit(2, 20, "i'm a boy", "m", "m a boy")).unwrap();
        raw.commit().unwrap();
        let err = correct_query_tweets(tmp.path(), "tg", &mut Corrector::new(&rules, &index))
            .unwrap_err();
        assert_eq!(err.downcast_ref::<IndexError>(), Some(&IndexError::UnknownUser(2)));

        let mut fixed = RecordStore::open(tmp.path(), "tg_fix", Mode::Read).unwrap();
        assert_eq!(fixed.iterate().unwrap().count(), 1);
    }
}
