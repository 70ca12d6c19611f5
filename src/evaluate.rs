//! Cross-corpus evaluation.
//!
//! For every ordered pair of configured sets the external fastText trainer
//! is run on `{train}.train` / `{test}.test`, and two reference baselines
//! are scored on the test split:
//!
//! - [`MajorityBaseline`]: always predicts the most common training label.
//! - [`LexiconGender`]: the weighted gender lexicon of Sap et al. (2014),
//!   loaded from a `term,weight` CSV with an `_intercept` row.

use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::Command;

use crate::config::Config;
use crate::export::{test_path, train_path};
use crate::models::{FEMALE, MALE};

const LABEL_PREFIX: &str = "__label__";
const INTERCEPT: &str = "_intercept";

/// One parsed export line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub label: &'static str,
    pub tokens: Vec<String>,
}

/// Parse a `__label__{n} text…` line. Label `1` is female, any other
/// integer male. Returns `None` for lines without a numeric label.
pub fn parse_line(line: &str) -> Option<Sample> {
    let mut parts = line.split_whitespace();
    let n: i64 = parts.next()?.strip_prefix(LABEL_PREFIX)?.parse().ok()?;
    Some(Sample {
        label: if n == 1 { FEMALE } else { MALE },
        tokens: parts.map(str::to_lowercase).collect(),
    })
}

/// Parse every labeled line of a split file.
pub fn load_samples(path: &Path) -> Result<Vec<Sample>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content.lines().filter_map(parse_line).collect())
}

/// Fraction of positions where `truth` and `predicted` agree.
pub fn accuracy<T: PartialEq>(truth: &[T], predicted: &[T]) -> Option<f64> {
    if truth.is_empty() || truth.len() != predicted.len() {
        return None;
    }
    let hits = truth.iter().zip(predicted).filter(|(a, b)| a == b).count();
    Some(hits as f64 / truth.len() as f64)
}

// ============ Majority baseline ============

#[derive(Debug, Default, Clone)]
pub struct MajorityBaseline {
    counts: BTreeMap<&'static str, usize>,
}

impl MajorityBaseline {
    pub fn fit(samples: &[Sample]) -> Self {
        let mut counts = BTreeMap::new();
        for s in samples {
            *counts.entry(s.label).or_insert(0) += 1;
        }
        Self { counts }
    }

    /// The most frequent label; ties go to the label that sorts first.
    pub fn predict(&self) -> Option<&'static str> {
        let mut best: Option<(&'static str, usize)> = None;
        for (&label, &count) in &self.counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((label, count));
            }
        }
        best.map(|(label, _)| label)
    }

    pub fn score(&self, samples: &[Sample]) -> Option<f64> {
        let majority = self.predict()?;
        let truth: Vec<&str> = samples.iter().map(|s| s.label).collect();
        let predicted = vec![majority; truth.len()];
        accuracy(&truth, &predicted)
    }
}

// ============ Lexicon baseline ============

#[derive(Debug, Clone)]
pub struct LexiconGender {
    intercept: f64,
    weights: HashMap<String, f64>,
}

impl LexiconGender {
    /// Load a lexicon CSV: first column the term, a `weight` column, and
    /// one `_intercept` row.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read lexicon {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse lexicon {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let weight_col = reader
            .headers()?
            .iter()
            .position(|h| h.trim() == "weight")
            .ok_or_else(|| anyhow::anyhow!("missing 'weight' column"))?;

        let mut intercept = None;
        let mut weights = HashMap::new();
        for row in reader.records() {
            let row = row?;
            let (Some(term), Some(weight)) = (row.get(0), row.get(weight_col)) else {
                continue;
            };
            let weight: f64 = weight
                .trim()
                .parse()
                .with_context(|| format!("Invalid weight for '{}': {}", term, weight))?;
            if term == INTERCEPT {
                intercept = Some(weight);
            } else {
                weights.insert(term.to_string(), weight);
            }
        }
        let Some(intercept) = intercept else {
            bail!("lexicon has no '{}' row", INTERCEPT);
        };
        Ok(Self { intercept, weights })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Intercept plus the summed weight of every token.
    pub fn value<S: AsRef<str>>(&self, tokens: &[S]) -> f64 {
        self.intercept
            + tokens
                .iter()
                .map(|t| self.weights.get(t.as_ref()).copied().unwrap_or(0.0))
                .sum::<f64>()
    }

    pub fn predict<S: AsRef<str>>(&self, tokens: &[S]) -> &'static str {
        if self.value(tokens) < 0.0 {
            MALE
        } else {
            FEMALE
        }
    }

    pub fn score(&self, samples: &[Sample]) -> Option<f64> {
        let truth: Vec<&str> = samples.iter().map(|s| s.label).collect();
        let predicted: Vec<&str> = samples.iter().map(|s| self.predict(&s.tokens)).collect();
        accuracy(&truth, &predicted)
    }
}

// ============ Grid ============

/// Baseline scores for one (train, test) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairScores {
    pub train: String,
    pub test: String,
    pub lexicon: Option<f64>,
    pub majority: Option<f64>,
}

/// Run the external trainer on one pair. Output goes straight to the
/// terminal; a non-zero exit is logged, not returned.
pub fn run_trainer(trainer: &[String], train: &str, test: &str) -> Result<()> {
    let Some((program, args)) = trainer.split_first() else {
        bail!("evaluate.trainer is empty");
    };
    let status = Command::new(program)
        .args(args)
        .arg(train)
        .arg(test)
        .status()
        .with_context(|| format!("Failed to run trainer '{}'", program))?;
    if !status.success() {
        tracing::warn!(%status, train, test, "trainer exited unsuccessfully");
    }
    Ok(())
}

/// Score both baselines for one pair of sets.
pub fn score_pair(dir: &Path, lexicon: &LexiconGender, train: &str, test: &str) -> Result<PairScores> {
    let train_samples = load_samples(&train_path(dir, train))?;
    let test_samples = load_samples(&test_path(dir, test))?;
    let majority = MajorityBaseline::fit(&train_samples);
    Ok(PairScores {
        train: train.to_string(),
        test: test.to_string(),
        lexicon: lexicon.score(&test_samples),
        majority: majority.score(&test_samples),
    })
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "n/a".to_string(), |s| format!("{:.3}", s))
}

/// Run the full grid over `config.evaluate.sets`.
///
/// A pair whose split files are missing is logged and skipped.
pub fn run_evaluation(config: &Config, with_trainer: bool) -> Result<Vec<PairScores>> {
    let lexicon_path = config.corpora.path(&config.corpora.lexicon);
    let lexicon = LexiconGender::load(&lexicon_path).with_context(|| {
        format!(
            "Could not load the gender lexicon; download it from http://www.wwbp.org/lexica.html and store it as {}",
            lexicon_path.display()
        )
    })?;
    tracing::info!(terms = lexicon.len(), "loaded lexicon");

    let sets = &config.evaluate.sets;
    let mut results = Vec::new();
    for train in sets {
        for test in sets {
            println!();
            println!(">>> train: {}\ttest: {}", train, test);
            if with_trainer {
                run_trainer(&config.evaluate.trainer, train, test)?;
            }
            match score_pair(&config.data.dir, &lexicon, train, test) {
                Ok(scores) => {
                    println!("  {:<24} {}", "Sap baseline @ test:", format_score(scores.lexicon));
                    println!("  {:<24} {}", "Maj baseline @ test:", format_score(scores.majority));
                    results.push(scores);
                }
                Err(e) => tracing::error!(train = %train, test = %test, "skipping pair: {:#}", e),
            }
        }
    }
    println!();
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LEXICON: &str = "term,weight\n_intercept,-0.5\nlove,1.0\nbeer,-1.0\n";

    fn sample(label: &'static str, tokens: &[&str]) -> Sample {
        Sample {
            label,
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn parses_labels_and_lowercases_tokens() {
        assert_eq!(parse_line("__label__1 I LOVE\tit"), Some(sample("f", &["i", "love", "it"])));
        assert_eq!(parse_line("__label__0 x").map(|s| s.label), Some("m"));
        assert_eq!(parse_line("__label__7 x").map(|s| s.label), Some("m"));
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("label 1 x"), None);
        assert_eq!(parse_line("__label__f x"), None);
    }

    #[test]
    fn accuracy_handles_empty_and_mismatched() {
        assert_eq!(accuracy(&["f", "m"], &["f", "f"]), Some(0.5));
        assert_eq!(accuracy::<&str>(&[], &[]), None);
        assert_eq!(accuracy(&["f"], &["f", "m"]), None);
    }

    #[test]
    fn majority_is_fit_on_training_labels_only() {
        let train = vec![sample("m", &[]), sample("m", &[]), sample("f", &[])];
        let test = vec![sample("f", &[]), sample("f", &[]), sample("m", &[]), sample("f", &[])];
        let baseline = MajorityBaseline::fit(&train);
        assert_eq!(baseline.predict(), Some("m"));
        assert_eq!(baseline.score(&test), Some(0.25));
        // Scoring does not update the fitted counts.
        assert_eq!(baseline.score(&test), Some(0.25));
    }

    #[test]
    fn majority_ties_and_empty_fit() {
        let tied = MajorityBaseline::fit(&[sample("m", &[]), sample("f", &[])]);
        assert_eq!(tied.predict(), Some("f"));
        assert_eq!(MajorityBaseline::fit(&[]).predict(), None);
    }

    #[test]
    fn lexicon_scores_tokens_with_intercept() {
        let lexicon = LexiconGender::parse(LEXICON).unwrap();
        assert_eq!(lexicon.len(), 2);
        assert_eq!(lexicon.predict(&["love", "love"]), "f");
        assert_eq!(lexicon.predict(&["beer"]), "m");
        assert_eq!(lexicon.predict::<&str>(&[]), "m");
        assert_eq!(lexicon.predict(&["love"]), "f");

        let samples = vec![sample("f", &["love"]), sample("f", &["beer"])];
        assert_eq!(lexicon.score(&samples), Some(0.5));
    }

    #[test]
    fn lexicon_requires_intercept() {
        assert!(LexiconGender::parse("term,weight\nlove,1.0\n").is_err());
        assert!(LexiconGender::parse("term,score\n_intercept,1\n").is_err());
    }

    #[test]
    fn score_pair_reads_split_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.train"), "__label__1 x\n__label__1 y\n__label__0 z\n").unwrap();
        std::fs::write(tmp.path().join("b.test"), "__label__1 love\n__label__0 beer\n").unwrap();
        let lexicon = LexiconGender::parse(LEXICON).unwrap();

        let scores = score_pair(tmp.path(), &lexicon, "a", "b").unwrap();
        assert_eq!(scores.lexicon, Some(1.0));
        assert_eq!(scores.majority, Some(0.5));
        assert!(score_pair(tmp.path(), &lexicon, "b", "a").is_err());
    }

    #[test]
    fn empty_trainer_is_rejected() {
        assert!(run_trainer(&[], "a", "b").is_err());
    }

    #[test]
    fn scores_format_to_three_decimals() {
        assert_eq!(format_score(Some(2.0 / 3.0)), "0.667");
        assert_eq!(format_score(None), "n/a");
    }
}
