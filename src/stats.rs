//! Annotation statistics for the Query corpus.
//!
//! Summarizes the hand annotations that validate the distant labels:
//! label distribution, share of bots, agreement between the annotator
//! majority and the distant label, and Cohen's kappa between annotators.
//! Used by `distant stats`.

use anyhow::Result;
use indexmap::IndexMap;
use std::collections::BTreeSet;

use crate::corpora::Annotation;

/// Annotations with ids below this were available when the paper was written.
pub const PAPER_ID_LIMIT: u64 = 210_040_000;

/// Majority-vote categories, in report order.
const MAJORITY_KEYS: [&str; 5] = ["m", "f", "o", "-", "0"];

/// Which sections `report` prints.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    pub labels: bool,
    pub bots: bool,
    pub agreement: bool,
    pub interrater: bool,
}

/// Inter-rater agreement between two annotators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kappa {
    pub pairs: usize,
    pub kappa: f64,
}

pub struct AnnotationStats {
    paper: bool,
    total: usize,
    bots: usize,
    majority: IndexMap<&'static str, usize>,
    distant: Vec<String>,
    hand: Vec<String>,
    raters: [Vec<String>; 3],
}

impl AnnotationStats {
    /// Compute statistics, restricted to the paper subset when `paper` is set.
    pub fn new(annotations: &IndexMap<String, Annotation>, paper: bool) -> Self {
        let mut stats = Self {
            paper,
            total: 0,
            bots: 0,
            majority: MAJORITY_KEYS.iter().map(|k| (*k, 0)).collect(),
            distant: Vec::new(),
            hand: Vec::new(),
            raters: Default::default(),
        };

        for (id, a) in annotations {
            if paper && !id.trim().parse::<u64>().is_ok_and(|n| n < PAPER_ID_LIMIT) {
                continue;
            }
            stats.total += 1;
            if a.is_bot() {
                stats.bots += 1;
            }
            if let Some(count) = stats.majority.get_mut(a.majority.as_str()) {
                *count += 1;
            }
            if (a.majority == "m" || a.majority == "f") && a.query_label2 != "0" {
                stats.distant.push(a.query_label2.clone());
                stats.hand.push(a.majority.clone());
            }
            for (n, rater) in stats.raters.iter_mut().enumerate() {
                rater.push(a.rater(n + 1).to_string());
            }
        }
        stats
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn majority_count(&self, key: &str) -> usize {
        self.majority.get(key).copied().unwrap_or(0)
    }

    /// Percentage of bot accounts, one decimal.
    pub fn bot_percentage(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some(round_to(self.bots as f64 / self.total as f64 * 100.0, 1))
    }

    /// Percentage of profiles whose distant label matches the annotator
    /// majority, over profiles with an `m`/`f` majority and a distant label.
    pub fn agreement(&self) -> Option<f64> {
        if self.hand.is_empty() {
            return None;
        }
        let hits = self.hand.iter().zip(&self.distant).filter(|(h, d)| h == d).count();
        Some(round_to(hits as f64 / self.hand.len() as f64 * 100.0, 1))
    }

    /// Cohen's kappa between annotators `a` and `b` (1-based), ignoring
    /// profiles where either gave a missing or other rating (and unsure
    /// outside paper mode).
    pub fn kappa(&self, a: usize, b: usize) -> Option<Kappa> {
        let ignore: &[&str] = if self.paper { &["0", "o"] } else { &["0", "o", "-"] };
        let pairs: Vec<(&str, &str)> = self.raters[a - 1]
            .iter()
            .zip(&self.raters[b - 1])
            .map(|(x, y)| (x.as_str(), y.as_str()))
            .filter(|(x, y)| !ignore.contains(x) && !ignore.contains(y))
            .collect();
        let kappa = cohen_kappa(&pairs)?;
        Some(Kappa {
            pairs: pairs.len(),
            kappa,
        })
    }

    /// Rater pairs reported: only 1:2 in paper mode.
    pub fn rater_pairs(&self) -> &'static [(usize, usize)] {
        if self.paper {
            &[(1, 2)]
        } else {
            &[(1, 2), (2, 3), (1, 3)]
        }
    }

    pub fn report(&self, options: ReportOptions) {
        if self.paper {
            println!("PLEASE NOTE: this information is for the annotation part only.");
            println!("The models were trained on _all_ data.");
        } else {
            println!("PLEASE NOTE: any statistics dealing with annotations in the paper");
            println!("deal with a subset, reproducible with the default (paper) mode.");
        }
        println!();
        println!("  {:<24} {}", "Amount of instances", self.total);
        if options.labels {
            for (key, name) in MAJORITY_KEYS
                .iter()
                .zip(["males", "females", "other", "unsure", "missing"])
            {
                println!("  {:<24} {}", format!("Amount of {}", name), self.majority_count(key));
            }
        }
        if options.bots {
            println!("  {:<24} {}", "Percentage of bots", format_percent(self.bot_percentage()));
        }
        if options.agreement {
            println!("  {:<24} {}", "Agreement score", format_percent(self.agreement()));
        }
        if options.interrater {
            for &(a, b) in self.rater_pairs() {
                match self.kappa(a, b) {
                    Some(k) => println!(
                        "  {:<24} {:.2}",
                        format!("Kappa {} : {} @ {}", a, b, k.pairs),
                        k.kappa
                    ),
                    None => println!("  {:<24} n/a", format!("Kappa {} : {}", a, b)),
                }
            }
        }
        println!();
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn format_percent(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.1} %", v))
}

/// Cohen's kappa over paired categorical ratings.
///
/// Returns `None` for no pairs. When expected agreement is total the
/// score is 1.0 if the raters agree everywhere, else 0.0.
pub fn cohen_kappa(pairs: &[(&str, &str)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let n = pairs.len() as f64;
    let categories: BTreeSet<&str> = pairs.iter().flat_map(|(x, y)| [*x, *y]).collect();

    let observed = pairs.iter().filter(|(x, y)| x == y).count() as f64 / n;
    let expected: f64 = categories
        .iter()
        .map(|c| {
            let px = pairs.iter().filter(|(x, _)| x == c).count() as f64 / n;
            let py = pairs.iter().filter(|(_, y)| y == c).count() as f64 / n;
            px * py
        })
        .sum();

    if (1.0 - expected).abs() < f64::EPSILON {
        return Some(if observed >= 1.0 { 1.0 } else { 0.0 });
    }
    Some((observed - expected) / (1.0 - expected))
}

/// Load the Query corpus and print the requested report.
pub fn run_stats(path: &std::path::Path, paper: bool, options: ReportOptions) -> Result<()> {
    let annotations = crate::corpora::load_annotations(path)?;
    let stats = AnnotationStats::new(&annotations, paper);
    stats.report(options);
    Ok(())
}
