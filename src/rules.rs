//! Query table and lexical label-correction rules.
//!
//! A distant label is only as good as the self-report it came from. The
//! rules here look at the text around a matched query and decide whether
//! the report should be trusted, reversed, or thrown away:
//!
//! - **filter** patterns veto a text outright (retweets, quotes).
//! - **flip_any** patterns reverse the label wherever they occur
//!   ("according to him i'm a girl").
//! - **flip_prefix** patterns reverse the label when they occur before the
//!   query ("i guess i'm a girl").
//!
//! Flips are only considered when the query itself is present and ends on
//! a word boundary, so "m a girl" does not fire inside "m a girlfriend".
//!
//! # Pattern syntax
//!
//! Rule patterns are matched literally against lower-cased text, except
//! that a leading or trailing space stands for a word boundary: a space,
//! one of `. ! , : ;`, any other whitespace, or the edge of the text.
//! `"rt "` therefore vetoes both `"rt @x ..."` and `"rt: ..."`.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use regex::Regex;

use crate::config::QUERY_PLACEHOLDER;
use crate::models::flip;

/// Characters that end a word.
const BOUNDARY_CLASS: &str = r"[\s.!,:;]";

/// Mapping of full query text to the distant label it assigns.
#[derive(Debug, Clone, Default)]
pub struct QueryTable {
    queries: IndexMap<String, String>,
}

impl QueryTable {
    /// Format `template` with every vocabulary word, keeping word order.
    pub fn new(template: &str, words: &IndexMap<String, String>) -> Self {
        let queries = words
            .iter()
            .map(|(word, label)| (template.replace(QUERY_PLACEHOLDER, word), label.clone()))
            .collect();
        Self { queries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.queries.iter().map(|(q, l)| (q.as_str(), l.as_str()))
    }

    pub fn label(&self, query: &str) -> Option<&str> {
        self.queries.get(query).map(|l| l.as_str())
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Whether any query is a case-insensitive substring of `text`.
    pub fn mentioned_in(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.queries
            .keys()
            .any(|query| text.contains(&query.to_lowercase()))
    }
}

/// A compiled rule pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a rule pattern (see the module docs for the syntax).
    pub fn new(pattern: &str) -> Result<Self> {
        let lowered = pattern.to_lowercase();
        let core = lowered.trim_matches(' ');

        let expr = if core.is_empty() {
            regex::escape(&lowered)
        } else {
            let lead = if lowered.starts_with(' ') {
                format!("(?:^|{})", BOUNDARY_CLASS)
            } else {
                String::new()
            };
            let trail = if lowered.ends_with(' ') {
                format!("(?:{}|$)", BOUNDARY_CLASS)
            } else {
                String::new()
            };
            format!("{}{}{}", lead, regex::escape(core), trail)
        };

        let regex = Regex::new(&expr)
            .with_context(|| format!("Invalid rule pattern: {:?}", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// A query pattern: the query must be followed by a word boundary.
    pub fn anchored_query(query: &str) -> Result<Self> {
        let expr = format!(
            "{}(?:{}|$)",
            regex::escape(&query.to_lowercase()),
            BOUNDARY_CLASS
        );
        let regex =
            Regex::new(&expr).with_context(|| format!("Invalid query pattern: {:?}", query))?;
        Ok(Self {
            source: query.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// End offsets of every match in `text`.
    fn ends<'t>(&'t self, text: &'t str) -> impl Iterator<Item = usize> + 't {
        self.regex.find_iter(text).map(|m| m.end())
    }

    /// Start offsets of every match in `text`.
    fn starts<'t>(&'t self, text: &'t str) -> impl Iterator<Item = usize> + 't {
        self.regex.find_iter(text).map(|m| m.start())
    }
}

/// Characters that close a clause.
const CLAUSE_BREAKS: [char; 4] = ['.', '!', '?', ';'];

/// Whether a prefix match ending at `end` shares a clause with the query
/// starting at `query_start`. The boundary a prefix match consumes counts.
fn same_clause(text: &str, end: usize, query_start: usize) -> bool {
    !text[..end].ends_with(CLAUSE_BREAKS) && !text[end..query_start].contains(CLAUSE_BREAKS)
}

fn compile_all(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns.iter().map(|p| Pattern::new(p)).collect()
}

/// Outcome of applying the rules to one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// A filter pattern matched; the text is not a usable self-report.
    Drop,
    Keep(String),
    Flip(String),
}

impl Decision {
    /// The resulting label, if the text was not dropped.
    pub fn label(&self) -> Option<&str> {
        match self {
            Decision::Drop => None,
            Decision::Keep(label) | Decision::Flip(label) => Some(label.as_str()),
        }
    }

    pub fn into_label(self) -> Option<String> {
        match self {
            Decision::Drop => None,
            Decision::Keep(label) | Decision::Flip(label) => Some(label),
        }
    }
}

/// The filter and flip rules of one collection run.
#[derive(Debug, Clone)]
pub struct RuleSet {
    filter: Vec<Pattern>,
    flip_any: Vec<Pattern>,
    flip_prefix: Vec<Pattern>,
}

impl RuleSet {
    pub fn new(filter: &[String], flip_any: &[String], flip_prefix: &[String]) -> Result<Self> {
        Ok(Self {
            filter: compile_all(filter)?,
            flip_any: compile_all(flip_any)?,
            flip_prefix: compile_all(flip_prefix)?,
        })
    }

    /// Rules that never drop and never flip.
    pub fn empty() -> Self {
        Self {
            filter: Vec::new(),
            flip_any: Vec::new(),
            flip_prefix: Vec::new(),
        }
    }

    /// Decide what happens to `label`, which was assigned because `query`
    /// matched `text`.
    ///
    /// Filters are checked first and short-circuit everything else. A text
    /// matching both flip rules is flipped once.
    ///
    /// A `flip_prefix` pattern need not touch the query ("i guess i'm a
    /// girl" flips on `" guess "`), but it must sit in the same clause as
    /// the last query occurrence: no `.`, `!`, `?` or `;` in between.
    pub fn decide(&self, label: &str, query: &str, text: &str) -> Result<Decision> {
        let anchored = Pattern::anchored_query(query)?;
        Ok(self.decide_anchored(label, &anchored, text))
    }

    /// [`decide`](RuleSet::decide) with a precompiled query pattern.
    pub fn decide_anchored(&self, label: &str, query: &Pattern, text: &str) -> Decision {
        let text = text.to_lowercase();

        if self.filter.iter().any(|p| p.is_match(&text)) {
            return Decision::Drop;
        }

        let Some(last_query_start) = query.starts(&text).last() else {
            return Decision::Keep(label.to_string());
        };

        if self.flip_any.iter().any(|p| p.is_match(&text)) {
            return Decision::Flip(flip(label).to_string());
        }

        let prefixed = self.flip_prefix.iter().any(|p| {
            p.ends(&text)
                .any(|end| end <= last_query_start && same_clause(&text, end, last_query_start))
        });
        if prefixed {
            return Decision::Flip(flip(label).to_string());
        }

        Decision::Keep(label.to_string())
    }
}
