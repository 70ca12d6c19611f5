//! # Distant Labels CLI (`distant`)
//!
//! The `distant` binary runs every stage of the corpus pipeline: query
//! collection, label correction, timeline collection and cleaning,
//! comparison corpora, export, and evaluation.
//!
//! ## Usage
//!
//! ```bash
//! distant --config ./config/distant.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `distant collect` | Search the queries, store hits and authors, correct labels |
//! | `distant correct` | Re-run label correction over the stored hits |
//! | `distant timelines` | Fetch and clean the labeled authors' timelines |
//! | `distant clean` | Re-run timeline cleaning |
//! | `distant corpus <name>` | Rehydrate a comparison corpus (`query`, `plank`, `volkova`, `all`) |
//! | `distant export <id>...` | Write fastText batches for collections |
//! | `distant split <id>` | Split a collection's batches into train and test |
//! | `distant evaluate` | Run the cross-corpus grid and baselines |
//! | `distant stats` | Report Query corpus annotation statistics |
//!
//! Collection commands read Twitter credentials from `TWITTER_APP_PUBLIC`,
//! `TWITTER_APP_SECRET`, `TWITTER_PER_PUBLIC`, and `TWITTER_PER_SECRET`.
//! Logs go to stderr; set `RUST_LOG` to change verbosity.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use distant_labels::api::{ApiError, PageCursor, SocialApi, TweetCursor};
use distant_labels::clean::Granularity;
use distant_labels::collect::DistantCollection;
use distant_labels::config::{self, Config, RunMode};
use distant_labels::corpora::{self, Corpus};
use distant_labels::models::{Tweet, User};
use distant_labels::twitter::TwitterClient;
use distant_labels::{evaluate, export, stats};

/// Distant Labels CLI: distant-supervision gender corpora from Twitter.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. An empty file reproduces the paper's settings.
#[derive(Parser)]
#[command(
    name = "distant",
    about = "Distant-supervision gender corpus collection, correction, and evaluation",
    version,
    long_about = "Collects self-reported gender (\"I'm a girl\") from Twitter search, corrects \
    misleading matches with heuristic rules, gathers and cleans the authors' timelines, and \
    exports fastText-ready author samples alongside three hand-labeled comparison corpora."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/distant.toml`.
    #[arg(long, global = true, default_value = "./config/distant.toml")]
    config: PathBuf,

    /// Collect a single page of the first query or user only.
    ///
    /// Overrides `collection.mode` for a quick end-to-end check.
    #[arg(long, global = true)]
    test_mode: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Search every query and store hits, then correct their labels.
    ///
    /// Appends to `{db_id}` and `{db_id}_usr`, then rewrites `{db_id}_fix`.
    Collect,

    /// Re-run label correction over the stored hits.
    ///
    /// Rebuilds the index from the raw hit store and rewrites `{db_id}_fix`.
    /// Useful after changing the rules in the configuration.
    Correct,

    /// Fetch the timelines of all labeled users, then clean them.
    ///
    /// The identity index is rebuilt from `{db_id}_fix` (or `{db_id}` when
    /// no corrected hits exist).
    Timelines,

    /// Re-run timeline cleaning over `{db_id}_msg`.
    Clean {
        /// Override `collection.clean_level`.
        #[arg(long, value_enum)]
        level: Option<LevelArg>,
    },

    /// Rehydrate a comparison corpus: profiles, then timelines.
    Corpus {
        /// Which corpus to collect.
        #[arg(value_enum)]
        name: CorpusArg,
    },

    /// Write `{id}.dataf` fastText batches for one or more collections.
    Export {
        /// Collection ids (e.g. `twitter_gender`, `query_gender`).
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Split `{id}.dataf` into `{id}.train` and `{id}.test`.
    Split {
        /// Collection id.
        id: String,

        /// Override `export.test_size` (fraction of lines held out).
        #[arg(long)]
        test_size: Option<f64>,
    },

    /// Run the cross-corpus evaluation grid.
    ///
    /// Invokes the configured trainer for every (train, test) pair of
    /// `evaluate.sets` and prints the lexicon and majority baselines.
    Evaluate {
        /// Only score the baselines; do not run the trainer.
        #[arg(long)]
        skip_trainer: bool,
    },

    /// Report annotation statistics of the Query corpus.
    Stats {
        /// Use every annotation instead of the subset available for the paper.
        #[arg(long)]
        all: bool,

        /// Print the label distribution.
        #[arg(long)]
        labels: bool,

        /// Print the share of bot accounts.
        #[arg(long)]
        bots: bool,

        /// Print agreement between distant and hand labels.
        #[arg(long)]
        agreement: bool,

        /// Print Cohen's kappa between annotators.
        #[arg(long)]
        interrater: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
    Messages,
    Query,
}

impl From<LevelArg> for Granularity {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Messages => Granularity::Messages,
            LevelArg::Query => Granularity::Query,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CorpusArg {
    Query,
    Plank,
    Volkova,
    All,
}

impl CorpusArg {
    fn corpora(self) -> Vec<Corpus> {
        match self {
            CorpusArg::Query => vec![Corpus::Query],
            CorpusArg::Plank => vec![Corpus::Plank],
            CorpusArg::Volkova => vec![Corpus::Volkova],
            CorpusArg::All => Corpus::ALL.to_vec(),
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("distant_labels=info,distant=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut cfg = config::load_config(&cli.config)?;
    if cli.test_mode {
        cfg.collection.mode = RunMode::Test;
    }

    let result = run(cli.command, &cfg);
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

fn run(command: Commands, cfg: &Config) -> Result<()> {
    match command {
        Commands::Collect => {
            let client = TwitterClient::from_env(&cfg.api)?;
            let summary = DistantCollection::from_config(&client, cfg)?.fetch_query_tweets()?;
            println!(
                "Collected {} hits: {} kept, {} flipped, {} dropped.",
                summary.kept + summary.flipped + summary.dropped,
                summary.kept,
                summary.flipped,
                summary.dropped
            );
        }
        Commands::Correct => {
            let client = OfflineApi;
            let summary = DistantCollection::from_config(&client, cfg)?.correct_query_tweets()?;
            println!(
                "Corrected {} hits: {} kept, {} flipped, {} dropped.",
                summary.kept + summary.flipped + summary.dropped,
                summary.kept,
                summary.flipped,
                summary.dropped
            );
        }
        Commands::Timelines => {
            let client = TwitterClient::from_env(&cfg.api)?;
            let summary = DistantCollection::from_config(&client, cfg)?.fetch_user_tweets()?;
            println!(
                "Fetched {} messages from {} users ({} skipped).",
                summary.messages, summary.users, summary.skipped
            );
        }
        Commands::Clean { level } => {
            let client = OfflineApi;
            let mut collection = DistantCollection::from_config(&client, cfg)?;
            if let Some(level) = level {
                collection = collection.with_granularity(level.into());
            }
            collection.reconstruct_index()?;
            let summary = collection.remove_query_tweets()?;
            println!("Kept {} messages, removed {}.", summary.kept, summary.removed);
        }
        Commands::Corpus { name } => {
            let client = TwitterClient::from_env(&cfg.api)?;
            let targets = name.corpora();
            let many = targets.len() > 1;
            for corpus in targets {
                match corpora::collect_corpus(&client, cfg, corpus) {
                    Ok(()) => println!("Collected the {} corpus.", corpus),
                    Err(e) if many => tracing::error!(%corpus, "{:#}", e),
                    Err(e) => return Err(e),
                }
            }
        }
        Commands::Export { ids } => {
            for id in &ids {
                let summary = export::data_to_batches(&cfg.data.dir, id, &cfg.export)?;
                println!(
                    "Exported {} batches for {} ({} users, {} skipped).",
                    summary.lines, id, summary.users, summary.skipped_users
                );
            }
        }
        Commands::Split { id, test_size } => {
            let test_size = test_size.unwrap_or(cfg.export.test_size);
            if !(0.0..=1.0).contains(&test_size) {
                anyhow::bail!("--test-size must be in [0.0, 1.0]");
            }
            let summary = export::batches_to_sets(&cfg.data.dir, &id, test_size)?;
            println!("Split {}: {} train, {} test.", id, summary.train, summary.test);
        }
        Commands::Evaluate { skip_trainer } => {
            evaluate::run_evaluation(cfg, !skip_trainer)?;
        }
        Commands::Stats {
            all,
            labels,
            bots,
            agreement,
            interrater,
        } => {
            let path = cfg.corpora.path(&cfg.corpora.query);
            let options = stats::ReportOptions {
                labels,
                bots,
                agreement,
                interrater,
            };
            stats::run_stats(&path, !all, options)?;
        }
    }

    Ok(())
}

/// Stand-in API for commands that only touch local stores.
struct OfflineApi;

impl SocialApi for OfflineApi {
    fn search(&self, _query: &str) -> TweetCursor<'_> {
        Box::new(NoPages)
    }

    fn timeline(&self, _user_id: u64) -> TweetCursor<'_> {
        Box::new(NoPages)
    }

    fn lookup_users(&self, _ids: &[u64]) -> Result<Vec<User>, ApiError> {
        Ok(Vec::new())
    }
}

struct NoPages;

impl PageCursor for NoPages {
    type Item = Tweet;

    fn next_page(&mut self) -> Result<Option<Vec<Tweet>>, ApiError> {
        Ok(None)
    }
}
