//! # Distant Labels
//!
//! Distant supervision for author gender on Twitter.
//!
//! Tweets matching self-reports such as "I'm a girl" label their authors;
//! a small rule set corrects or discards misleading matches; the authors'
//! timelines, cleaned of the self-reports, become the training corpus. Three
//! hand-labeled corpora are rehydrated the same way for comparison.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Search   │──▶│ Hit store  │──▶│ Correction   │──▶│ {id}_fix   │
//! │ (API)    │   │ + index    │   │ (rules)      │   └─────┬──────┘
//! └──────────┘   └────────────┘   └──────────────┘         │
//!                                                          ▼
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Export   │◀──│ {id}_msg_  │◀──│ Cleaning     │◀──│ Timelines  │
//! │ + split  │   │ fix        │   │              │   │ (API)      │
//! └──────────┘   └────────────┘   └──────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! distant collect               # search queries, store and correct hits
//! distant timelines             # fetch and clean author timelines
//! distant corpus all            # rehydrate the comparison corpora
//! distant export twitter_gender query_gender
//! distant split twitter_gender
//! distant evaluate
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core record types |
//! | [`store`] | Append-only JSON-lines record stores |
//! | [`identity`] | User label and query-hit index |
//! | [`rules`] | Query table and label-correction rules |
//! | [`correct`] | Correction pass over collected hits |
//! | [`clean`] | Removal of query mentions from timelines |
//! | [`api`] | Social API capability and rate-limit backoff |
//! | [`twitter`] | Twitter REST client |
//! | [`collect`] | Collection orchestrator |
//! | [`corpora`] | Comparison corpora |
//! | [`export`] | fastText batches and train/test split |
//! | [`evaluate`] | Baselines and cross-corpus grid |
//! | [`stats`] | Annotation statistics |

pub mod api;
pub mod clean;
pub mod collect;
pub mod config;
pub mod corpora;
pub mod correct;
pub mod evaluate;
pub mod export;
pub mod identity;
pub mod models;
pub mod rules;
pub mod stats;
pub mod store;
pub mod twitter;
