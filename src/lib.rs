//! # Leakscout
//!
//! A continuous leak hunter for code-hosting platforms.
//!
//! Leakscout searches a platform's code-search API for operator-configured
//! sensitive keywords, downloads matching files, extracts minimal context
//! windows ("fragments") around each keyword occurrence, filters them
//! through operator-maintained rejection rules, merges nearby fragments,
//! and persists everything in SQLite for human triage via a CLI and a thin
//! JSON HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌───────────┐
//! │  Search  │──▶│  Fetch   │──▶│  Extract  │──▶│  SQLite   │
//! │ per-token│   │ per-token│   │ window +  │   │ reports + │
//! │ workers  │   │ workers  │   │ rule+merge│   │ fragments │
//! └──────────┘   └──────────┘   └───────────┘   └─────┬─────┘
//!                                                     │
//!                                   ┌─────────────────┤
//!                                   ▼                 ▼
//!                             ┌───────────┐     ┌──────────┐
//!                             │    CLI    │     │   HTTP   │
//!                             │(leakscout)│     │ (triage) │
//!                             └───────────┘     └──────────┘
//! ```
//!
//! Each stage reads reports in one status from the store, fans them out to
//! one long-lived worker per API credential (each with its own token-bucket
//! rate limiter), and advances report status on success. Stages never abort
//! on a single item; all worker errors funnel into one drained error stream.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Report/fragment/rule persistence contract |
//! | [`content_store`] | Content-addressed file storage |
//! | [`limiter`] | Per-credential token-bucket rate limiting |
//! | [`client`] | Rate-limited request execution and retry |
//! | [`window`] | Keyword context windowing |
//! | [`merge`] | Fragment merge engine |
//! | [`rules`] | Rejection rule engine |
//! | [`search`] | Search stage |
//! | [`fetch`] | Fetch stage |
//! | [`extract`] | Extract stage |
//! | [`pipeline`] | Stage coordination, error drain, cancellation |
//! | [`triage`] | Manual fragment disposition |
//! | [`server`] | Triage HTTP API |

pub mod client;
pub mod config;
pub mod content_store;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod limiter;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod rules;
pub mod search;
pub mod server;
pub mod store;
pub mod triage;
pub mod window;
