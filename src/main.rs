//! # Leakscout CLI
//!
//! The `leakscout` binary drives the crawl pipeline and the triage
//! surface. All commands accept a `--config` flag pointing to a TOML
//! configuration file.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `leakscout init` | Create the SQLite database and run schema migrations |
//! | `leakscout run` | Run search → fetch → extract |
//! | `leakscout search` | Run only the search stage |
//! | `leakscout fetch` | Run only the fetch stage |
//! | `leakscout extract` | Run only the extract stage |
//! | `leakscout rules <list\|add\|rm>` | Manage rejection rules |
//! | `leakscout mark <id> <false\|valid>` | Manually dispose a fragment |
//! | `leakscout serve` | Start the triage JSON API |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! leakscout init --config ./config/leakscout.toml
//!
//! # Bounded production crawl
//! leakscout run --deadline-minutes 40
//!
//! # Add a rejection rule (must match its own test sample)
//! leakscout rules add --expr 'EXAMPLE_[A-Z_]+' --test 'EXAMPLE_API_KEY'
//!
//! # Triage from the shell
//! leakscout mark 1532 false
//! ```

mod client;
mod config;
mod content_store;
mod db;
mod extract;
mod fetch;
mod limiter;
mod merge;
mod migrate;
mod models;
mod pipeline;
mod rules;
mod search;
mod server;
mod store;
mod triage;
mod window;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::models::{DISPOSITIVE_MANUAL_REJECT, DISPOSITIVE_MANUAL_VERIFY};
use crate::pipeline::Stages;
use crate::store::Store;

/// Leakscout — a continuous leak hunter for code-hosting platforms.
#[derive(Parser)]
#[command(
    name = "leakscout",
    about = "Leakscout — crawl a code-search API for sensitive keywords and triage the findings",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/leakscout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (reports, fragments, reject_rules). Idempotent.
    Init,

    /// Run the full pipeline: search, then fetch, then extract.
    Run {
        /// Bound the whole run; the pipeline cancels cooperatively when
        /// the window closes.
        #[arg(long)]
        deadline_minutes: Option<u64>,
    },

    /// Run only the search stage (discover new reports).
    Search {
        #[arg(long)]
        deadline_minutes: Option<u64>,
    },

    /// Run only the fetch stage (download pending reports).
    Fetch {
        #[arg(long)]
        deadline_minutes: Option<u64>,
    },

    /// Run only the extract stage (window, filter, merge fragments).
    Extract {
        #[arg(long)]
        deadline_minutes: Option<u64>,
    },

    /// Manage rejection rules.
    Rules {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Manually dispose a fragment.
    Mark {
        /// Fragment id.
        fragment_id: i64,
        /// `false` (not a leak) or `valid` (verified leak).
        verdict: String,
    },

    /// Start the triage JSON API server.
    Serve,
}

/// Rejection rule subcommands.
#[derive(Subcommand)]
enum RuleAction {
    /// List all rules.
    List,
    /// Add a rule. The expression must match the provided test sample,
    /// guarding against rules that would never fire. Triggers a
    /// reconciliation pass over extracted fragments.
    Add {
        /// Regular expression.
        #[arg(long)]
        expr: String,
        /// Sample string the expression must match.
        #[arg(long)]
        test: String,
    },
    /// Remove a rule by id. Triggers a reconciliation pass.
    Rm {
        /// Rule id.
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run { deadline_minutes } => {
            run_stages(&cfg, Stages::All, deadline_minutes).await?;
        }
        Commands::Search { deadline_minutes } => {
            run_stages(&cfg, Stages::Search, deadline_minutes).await?;
        }
        Commands::Fetch { deadline_minutes } => {
            run_stages(&cfg, Stages::Fetch, deadline_minutes).await?;
        }
        Commands::Extract { deadline_minutes } => {
            run_stages(&cfg, Stages::Extract, deadline_minutes).await?;
        }
        Commands::Rules { action } => {
            let pool = db::connect(&cfg).await?;
            let store = Store::new(pool.clone());
            match action {
                RuleAction::List => {
                    for rule in store.rules().await? {
                        println!("{:>6}  {}", rule.id, rule.rule.as_str());
                    }
                }
                RuleAction::Add { expr, test } => {
                    let compiled = regex::Regex::new(&expr)?;
                    if !compiled.is_match(&test) {
                        anyhow::bail!("Expression does not match its test sample");
                    }
                    let id = store.insert_rule(&expr).await?;
                    let summary = rules::reconcile(&store).await?;
                    println!("rule {} added", id);
                    println!("  fragments matched: {}", summary.fragments_matched);
                    println!("  reports closed: {}", summary.reports_closed);
                }
                RuleAction::Rm { id } => {
                    store.remove_rule(id).await?;
                    let summary = rules::reconcile(&store).await?;
                    println!("rule {} removed", id);
                    println!("  fragments matched: {}", summary.fragments_matched);
                    println!("  reports closed: {}", summary.reports_closed);
                }
            }
            pool.close().await;
        }
        Commands::Mark {
            fragment_id,
            verdict,
        } => {
            let dispositive = match verdict.as_str() {
                "false" => DISPOSITIVE_MANUAL_REJECT,
                "valid" => DISPOSITIVE_MANUAL_VERIFY,
                other => anyhow::bail!("Unknown verdict '{}': expected false or valid", other),
            };
            let pool = db::connect(&cfg).await?;
            let store = Store::new(pool.clone());
            triage::mark_fragment(&store, fragment_id, dispositive).await?;
            println!("fragment {} marked {}", fragment_id, verdict);
            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_stages(
    cfg: &config::Config,
    stages: Stages,
    deadline_minutes: Option<u64>,
) -> anyhow::Result<()> {
    let deadline = deadline_minutes.map(|m| Duration::from_secs(m * 60));
    let summary = pipeline::run(cfg, stages, deadline).await?;

    println!("run");
    println!("  reports discovered: {}", summary.reports_discovered);
    println!("  reports fetched: {}", summary.reports_fetched);
    println!("  reports fragmented: {}", summary.reports_fragmented);
    println!("  reports closed: {}", summary.reports_closed);
    println!("ok");
    Ok(())
}
