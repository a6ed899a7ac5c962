//! Extract stage.
//!
//! For every `fetched` report: read the stored content, normalize it,
//! window every configured keyword, run each window through the rejection
//! rules (rule-matched windows are persisted immediately with the rule's
//! id and excluded from merging), merge the survivors, persist the merged
//! set unreviewed, and advance the report to `fragmented`, or `false`
//! when nothing survived filtering.
//!
//! Extraction is local work; workers are a configured count rather than
//! one per credential, and there is no rate limiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use anyhow::{Context, Result};

use crate::config::{Config, ExtractionConfig};
use crate::content_store::ContentStore;
use crate::merge::merge;
use crate::models::{RejectRule, Report, ReportStatus, DISPOSITIVE_NEW};
use crate::pipeline::{fan_out, next_item, report_error, ErrorSender};
use crate::rules::check_fragment;
use crate::store::Store;
use crate::window::{collapse_repeats, fragments_for_keywords};

#[derive(Debug, Default)]
pub struct ExtractSummary {
    /// Reports advanced to `fragmented`.
    pub fragmented: u64,
    /// Reports closed as `false` because nothing survived filtering.
    pub closed: u64,
}

/// Run the extract stage to completion.
pub async fn run_extract(
    config: &Config,
    store: &Store,
    content: &ContentStore,
    errors: &ErrorSender,
    cancel: &CancellationToken,
) -> Result<ExtractSummary> {
    let reports = store.reports_by_status(ReportStatus::Fetched).await?;
    tracing::info!(pending = reports.len(), "extract stage starting");

    let rules = store.rules().await?;
    let queue = fan_out(reports);
    let fragmented = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicU64::new(0));
    let mut workers = JoinSet::new();

    for _ in 0..config.extraction.workers {
        let store = store.clone();
        let content = content.clone();
        let rules = rules.clone();
        let errors = errors.clone();
        let cancel = cancel.clone();
        let queue = queue.clone();
        let keywords = config.platform.keywords.clone();
        let extraction = config.extraction.clone();
        let fragmented = fragmented.clone();
        let closed = closed.clone();

        workers.spawn(async move {
            while let Some(report) = next_item(&queue, &cancel).await {
                match extract_report(&store, &content, &report, &keywords, &rules, &extraction)
                    .await
                {
                    Ok(survived) => {
                        if survived {
                            fragmented.fetch_add(1, Ordering::Relaxed);
                        } else {
                            closed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(err) => report_error(&errors, err).await,
                }
            }
        });
    }

    while workers.join_next().await.is_some() {}
    Ok(ExtractSummary {
        fragmented: fragmented.load(Ordering::Relaxed),
        closed: closed.load(Ordering::Relaxed),
    })
}

/// Extract one report. Returns whether any fragment survived filtering.
///
/// Errors leave the report in `fetched`; the next run's status-scoped
/// query picks it up again.
async fn extract_report(
    store: &Store,
    content: &ContentStore,
    report: &Report,
    keywords: &[String],
    rules: &[RejectRule],
    extraction: &ExtractionConfig,
) -> Result<bool> {
    let bytes = content
        .read(&report.search_item.sha_hash)
        .await
        .with_context(|| format!("content read failed for report {}", report.id))?;

    let text = collapse_repeats(&String::from_utf8_lossy(&bytes));

    let windows = fragments_for_keywords(
        &text,
        keywords,
        extraction.max_fragment_len,
        extraction.desired_lines,
    )
    .with_context(|| format!("windowing failed for report {}", report.id))?;

    // Rule-matched windows are persisted with the matching rule's id and
    // kept out of the merge.
    let mut survivors = Vec::with_capacity(windows.len());
    for window in windows {
        let dispositive = check_fragment(&text, &window, rules);
        if dispositive != DISPOSITIVE_NEW {
            store
                .insert_fragment(report.id, &window, &text, dispositive)
                .await?;
        } else {
            survivors.push(window);
        }
    }

    let merged = merge(survivors, extraction.max_union_len)
        .with_context(|| format!("merge failed for report {}", report.id))?;

    for fragment in &merged {
        store
            .insert_fragment(report.id, fragment, &text, DISPOSITIVE_NEW)
            .await?;
    }

    let survived = !merged.is_empty();
    let status = if survived {
        ReportStatus::Fragmented
    } else {
        ReportStatus::False
    };
    store.update_report_status(report.id, status).await?;

    Ok(survived)
}
