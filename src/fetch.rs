//! Fetch stage.
//!
//! Downloads the raw content of every `processing` report, decodes the
//! base64 body, writes the bytes to content-addressed storage, and
//! advances the report to `fetched`. Any content encoding other than
//! base64 is a hard error for that item.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use anyhow::{bail, Context, Result};
use base64::Engine;

use crate::client::RequestExecutor;
use crate::config::Config;
use crate::content_store::ContentStore;
use crate::limiter::RateLimiter;
use crate::models::{FetchItem, Report, ReportStatus};
use crate::pipeline::{fan_out, next_item, report_error, ErrorSender};
use crate::store::Store;

/// Run the fetch stage to completion; returns the number of reports
/// advanced to `fetched`.
pub async fn run_fetch(
    config: &Config,
    store: &Store,
    content: &ContentStore,
    executor: &RequestExecutor,
    errors: &ErrorSender,
    cancel: &CancellationToken,
) -> Result<u64> {
    let reports = store.reports_by_status(ReportStatus::Processing).await?;
    tracing::info!(pending = reports.len(), "fetch stage starting");

    let queue = fan_out(reports);
    let fetched = Arc::new(AtomicU64::new(0));
    let mut workers = JoinSet::new();

    for (worker_id, token) in config.platform.tokens.iter().enumerate() {
        let token = token.clone();
        let limiter = RateLimiter::new(config.platform.fetch_rate_limit);
        let store = store.clone();
        let content = content.clone();
        let executor = executor.clone();
        let errors = errors.clone();
        let cancel = cancel.clone();
        let queue = queue.clone();
        let fetched = fetched.clone();

        workers.spawn(async move {
            let mut finishers = JoinSet::new();

            while let Some(report) = next_item(&queue, &cancel).await {
                tracing::debug!(worker_id, report_id = report.id, "fetch job");
                let request = executor.get(&report.search_item.git_url, &token);

                match executor.send_with_retry(request, &limiter, &cancel).await {
                    Ok(Some(response)) => {
                        let store = store.clone();
                        let content = content.clone();
                        let errors = errors.clone();
                        let fetched = fetched.clone();
                        finishers.spawn(async move {
                            match process_fetch_response(&store, &content, &report, response).await
                            {
                                Ok(()) => {
                                    fetched.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(err) => report_error(&errors, err).await,
                            }
                        });
                    }
                    Ok(None) => break,
                    Err(err) => {
                        report_error(&errors, err.context("fetch request failed")).await;
                    }
                }
            }

            while finishers.join_next().await.is_some() {}
        });
    }

    while workers.join_next().await.is_some() {}
    Ok(fetched.load(Ordering::Relaxed))
}

/// Decode one fetch response, store its bytes by content hash, and
/// advance the report.
async fn process_fetch_response(
    store: &Store,
    content: &ContentStore,
    report: &Report,
    response: reqwest::Response,
) -> Result<()> {
    let item: FetchItem = response
        .json()
        .await
        .with_context(|| format!("fetch decode failed for report {}", report.id))?;

    let decoded = decode_content(&item)
        .with_context(|| format!("fetch content decode failed for report {}", report.id))?;

    content
        .write(&report.search_item.sha_hash, &decoded)
        .await?;
    store
        .update_report_status(report.id, ReportStatus::Fetched)
        .await?;

    Ok(())
}

/// Only base64 content encoding is supported; the body arrives with
/// embedded line breaks that must be dropped before decoding.
fn decode_content(item: &FetchItem) -> Result<Vec<u8>> {
    if item.encoding != "base64" {
        bail!("Unknown content encoding: {}", item.encoding);
    }

    let compact: String = item.content.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_with_line_breaks() {
        let item = FetchItem {
            content: "QVBJ\nX0tF\nWT1o\ndW50\nZXIy\n".to_string(),
            encoding: "base64".to_string(),
        };
        assert_eq!(decode_content(&item).unwrap(), b"API_KEY=hunter2");
    }

    #[test]
    fn test_unknown_encoding_is_hard_error() {
        let item = FetchItem {
            content: "0000".to_string(),
            encoding: "hex".to_string(),
        };
        let err = decode_content(&item).unwrap_err();
        assert!(err.to_string().contains("Unknown content encoding"));
    }

    #[test]
    fn test_invalid_base64_is_error() {
        let item = FetchItem {
            content: "!!!not-base64!!!".to_string(),
            encoding: "base64".to_string(),
        };
        assert!(decode_content(&item).is_err());
    }
}
