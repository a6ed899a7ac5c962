//! Pipeline coordination.
//!
//! Sequences the three crawl stages (search → fetch → extract), owns the
//! shared error stream and its drain task, and arms the process-wide
//! cancellation token with an optional run deadline and Ctrl-C.
//!
//! Workers never abort the pipeline: every worker error lands on one
//! buffered channel, and a single dedicated consumer drains it with a
//! blocking, cancellation-aware receive. Cancellation is cooperative: it
//! prevents new requests and new items from starting but does not abort
//! in-flight store writes.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::client::RequestExecutor;
use crate::config::Config;
use crate::content_store::ContentStore;
use crate::db;
use crate::store::Store;
use crate::{extract, fetch, search};

/// Worker errors funnel into this buffered stream.
pub type ErrorSender = mpsc::Sender<anyhow::Error>;

pub(crate) async fn report_error(errors: &ErrorSender, err: anyhow::Error) {
    // The drain task may already be gone during shutdown.
    let _ = errors.send(err).await;
}

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stages {
    All,
    Search,
    Fetch,
    Extract,
}

/// Per-run totals, printed by the CLI.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports_discovered: u64,
    pub reports_fetched: u64,
    pub reports_fragmented: u64,
    pub reports_closed: u64,
}

/// Run the selected stages over the configured store.
///
/// `deadline` bounds the whole run; the token also trips on Ctrl-C.
pub async fn run(
    config: &Config,
    stages: Stages,
    deadline: Option<Duration>,
) -> Result<RunSummary> {
    let pool = db::connect(config).await?;
    let store = Store::new(pool.clone());
    let content = ContentStore::new(&config.store.content_dir);
    let executor = RequestExecutor::new(&config.platform)?;

    let cancel = CancellationToken::new();

    if let Some(deadline) = deadline {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            tracing::info!("run deadline reached, cancelling");
            token.cancel();
        });
    }

    {
        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling");
                token.cancel();
            }
        });
    }

    let (err_tx, err_rx) = mpsc::channel(4096);
    let drain = tokio::spawn(drain_errors(err_rx, cancel.clone()));

    let mut summary = RunSummary::default();

    if matches!(stages, Stages::All | Stages::Search) {
        summary.reports_discovered =
            search::run_search(config, &store, &executor, &err_tx, &cancel).await?;
    }
    if matches!(stages, Stages::All | Stages::Fetch) {
        summary.reports_fetched =
            fetch::run_fetch(config, &store, &content, &executor, &err_tx, &cancel).await?;
    }
    if matches!(stages, Stages::All | Stages::Extract) {
        let extracted = extract::run_extract(config, &store, &content, &err_tx, &cancel).await?;
        summary.reports_fragmented = extracted.fragmented;
        summary.reports_closed = extracted.closed;
    }

    drop(err_tx);
    let _ = drain.await;
    pool.close().await;

    Ok(summary)
}

/// Drain the error stream until it closes or cancellation fires. The
/// receive blocks; there is no busy polling.
async fn drain_errors(mut errors: mpsc::Receiver<anyhow::Error>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            err = errors.recv() => match err {
                Some(err) => tracing::error!("{:#}", err),
                None => break,
            },
        }
    }
}

/// Feed `items` to a bounded channel consumed by many workers, one item
/// to exactly one worker.
pub(crate) fn fan_out<T: Send + 'static>(items: Vec<T>) -> Arc<Mutex<mpsc::Receiver<T>>> {
    let (tx, rx) = mpsc::channel(512);
    tokio::spawn(async move {
        for item in items {
            if tx.send(item).await.is_err() {
                break;
            }
        }
    });
    Arc::new(Mutex::new(rx))
}

/// Pull the next item for one worker, observing cancellation.
pub(crate) async fn next_item<T>(
    queue: &Arc<Mutex<mpsc::Receiver<T>>>,
    cancel: &CancellationToken,
) -> Option<T> {
    let mut queue = queue.lock().await;
    tokio::select! {
        _ = cancel.cancelled() => None,
        item = queue.recv() => item,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_delivers_each_item_once() {
        let queue = fan_out(vec![1, 2, 3, 4, 5]);
        let cancel = CancellationToken::new();

        let mut seen = Vec::new();
        while let Some(item) = next_item(&queue, &cancel).await {
            seen.push(item);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_next_item_observes_cancellation() {
        let queue = fan_out(Vec::<i32>::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(next_item(&queue, &cancel).await, None);
    }

    #[tokio::test]
    async fn test_drain_exits_when_senders_drop() {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(drain_errors(rx, cancel));

        tx.send(anyhow::anyhow!("worker failed")).await.unwrap();
        drop(tx);
        drain.await.unwrap();
    }
}
