//! Search stage.
//!
//! Crosses every configured keyword with every language qualifier,
//! paginates the code-search API for each query, and records every
//! previously unseen item (by content hash) as a `processing` report.
//!
//! A sizing pass issues one page-0 request per query to learn the total
//! result count, then paged jobs are fanned out to one long-lived worker
//! per credential. Workers retry non-success responses indefinitely with
//! a fixed backoff and hand successful bodies to spawned finisher tasks
//! so the next job starts immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use anyhow::Result;

use crate::client::{build_search_query, build_search_url, RequestExecutor};
use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::models::SearchResponse;
use crate::pipeline::{fan_out, next_item, report_error, ErrorSender};
use crate::store::Store;

#[derive(Debug, Clone)]
struct SearchJob {
    query: String,
    page: usize,
}

/// Run the search stage to completion; returns the number of new reports.
pub async fn run_search(
    config: &Config,
    store: &Store,
    executor: &RequestExecutor,
    errors: &ErrorSender,
    cancel: &CancellationToken,
) -> Result<u64> {
    let queries = build_queries(config);
    let jobs = size_queries(config, executor, &queries, errors, cancel).await;
    tracing::info!(queries = queries.len(), jobs = jobs.len(), "search jobs enqueued");

    let queue = fan_out(jobs);
    let discovered = Arc::new(AtomicU64::new(0));
    let mut workers = JoinSet::new();

    for (worker_id, token) in config.platform.tokens.iter().enumerate() {
        let token = token.clone();
        let limiter = RateLimiter::new(config.platform.search_rate_limit);
        let template = config.platform.search_api.clone();
        let store = store.clone();
        let executor = executor.clone();
        let errors = errors.clone();
        let cancel = cancel.clone();
        let queue = queue.clone();
        let discovered = discovered.clone();

        workers.spawn(async move {
            let mut finishers = JoinSet::new();

            while let Some(job) = next_item(&queue, &cancel).await {
                tracing::debug!(worker_id, query = %job.query, page = job.page, "search job");
                let url = build_search_url(&template, &job.query, job.page);
                let request = executor.get(&url, &token);

                match executor.send_with_retry(request, &limiter, &cancel).await {
                    Ok(Some(response)) => {
                        let store = store.clone();
                        let errors = errors.clone();
                        let discovered = discovered.clone();
                        let query = job.query.clone();
                        finishers.spawn(async move {
                            process_search_response(&store, &query, response, &errors, &discovered)
                                .await;
                        });
                    }
                    Ok(None) => break,
                    Err(err) => {
                        report_error(&errors, err.context("search request failed")).await;
                    }
                }
            }

            while finishers.join_next().await.is_some() {}
        });
    }

    while workers.join_next().await.is_some() {}
    Ok(discovered.load(Ordering::Relaxed))
}

/// Every (keyword × language) query string. An empty language list means
/// plain keyword queries.
fn build_queries(config: &Config) -> Vec<String> {
    let no_language = [String::new()];
    let languages: &[String] = if config.platform.languages.is_empty() {
        &no_language
    } else {
        &config.platform.languages
    };

    let mut queries = Vec::with_capacity(languages.len() * config.platform.keywords.len());
    for lang in languages {
        for keyword in &config.platform.keywords {
            queries.push(build_search_query(keyword, lang, false));
        }
    }
    queries
}

/// Sizing pass: one page-0 request per query to learn its total result
/// count, then one job per page up to the configured cap.
async fn size_queries(
    config: &Config,
    executor: &RequestExecutor,
    queries: &[String],
    errors: &ErrorSender,
    cancel: &CancellationToken,
) -> Vec<SearchJob> {
    let limiter = RateLimiter::new(config.platform.search_rate_limit);
    let n_tokens = config.platform.tokens.len();
    let mut totals = vec![0usize; queries.len()];

    for (id, query) in queries.iter().enumerate() {
        let token = &config.platform.tokens[id % n_tokens];
        let url = build_search_url(&config.platform.search_api, query, 0);
        let request = executor.get(&url, token);

        let response = match executor.execute(request, &limiter, cancel).await {
            Ok(Some(response)) => response,
            Ok(None) => break,
            Err(err) => {
                report_error(errors, err.context("search sizing request failed")).await;
                continue;
            }
        };

        if !response.status().is_success() {
            report_error(
                errors,
                anyhow::anyhow!("search sizing for '{}': status {}", query, response.status()),
            )
            .await;
            continue;
        }

        match response.json::<SearchResponse>().await {
            Ok(body) => totals[id] = body.total_count,
            Err(err) => {
                report_error(
                    errors,
                    anyhow::Error::from(err).context("search sizing decode failed"),
                )
                .await;
            }
        }
    }

    if cancel.is_cancelled() {
        return Vec::new();
    }

    let mut jobs = Vec::new();
    for (id, query) in queries.iter().enumerate() {
        let max_page =
            (totals[id] / config.platform.max_items_per_page + 1).min(config.platform.max_pages);
        for page in 0..=max_page {
            jobs.push(SearchJob {
                query: query.clone(),
                page,
            });
        }
    }
    jobs
}

/// Decode one results page and insert every unseen item as a new report.
async fn process_search_response(
    store: &Store,
    query: &str,
    response: reqwest::Response,
    errors: &ErrorSender,
    discovered: &AtomicU64,
) {
    let body = match response.json::<SearchResponse>().await {
        Ok(body) => body,
        Err(err) => {
            report_error(
                errors,
                anyhow::Error::from(err).context("search page decode failed"),
            )
            .await;
            return;
        }
    };

    for item in body.items {
        let exists = match store.exists_by_content_hash(&item.sha_hash).await {
            Ok(exists) => exists,
            Err(err) => {
                report_error(errors, err.context("dedup lookup failed")).await;
                continue;
            }
        };
        if exists {
            continue;
        }

        match store.insert_report(&item, query).await {
            // A concurrent worker may win the insert; that is not an error.
            Ok(true) => {
                discovered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(err) => {
                report_error(errors, err.context("report insert failed")).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ExtractionConfig, PlatformConfig, ServerConfig, StoreConfig};

    fn test_config(keywords: Vec<&str>, languages: Vec<&str>) -> Config {
        Config {
            store: StoreConfig {
                path: "/tmp/leakscout-test.sqlite".into(),
                content_dir: "/tmp/leakscout-test-content".into(),
            },
            platform: PlatformConfig {
                tokens: vec!["t".to_string()],
                search_api: "https://api.example.com/search?q={query}&page={page}".to_string(),
                keywords: keywords.into_iter().map(String::from).collect(),
                languages: languages.into_iter().map(String::from).collect(),
                search_rate_limit: 0.5,
                fetch_rate_limit: 0.5,
                max_items_per_page: 100,
                max_pages: 10,
                request_timeout_secs: 5,
                retry_backoff_secs: 10,
            },
            extraction: ExtractionConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
        }
    }

    #[test]
    fn test_queries_cross_keywords_and_languages() {
        let config = test_config(vec!["KEY", "SECRET"], vec!["go", "python"]);
        let queries = build_queries(&config);
        assert_eq!(queries.len(), 4);
        assert!(queries.contains(&"KEY+language:go".to_string()));
        assert!(queries.contains(&"SECRET+language:python".to_string()));
    }

    #[test]
    fn test_empty_languages_produce_plain_queries() {
        let config = test_config(vec!["KEY"], vec![]);
        let queries = build_queries(&config);
        assert_eq!(queries, vec!["KEY".to_string()]);
    }
}
