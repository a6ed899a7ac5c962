//! Manual fragment disposition.
//!
//! The triage surface consumed by the HTTP API and the CLI: list
//! fragments awaiting review, apply a manual dispositive to one fragment,
//! and look up the report behind a fragment.
//!
//! Marking rules:
//! - a manual reject closes the owning report as `false` once no
//!   unreviewed fragment remains (and none was verified);
//! - a manual verify removes every sibling fragment from review and moves
//!   the report to `verified`.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::models::{
    Report, ReportStatus, TextFragment, DISPOSITIVE_AUTO_REMOVED, DISPOSITIVE_MANUAL_REJECT,
    DISPOSITIVE_MANUAL_VERIFY, DISPOSITIVE_NEW,
};
use crate::store::Store;

/// One page of fragments for review.
#[derive(Debug, Serialize)]
pub struct ReviewPage {
    pub total_count: i64,
    pub fragments: Vec<TextFragment>,
}

/// Fragments of reports in `status`, paged, with the unpaged total.
pub async fn review_page(
    store: &Store,
    status: ReportStatus,
    limit: i64,
    page: i64,
) -> Result<ReviewPage> {
    let fragments = store.review_fragments(status, limit, page).await?;
    let total_count = store.count_review_fragments(status).await?;
    Ok(ReviewPage {
        total_count,
        fragments,
    })
}

/// Apply a manual dispositive to one fragment and propagate the report
/// transition it implies.
pub async fn mark_fragment(store: &Store, fragment_id: i64, dispositive: i64) -> Result<()> {
    if dispositive != DISPOSITIVE_MANUAL_REJECT && dispositive != DISPOSITIVE_MANUAL_VERIFY {
        bail!("Invalid manual dispositive: {}", dispositive);
    }

    let report_id = store.report_id_for_fragment(fragment_id).await?;
    store
        .update_fragment_dispositive(fragment_id, dispositive)
        .await?;

    match dispositive {
        DISPOSITIVE_MANUAL_REJECT => {
            let remaining = store
                .count_fragments_by_report_and_dispositive(report_id, DISPOSITIVE_NEW)
                .await?;
            let verified = store
                .count_fragments_by_report_and_dispositive(report_id, DISPOSITIVE_MANUAL_VERIFY)
                .await?;
            if remaining == 0 && verified == 0 {
                store
                    .update_report_status(report_id, ReportStatus::False)
                    .await?;
            }
        }
        DISPOSITIVE_MANUAL_VERIFY => {
            store
                .update_sibling_dispositives(report_id, fragment_id, DISPOSITIVE_AUTO_REMOVED)
                .await?;
            store
                .update_report_status(report_id, ReportStatus::Verified)
                .await?;
        }
        _ => unreachable!(),
    }

    Ok(())
}

/// The report that owns `fragment_id`.
pub async fn fragment_info(store: &Store, fragment_id: i64) -> Result<Report> {
    let report_id = store.report_id_for_fragment(fragment_id).await?;
    store.report_by_id(report_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::models::{Fragment, SearchItem};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> Store {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::create_schema(&pool).await.unwrap();
        Store::new(pool)
    }

    async fn fragmented_report(store: &Store, sha: &str, fragment_texts: &[&str]) -> i64 {
        let item = SearchItem {
            sha_hash: sha.to_string(),
            ..Default::default()
        };
        store.insert_report(&item, "KEY").await.unwrap();
        let report = store
            .reports_by_status(ReportStatus::Processing)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.search_item.sha_hash == sha)
            .unwrap();

        for text in fragment_texts {
            let occ = text.find("KEY").unwrap();
            let fragment = Fragment::new(0, text.len(), vec![occ, occ + 3]);
            store
                .insert_fragment(report.id, &fragment, text, DISPOSITIVE_NEW)
                .await
                .unwrap();
        }
        store
            .update_report_status(report.id, ReportStatus::Fragmented)
            .await
            .unwrap();
        report.id
    }

    #[tokio::test]
    async fn test_verify_removes_siblings_and_verifies_report() {
        let store = memory_store().await;
        let report_id = fragmented_report(&store, "abc", &["KEY=1", "KEY=2"]).await;

        let fragments = store
            .fragments_by_report_and_dispositive(report_id, DISPOSITIVE_NEW)
            .await
            .unwrap();
        let (verified, sibling) = (fragments[0].id, fragments[1].id);

        mark_fragment(&store, verified, DISPOSITIVE_MANUAL_VERIFY)
            .await
            .unwrap();

        let report = store.report_by_id(report_id).await.unwrap();
        assert_eq!(report.status, "verified");

        let removed = store
            .fragments_by_report_and_dispositive(report_id, DISPOSITIVE_AUTO_REMOVED)
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, sibling);
    }

    #[tokio::test]
    async fn test_rejecting_last_fragment_closes_report() {
        let store = memory_store().await;
        let report_id = fragmented_report(&store, "abc", &["KEY=1"]).await;

        let fragment = store
            .fragments_by_report_and_dispositive(report_id, DISPOSITIVE_NEW)
            .await
            .unwrap()
            .remove(0);

        mark_fragment(&store, fragment.id, DISPOSITIVE_MANUAL_REJECT)
            .await
            .unwrap();

        let report = store.report_by_id(report_id).await.unwrap();
        assert_eq!(report.status, "false");
    }

    #[tokio::test]
    async fn test_rejecting_one_of_two_keeps_report_open() {
        let store = memory_store().await;
        let report_id = fragmented_report(&store, "abc", &["KEY=1", "KEY=2"]).await;

        let fragment = store
            .fragments_by_report_and_dispositive(report_id, DISPOSITIVE_NEW)
            .await
            .unwrap()
            .remove(0);

        mark_fragment(&store, fragment.id, DISPOSITIVE_MANUAL_REJECT)
            .await
            .unwrap();

        let report = store.report_by_id(report_id).await.unwrap();
        assert_eq!(report.status, "fragmented");
    }

    #[tokio::test]
    async fn test_invalid_dispositive_rejected() {
        let store = memory_store().await;
        let report_id = fragmented_report(&store, "abc", &["KEY=1"]).await;
        let fragment = store
            .fragments_by_report_and_dispositive(report_id, DISPOSITIVE_NEW)
            .await
            .unwrap()
            .remove(0);

        assert!(mark_fragment(&store, fragment.id, 7).await.is_err());
    }

    #[tokio::test]
    async fn test_review_page_lists_fragments_with_total() {
        let store = memory_store().await;
        fragmented_report(&store, "abc", &["KEY=1", "KEY=2", "KEY=3"]).await;

        let page = review_page(&store, ReportStatus::Fragmented, 2, 0)
            .await
            .unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.fragments.len(), 2);

        let page = review_page(&store, ReportStatus::Fragmented, 2, 1)
            .await
            .unwrap();
        assert_eq!(page.fragments.len(), 1);
    }

    #[tokio::test]
    async fn test_fragment_info_returns_owning_report() {
        let store = memory_store().await;
        let report_id = fragmented_report(&store, "abc", &["KEY=1"]).await;
        let fragment = store
            .fragments_by_report_and_dispositive(report_id, DISPOSITIVE_NEW)
            .await
            .unwrap()
            .remove(0);

        let report = fragment_info(&store, fragment.id).await.unwrap();
        assert_eq!(report.id, report_id);
        assert_eq!(report.search_item.sha_hash, "abc");
    }
}
