//! Persistence contract for reports, fragments, and rejection rules.
//!
//! Every pipeline stage and the triage surface go through this narrow
//! interface; nothing else in the crate issues SQL. All operations are
//! single-row and atomic; the one cross-worker race (two search workers
//! discovering the same content hash) is resolved by the UNIQUE constraint
//! on `reports.sha_hash` rather than a transaction.

use anyhow::{anyhow, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::models::{Fragment, RejectRule, Report, ReportStatus, SearchItem, TextFragment};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Dedup lookup: has any report ever been created for this content
    /// hash?
    pub async fn exists_by_content_hash(&self, sha_hash: &str) -> Result<bool> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM reports WHERE sha_hash = ?")
            .bind(sha_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id.is_some())
    }

    /// Insert a newly discovered item as a `processing` report.
    ///
    /// Returns `false` when another worker inserted the same content hash
    /// first.
    pub async fn insert_report(&self, item: &SearchItem, query: &str) -> Result<bool> {
        let info = serde_json::to_string(item)?;
        let result = sqlx::query(
            r#"
            INSERT INTO reports (sha_hash, status, keyword, owner, url, info, discovered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(sha_hash) DO NOTHING
            "#,
        )
        .bind(&item.sha_hash)
        .bind(ReportStatus::Processing.as_str())
        .bind(query)
        .bind(&item.repo.owner.login)
        .bind(&item.git_url)
        .bind(info)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn update_report_status(&self, id: i64, status: ReportStatus) -> Result<()> {
        sqlx::query("UPDATE reports SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All reports in `status`, ordered by discovery time.
    pub async fn reports_by_status(&self, status: ReportStatus) -> Result<Vec<Report>> {
        let rows = sqlx::query(
            "SELECT id, status, keyword, info, discovered_at FROM reports WHERE status = ? ORDER BY discovered_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut reports = Vec::with_capacity(rows.len());
        for row in rows {
            reports.push(report_from_row(&row)?);
        }
        Ok(reports)
    }

    pub async fn report_by_id(&self, id: i64) -> Result<Report> {
        let row = sqlx::query(
            "SELECT id, status, keyword, info, discovered_at FROM reports WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow!("No report with id {}", id))?;
        report_from_row(&row)
    }

    /// Persist a transient fragment as a [`TextFragment`] of `report_id`.
    ///
    /// Occurrence offsets are rebased relative to the window start and
    /// converted from byte to character positions for display.
    pub async fn insert_fragment(
        &self,
        report_id: i64,
        fragment: &Fragment,
        text: &str,
        reject_id: i64,
    ) -> Result<()> {
        let content = &text[fragment.left..fragment.right];

        let mut offsets = Vec::with_capacity(fragment.keyword_offsets.len());
        for &off in &fragment.keyword_offsets {
            let rel = off - fragment.left;
            offsets.push(content[..rel].chars().count());
        }
        let offsets_json = serde_json::to_string(&offsets)?;

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let sha_hash = format!("{:x}", hasher.finalize());

        sqlx::query(
            r#"
            INSERT INTO fragments (report_id, content, sha_hash, keywords, reject_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(report_id)
        .bind(content)
        .bind(sha_hash)
        .bind(offsets_json)
        .bind(reject_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fragments_by_report_and_dispositive(
        &self,
        report_id: i64,
        reject_id: i64,
    ) -> Result<Vec<TextFragment>> {
        let rows = sqlx::query(
            "SELECT id, report_id, content, sha_hash, keywords, reject_id FROM fragments WHERE report_id = ? AND reject_id = ? ORDER BY id",
        )
        .bind(report_id)
        .bind(reject_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(fragment_from_row).collect()
    }

    pub async fn count_fragments_by_report_and_dispositive(
        &self,
        report_id: i64,
        reject_id: i64,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(id) FROM fragments WHERE report_id = ? AND reject_id = ?",
        )
        .bind(report_id)
        .bind(reject_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn update_fragment_dispositive(&self, fragment_id: i64, reject_id: i64) -> Result<()> {
        sqlx::query("UPDATE fragments SET reject_id = ? WHERE id = ?")
            .bind(reject_id)
            .bind(fragment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Apply `reject_id` to every fragment of `report_id` except
    /// `except_id` (the sibling sweep after a manual verify).
    pub async fn update_sibling_dispositives(
        &self,
        report_id: i64,
        except_id: i64,
        reject_id: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE fragments SET reject_id = ? WHERE report_id = ? AND id != ?")
            .bind(reject_id)
            .bind(report_id)
            .bind(except_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn report_id_for_fragment(&self, fragment_id: i64) -> Result<i64> {
        sqlx::query_scalar("SELECT report_id FROM fragments WHERE id = ?")
            .bind(fragment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("No fragment with id {}", fragment_id))
    }

    /// All compiled rejection rules with a non-empty expression.
    pub async fn rules(&self) -> Result<Vec<RejectRule>> {
        let rows = sqlx::query("SELECT id, expr FROM reject_rules WHERE expr != ''")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let expr: String = row.try_get("expr")?;
            let rule = regex::Regex::new(&expr)?;
            rules.push(RejectRule { id, rule });
        }
        Ok(rules)
    }

    /// Add a rejection rule, returning its id. The expression must
    /// compile.
    pub async fn insert_rule(&self, expr: &str) -> Result<i64> {
        regex::Regex::new(expr)?;
        let result = sqlx::query("INSERT INTO reject_rules (expr) VALUES (?)")
            .bind(expr)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// One page of fragments belonging to reports in `status`, ordered by
    /// report discovery time. `page` is a page number; rows are offset by
    /// `page * limit`.
    pub async fn review_fragments(
        &self,
        status: ReportStatus,
        limit: i64,
        page: i64,
    ) -> Result<Vec<TextFragment>> {
        let rows = sqlx::query(
            r#"
            SELECT fragments.id, fragments.report_id, fragments.content,
                   fragments.sha_hash, fragments.keywords, fragments.reject_id
            FROM fragments
            INNER JOIN (SELECT id, discovered_at FROM reports WHERE status = ?) r
                ON fragments.report_id = r.id
            ORDER BY r.discovered_at
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(status.as_str())
        .bind(limit)
        .bind(page * limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(fragment_from_row).collect()
    }

    /// Total fragment count behind [`Store::review_fragments`].
    pub async fn count_review_fragments(&self, status: ReportStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(fragments.id)
            FROM fragments
            INNER JOIN (SELECT id FROM reports WHERE status = ?) r
                ON fragments.report_id = r.id
            "#,
        )
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn remove_rule(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM reject_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn report_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Report> {
    let info: String = row.try_get("info")?;
    Ok(Report {
        id: row.try_get("id")?,
        status: row.try_get("status")?,
        query: row.try_get("keyword")?,
        search_item: serde_json::from_str(&info)?,
        discovered_at: row.try_get("discovered_at")?,
    })
}

pub(crate) fn fragment_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TextFragment> {
    let keywords: String = row.try_get("keywords")?;
    Ok(TextFragment {
        id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        text: row.try_get("content")?,
        keyword_offsets: serde_json::from_str(&keywords)?,
        sha_hash: row.try_get("sha_hash")?,
        reject_id: row.try_get("reject_id")?,
    })
}
