use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Reports table. The UNIQUE constraint on sha_hash is the dedup
    // invariant: concurrent workers discovering the same content race on
    // insert, and the loser's insert is dropped.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sha_hash TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            keyword TEXT NOT NULL,
            owner TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL DEFAULT '',
            info TEXT NOT NULL,
            discovered_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Fragments table; reject_id is the dispositive tag.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fragments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            report_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            sha_hash TEXT NOT NULL,
            keywords TEXT NOT NULL,
            reject_id INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (report_id) REFERENCES reports(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reject_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            expr TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Rule ids double as fragment dispositives, where 1..=3 mean manual
    // reject / manual verify / auto-removed. Seed the sequence so operator
    // rules are allocated from 100 and the ranges stay disjoint.
    sqlx::query(
        r#"
        INSERT INTO sqlite_sequence (name, seq)
        SELECT 'reject_rules', 99
        WHERE NOT EXISTS (SELECT 1 FROM sqlite_sequence WHERE name = 'reject_rules')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fragments_report_id ON fragments(report_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fragments_reject_id ON fragments(report_id, reject_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
