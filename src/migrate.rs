use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            length REAL NOT NULL,
            dataset TEXT NOT NULL,
            vector BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS triplets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reference_id TEXT NOT NULL,
            left_id TEXT NOT NULL,
            right_id TEXT NOT NULL,
            encoder_id TEXT NOT NULL,
            label TEXT CHECK (label IN ('left', 'right', 'dont_know')),
            user_id TEXT,
            retrieved_at INTEGER,
            CHECK ((label IS NULL) = (user_id IS NULL)),
            FOREIGN KEY (reference_id) REFERENCES items(id),
            FOREIGN KEY (left_id) REFERENCES items(id),
            FOREIGN KEY (right_id) REFERENCES items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS validation_triplets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reference_id TEXT NOT NULL,
            left_id TEXT NOT NULL,
            right_id TEXT NOT NULL,
            left_encoder_id TEXT NOT NULL,
            right_encoder_id TEXT NOT NULL,
            label TEXT CHECK (label IN ('left', 'right', 'dont_know')),
            user_id TEXT,
            retrieved_at INTEGER,
            CHECK ((label IS NULL) = (user_id IS NULL)),
            FOREIGN KEY (reference_id) REFERENCES items(id),
            FOREIGN KEY (left_id) REFERENCES items(id),
            FOREIGN KEY (right_id) REFERENCES items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_statuses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            to_upload_count INTEGER NOT NULL DEFAULT 0,
            uploaded_count INTEGER NOT NULL DEFAULT 0,
            stage TEXT NOT NULL DEFAULT 'received',
            error TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Lease scans filter on label and retrieved_at
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_triplets_lease ON triplets(label, retrieved_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_validation_triplets_lease ON validation_triplets(label, retrieved_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_dataset ON items(dataset)")
        .execute(pool)
        .await?;

    Ok(())
}
