//! SQLite connection pool for the item and triplet stores.
//!
//! The pool runs in WAL mode so annotators leasing triplets do not block on a
//! long upload commit. Foreign keys are switched on for every connection:
//! triplet rows reference items, and SQLite only enforces that with the
//! pragma set.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

const MAX_CONNECTIONS: u32 = 5;

/// Open (creating if needed) the database at `db.path`.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create database directory {}", parent.display())
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))
}
