//! SQLite-backed [`Store`] implementation.
//!
//! Timestamps are stored as Unix milliseconds. Vectors are little-endian f32
//! BLOBs. Each bulk insert runs in one transaction, and the lease is a single
//! conditional `UPDATE … RETURNING`, so the eligibility check and the
//! `retrieved_at` stamp cannot be split by a concurrent caller.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use labelizer_core::embedding::{blob_to_vec, vec_to_blob};
use labelizer_core::models::{
    Collection, Encoders, Item, ItemInsertReport, Label, NewTriplet, Triplet, UploadStage,
    UploadStatus,
};
use labelizer_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn columns(collection: Collection) -> &'static str {
    match collection {
        Collection::Primary => {
            "id, reference_id, left_id, right_id, encoder_id, label, user_id, retrieved_at"
        }
        Collection::Validation => {
            "id, reference_id, left_id, right_id, left_encoder_id, right_encoder_id, label, user_id, retrieved_at"
        }
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn row_to_triplet(row: &SqliteRow, collection: Collection) -> Result<Triplet> {
    let encoders = match collection {
        Collection::Primary => Encoders::Single {
            encoder_id: row.try_get("encoder_id")?,
        },
        Collection::Validation => Encoders::Pair {
            left_encoder_id: row.try_get("left_encoder_id")?,
            right_encoder_id: row.try_get("right_encoder_id")?,
        },
    };
    let label: Option<String> = row.try_get("label")?;
    let retrieved_at: Option<i64> = row.try_get("retrieved_at")?;

    Ok(Triplet {
        id: row.try_get("id")?,
        reference_id: row.try_get("reference_id")?,
        left_id: row.try_get("left_id")?,
        right_id: row.try_get("right_id")?,
        encoders,
        label: label.map(|l| l.parse::<Label>()).transpose()?,
        user_id: row.try_get("user_id")?,
        retrieved_at: retrieved_at.map(from_millis).transpose()?,
    })
}

fn row_to_item(row: &SqliteRow) -> Result<Item> {
    let vector: Option<Vec<u8>> = row.try_get("vector")?;
    Ok(Item {
        id: row.try_get("id")?,
        length: row.try_get("length")?,
        dataset: row.try_get("dataset")?,
        vector: vector.map(|blob| blob_to_vec(&blob)),
    })
}

fn row_to_upload_status(row: &SqliteRow) -> Result<UploadStatus> {
    let stage: String = row.try_get("stage")?;
    Ok(UploadStatus {
        id: row.try_get("id")?,
        to_upload_count: row.try_get("to_upload_count")?,
        uploaded_count: row.try_get("uploaded_count")?,
        stage: stage.parse()?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_items(&self, items: &[Item]) -> Result<ItemInsertReport> {
        let mut tx = self.pool.begin().await?;
        let mut report = ItemInsertReport::default();

        for item in items {
            let blob = item.vector.as_deref().map(vec_to_blob);
            let result = sqlx::query(
                r#"
                INSERT INTO items (id, length, dataset, vector)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&item.id)
            .bind(item.length)
            .bind(&item.dataset)
            .bind(blob)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert item {}", item.id))?;

            if result.rows_affected() == 0 {
                report.skipped.push(item.id.clone());
            } else {
                report.inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    async fn get_item(&self, id: &str) -> Result<Option<Item>> {
        let row = sqlx::query("SELECT id, length, dataset, vector FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn item_vectors(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let rows = sqlx::query("SELECT id, vector FROM items WHERE vector IS NOT NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<(String, Vec<f32>)> {
                let blob: Vec<u8> = row.try_get("vector")?;
                Ok((row.try_get("id")?, blob_to_vec(&blob)))
            })
            .collect()
    }

    async fn count_items(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_triplets(
        &self,
        collection: Collection,
        triplets: &[NewTriplet],
        upload_id: Option<i64>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        for t in triplets {
            let result = match (&t.encoders, collection) {
                (Encoders::Single { encoder_id }, Collection::Primary) => {
                    sqlx::query(
                        r#"
                        INSERT INTO triplets (reference_id, left_id, right_id, encoder_id, label, user_id)
                        VALUES (?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&t.reference_id)
                    .bind(&t.left_id)
                    .bind(&t.right_id)
                    .bind(encoder_id)
                    .bind(t.label.map(|l| l.as_str()))
                    .bind(&t.user_id)
                    .execute(&mut *tx)
                    .await
                }
                (
                    Encoders::Pair {
                        left_encoder_id,
                        right_encoder_id,
                    },
                    Collection::Validation,
                ) => {
                    sqlx::query(
                        r#"
                        INSERT INTO validation_triplets
                            (reference_id, left_id, right_id, left_encoder_id, right_encoder_id, label, user_id)
                        VALUES (?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&t.reference_id)
                    .bind(&t.left_id)
                    .bind(&t.right_id)
                    .bind(left_encoder_id)
                    .bind(right_encoder_id)
                    .bind(t.label.map(|l| l.as_str()))
                    .bind(&t.user_id)
                    .execute(&mut *tx)
                    .await
                }
                _ => bail!("{} row has encoders of the wrong shape", collection.noun()),
            };
            result.with_context(|| {
                format!(
                    "Failed to insert {} ({}, {}, {})",
                    collection.noun(),
                    t.reference_id,
                    t.left_id,
                    t.right_id
                )
            })?;

            if let Some(id) = upload_id {
                let updated = sqlx::query(
                    "UPDATE upload_statuses SET uploaded_count = uploaded_count + 1 WHERE id = ?",
                )
                .bind(id)
                .execute(&mut *tx)
                .await?;
                if updated.rows_affected() == 0 {
                    bail!("upload status {} not found", id);
                }
            }
        }

        tx.commit().await?;
        Ok(triplets.len() as u64)
    }

    async fn acquire_next_unlabeled(
        &self,
        collection: Collection,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Triplet>> {
        let table = collection.table();
        // The outer predicate repeats the inner one so the row is only
        // claimed if it is still eligible when the update applies.
        let sql = format!(
            r#"
            UPDATE {table}
            SET retrieved_at = ?
            WHERE id = (
                SELECT id FROM {table}
                WHERE label IS NULL AND (retrieved_at IS NULL OR retrieved_at < ?)
                ORDER BY id
                LIMIT 1
            )
            AND label IS NULL
            AND (retrieved_at IS NULL OR retrieved_at < ?)
            RETURNING {columns}
            "#,
            table = table,
            columns = columns(collection),
        );

        let cutoff_ms = to_millis(cutoff);
        let row = sqlx::query(&sql)
            .bind(to_millis(now))
            .bind(cutoff_ms)
            .bind(cutoff_ms)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(|r| row_to_triplet(r, collection))
            .transpose()
    }

    async fn set_label(
        &self,
        collection: Collection,
        triplet_id: i64,
        label: Label,
        user_id: &str,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET label = ?, user_id = ? WHERE id = ?",
            collection.table()
        );
        let result = sqlx::query(&sql)
            .bind(label.as_str())
            .bind(user_id)
            .bind(triplet_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_triplet(
        &self,
        collection: Collection,
        triplet_id: i64,
    ) -> Result<Option<Triplet>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?",
            columns(collection),
            collection.table()
        );
        let row = sqlx::query(&sql)
            .bind(triplet_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(|r| row_to_triplet(r, collection))
            .transpose()
    }

    async fn count_triplets(&self, collection: Collection, labeled: bool) -> Result<i64> {
        let predicate = if labeled {
            "label IS NOT NULL"
        } else {
            "label IS NULL"
        };
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            collection.table(),
            predicate
        );
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn labeled_triplets(&self, collection: Collection) -> Result<Vec<Triplet>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE label IS NOT NULL ORDER BY id",
            columns(collection),
            collection.table()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| row_to_triplet(r, collection))
            .collect()
    }

    async fn delete_triplets(&self, collection: Collection) -> Result<u64> {
        let sql = format!("DELETE FROM {}", collection.table());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn create_upload_status(&self, to_upload_count: i64) -> Result<UploadStatus> {
        let row = sqlx::query(
            r#"
            INSERT INTO upload_statuses (to_upload_count, uploaded_count, stage, created_at)
            VALUES (?, 0, ?, ?)
            RETURNING id, to_upload_count, uploaded_count, stage, error
            "#,
        )
        .bind(to_upload_count)
        .bind(UploadStage::Received.as_str())
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;
        row_to_upload_status(&row)
    }

    async fn set_upload_total(&self, upload_id: i64, to_upload_count: i64) -> Result<()> {
        let result = sqlx::query("UPDATE upload_statuses SET to_upload_count = ? WHERE id = ?")
            .bind(to_upload_count)
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("upload status {} not found", upload_id);
        }
        Ok(())
    }

    async fn set_upload_stage(
        &self,
        upload_id: i64,
        stage: UploadStage,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE upload_statuses SET stage = ?, error = ? WHERE id = ?")
            .bind(stage.as_str())
            .bind(error)
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("upload status {} not found", upload_id);
        }
        Ok(())
    }

    async fn get_upload_status(&self, upload_id: i64) -> Result<Option<UploadStatus>> {
        let row = sqlx::query(
            "SELECT id, to_upload_count, uploaded_count, stage, error FROM upload_statuses WHERE id = ?",
        )
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_upload_status).transpose()
    }

    async fn latest_upload_status(&self) -> Result<Option<UploadStatus>> {
        let row = sqlx::query(
            "SELECT id, to_upload_count, uploaded_count, stage, error FROM upload_statuses ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_upload_status).transpose()
    }
}
