//! Export labeled triplets as CSV.
//!
//! Used by `GET /download` and `labelizer export`. Only labeled rows are
//! exported; the column set depends on the collection's encoder shape.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, TimeZone};

use labelizer_core::models::{Collection, Encoders, Triplet};
use labelizer_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::sqlite_store::SqliteStore;

fn header(collection: Collection) -> &'static [&'static str] {
    match collection {
        Collection::Primary => &[
            "id",
            "reference_id",
            "left_id",
            "right_id",
            "encoder_id",
            "label",
            "user_id",
            "retrieved_at",
        ],
        Collection::Validation => &[
            "id",
            "reference_id",
            "left_id",
            "right_id",
            "left_encoder_id",
            "right_encoder_id",
            "label",
            "user_id",
            "retrieved_at",
        ],
    }
}

/// Render triplets as CSV bytes, header first.
pub fn triplets_csv(collection: Collection, triplets: &[Triplet]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header(collection))?;

    for t in triplets {
        let mut record = vec![
            t.id.to_string(),
            t.reference_id.clone(),
            t.left_id.clone(),
            t.right_id.clone(),
        ];
        match &t.encoders {
            Encoders::Single { encoder_id } => record.push(encoder_id.clone()),
            Encoders::Pair {
                left_encoder_id,
                right_encoder_id,
            } => {
                record.push(left_encoder_id.clone());
                record.push(right_encoder_id.clone());
            }
        }
        record.push(t.label.map(|l| l.to_string()).unwrap_or_default());
        record.push(t.user_id.clone().unwrap_or_default());
        record.push(
            t.retrieved_at
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_default(),
        );
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV: {}", e))
}

/// `<YYYYmmdd-HHMM>_labelizer_[validation_]triplets.csv`
pub fn download_file_name<Tz: TimeZone>(collection: Collection, now: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let prefix = match collection {
        Collection::Primary => "",
        Collection::Validation => "validation_",
    };
    format!("{}_labelizer_{}triplets.csv", now.format("%Y%m%d-%H%M"), prefix)
}

/// CSV of every labeled triplet in `collection`.
pub async fn export_labeled(store: &dyn Store, collection: Collection) -> Result<Vec<u8>> {
    let triplets = store.labeled_triplets(collection).await?;
    let bytes = triplets_csv(collection, &triplets)?;
    tracing::info!(
        collection = collection.noun(),
        rows = triplets.len(),
        "labeled triplets exported"
    );
    Ok(bytes)
}

/// `labelizer export [--validation] [--output PATH]`
///
/// Writes to `output` when given, otherwise to stdout for piping.
pub async fn run_export(config: &Config, validation: bool, output: Option<&Path>) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let collection = Collection::from_validation_flag(validation);

    let triplets = store.labeled_triplets(collection).await?;
    let bytes = triplets_csv(collection, &triplets)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Exported {} labeled {}s to {}",
                triplets.len(),
                collection.noun(),
                path.display()
            );
        }
        None => {
            print!("{}", String::from_utf8_lossy(&bytes));
        }
    }

    pool.close().await;
    Ok(())
}
