//! Zip upload ingestion pipeline.
//!
//! An upload runs strictly in order:
//!
//! 1. extract the archive into a scratch directory
//! 2. check the `data/` layout
//! 3. index uploaded images and compare plain/canonical variants
//! 4. parse `items.csv`, `triplets.csv`, `validation_triplets.csv`
//! 5. check every referenced id against known images and items
//! 6. commit items, triplets, validation triplets, then move images
//!
//! Every failure before step 6 leaves the stores untouched. The progress row
//! records the current stage, and on failure the error message, so a client
//! polling `GET /upload/{id}` can see why a background upload stopped.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use labelizer_core::embedding::parse_vector;
use labelizer_core::images::ImageIndex;
use labelizer_core::models::{
    Collection, Encoders, Item, Label, NewTriplet, UploadStage, UploadStatus,
};
use labelizer_core::store::Store;

use crate::archive::{check_structure, extract_zip, ArchiveLayout, ScratchDir};
use crate::config::Config;
use crate::error::{LabelError, Result};
use crate::sqlite_store::SqliteStore;

/// An archive received over HTTP, saved in its own scratch directory until
/// the pipeline is done with it.
#[derive(Debug)]
pub struct ReceivedArchive {
    _dir: ScratchDir,
    path: PathBuf,
}

impl ReceivedArchive {
    pub fn save(scratch_root: &Path, bytes: &[u8]) -> Result<Self> {
        let dir = ScratchDir::create(scratch_root)?;
        let path = dir.path().join("upload.zip");
        fs::write(&path, bytes)?;
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What a successful upload wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub items_inserted: u64,
    pub items_skipped: usize,
    pub triplets: u64,
    pub validation_triplets: u64,
    pub images_moved: usize,
}

/// Create a progress row and process `archive` in a background task.
///
/// Returns the fresh status immediately; the caller hands its id to the
/// client for polling.
pub async fn start_upload(
    config: Arc<Config>,
    store: Arc<dyn Store>,
    archive: ReceivedArchive,
) -> Result<UploadStatus> {
    let status = store.create_upload_status(0).await?;
    let upload_id = status.id;
    info!(upload_id, "upload accepted");

    tokio::spawn(async move {
        // Errors are already recorded on the status row and logged.
        let _ = process_upload(&config, store.as_ref(), upload_id, archive.path()).await;
        drop(archive);
    });

    Ok(status)
}

/// Run the pipeline for an existing progress row, recording the outcome.
pub async fn process_upload(
    config: &Config,
    store: &dyn Store,
    upload_id: i64,
    archive: &Path,
) -> Result<UploadReport> {
    match run_pipeline(config, store, upload_id, archive).await {
        Ok(report) => {
            store
                .set_upload_stage(upload_id, UploadStage::Done, None)
                .await?;
            info!(
                upload_id,
                items = report.items_inserted,
                triplets = report.triplets,
                validation_triplets = report.validation_triplets,
                images = report.images_moved,
                "upload finished"
            );
            Ok(report)
        }
        Err(err) => {
            let message = err.to_string();
            if err.is_upload_validation() {
                warn!(upload_id, error = %message, "upload rejected");
            } else {
                error!(upload_id, error = %message, "upload failed");
            }
            if let Err(e) = store
                .set_upload_stage(upload_id, UploadStage::Failed, Some(&message))
                .await
            {
                error!(upload_id, error = %e, "could not record upload failure");
            }
            Err(err)
        }
    }
}

/// Latest progress row, or a zeroed status when nothing was ever uploaded.
pub async fn latest_status(store: &dyn Store) -> Result<UploadStatus> {
    Ok(store
        .latest_upload_status()
        .await?
        .unwrap_or_else(UploadStatus::empty))
}

pub async fn status_by_id(store: &dyn Store, upload_id: i64) -> Result<UploadStatus> {
    store
        .get_upload_status(upload_id)
        .await?
        .ok_or_else(|| LabelError::NotFound(format!("No upload found with id {}", upload_id)))
}

async fn run_pipeline(
    config: &Config,
    store: &dyn Store,
    upload_id: i64,
    archive: &Path,
) -> Result<UploadReport> {
    let scratch = ScratchDir::create(&config.storage.scratch_dir)?;

    let extract_root = scratch.path().to_path_buf();
    let archive_path = archive.to_path_buf();
    let files = blocking(move || extract_zip(&archive_path, &extract_root)).await?;
    debug!(upload_id, files, "archive extracted");
    stage(store, upload_id, UploadStage::Extracted).await?;

    let layout = check_structure(scratch.path())?;
    stage(store, upload_id, UploadStage::StructureValidated).await?;

    let uploaded_dir = layout.images_dir.clone();
    let existing_dir = config.storage.images_dir.clone();
    let (uploaded, existing) = blocking(move || {
        let uploaded = index_images(&uploaded_dir)?;
        let mismatched = uploaded.mismatched();
        if !mismatched.is_empty() {
            return Err(LabelError::CanonicalMismatch(mismatched));
        }
        let existing = if existing_dir.is_dir() {
            index_images(&existing_dir)?
        } else {
            ImageIndex::default()
        };
        Ok((uploaded, existing))
    })
    .await?;
    debug!(
        upload_id,
        uploaded = uploaded.plain.len(),
        existing = existing.plain.len(),
        "images indexed"
    );
    stage(store, upload_id, UploadStage::ImagesIndexed).await?;

    let dims = config.vectors.dims;
    let parse_layout = layout.clone();
    let parsed = blocking(move || parse_archive(&parse_layout, dims)).await?;
    let total = (parsed.triplets.len() + parsed.validation_triplets.len()) as i64;
    store.set_upload_total(upload_id, total).await?;
    stage(store, upload_id, UploadStage::TripletsLoaded).await?;

    let referenced = parsed.referenced_ids();
    let missing_images: Vec<String> = referenced
        .iter()
        .filter(|id| !uploaded.plain.contains(*id) && !existing.plain.contains(*id))
        .cloned()
        .collect();
    if !missing_images.is_empty() {
        return Err(LabelError::MissingImages(missing_images));
    }

    let uploaded_items: BTreeSet<&str> = parsed.items.iter().map(|i| i.id.as_str()).collect();
    let mut missing_items = Vec::new();
    for id in &referenced {
        if !uploaded_items.contains(id.as_str()) && store.get_item(id).await?.is_none() {
            missing_items.push(id.clone());
        }
    }
    if !missing_items.is_empty() {
        return Err(LabelError::MissingItems(missing_items));
    }
    stage(store, upload_id, UploadStage::CrossValidated).await?;

    stage(store, upload_id, UploadStage::Committing).await?;
    let mut report = UploadReport::default();

    if !parsed.items.is_empty() {
        let items = store.insert_items(&parsed.items).await?;
        if !items.skipped.is_empty() {
            info!(
                upload_id,
                skipped = items.skipped.len(),
                ids = %items.skipped.join(","),
                "items already present, skipped"
            );
        }
        report.items_inserted = items.inserted;
        report.items_skipped = items.skipped.len();
    }
    report.triplets = store
        .insert_triplets(Collection::Primary, &parsed.triplets, Some(upload_id))
        .await?;
    report.validation_triplets = store
        .insert_triplets(
            Collection::Validation,
            &parsed.validation_triplets,
            Some(upload_id),
        )
        .await?;

    let from = layout.images_dir;
    let to = config.storage.images_dir.clone();
    report.images_moved = blocking(move || move_images(&from, &to)).await?;

    drop(scratch);
    Ok(report)
}

async fn stage(store: &dyn Store, upload_id: i64, stage: UploadStage) -> Result<()> {
    store.set_upload_stage(upload_id, stage, None).await?;
    debug!(upload_id, stage = %stage, "upload stage");
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LabelError::Storage(anyhow::anyhow!("blocking task failed: {}", e)))?
}

// ============ Images ============

/// Index the image files directly inside `dir`; subdirectories are ignored.
fn index_images(dir: &Path) -> Result<ImageIndex> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(ImageIndex::from_file_names(names))
}

/// Move every file of `from` into `to`, creating `to` if needed.
fn move_images(from: &Path, to: &Path) -> Result<usize> {
    fs::create_dir_all(to)?;
    let mut moved = 0;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let dest = to.join(entry.file_name());
        move_file(&entry.path(), &dest)?;
        moved += 1;
    }
    Ok(moved)
}

fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        // Cross-device rename: copy then remove
        Err(_) => {
            fs::copy(src, dest)?;
            fs::remove_file(src)
        }
    }
}

// ============ CSV ============

#[derive(Debug, Deserialize)]
struct ItemRow {
    id: String,
    length: f64,
    dataset: String,
    #[serde(default)]
    vector: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TripletRow {
    reference_id: String,
    left_id: String,
    right_id: String,
    encoder_id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidationTripletRow {
    reference_id: String,
    left_id: String,
    right_id: String,
    left_encoder_id: String,
    right_encoder_id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Rows of one archive, ready to commit.
#[derive(Debug, Default)]
pub(crate) struct ParsedArchive {
    pub items: Vec<Item>,
    pub triplets: Vec<NewTriplet>,
    pub validation_triplets: Vec<NewTriplet>,
}

impl ParsedArchive {
    /// Every item id any triplet references, sorted.
    fn referenced_ids(&self) -> BTreeSet<String> {
        self.triplets
            .iter()
            .chain(&self.validation_triplets)
            .flat_map(|t| t.item_ids())
            .map(str::to_string)
            .collect()
    }
}

fn parse_archive(layout: &ArchiveLayout, dims: usize) -> Result<ParsedArchive> {
    let items = match &layout.items_csv {
        Some(path) => read_rows::<ItemRow>(path, "items.csv")?
            .into_iter()
            .map(|(line, row)| item_from_row(row, line, dims))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let triplets = read_rows::<TripletRow>(&layout.triplets_csv, "triplets.csv")?
        .into_iter()
        .map(|(line, row)| -> Result<NewTriplet> {
            let (label, user_id) = label_pair("triplets.csv", line, row.label, row.user_id)?;
            Ok(NewTriplet {
                reference_id: row.reference_id,
                left_id: row.left_id,
                right_id: row.right_id,
                encoders: Encoders::Single {
                    encoder_id: row.encoder_id,
                },
                label,
                user_id,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let file = "validation_triplets.csv";
    let validation_triplets = read_rows::<ValidationTripletRow>(&layout.validation_triplets_csv, file)?
        .into_iter()
        .map(|(line, row)| -> Result<NewTriplet> {
            let (label, user_id) = label_pair(file, line, row.label, row.user_id)?;
            Ok(NewTriplet {
                reference_id: row.reference_id,
                left_id: row.left_id,
                right_id: row.right_id,
                encoders: Encoders::Pair {
                    left_encoder_id: row.left_encoder_id,
                    right_encoder_id: row.right_encoder_id,
                },
                label,
                user_id,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ParsedArchive {
        items,
        triplets,
        validation_triplets,
    })
}

fn invalid_csv(file: &str, line: u64, message: impl Into<String>) -> LabelError {
    LabelError::InvalidCsv {
        file: file.to_string(),
        line,
        message: message.into(),
    }
}

/// Deserialize every record of a headed CSV file, keeping its line number.
fn read_rows<T: DeserializeOwned>(path: &Path, file: &str) -> Result<Vec<(u64, T)>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| invalid_csv(file, 0, e.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|e| invalid_csv(file, 1, e.to_string()))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or(0);
            invalid_csv(file, line, e.to_string())
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let row = record
            .deserialize::<T>(Some(&headers))
            .map_err(|e| invalid_csv(file, line, e.to_string()))?;
        rows.push((line, row));
    }
    Ok(rows)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn label_pair(
    file: &str,
    line: u64,
    label: Option<String>,
    user_id: Option<String>,
) -> Result<(Option<Label>, Option<String>)> {
    match (non_empty(label), non_empty(user_id)) {
        (None, None) => Ok((None, None)),
        (Some(label), Some(user)) => {
            let label = label
                .parse::<Label>()
                .map_err(|e| invalid_csv(file, line, e.to_string()))?;
            Ok((Some(label), Some(user)))
        }
        (Some(_), None) => Err(invalid_csv(file, line, "label given without user_id")),
        (None, Some(_)) => Err(invalid_csv(file, line, "user_id given without label")),
    }
}

fn item_from_row(row: ItemRow, line: u64, dims: usize) -> Result<Item> {
    if row.id.is_empty() {
        return Err(invalid_csv("items.csv", line, "empty item id"));
    }
    let vector = match non_empty(row.vector) {
        Some(text) => Some(
            parse_vector(&text, dims).map_err(|e| invalid_csv("items.csv", line, e.to_string()))?,
        ),
        None => None,
    };
    Ok(Item {
        id: row.id,
        length: row.length,
        dataset: row.dataset,
        vector,
    })
}

// ============ CLI ============

/// `labelizer upload <zip>`: run the pipeline in the foreground.
pub async fn run_upload(config: &Config, archive: &Path) -> anyhow::Result<()> {
    if !archive.is_file() {
        anyhow::bail!("Archive not found: {}", archive.display());
    }
    let pool = crate::db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let status = store.create_upload_status(0).await?;
    println!("Upload #{}: processing {}", status.id, archive.display());

    let result = process_upload(config, &store, status.id, archive).await;
    pool.close().await;
    let report = result?;

    println!(
        "Upload #{} done: {} items ({} already present), {} triplets, {} validation triplets, {} images",
        status.id,
        report.items_inserted,
        report.items_skipped,
        report.triplets,
        report.validation_triplets,
        report.images_moved
    );
    Ok(())
}

/// `labelizer status [--id N]`
pub async fn run_status(config: &Config, upload_id: Option<i64>) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let status = match upload_id {
        Some(id) => status_by_id(&store, id).await?,
        None => latest_status(&store).await?,
    };
    pool.close().await;

    println!(
        "Upload #{}: {} / {} triplets ({})",
        status.id, status.uploaded_count, status.to_upload_count, status.stage
    );
    if let Some(message) = status.error {
        println!("  error: {}", message);
    }
    Ok(())
}
