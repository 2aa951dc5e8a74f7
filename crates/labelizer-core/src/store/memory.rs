//! In-memory [`Store`] implementation for testing and lightweight deployments.
//!
//! All tables live behind a single `std::sync::RwLock`, so the lease
//! predicate and the `retrieved_at` update happen under one write guard.
//! Item references are not checked: like an SQLite database without
//! `foreign_keys`, a triplet may point at an item that does not exist.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::lease::is_eligible_at;
use crate::models::{
    Collection, Item, ItemInsertReport, Label, NewTriplet, Triplet, UploadStage, UploadStatus,
};

use super::Store;

#[derive(Default)]
struct Tables {
    items: BTreeMap<String, Item>,
    triplets: BTreeMap<i64, Triplet>,
    validation_triplets: BTreeMap<i64, Triplet>,
    next_triplet_id: i64,
    next_validation_id: i64,
    uploads: BTreeMap<i64, UploadStatus>,
    next_upload_id: i64,
}

impl Tables {
    fn collection(&self, collection: Collection) -> &BTreeMap<i64, Triplet> {
        match collection {
            Collection::Primary => &self.triplets,
            Collection::Validation => &self.validation_triplets,
        }
    }

    fn collection_mut(&mut self, collection: Collection) -> &mut BTreeMap<i64, Triplet> {
        match collection {
            Collection::Primary => &mut self.triplets,
            Collection::Validation => &mut self.validation_triplets,
        }
    }

    fn next_id(&mut self, collection: Collection) -> i64 {
        let counter = match collection {
            Collection::Primary => &mut self.next_triplet_id,
            Collection::Validation => &mut self.next_validation_id,
        };
        *counter += 1;
        *counter
    }
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_items(&self, items: &[Item]) -> Result<ItemInsertReport> {
        let mut tables = self.write()?;
        let mut report = ItemInsertReport::default();
        for item in items {
            if tables.items.contains_key(&item.id) {
                report.skipped.push(item.id.clone());
            } else {
                tables.items.insert(item.id.clone(), item.clone());
                report.inserted += 1;
            }
        }
        Ok(report)
    }

    async fn get_item(&self, id: &str) -> Result<Option<Item>> {
        Ok(self.read()?.items.get(id).cloned())
    }

    async fn item_vectors(&self) -> Result<Vec<(String, Vec<f32>)>> {
        Ok(self
            .read()?
            .items
            .values()
            .filter_map(|item| item.vector.clone().map(|v| (item.id.clone(), v)))
            .collect())
    }

    async fn count_items(&self) -> Result<i64> {
        Ok(self.read()?.items.len() as i64)
    }

    async fn insert_triplets(
        &self,
        collection: Collection,
        triplets: &[NewTriplet],
        upload_id: Option<i64>,
    ) -> Result<u64> {
        let mut tables = self.write()?;

        // Validate everything first so a bad row leaves the batch unapplied.
        for t in triplets {
            if t.encoders.collection() != collection {
                return Err(anyhow!(
                    "{} row has encoders of the wrong shape",
                    collection.noun()
                ));
            }
        }
        if let Some(id) = upload_id {
            if !tables.uploads.contains_key(&id) {
                return Err(anyhow!("upload status {} not found", id));
            }
        }

        for t in triplets {
            let id = tables.next_id(collection);
            let row = Triplet {
                id,
                reference_id: t.reference_id.clone(),
                left_id: t.left_id.clone(),
                right_id: t.right_id.clone(),
                encoders: t.encoders.clone(),
                label: t.label,
                user_id: t.user_id.clone(),
                retrieved_at: None,
            };
            tables.collection_mut(collection).insert(id, row);
        }

        if let Some(status) = upload_id.and_then(|id| tables.uploads.get_mut(&id)) {
            status.uploaded_count += triplets.len() as i64;
        }
        Ok(triplets.len() as u64)
    }

    async fn acquire_next_unlabeled(
        &self,
        collection: Collection,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Triplet>> {
        let mut tables = self.write()?;
        let selected = tables
            .collection_mut(collection)
            .values_mut()
            .find(|t| is_eligible_at(t.label.is_some(), t.retrieved_at, cutoff));

        Ok(selected.map(|t| {
            t.retrieved_at = Some(now);
            t.clone()
        }))
    }

    async fn set_label(
        &self,
        collection: Collection,
        triplet_id: i64,
        label: Label,
        user_id: &str,
    ) -> Result<bool> {
        let mut tables = self.write()?;
        match tables.collection_mut(collection).get_mut(&triplet_id) {
            Some(t) => {
                t.label = Some(label);
                t.user_id = Some(user_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_triplet(
        &self,
        collection: Collection,
        triplet_id: i64,
    ) -> Result<Option<Triplet>> {
        Ok(self.read()?.collection(collection).get(&triplet_id).cloned())
    }

    async fn count_triplets(&self, collection: Collection, labeled: bool) -> Result<i64> {
        Ok(self
            .read()?
            .collection(collection)
            .values()
            .filter(|t| t.is_labeled() == labeled)
            .count() as i64)
    }

    async fn labeled_triplets(&self, collection: Collection) -> Result<Vec<Triplet>> {
        Ok(self
            .read()?
            .collection(collection)
            .values()
            .filter(|t| t.is_labeled())
            .cloned()
            .collect())
    }

    async fn delete_triplets(&self, collection: Collection) -> Result<u64> {
        let mut tables = self.write()?;
        let rows = tables.collection_mut(collection);
        let removed = rows.len() as u64;
        rows.clear();
        Ok(removed)
    }

    async fn create_upload_status(&self, to_upload_count: i64) -> Result<UploadStatus> {
        let mut tables = self.write()?;
        tables.next_upload_id += 1;
        let status = UploadStatus {
            id: tables.next_upload_id,
            to_upload_count,
            uploaded_count: 0,
            stage: UploadStage::Received,
            error: None,
        };
        tables.uploads.insert(status.id, status.clone());
        Ok(status)
    }

    async fn set_upload_total(&self, upload_id: i64, to_upload_count: i64) -> Result<()> {
        let mut tables = self.write()?;
        let status = tables
            .uploads
            .get_mut(&upload_id)
            .ok_or_else(|| anyhow!("upload status {} not found", upload_id))?;
        status.to_upload_count = to_upload_count;
        Ok(())
    }

    async fn set_upload_stage(
        &self,
        upload_id: i64,
        stage: UploadStage,
        error: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.write()?;
        let status = tables
            .uploads
            .get_mut(&upload_id)
            .ok_or_else(|| anyhow!("upload status {} not found", upload_id))?;
        status.stage = stage;
        status.error = error.map(str::to_string);
        Ok(())
    }

    async fn get_upload_status(&self, upload_id: i64) -> Result<Option<UploadStatus>> {
        Ok(self.read()?.uploads.get(&upload_id).cloned())
    }

    async fn latest_upload_status(&self) -> Result<Option<UploadStatus>> {
        Ok(self.read()?.uploads.values().next_back().cloned())
    }
}
