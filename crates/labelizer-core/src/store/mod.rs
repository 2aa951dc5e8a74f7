//! Storage abstraction for Labelizer.
//!
//! The [`Store`] trait covers the item table, both triplet collections, and
//! upload progress rows. Backends: SQLite (in the `labelizer` app crate) and
//! [`memory::InMemoryStore`] for tests and lightweight deployments.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Collection, Item, ItemInsertReport, Label, NewTriplet, Triplet, UploadStage, UploadStatus,
};

/// Abstract storage backend.
///
/// "Absent" is reported as `Ok(None)` / `Ok(false)`, not as an error; the
/// service layer decides what a missing row means to its caller.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_items`](Store::insert_items) | Create items that do not exist yet (one transaction) |
/// | [`get_item`](Store::get_item) | Point lookup |
/// | [`item_vectors`](Store::item_vectors) | All items carrying a vector |
/// | [`insert_triplets`](Store::insert_triplets) | Bulk create (one transaction), bumping upload progress |
/// | [`acquire_next_unlabeled`](Store::acquire_next_unlabeled) | Lease the lowest-id eligible triplet |
/// | [`set_label`](Store::set_label) | Unconditional label write |
/// | [`count_triplets`](Store::count_triplets) | Labeled / unlabeled counts |
/// | [`labeled_triplets`](Store::labeled_triplets) | Rows for export |
/// | [`delete_triplets`](Store::delete_triplets) | Empty a collection |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert every item whose id is not stored yet. Existing ids are left
    /// untouched and reported in [`ItemInsertReport::skipped`].
    async fn insert_items(&self, items: &[Item]) -> Result<ItemInsertReport>;

    async fn get_item(&self, id: &str) -> Result<Option<Item>>;

    /// `(id, vector)` for every item with a vector, ordered by id.
    async fn item_vectors(&self) -> Result<Vec<(String, Vec<f32>)>>;

    async fn count_items(&self) -> Result<i64>;

    /// Insert a batch of triplets into `collection` atomically. When
    /// `upload_id` is given, that upload's `uploaded_count` grows by one per
    /// inserted row inside the same transaction. Returns the inserted count.
    async fn insert_triplets(
        &self,
        collection: Collection,
        triplets: &[NewTriplet],
        upload_id: Option<i64>,
    ) -> Result<u64>;

    /// Atomically select the lowest-id triplet that is unlabeled and either
    /// never retrieved or retrieved before `cutoff`, stamp it with
    /// `retrieved_at = now`, and return it.
    async fn acquire_next_unlabeled(
        &self,
        collection: Collection,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Triplet>>;

    /// Overwrite label and user id. Returns `false` if the id does not exist.
    async fn set_label(
        &self,
        collection: Collection,
        triplet_id: i64,
        label: Label,
        user_id: &str,
    ) -> Result<bool>;

    async fn get_triplet(&self, collection: Collection, triplet_id: i64)
        -> Result<Option<Triplet>>;

    async fn count_triplets(&self, collection: Collection, labeled: bool) -> Result<i64>;

    /// Labeled rows of a collection, ordered by id.
    async fn labeled_triplets(&self, collection: Collection) -> Result<Vec<Triplet>>;

    /// Delete every row of a collection. Returns the number removed.
    async fn delete_triplets(&self, collection: Collection) -> Result<u64>;

    async fn create_upload_status(&self, to_upload_count: i64) -> Result<UploadStatus>;

    async fn set_upload_total(&self, upload_id: i64, to_upload_count: i64) -> Result<()>;

    async fn set_upload_stage(
        &self,
        upload_id: i64,
        stage: UploadStage,
        error: Option<&str>,
    ) -> Result<()>;

    async fn get_upload_status(&self, upload_id: i64) -> Result<Option<UploadStatus>>;

    /// The most recently created upload row.
    async fn latest_upload_status(&self) -> Result<Option<UploadStatus>>;
}
