//! Triplet dispatch, labeling, and statistics.
//!
//! Annotators ask for "the next triplet" and get the lowest-id unlabeled one
//! that nobody has been handed within the lock timeout (see
//! [`labelizer_core::lease`]). The response carries the length and dataset of
//! all three referenced items, looked up from the item table at response
//! time.
//!
//! Labeling is unconditional: it does not check who holds the lease, and a
//! second label on the same triplet silently replaces the first.

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use labelizer_core::lease::LeasePolicy;
use labelizer_core::models::{
    Collection, EnrichedTriplet, Encoders, ItemSummary, Label, Triplet, TripletStats,
};
use labelizer_core::store::Store;

use crate::config::Config;
use crate::error::{LabelError, Result};
use crate::sqlite_store::SqliteStore;

/// Wire shape of a dispatched triplet.
#[derive(Debug, Clone, Serialize)]
pub struct TripletResponse {
    pub id: i64,
    pub reference_id: String,
    pub reference_length: f64,
    pub reference_dataset: String,
    pub left_id: String,
    pub left_length: f64,
    pub left_dataset: String,
    pub right_id: String,
    pub right_length: f64,
    pub right_dataset: String,
    #[serde(flatten)]
    pub encoders: Encoders,
}

impl From<EnrichedTriplet> for TripletResponse {
    fn from(e: EnrichedTriplet) -> Self {
        Self {
            id: e.triplet.id,
            reference_id: e.reference.id,
            reference_length: e.reference.length,
            reference_dataset: e.reference.dataset,
            left_id: e.left.id,
            left_length: e.left.length,
            left_dataset: e.left.dataset,
            right_id: e.right.id,
            right_length: e.right.length,
            right_dataset: e.right.dataset,
            encoders: e.triplet.encoders,
        }
    }
}

/// Lease the next eligible triplet of `collection`.
///
/// Returns [`LabelError::NotFound`] when every triplet is labeled or
/// currently leased. That is the normal "nothing to do" signal, not a fault.
pub async fn acquire_next_unlabeled(
    store: &dyn Store,
    collection: Collection,
    policy: &LeasePolicy,
) -> Result<EnrichedTriplet> {
    let now = Utc::now();
    let triplet = store
        .acquire_next_unlabeled(collection, policy.cutoff(now), now)
        .await?
        .ok_or_else(|| {
            info!(collection = collection.noun(), "no unlabeled triplet available");
            LabelError::NotFound(format!("No unlabeled {} found.", collection.noun()))
        })?;

    info!(
        triplet_id = triplet.id,
        collection = collection.noun(),
        "triplet retrieved"
    );
    enrich(store, triplet).await
}

/// Attach the referenced items' attributes to a triplet.
pub async fn enrich(store: &dyn Store, triplet: Triplet) -> Result<EnrichedTriplet> {
    let reference = item_summary(store, &triplet.reference_id).await?;
    let left = item_summary(store, &triplet.left_id).await?;
    let right = item_summary(store, &triplet.right_id).await?;
    Ok(EnrichedTriplet {
        triplet,
        reference,
        left,
        right,
    })
}

async fn item_summary(store: &dyn Store, id: &str) -> Result<ItemSummary> {
    let item = store
        .get_item(id)
        .await?
        .ok_or_else(|| LabelError::NotFound(format!("Item {} not found", id)))?;
    Ok(ItemSummary {
        id: item.id,
        length: item.length,
        dataset: item.dataset,
    })
}

/// Record an annotator's choice, overwriting any earlier label.
pub async fn set_label(
    store: &dyn Store,
    collection: Collection,
    triplet_id: i64,
    label: Label,
    user_id: &str,
) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(LabelError::InvalidInput("user id must not be empty".into()));
    }
    let found = store
        .set_label(collection, triplet_id, label, user_id)
        .await?;
    if !found {
        return Err(LabelError::NotFound(format!(
            "No {} found with id {}",
            collection.noun(),
            triplet_id
        )));
    }
    info!(
        triplet_id,
        collection = collection.noun(),
        label = %label,
        user_id,
        "triplet labeled"
    );
    Ok(())
}

pub async fn triplet_stats(store: &dyn Store) -> Result<TripletStats> {
    Ok(TripletStats {
        labeled: store.count_triplets(Collection::Primary, true).await?,
        unlabeled: store.count_triplets(Collection::Primary, false).await?,
        validation_labeled: store.count_triplets(Collection::Validation, true).await?,
        validation_unlabeled: store.count_triplets(Collection::Validation, false).await?,
    })
}

pub async fn delete_all(store: &dyn Store, collection: Collection) -> Result<u64> {
    let removed = store.delete_triplets(collection).await?;
    info!(collection = collection.noun(), removed, "collection deleted");
    Ok(removed)
}

// ============ CLI ============

/// `labelizer stats`
pub async fn run_stats(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let stats = triplet_stats(&store).await?;
    let items = store.count_items().await?;
    let upload = store.latest_upload_status().await?;

    println!("Labelizer Database Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Items:       {}", items);
    println!();
    println!(
        "  Triplets:             {} labeled / {} unlabeled",
        stats.labeled, stats.unlabeled
    );
    println!(
        "  Validation triplets:  {} labeled / {} unlabeled",
        stats.validation_labeled, stats.validation_unlabeled
    );
    if let Some(u) = upload {
        println!();
        println!(
            "  Last upload #{}: {} / {} ({})",
            u.id, u.uploaded_count, u.to_upload_count, u.stage
        );
    }

    pool.close().await;
    Ok(())
}

/// `labelizer delete [--validation]`
pub async fn run_delete(config: &Config, validation: bool) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let collection = Collection::from_validation_flag(validation);

    let removed = delete_all(&store, collection)
        .await
        .with_context(|| format!("Failed to delete {}s", collection.noun()))?;
    debug!(removed, "delete finished");
    println!("Deleted {} {}s.", removed, collection.noun());

    pool.close().await;
    Ok(())
}
