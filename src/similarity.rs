//! Pairwise similarity and nearest-neighbour lookup over item vectors.

use labelizer_core::embedding::cosine_similarity;
use labelizer_core::models::Item;
use labelizer_core::search::{rank_neighbors, Neighbor};
use labelizer_core::store::Store;

use crate::config::Config;
use crate::error::{LabelError, Result};
use crate::sqlite_store::SqliteStore;

async fn item_with_vector(store: &dyn Store, id: &str) -> Result<(Item, Vec<f32>)> {
    let mut item = store
        .get_item(id)
        .await?
        .ok_or_else(|| LabelError::NotFound(format!("Item {} not found", id)))?;
    let vector = item
        .vector
        .take()
        .ok_or_else(|| LabelError::InvalidInput(format!("Item {} has no vector", id)))?;
    Ok((item, vector))
}

/// Cosine similarity (`1 - cosine distance`) between two items.
pub async fn similarity_score(store: &dyn Store, item1_id: &str, item2_id: &str) -> Result<f32> {
    let (_, a) = item_with_vector(store, item1_id).await?;
    let (_, b) = item_with_vector(store, item2_id).await?;
    Ok(cosine_similarity(&a, &b))
}

/// The `k` items closest to `item_id`, nearest first.
///
/// The item itself is a candidate, so it leads the list at distance zero.
pub async fn nearest_neighbors(store: &dyn Store, item_id: &str, k: usize) -> Result<Vec<Neighbor>> {
    if k == 0 {
        return Err(LabelError::InvalidInput(
            "nearest_neighbors_count must be at least 1".into(),
        ));
    }
    let (_, anchor_vec) = item_with_vector(store, item_id).await?;
    let vectors = store.item_vectors().await?;
    Ok(rank_neighbors(
        &anchor_vec,
        vectors.iter().map(|(id, v)| (id.as_str(), v.as_slice())),
        k,
    ))
}

// ============ CLI ============

/// `labelizer similarity <a> <b>`
pub async fn run_similarity(config: &Config, item1_id: &str, item2_id: &str) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let result = similarity_score(&store, item1_id, item2_id).await;
    pool.close().await;

    println!("{:.6}", result?);
    Ok(())
}

/// `labelizer neighbors <id> [-k N]`
pub async fn run_neighbors(config: &Config, item_id: &str, k: usize) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let result = nearest_neighbors(&store, item_id, k).await;
    pool.close().await;

    let neighbors = result?;
    if neighbors.is_empty() {
        println!("No neighbors found for {}.", item_id);
        return Ok(());
    }
    for (rank, n) in neighbors.iter().enumerate() {
        println!("{}. {} (distance {:.4})", rank + 1, n.id, n.distance);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelizer_core::store::memory::InMemoryStore;

    fn item(id: &str, vector: Option<Vec<f32>>) -> Item {
        Item {
            id: id.into(),
            length: 1.0,
            dataset: "ds".into(),
            vector,
        }
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_items(&[
                item("a", Some(vec![1.0, 0.0])),
                item("b", Some(vec![0.9, 0.1])),
                item("c", Some(vec![0.0, 1.0])),
                item("d", Some(vec![-1.0, 0.0])),
                item("bare", None),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn identical_direction_scores_one() {
        let store = seeded().await;
        let s = similarity_score(&store, "a", "a").await.unwrap();
        assert!((s - 1.0).abs() < 1e-6);
        let s = similarity_score(&store, "a", "d").await.unwrap();
        assert!((s + 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn missing_item_or_vector() {
        let store = seeded().await;
        assert!(matches!(
            similarity_score(&store, "a", "zzz").await.unwrap_err(),
            LabelError::NotFound(_)
        ));
        assert!(matches!(
            similarity_score(&store, "a", "bare").await.unwrap_err(),
            LabelError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn neighbors_lead_with_anchor_and_are_ordered() {
        let store = seeded().await;
        let ids: Vec<String> = nearest_neighbors(&store, "a", 3)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let all = nearest_neighbors(&store, "a", 10).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].distance, 0.0);
        assert_eq!(all.last().unwrap().id, "d");
    }

    #[tokio::test]
    async fn zero_k_is_invalid() {
        let store = seeded().await;
        assert!(matches!(
            nearest_neighbors(&store, "a", 0).await.unwrap_err(),
            LabelError::InvalidInput(_)
        ));
    }
}
