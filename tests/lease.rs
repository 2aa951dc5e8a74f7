//! Lease and labeling behavior against the SQLite store.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use labelizer::config::Config;
use labelizer::error::LabelError;
use labelizer::sqlite_store::SqliteStore;
use labelizer::{db, migrate, triplets};
use labelizer_core::lease::LeasePolicy;
use labelizer_core::models::{Collection, Encoders, Item, Label, NewTriplet};
use labelizer_core::store::Store;

async fn setup() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    let store = SqliteStore::new(pool);

    let items: Vec<Item> = ["a", "b", "c"]
        .iter()
        .map(|id| Item {
            id: id.to_string(),
            length: 10.0,
            dataset: "set1".into(),
            vector: None,
        })
        .collect();
    store.insert_items(&items).await.unwrap();

    let rows: Vec<NewTriplet> = (0..3)
        .map(|_| NewTriplet {
            reference_id: "a".into(),
            left_id: "b".into(),
            right_id: "c".into(),
            encoders: Encoders::Single {
                encoder_id: "enc".into(),
            },
            label: None,
            user_id: None,
        })
        .collect();
    store
        .insert_triplets(Collection::Primary, &rows, None)
        .await
        .unwrap();
    (tmp, store)
}

fn policy() -> LeasePolicy {
    LeasePolicy::new(std::time::Duration::from_secs(30))
}

#[tokio::test]
async fn fresh_triplets_are_dispatched_lowest_id_first() {
    let (_tmp, store) = setup().await;

    let first = triplets::acquire_next_unlabeled(&store, Collection::Primary, &policy())
        .await
        .unwrap();
    let second = triplets::acquire_next_unlabeled(&store, Collection::Primary, &policy())
        .await
        .unwrap();
    assert_eq!(first.triplet.id, 1);
    assert_eq!(second.triplet.id, 2);
    assert_eq!(first.reference.dataset, "set1");
    assert_eq!(first.left.length, 10.0);

    let stored = store
        .get_triplet(Collection::Primary, 1)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.retrieved_at.is_some());
}

#[tokio::test]
async fn exhausted_collection_is_not_found() {
    let (_tmp, store) = setup().await;
    for _ in 0..3 {
        triplets::acquire_next_unlabeled(&store, Collection::Primary, &policy())
            .await
            .unwrap();
    }
    let err = triplets::acquire_next_unlabeled(&store, Collection::Primary, &policy())
        .await
        .unwrap_err();
    assert!(matches!(err, LabelError::NotFound(_)));

    let err = triplets::acquire_next_unlabeled(&store, Collection::Validation, &policy())
        .await
        .unwrap_err();
    assert!(matches!(err, LabelError::NotFound(_)));
}

#[tokio::test]
async fn stale_lease_is_dispatched_again() {
    let (_tmp, store) = setup().await;
    let t0 = Utc::now() - Duration::seconds(120);

    let first = store
        .acquire_next_unlabeled(Collection::Primary, t0 - Duration::seconds(30), t0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, 1);

    // Ten seconds later the lease still holds
    let t1 = t0 + Duration::seconds(10);
    let next = store
        .acquire_next_unlabeled(Collection::Primary, t1 - Duration::seconds(30), t1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id, 2);

    // After the timeout triplet 1 is eligible again
    let t2 = t0 + Duration::seconds(31);
    let again = store
        .acquire_next_unlabeled(Collection::Primary, t2 - Duration::seconds(30), t2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.id, 1);
}

#[tokio::test]
async fn labeled_triplets_are_never_dispatched() {
    let (_tmp, store) = setup().await;
    triplets::set_label(&store, Collection::Primary, 1, Label::Left, "alice")
        .await
        .unwrap();
    triplets::set_label(&store, Collection::Primary, 2, Label::DontKnow, "bob")
        .await
        .unwrap();

    let next = triplets::acquire_next_unlabeled(&store, Collection::Primary, &policy())
        .await
        .unwrap();
    assert_eq!(next.triplet.id, 3);

    let stats = triplets::triplet_stats(&store).await.unwrap();
    assert_eq!(stats.labeled, 2);
    assert_eq!(stats.unlabeled, 1);
    assert_eq!(stats.validation_labeled, 0);
}

#[tokio::test]
async fn relabel_overwrites_and_keeps_user() {
    let (_tmp, store) = setup().await;
    triplets::set_label(&store, Collection::Primary, 1, Label::Left, "alice")
        .await
        .unwrap();
    triplets::set_label(&store, Collection::Primary, 1, Label::Right, "bob")
        .await
        .unwrap();

    let t = store
        .get_triplet(Collection::Primary, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(t.label, Some(Label::Right));
    assert_eq!(t.user_id.as_deref(), Some("bob"));
}

#[tokio::test]
async fn label_on_missing_triplet_is_not_found() {
    let (_tmp, store) = setup().await;
    let err = triplets::set_label(&store, Collection::Primary, 99, Label::Left, "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, LabelError::NotFound(_)));

    let stats = triplets::triplet_stats(&store).await.unwrap();
    assert_eq!(stats.labeled, 0);
    assert_eq!(stats.unlabeled, 3);
}

#[tokio::test]
async fn delete_all_empties_only_that_collection() {
    let (_tmp, store) = setup().await;
    let removed = triplets::delete_all(&store, Collection::Primary).await.unwrap();
    assert_eq!(removed, 3);

    let stats = triplets::triplet_stats(&store).await.unwrap();
    assert_eq!(stats.labeled + stats.unlabeled, 0);
    assert_eq!(store.count_items().await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_callers_never_share_a_validation_triplet() {
    const SEEDED: usize = 16;
    const CALLERS: usize = 2 * SEEDED;

    let (_tmp, store) = setup().await;
    let rows: Vec<NewTriplet> = (0..SEEDED)
        .map(|i| NewTriplet {
            reference_id: "c".into(),
            left_id: "a".into(),
            right_id: "b".into(),
            encoders: Encoders::Pair {
                left_encoder_id: format!("left-{i}"),
                right_encoder_id: format!("right-{i}"),
            },
            label: None,
            user_id: None,
        })
        .collect();
    store
        .insert_triplets(Collection::Validation, &rows, None)
        .await
        .unwrap();

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                triplets::acquire_next_unlabeled(&store, Collection::Validation, &policy()).await
            })
        })
        .collect();

    let mut won = Vec::new();
    let mut not_found = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(enriched) => won.push(enriched),
            Err(LabelError::NotFound(_)) => not_found += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(won.len(), SEEDED);
    assert_eq!(not_found, CALLERS - SEEDED);
    let ids: HashSet<i64> = won.iter().map(|e| e.triplet.id).collect();
    assert_eq!(ids.len(), SEEDED);

    for enriched in &won {
        let n = enriched.triplet.id - 1;
        assert_eq!(
            enriched.triplet.encoders,
            Encoders::Pair {
                left_encoder_id: format!("left-{n}"),
                right_encoder_id: format!("right-{n}"),
            }
        );
        assert_eq!(enriched.reference.dataset, "set1");
    }

    // Primary collection untouched
    let stats = triplets::triplet_stats(&store).await.unwrap();
    assert_eq!(stats.unlabeled, 3);
    assert_eq!(stats.validation_unlabeled, SEEDED as i64);
}
