//! Exact nearest-neighbour ranking over item vectors.
//!
//! Labeling datasets are small enough that a brute-force scan is both exact
//! and fast, so there is no index here: every candidate with a vector is
//! scored against the anchor and the `k` closest are kept.

use std::cmp::Ordering;

use serde::Serialize;

use crate::embedding::cosine_distance;

/// One ranked neighbour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
}

/// Rank `candidates` by ascending cosine distance to `anchor_vec`.
///
/// When the anchor is among the candidates it ranks first at distance zero.
/// Ties are broken by id so the output is deterministic.
pub fn rank_neighbors<'a, I>(anchor_vec: &[f32], candidates: I, k: usize) -> Vec<Neighbor>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<Neighbor> = candidates
        .into_iter()
        .map(|(id, vec)| Neighbor {
            id: id.to_string(),
            distance: cosine_distance(anchor_vec, vec),
        })
        .collect();

    scored.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> Vec<(String, Vec<f32>)> {
        vec![
            ("anchor".into(), vec![1.0, 0.0]),
            ("close".into(), vec![0.9, 0.1]),
            ("mid".into(), vec![0.5, 0.5]),
            ("far".into(), vec![-1.0, 0.0]),
        ]
    }

    #[test]
    fn ranks_anchor_first_then_by_ascending_distance() {
        let items = fixtures();
        let result = rank_neighbors(
            &[1.0, 0.0],
            items.iter().map(|(id, v)| (id.as_str(), v.as_slice())),
            10,
        );
        let ids: Vec<&str> = result.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["anchor", "close", "mid", "far"]);
        assert_eq!(result[0].distance, 0.0);
    }

    #[test]
    fn truncates_to_k() {
        let items = fixtures();
        let result = rank_neighbors(
            &[1.0, 0.0],
            items.iter().map(|(id, v)| (id.as_str(), v.as_slice())),
            2,
        );
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, "anchor");
        assert_eq!(result[1].id, "close");
    }

    #[test]
    fn ties_break_by_id() {
        let items = vec![
            ("b".to_string(), vec![0.0, 1.0]),
            ("a".to_string(), vec![0.0, 1.0]),
        ];
        let result = rank_neighbors(
            &[1.0, 0.0],
            items.iter().map(|(id, v)| (id.as_str(), v.as_slice())),
            2,
        );
        assert_eq!(result[0].id, "a");
        assert_eq!(result[1].id, "b");
    }
}
