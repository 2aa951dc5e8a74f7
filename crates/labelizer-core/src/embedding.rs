//! Item embedding vectors: serialization and similarity.
//!
//! Vectors are precomputed upstream and arrive with the items of an upload.
//! This module only stores and compares them:
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian f32 BLOB encoding for SQLite
//! - [`parse_vector`]: the comma-separated text form used in `items.csv`
//! - [`cosine_similarity`] / [`cosine_distance`]: the metric behind the
//!   similarity score and nearest-neighbour ranking

use anyhow::{bail, Context, Result};

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use labelizer_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Parse `"0.1, 0.2, 0.3"` (optionally wrapped in `[` `]`) and check its
/// dimensionality.
pub fn parse_vector(text: &str, dims: usize) -> Result<Vec<f32>> {
    let trimmed = text.trim().trim_start_matches('[').trim_end_matches(']');
    let vector = trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("invalid vector component '{}'", part.trim()))
        })
        .collect::<Result<Vec<f32>>>()?;

    if vector.len() != dims {
        bail!(
            "vector has {} components, expected {}",
            vector.len(),
            dims
        );
    }
    if vector.iter().any(|v| !v.is_finite()) {
        bail!("vector contains non-finite components");
    }
    Ok(vector)
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// `1 - cosine_similarity`, in `[0.0, 2.0]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_parse_vector_accepts_brackets_and_spaces() {
        let v = parse_vector("[0.5, -1, 2.25]", 3).unwrap();
        assert_eq!(v, vec![0.5, -1.0, 2.25]);
    }

    #[test]
    fn test_parse_vector_rejects_wrong_dims() {
        let err = parse_vector("1,2", 3).unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn test_parse_vector_rejects_garbage() {
        assert!(parse_vector("1,abc,3", 3).is_err());
        assert!(parse_vector("1,NaN,3", 3).is_err());
    }
}
