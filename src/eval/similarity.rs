//! Cosine similarity scoring.

use crate::error::{RagError, Result};

/// Compute cosine similarity between two vectors.
///
/// Vectors of different length, or with zero magnitude, score 0.0. Use
/// [`cosine`] when a dimension mismatch must be reported.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Pairwise cosine similarity of every query against every candidate,
/// flattened row-major.
///
/// With a single query vector the output is aligned index-for-index with
/// `candidates`. Fails if any vector's dimension differs from the first query.
pub fn cosine(queries: &[Vec<f32>], candidates: &[Vec<f32>]) -> Result<Vec<f32>> {
    let Some(dimension) = queries.first().map(Vec::len) else {
        return Ok(Vec::new());
    };

    if let Some(bad) = queries
        .iter()
        .chain(candidates.iter())
        .find(|v| v.len() != dimension)
    {
        return Err(RagError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }

    Ok(queries
        .iter()
        .flat_map(|q| candidates.iter().map(move |c| cosine_similarity(q, c)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);

        let d = vec![-2.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_aligned_to_candidates() {
        let query = vec![vec![1.0, 0.0]];
        let candidates = vec![vec![0.9, 0.435_889_9], vec![0.3, 0.953_939_2], vec![0.0, 5.0]];

        let scores = cosine(&query, &candidates).unwrap();
        assert_eq!(scores.len(), 3);
        assert!((scores[0] - 0.9).abs() < 1e-5);
        assert!((scores[1] - 0.3).abs() < 1e-5);
        assert!(scores[2].abs() < 1e-6);
    }

    #[test]
    fn test_cosine_row_major_for_many_queries() {
        let queries = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let candidates = vec![vec![1.0, 0.0], vec![0.0, 1.0]];

        let scores = cosine(&queries, &candidates).unwrap();
        assert_eq!(scores.len(), 4);
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!(scores[1].abs() < 1e-6);
        assert!(scores[2].abs() < 1e-6);
        assert!((scores[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        let err = cosine(&[vec![1.0, 0.0]], &[vec![1.0, 0.0, 0.0]]).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_cosine_no_candidates() {
        assert!(cosine(&[vec![1.0]], &[]).unwrap().is_empty());
    }
}
