//! Vector math over product and preference embeddings.
//!
//! Pure functions, no I/O. Batch similarity runs on `ndarray` so a full
//! candidate pool (≤200 rows) is one matrix-vector product.

use ndarray::{Array1, Array2, Axis};

/// Cosine similarity. Zero-norm or mismatched vectors score 0.0.
///
/// The result is clamped to [-1, 1] to absorb floating-point rounding on
/// near-parallel vectors; it never rescales a genuine score.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let va = to_array(a);
    let vb = to_array(b);
    let norm_a = va.dot(&va).sqrt();
    let norm_b = vb.dot(&vb).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (va.dot(&vb) / (norm_a * norm_b)).clamp(-1.0, 1.0) as f32
}

/// Cosine similarity of `query` against every row of `matrix`.
///
/// Output is index-aligned with `matrix`. Rows whose dimension differs
/// from the query, or with zero norm, get 0.0. Scores are clamped to
/// [-1, 1] for rounding only, as in [`cosine_similarity`].
pub fn batch_cosine_similarity(query: &[f32], matrix: &[&[f32]]) -> Vec<f32> {
    let mut out = vec![0.0f32; matrix.len()];
    if query.is_empty() || matrix.is_empty() {
        return out;
    }

    let q = to_array(query);
    let q_norm = q.dot(&q).sqrt();
    if q_norm == 0.0 {
        return out;
    }

    let dim = query.len();
    let valid: Vec<usize> = (0..matrix.len())
        .filter(|&i| matrix[i].len() == dim)
        .collect();
    if valid.is_empty() {
        return out;
    }

    let flat: Vec<f64> = valid
        .iter()
        .flat_map(|&i| matrix[i].iter().map(|&x| x as f64))
        .collect();
    let rows = match Array2::from_shape_vec((valid.len(), dim), flat) {
        Ok(rows) => rows,
        Err(_) => return out,
    };

    let dots = rows.dot(&q);
    let norms = rows.map_axis(Axis(1), |row| row.dot(&row).sqrt());

    for (k, &idx) in valid.iter().enumerate() {
        let norm = norms[k];
        if norm > 0.0 {
            out[idx] = (dots[k] / (norm * q_norm)).clamp(-1.0, 1.0) as f32;
        }
    }

    out
}

/// Weighted mean of `vectors`, L2-normalized.
///
/// Uniform weights when `weights` is `None`. A non-positive total weight
/// falls back to the unweighted mean. Empty input yields an empty vector.
pub fn aggregate_embeddings(vectors: &[Vec<f32>], weights: Option<&[f64]>) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let dim = first.len();

    let (rows, row_weights): (Vec<&Vec<f32>>, Vec<f64>) = vectors
        .iter()
        .enumerate()
        .filter(|(_, v)| v.len() == dim)
        .map(|(i, v)| (v, weights.and_then(|w| w.get(i).copied()).unwrap_or(1.0)))
        .unzip();

    let flat: Vec<f64> = rows
        .iter()
        .flat_map(|v| v.iter().map(|&x| x as f64))
        .collect();
    let matrix = match Array2::from_shape_vec((rows.len(), dim), flat) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };

    let w = Array1::from(row_weights);
    let total = w.sum();

    let mean = if total > 0.0 {
        w.dot(&matrix) / total
    } else {
        match matrix.mean_axis(Axis(0)) {
            Some(m) => m,
            None => return Vec::new(),
        }
    };

    normalize(&mean)
}

/// L2-normalize; zero vectors are returned unchanged.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    normalize(&to_array(v))
}

fn normalize(v: &Array1<f64>) -> Vec<f32> {
    let norm = v.dot(v).sqrt();
    if norm > 0.0 {
        v.iter().map(|x| (x / norm) as f32).collect()
    } else {
        v.iter().map(|&x| x as f32).collect()
    }
}

fn to_array(v: &[f32]) -> Array1<f64> {
    v.iter().map(|&x| x as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_cosine_identical_vectors() {
        let a = vec![0.3, -1.2, 4.0, 0.01];
        assert!(approx(cosine_similarity(&a, &a), 1.0, 1e-6));
    }

    #[test]
    fn test_cosine_zero_vector() {
        let a = vec![1.0, 2.0, 3.0];
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &a), 0.0);
    }

    #[test]
    fn test_cosine_symmetric_and_bounded() {
        let pairs = vec![
            (vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]),
            (vec![1.0, 2.0, 3.0], vec![-1.0, -2.0, -3.0]),
            (vec![0.5, 0.1, -0.7], vec![2.0, 0.3, 0.9]),
        ];
        for (a, b) in pairs {
            let ab = cosine_similarity(&a, &b);
            let ba = cosine_similarity(&b, &a);
            assert_eq!(ab, ba);
            assert!((-1.0..=1.0).contains(&ab));
        }
        assert!(approx(
            cosine_similarity(&[1.0, 2.0, 3.0], &[-1.0, -2.0, -3.0]),
            -1.0,
            1e-6
        ));
    }

    #[test]
    fn test_clamp_only_absorbs_rounding() {
        let a = vec![0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        let scaled: Vec<f32> = a.iter().map(|x| x * 3.7).collect();
        let single = cosine_similarity(&a, &scaled);
        assert!(single <= 1.0);
        assert!(approx(single, 1.0, 1e-6));

        let b = vec![0.5, -0.2, 0.1, 0.0, 0.3, -0.4, 0.9];
        let expected = {
            let dot: f64 = a.iter().zip(&b).map(|(x, y)| *x as f64 * *y as f64).sum();
            let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
            let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
            (dot / (na * nb)) as f32
        };
        assert!(approx(cosine_similarity(&a, &b), expected, 1e-6));

        let batch = batch_cosine_similarity(&a, &[scaled.as_slice(), b.as_slice()]);
        assert!(batch[0] <= 1.0 && approx(batch[0], 1.0, 1e-6));
        assert!(approx(batch[1], expected, 1e-6));
    }

    #[test]
    fn test_batch_matches_pairwise() {
        let query = vec![0.2, 0.4, -0.1, 0.9];
        let rows: Vec<Vec<f32>> = vec![
            vec![0.1, 0.1, 0.1, 0.1],
            vec![-0.5, 0.3, 0.2, 0.0],
            vec![0.0, 0.0, 0.0, 0.0],
            vec![0.9, -0.9, 0.4, 0.2],
        ];
        let refs: Vec<&[f32]> = rows.iter().map(|r| r.as_slice()).collect();
        let batch = batch_cosine_similarity(&query, &refs);

        assert_eq!(batch.len(), rows.len());
        for (i, row) in rows.iter().enumerate() {
            assert!(approx(batch[i], cosine_similarity(&query, row), 1e-6));
        }
        assert_eq!(batch[2], 0.0);
    }

    #[test]
    fn test_batch_wrong_dimension_scores_zero() {
        let query = vec![1.0, 0.0];
        let rows: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]];
        let refs: Vec<&[f32]> = rows.iter().map(|r| r.as_slice()).collect();
        let batch = batch_cosine_similarity(&query, &refs);
        assert!(approx(batch[0], 1.0, 1e-6));
        assert_eq!(batch[1], 0.0);
    }

    #[test]
    fn test_aggregate_single_is_normalized() {
        let v = vec![3.0, 4.0];
        assert_eq!(aggregate_embeddings(&[v.clone()], None), l2_normalize(&v));
        let agg = aggregate_embeddings(&[v], None);
        assert!(approx(agg[0], 0.6, 1e-6));
        assert!(approx(agg[1], 0.8, 1e-6));
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate_embeddings(&[], None).is_empty());
    }

    #[test]
    fn test_weighted_aggregate_dominance() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let agg = aggregate_embeddings(&[a, b], Some(&[10.0, 1.0]));
        assert!(agg[0] > agg[1] * 5.0);

        let norm: f32 = agg.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!(approx(norm, 1.0, 1e-6));
    }

    #[test]
    fn test_zero_total_weight_falls_back_to_mean() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let agg = aggregate_embeddings(&[a, b], Some(&[1.0, -1.0]));
        assert!(approx(agg[0], agg[1], 1e-6));
        assert!(agg[0] > 0.0);
    }
}
