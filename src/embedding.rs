//! Dimensionality reduction for activation vectors.
//!
//! Three interchangeable methods produce fixed-dimension embeddings:
//! seeded Gaussian random projection, contiguous-segment mean pooling, and
//! a PCA entry point that currently approximates via random projection
//! (see [`EmbeddingMethod::Pca`]).

use std::str::FromStr;

use anyhow::Result;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default seed for the projection matrix. Overridable via
/// [`compute_embeddings_seeded`].
pub const DEFAULT_PROJECTION_SEED: u64 = 42;

/// Closed set of reduction methods, dispatched at compile time.
///
/// Parsed from strings only at the call boundary (CLI flags), via
/// [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMethod {
    RandomProjection,
    MeanPooling,
    /// Intended to find directions of maximum variance. The current
    /// behavior computes the mean vector and then falls back to random
    /// projection, for parity with the reference pipeline; results still
    /// carry the `pca` tag. An approximation, not true PCA.
    Pca,
}

impl EmbeddingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RandomProjection => "random_projection",
            Self::MeanPooling => "mean_pooling",
            Self::Pca => "pca",
        }
    }
}

impl FromStr for EmbeddingMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random_projection" => Ok(Self::RandomProjection),
            "mean_pooling" => Ok(Self::MeanPooling),
            "pca" => Ok(Self::Pca),
            other => anyhow::bail!(
                "unknown embedding method {other:?} (expected random_projection, mean_pooling, or pca)"
            ),
        }
    }
}

impl std::fmt::Display for EmbeddingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reduced activation vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub source_id: String,
    pub embedding: Vec<f32>,
    pub method: EmbeddingMethod,
}

/// Reduce `(id, activation)` pairs to `target_dim` with the default
/// projection seed.
pub fn compute_embeddings(
    inputs: &[(String, Vec<f32>)],
    target_dim: usize,
    method: EmbeddingMethod,
) -> Result<Vec<EmbeddingResult>> {
    compute_embeddings_seeded(inputs, target_dim, method, DEFAULT_PROJECTION_SEED)
}

/// Reduce `(id, activation)` pairs to `target_dim` with an explicit seed.
///
/// An empty input is a no-data condition: logged and returned as an empty
/// result set. Ragged input dimensions, a zero target dimension, or mean
/// pooling with `target_dim > D` are invalid-argument errors.
pub fn compute_embeddings_seeded(
    inputs: &[(String, Vec<f32>)],
    target_dim: usize,
    method: EmbeddingMethod,
    seed: u64,
) -> Result<Vec<EmbeddingResult>> {
    if inputs.is_empty() {
        warn!("no activations supplied for embedding; returning empty result");
        return Ok(Vec::new());
    }
    anyhow::ensure!(target_dim > 0, "target dimension must be positive");

    let dim = inputs[0].1.len();
    anyhow::ensure!(dim > 0, "activation vectors must be non-empty");
    for (id, vector) in inputs {
        anyhow::ensure!(
            vector.len() == dim,
            "activation {id:?} has dimension {}, expected {dim}",
            vector.len()
        );
    }

    match method {
        EmbeddingMethod::RandomProjection => project(inputs, dim, target_dim, seed, method),
        EmbeddingMethod::MeanPooling => mean_pool(inputs, dim, target_dim),
        EmbeddingMethod::Pca => {
            // Mean vector kept for parity with the reference path; the
            // reduction itself is the seeded projection.
            let mut mean = Array1::<f32>::zeros(dim);
            for (_, vector) in inputs {
                mean += &ArrayView1::from(vector.as_slice());
            }
            mean /= inputs.len() as f32;
            debug!(
                "pca fallback: mean vector norm {:.6}, delegating to random projection",
                mean.dot(&mean).sqrt()
            );
            project(inputs, dim, target_dim, seed, method)
        }
    }
}

/// Seeded Gaussian projection: a D×T matrix of `Normal(0,1)` draws (row-
/// major fill order) scaled by `√(1/T)`. Bit-reproducible for a given
/// `(D, T, seed)`.
fn project(
    inputs: &[(String, Vec<f32>)],
    dim: usize,
    target_dim: usize,
    seed: u64,
    method: EmbeddingMethod,
) -> Result<Vec<EmbeddingResult>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0_f32, 1.0).expect("valid normal parameters");
    let scale = (1.0 / target_dim as f32).sqrt();
    let projection =
        Array2::from_shape_fn((dim, target_dim), |_| normal.sample(&mut rng) * scale);

    Ok(inputs
        .iter()
        .map(|(id, vector)| EmbeddingResult {
            source_id: id.clone(),
            embedding: ArrayView1::from(vector.as_slice())
                .dot(&projection)
                .to_vec(),
            method,
        })
        .collect())
}

/// Partition `[0, D)` into `target_dim` contiguous segments of
/// `pool = D / target_dim`, the last segment absorbing the remainder; each
/// output coordinate is its segment's mean.
fn mean_pool(
    inputs: &[(String, Vec<f32>)],
    dim: usize,
    target_dim: usize,
) -> Result<Vec<EmbeddingResult>> {
    anyhow::ensure!(
        target_dim <= dim,
        "mean pooling cannot expand dimension {dim} to {target_dim}"
    );
    let pool = dim / target_dim;

    Ok(inputs
        .iter()
        .map(|(id, vector)| {
            let embedding = (0..target_dim)
                .map(|k| {
                    let start = k * pool;
                    let end = if k == target_dim - 1 { dim } else { start + pool };
                    let segment = &vector[start..end];
                    segment.iter().sum::<f32>() / segment.len() as f32
                })
                .collect();
            EmbeddingResult {
                source_id: id.clone(),
                embedding,
                method: EmbeddingMethod::MeanPooling,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(vectors: Vec<Vec<f32>>) -> Vec<(String, Vec<f32>)> {
        vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("a{i}"), v))
            .collect()
    }

    #[test]
    fn test_empty_input_returns_empty() {
        for method in [
            EmbeddingMethod::RandomProjection,
            EmbeddingMethod::MeanPooling,
            EmbeddingMethod::Pca,
        ] {
            let result = compute_embeddings(&[], 4, method).unwrap();
            assert!(result.is_empty());
        }
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(
            "random_projection".parse::<EmbeddingMethod>().unwrap(),
            EmbeddingMethod::RandomProjection
        );
        assert_eq!(
            "mean_pooling".parse::<EmbeddingMethod>().unwrap(),
            EmbeddingMethod::MeanPooling
        );
        assert_eq!("pca".parse::<EmbeddingMethod>().unwrap(), EmbeddingMethod::Pca);
        assert!("svd".parse::<EmbeddingMethod>().is_err());
    }

    #[test]
    fn test_mean_pooling_worked_example() {
        let data = inputs(vec![vec![
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0,
        ]]);
        let result = compute_embeddings(&data, 5, EmbeddingMethod::MeanPooling).unwrap();
        assert_eq!(result.len(), 1);
        let expected = [1.5, 3.5, 5.5, 7.5, 9.5];
        for (got, want) in result[0].embedding.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mean_pooling_remainder_segment() {
        // D=7, T=3: pool=2, segments [0,2), [2,4), [4,7).
        let data = inputs(vec![vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0]]);
        let result = compute_embeddings(&data, 3, EmbeddingMethod::MeanPooling).unwrap();
        let expected = [2.0, 6.0, 11.0];
        for (got, want) in result[0].embedding.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mean_pooling_rejects_expansion() {
        let data = inputs(vec![vec![1.0, 2.0]]);
        assert!(compute_embeddings(&data, 5, EmbeddingMethod::MeanPooling).is_err());
    }

    #[test]
    fn test_random_projection_reproducible() {
        let data = inputs(vec![vec![0.5, -1.0, 2.0, 0.25], vec![1.0, 1.0, 1.0, 1.0]]);
        let a = compute_embeddings_seeded(&data, 2, EmbeddingMethod::RandomProjection, 42).unwrap();
        let b = compute_embeddings_seeded(&data, 2, EmbeddingMethod::RandomProjection, 42).unwrap();
        for (ra, rb) in a.iter().zip(b.iter()) {
            assert_eq!(ra.embedding, rb.embedding);
        }

        let c = compute_embeddings_seeded(&data, 2, EmbeddingMethod::RandomProjection, 43).unwrap();
        assert_ne!(a[0].embedding, c[0].embedding);
    }

    #[test]
    fn test_projection_output_dimension() {
        let data = inputs(vec![vec![1.0; 16]]);
        let result = compute_embeddings(&data, 4, EmbeddingMethod::RandomProjection).unwrap();
        assert_eq!(result[0].embedding.len(), 4);
        assert_eq!(result[0].method, EmbeddingMethod::RandomProjection);
    }

    #[test]
    fn test_pca_falls_back_but_keeps_tag() {
        let data = inputs(vec![vec![1.0, 2.0, 3.0, 4.0]]);
        let pca = compute_embeddings_seeded(&data, 2, EmbeddingMethod::Pca, 42).unwrap();
        let proj =
            compute_embeddings_seeded(&data, 2, EmbeddingMethod::RandomProjection, 42).unwrap();
        assert_eq!(pca[0].embedding, proj[0].embedding);
        assert_eq!(pca[0].method, EmbeddingMethod::Pca);
    }

    #[test]
    fn test_ragged_input_rejected() {
        let data = vec![
            ("a".to_string(), vec![1.0, 2.0]),
            ("b".to_string(), vec![1.0]),
        ];
        assert!(compute_embeddings(&data, 1, EmbeddingMethod::RandomProjection).is_err());
    }

    #[test]
    fn test_zero_target_dim_rejected() {
        let data = inputs(vec![vec![1.0, 2.0]]);
        assert!(compute_embeddings(&data, 0, EmbeddingMethod::MeanPooling).is_err());
    }
}
