//! Discovered-feature extraction from a trained skip transcoder.
//!
//! A "feature" is one coordinate of the latent code. The extractor encodes a
//! sample of activations and keeps the latent indices that fire reliably.

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activations::ActivationBatch;
use crate::model::SkipTranscoder;

/// Latent values with magnitude above this count as "active".
pub const ACTIVE_EPS: f32 = 1e-6;

/// Default minimum number of samples a feature must be active in.
/// A design knob, not derived from data.
pub const MIN_ACTIVE_SAMPLES: usize = 5;

/// A latent coordinate that fired reliably over a sample of activations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredFeature {
    /// Layer the analyzed activations came from.
    pub layer_index: usize,
    /// Latent index in `[0, L)`.
    pub feature_index: usize,
    /// Mean of the feature's non-zero activations.
    pub average_activation: f32,
    /// `1 − active_count / sample_count`.
    pub sparsity_score: f32,
}

/// Runs a trained model over activations and keeps reliable features.
pub struct FeatureExtractor {
    min_active_samples: usize,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            min_active_samples: MIN_ACTIVE_SAMPLES,
        }
    }

    /// Override the reliability threshold.
    pub fn with_min_active_samples(mut self, min_active_samples: usize) -> Self {
        self.min_active_samples = min_active_samples;
        self
    }

    /// Encode every sample and retain features active in at least
    /// `min_active_samples` of them.
    ///
    /// An empty batch yields an empty result. A dimension mismatch between
    /// the model and the batch is an error.
    pub fn extract(
        &self,
        model: &SkipTranscoder,
        activations: &ActivationBatch,
        layer_index: usize,
    ) -> Result<Vec<DiscoveredFeature>> {
        if activations.is_empty() {
            info!("no activations to extract features from at layer {layer_index}");
            return Ok(Vec::new());
        }

        // Samples are independent; encode in parallel, keep input order.
        let latents: Vec<Vec<f32>> = activations
            .samples()
            .par_iter()
            .map(|x| model.encode(x))
            .collect::<Result<_>>()?;

        let latent_dim = model.latent_dim();
        let mut counts = vec![0usize; latent_dim];
        let mut sums = vec![0.0f32; latent_dim];
        for latent in &latents {
            for (j, &z) in latent.iter().enumerate() {
                if z.abs() > ACTIVE_EPS {
                    counts[j] += 1;
                    sums[j] += z;
                }
            }
        }

        let sample_count = activations.len();
        let features: Vec<DiscoveredFeature> = (0..latent_dim)
            .filter(|&j| counts[j] >= self.min_active_samples)
            .map(|j| DiscoveredFeature {
                layer_index,
                feature_index: j,
                average_activation: sums[j] / counts[j] as f32,
                sparsity_score: 1.0 - counts[j] as f32 / sample_count as f32,
            })
            .collect();

        info!(
            "layer {layer_index}: {} of {latent_dim} features active in >= {} of {sample_count} samples",
            features.len(),
            self.min_active_samples
        );
        Ok(features)
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SkipTranscoder;

    /// A model whose encoder passes input coordinates straight through
    /// (identity encoder columns, zero decode/skip influence on encode).
    fn passthrough_model(dim: usize) -> SkipTranscoder {
        let mut w_enc = vec![0.0f32; dim * dim];
        for i in 0..dim {
            w_enc[i * dim + i] = 1.0;
        }
        SkipTranscoder::from_parts(
            dim,
            dim,
            w_enc,
            vec![0.0; dim],
            vec![0.0; dim * dim],
            vec![0.0; dim],
            vec![0.0; dim * dim],
            vec![0.0; dim],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_batch_yields_no_features() {
        let model = SkipTranscoder::new(4, 8).unwrap();
        let features = FeatureExtractor::new()
            .extract(&model, &ActivationBatch::default(), 0)
            .unwrap();
        assert!(features.is_empty());
    }

    #[test]
    fn test_min_active_threshold() {
        let model = passthrough_model(2);
        // Feature 0 fires in 6 samples, feature 1 in only 2.
        let mut samples = vec![vec![1.0f32, 0.0]; 6];
        samples.push(vec![0.0, 1.0]);
        samples.push(vec![0.0, 1.0]);
        let batch = ActivationBatch::new(samples).unwrap();

        let features = FeatureExtractor::new().extract(&model, &batch, 3).unwrap();
        assert_eq!(features.len(), 1);
        let f = &features[0];
        assert_eq!(f.layer_index, 3);
        assert_eq!(f.feature_index, 0);
        assert!((f.average_activation - 1.0).abs() < 1e-6);
        assert!((f.sparsity_score - (1.0 - 6.0 / 8.0)).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_override() {
        let model = passthrough_model(2);
        let samples = vec![vec![0.5f32, 0.0]; 2];
        let batch = ActivationBatch::new(samples).unwrap();

        let strict = FeatureExtractor::new().extract(&model, &batch, 0).unwrap();
        assert!(strict.is_empty());

        let relaxed = FeatureExtractor::new()
            .with_min_active_samples(2)
            .extract(&model, &batch, 0)
            .unwrap();
        assert_eq!(relaxed.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let model = SkipTranscoder::new(4, 8).unwrap();
        let batch = ActivationBatch::new(vec![vec![0.0; 5]]).unwrap();
        assert!(FeatureExtractor::new().extract(&model, &batch, 0).is_err());
    }
}
