//! Interpretability analysis over a trained skip transcoder.
//!
//! Computes per-feature statistics, pairwise correlations, selectivity,
//! finite-difference causal attribution, and structural decomposition
//! metrics from the latent codes a model assigns to a sample of
//! activations.

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::activations::ActivationBatch;
use crate::features::ACTIVE_EPS;
use crate::model::SkipTranscoder;

/// Correlations with |r| at or below this are discarded.
pub const CORRELATION_THRESHOLD: f32 = 0.1;

/// Cap on samples used for causal attribution.
pub const MAX_ATTRIBUTION_SAMPLES: usize = 100;

/// Perturbation size for the finite-difference sensitivity.
const ATTRIBUTION_EPSILON: f32 = 1e-4;

/// Weights with magnitude above this count toward complexity metrics.
const NEGLIGIBLE_WEIGHT: f32 = 1e-6;

/// Distribution statistics for one latent feature over a sample set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStatistics {
    pub feature_index: usize,
    pub mean: f32,
    pub variance: f32,
    pub std_dev: f32,
    /// `1 − active_count / sample_count`.
    pub sparsity: f32,
    pub min: f32,
    pub max: f32,
    pub active_count: usize,
}

/// A retained pairwise Pearson correlation (`feature_a < feature_b`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCorrelation {
    pub feature_a: usize,
    pub feature_b: usize,
    /// Clamped to `[-1, 1]`; magnitude always above 0.1.
    pub correlation: f32,
}

/// Finite-difference sensitivity of the reconstruction error to one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalAttribution {
    pub feature_index: usize,
    /// Mean `|Δ reconstruction error| / ε` across the attribution sample.
    pub attribution: f32,
}

/// Weight-space summary of the trained parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralDecomposition {
    /// Mean |w| over non-negligible encoder weights.
    pub encoder_complexity: f32,
    /// Mean |w| over non-negligible decoder weights.
    pub decoder_complexity: f32,
    /// Total |skip weight| over total |decoder weight|.
    pub skip_importance: f32,
    /// Participation ratio `(Σλ)²/Σλ²` with `λ_j` the squared norm of
    /// encoder column j. An approximation of effective dimensionality, not
    /// a covariance eigen-decomposition.
    pub effective_dimensionality: f32,
}

/// Full analysis output for one (model, sample set) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretabilityReport {
    pub sample_count: usize,
    pub statistics: Vec<FeatureStatistics>,
    pub correlations: Vec<FeatureCorrelation>,
    /// Excess kurtosis per latent index, clamped to ≥ 0.
    pub selectivity: Vec<f32>,
    pub attributions: Vec<CausalAttribution>,
    pub structure: StructuralDecomposition,
}

impl InterpretabilityReport {
    /// Human-readable digest: top causal features, correlation count, and
    /// aggregate sparsity/activation levels.
    pub fn summary(&self) -> String {
        let mut ranked: Vec<&CausalAttribution> = self.attributions.iter().collect();
        ranked.sort_by(|a, b| {
            b.attribution
                .partial_cmp(&a.attribution)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut out = String::new();
        out.push_str(&format!(
            "Interpretability summary over {} samples\n",
            self.sample_count
        ));

        let feature_count = self.statistics.len();
        if feature_count > 0 {
            let mean_sparsity: f32 =
                self.statistics.iter().map(|s| s.sparsity).sum::<f32>() / feature_count as f32;
            let mean_activation: f32 =
                self.statistics.iter().map(|s| s.mean).sum::<f32>() / feature_count as f32;
            out.push_str(&format!(
                "  features: {feature_count}, mean sparsity {mean_sparsity:.3}, mean activation {mean_activation:.4}\n"
            ));
        }
        out.push_str(&format!(
            "  correlated pairs (|r| > {CORRELATION_THRESHOLD}): {}\n",
            self.correlations.len()
        ));
        out.push_str(&format!(
            "  skip importance {:.3}, effective dimensionality {:.1}\n",
            self.structure.skip_importance, self.structure.effective_dimensionality
        ));

        out.push_str("  top causally important features:\n");
        for attr in ranked.iter().take(10) {
            out.push_str(&format!(
                "    feature {:4}  attribution {:.6}\n",
                attr.feature_index, attr.attribution
            ));
        }
        out
    }
}

/// Computes an [`InterpretabilityReport`] from a trained model and samples.
pub struct InterpretabilityAnalyzer {
    max_attribution_samples: usize,
}

impl InterpretabilityAnalyzer {
    pub fn new() -> Self {
        Self {
            max_attribution_samples: MAX_ATTRIBUTION_SAMPLES,
        }
    }

    /// Override the attribution sample cap (mainly for tests).
    pub fn with_max_attribution_samples(mut self, cap: usize) -> Self {
        self.max_attribution_samples = cap;
        self
    }

    /// Run the full analysis. The caller keeps the sample set small (a few
    /// thousand at most); correlation cost is O(L²·N).
    ///
    /// An empty batch is a no-data no-op: logged, `Ok(None)`.
    pub fn analyze(
        &self,
        model: &SkipTranscoder,
        activations: &ActivationBatch,
    ) -> Result<Option<InterpretabilityReport>> {
        if activations.is_empty() {
            warn!("no activation vectors supplied; skipping analysis");
            return Ok(None);
        }

        let sample_count = activations.len();
        info!(
            "analyzing {} samples against a D={} L={} model",
            sample_count,
            model.input_dim(),
            model.latent_dim()
        );

        let latents: Vec<Vec<f32>> = activations
            .samples()
            .par_iter()
            .map(|x| model.encode(x))
            .collect::<Result<_>>()?;

        let statistics = compute_statistics(&latents, model.latent_dim());
        let correlations = compute_correlations(&latents, &statistics);
        let selectivity = compute_selectivity(&latents, &statistics);
        let attributions = self.compute_attributions(model, activations, &latents);
        let structure = compute_structure(model);

        info!(
            "analysis done: {} correlated pairs, skip importance {:.3}",
            correlations.len(),
            structure.skip_importance
        );

        Ok(Some(InterpretabilityReport {
            sample_count,
            statistics,
            correlations,
            selectivity,
            attributions,
            structure,
        }))
    }

    /// First-order finite-difference sensitivity, averaged per feature.
    ///
    /// For each sampled activation, each latent coordinate is perturbed by
    /// ε and the change in reconstruction error recorded. The decoder is
    /// affine in z, so the perturbed reconstruction is the base output plus
    /// ε times the feature's decoder row; the skip term is unchanged.
    fn compute_attributions(
        &self,
        model: &SkipTranscoder,
        activations: &ActivationBatch,
        latents: &[Vec<f32>],
    ) -> Vec<CausalAttribution> {
        let latent_dim = model.latent_dim();
        let n = activations.len().min(self.max_attribution_samples);
        if n == 0 {
            return Vec::new();
        }

        // Per-sample sensitivity rows, computed independently and reduced
        // in sample order to keep the aggregate deterministic.
        let per_sample: Vec<Vec<f32>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let x = activations.get(i).expect("index below len");
                let z = &latents[i];
                let decoded = model
                    .decode(z)
                    .expect("latent from this model's encoder");
                let skipped = model.skip(x).expect("dimension already validated");
                let base_out: Vec<f32> = decoded
                    .iter()
                    .zip(skipped.iter())
                    .map(|(d, s)| d + s)
                    .collect();
                let base_err: f32 = base_out
                    .iter()
                    .zip(x.iter())
                    .map(|(o, t)| (o - t) * (o - t))
                    .sum();

                (0..latent_dim)
                    .map(|j| {
                        let row = model.w_dec.row(j);
                        let perturbed_err: f32 = base_out
                            .iter()
                            .zip(row.iter())
                            .zip(x.iter())
                            .map(|((o, w), t)| {
                                let p = o + ATTRIBUTION_EPSILON * w;
                                (p - t) * (p - t)
                            })
                            .sum();
                        (perturbed_err - base_err).abs() / ATTRIBUTION_EPSILON
                    })
                    .collect()
            })
            .collect();

        let mut sums = vec![0.0f32; latent_dim];
        for row in &per_sample {
            for (j, v) in row.iter().enumerate() {
                sums[j] += v;
            }
        }

        (0..latent_dim)
            .map(|j| CausalAttribution {
                feature_index: j,
                attribution: sums[j] / n as f32,
            })
            .collect()
    }
}

impl Default for InterpretabilityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn compute_statistics(latents: &[Vec<f32>], latent_dim: usize) -> Vec<FeatureStatistics> {
    let n = latents.len() as f32;
    (0..latent_dim)
        .map(|j| {
            let mut sum = 0.0f32;
            let mut min = f32::INFINITY;
            let mut max = f32::NEG_INFINITY;
            let mut active = 0usize;
            for latent in latents {
                let v = latent[j];
                sum += v;
                min = min.min(v);
                max = max.max(v);
                if v.abs() > ACTIVE_EPS {
                    active += 1;
                }
            }
            let mean = sum / n;
            let variance = latents
                .iter()
                .map(|l| {
                    let d = l[j] - mean;
                    d * d
                })
                .sum::<f32>()
                / n;
            FeatureStatistics {
                feature_index: j,
                mean,
                variance,
                std_dev: variance.sqrt(),
                sparsity: 1.0 - active as f32 / n,
                min,
                max,
                active_count: active,
            }
        })
        .collect()
}

/// Pearson correlation between every latent-index pair; only pairs with
/// |r| above [`CORRELATION_THRESHOLD`] survive. Pairs are independent and
/// computed in parallel; output order is by index pair.
fn compute_correlations(
    latents: &[Vec<f32>],
    stats: &[FeatureStatistics],
) -> Vec<FeatureCorrelation> {
    let latent_dim = stats.len();
    let n = latents.len() as f32;

    let pairs: Vec<(usize, usize)> = (0..latent_dim)
        .flat_map(|a| ((a + 1)..latent_dim).map(move |b| (a, b)))
        .collect();

    pairs
        .par_iter()
        .filter_map(|&(a, b)| {
            let sa = &stats[a];
            let sb = &stats[b];
            if sa.std_dev <= ACTIVE_EPS || sb.std_dev <= ACTIVE_EPS {
                return None;
            }
            let cov: f32 = latents
                .iter()
                .map(|l| (l[a] - sa.mean) * (l[b] - sb.mean))
                .sum::<f32>()
                / n;
            let r = (cov / (sa.std_dev * sb.std_dev)).clamp(-1.0, 1.0);
            (r.abs() > CORRELATION_THRESHOLD).then_some(FeatureCorrelation {
                feature_a: a,
                feature_b: b,
                correlation: r,
            })
        })
        .collect()
}

/// Excess kurtosis per feature, clamped to ≥ 0. A spikier distribution
/// means a more selective feature.
fn compute_selectivity(latents: &[Vec<f32>], stats: &[FeatureStatistics]) -> Vec<f32> {
    let n = latents.len() as f32;
    stats
        .iter()
        .map(|s| {
            if s.variance <= ACTIVE_EPS {
                return 0.0;
            }
            let fourth: f32 = latents
                .iter()
                .map(|l| {
                    let d = l[s.feature_index] - s.mean;
                    d * d * d * d
                })
                .sum::<f32>()
                / n;
            (fourth / (s.variance * s.variance) - 3.0).max(0.0)
        })
        .collect()
}

fn compute_structure(model: &SkipTranscoder) -> StructuralDecomposition {
    let mean_magnitude = |weights: &ndarray::Array2<f32>| -> f32 {
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for &w in weights {
            if w.abs() > NEGLIGIBLE_WEIGHT {
                sum += w.abs();
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    };

    let total_dec: f32 = model.w_dec.iter().map(|w| w.abs()).sum();
    let total_skip: f32 = model.w_skip.iter().map(|w| w.abs()).sum();
    let skip_importance = if total_dec > 0.0 {
        total_skip / total_dec
    } else {
        0.0
    };

    // λ_j = squared norm of encoder column j; not true covariance
    // eigenvalues.
    let lambdas: Vec<f32> = (0..model.latent_dim())
        .map(|j| {
            let col = model.w_enc.column(j);
            col.dot(&col)
        })
        .collect();
    let lambda_sum: f32 = lambdas.iter().sum();
    let lambda_sq_sum: f32 = lambdas.iter().map(|l| l * l).sum();
    let effective_dimensionality = if lambda_sq_sum > 0.0 {
        lambda_sum * lambda_sum / lambda_sq_sum
    } else {
        0.0
    };

    StructuralDecomposition {
        encoder_complexity: mean_magnitude(&model.w_enc),
        decoder_complexity: mean_magnitude(&model.w_dec),
        skip_importance,
        effective_dimensionality,
    }
}
