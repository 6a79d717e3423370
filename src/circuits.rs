//! Cross-layer circuit discovery.
//!
//! Links discovered features across layers into weighted directed circuits
//! using similarity heuristics. Circuits only flow forward: a circuit's
//! source layer is always below its target layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::features::DiscoveredFeature;

/// At most this many features per side of a layer pair are compared.
pub const MAX_FEATURES_PER_LAYER: usize = 50;

/// The result set is capped at this many circuits.
pub const MAX_CIRCUITS: usize = 100;

/// Sparsity above which both endpoints count as "highly sparse".
const SPARSE_PATHWAY_THRESHOLD: f32 = 0.8;

/// Average activation above which both endpoints count as "highly active".
const AMPLIFIER_ACTIVATION_THRESHOLD: f32 = 0.5;

/// Activation gap below which the endpoints count as near-equal.
const MAINTAINER_ACTIVATION_BAND: f32 = 0.1;

/// Coarse classification of a discovered circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitType {
    SparsePathway,
    ActivationAmplifier,
    PatternMaintainer,
    FeatureTransformer,
}

impl CircuitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SparsePathway => "sparse_pathway",
            Self::ActivationAmplifier => "activation_amplifier",
            Self::PatternMaintainer => "pattern_maintainer",
            Self::FeatureTransformer => "feature_transformer",
        }
    }
}

impl std::fmt::Display for CircuitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hypothesized directed pathway between two features in different layers.
///
/// Invariant: `source_layer < target_layer` and
/// `layer_span = target_layer − source_layer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circuit {
    pub source_layer: usize,
    pub source_feature: usize,
    pub target_layer: usize,
    pub target_feature: usize,
    pub strength: f32,
    pub circuit_type: CircuitType,
    pub layer_span: usize,
}

/// Receives discovered circuits, fire-and-forget.
///
/// The real consumer is an external graph store fed through an at-least-once
/// queue; no acknowledgment is consumed here.
pub trait CircuitSink {
    fn enqueue(&self, circuit: &Circuit);
}

/// Sink that records circuits in the log stream only.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl CircuitSink for LoggingSink {
    fn enqueue(&self, circuit: &Circuit) {
        info!(
            "circuit L{}:{} -> L{}:{} strength={:.4} type={}",
            circuit.source_layer,
            circuit.source_feature,
            circuit.target_layer,
            circuit.target_feature,
            circuit.strength,
            circuit.circuit_type
        );
    }
}

/// Link features across consecutive populated layers.
///
/// For each consecutive pair of layers with features, up to
/// [`MAX_FEATURES_PER_LAYER`]² pairs are scored with
/// `strength = (1 − |avg_s − avg_t|) · min(sp_s, sp_t) / ln(span + 1)` and
/// kept when `strength ≥ min_strength` and `span ≤ max_depth`. The result
/// is sorted by strength descending and capped at [`MAX_CIRCUITS`].
pub fn discover_circuits(
    features: &[DiscoveredFeature],
    min_strength: f32,
    max_depth: usize,
) -> Vec<Circuit> {
    let mut by_layer: BTreeMap<usize, Vec<&DiscoveredFeature>> = BTreeMap::new();
    for f in features {
        by_layer.entry(f.layer_index).or_default().push(f);
    }
    // Deterministic pair enumeration regardless of input order.
    for layer_features in by_layer.values_mut() {
        layer_features.sort_by_key(|f| f.feature_index);
    }

    let layers: Vec<usize> = by_layer.keys().copied().collect();
    let mut circuits = Vec::new();

    for pair in layers.windows(2) {
        let (source_layer, target_layer) = (pair[0], pair[1]);
        let span = target_layer - source_layer;
        if span > max_depth {
            debug!(
                "skipping layer pair {source_layer}->{target_layer}: span {span} exceeds max depth {max_depth}"
            );
            continue;
        }

        let sources = &by_layer[&source_layer];
        let targets = &by_layer[&target_layer];
        for source in sources.iter().take(MAX_FEATURES_PER_LAYER) {
            for target in targets.iter().take(MAX_FEATURES_PER_LAYER) {
                let strength = circuit_strength(source, target, span);
                if strength >= min_strength {
                    circuits.push(Circuit {
                        source_layer,
                        source_feature: source.feature_index,
                        target_layer,
                        target_feature: target.feature_index,
                        strength,
                        circuit_type: classify(source, target),
                        layer_span: span,
                    });
                }
            }
        }
    }

    circuits.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    circuits.truncate(MAX_CIRCUITS);

    info!(
        "discovered {} circuits across {} populated layers (min strength {min_strength})",
        circuits.len(),
        layers.len()
    );
    circuits
}

fn circuit_strength(source: &DiscoveredFeature, target: &DiscoveredFeature, span: usize) -> f32 {
    let activation_affinity = 1.0 - (source.average_activation - target.average_activation).abs();
    let shared_sparsity = source.sparsity_score.min(target.sparsity_score);
    activation_affinity * shared_sparsity / ((span as f32) + 1.0).ln()
}

fn classify(source: &DiscoveredFeature, target: &DiscoveredFeature) -> CircuitType {
    if source.sparsity_score > SPARSE_PATHWAY_THRESHOLD
        && target.sparsity_score > SPARSE_PATHWAY_THRESHOLD
    {
        CircuitType::SparsePathway
    } else if source.average_activation > AMPLIFIER_ACTIVATION_THRESHOLD
        && target.average_activation > AMPLIFIER_ACTIVATION_THRESHOLD
    {
        CircuitType::ActivationAmplifier
    } else if (source.average_activation - target.average_activation).abs()
        < MAINTAINER_ACTIVATION_BAND
    {
        CircuitType::PatternMaintainer
    } else {
        CircuitType::FeatureTransformer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(layer: usize, index: usize, avg: f32, sparsity: f32) -> DiscoveredFeature {
        DiscoveredFeature {
            layer_index: layer,
            feature_index: index,
            average_activation: avg,
            sparsity_score: sparsity,
        }
    }

    #[test]
    fn test_single_pair_single_circuit() {
        let features = vec![feature(0, 3, 0.4, 0.9), feature(1, 7, 0.45, 0.85)];
        let circuits = discover_circuits(&features, 0.1, 3);

        assert_eq!(circuits.len(), 1);
        let c = &circuits[0];
        assert_eq!(c.source_layer, 0);
        assert_eq!(c.target_layer, 1);
        assert_eq!(c.source_feature, 3);
        assert_eq!(c.target_feature, 7);
        assert_eq!(c.layer_span, 1);
        assert!(c.source_layer < c.target_layer);
    }

    #[test]
    fn test_strength_formula() {
        let s = feature(0, 0, 0.4, 0.9);
        let t = feature(1, 0, 0.45, 0.85);
        let expected = (1.0 - 0.05_f32) * 0.85 / 2.0_f32.ln();
        let got = circuit_strength(&s, &t, 1);
        assert!((got - expected).abs() < 1e-5);
    }

    #[test]
    fn test_min_strength_filters() {
        let features = vec![feature(0, 0, 0.0, 0.1), feature(1, 0, 0.9, 0.1)];
        // strength = (1 - 0.9) * 0.1 / ln 2 ≈ 0.014
        assert!(discover_circuits(&features, 0.5, 3).is_empty());
        assert_eq!(discover_circuits(&features, 0.01, 3).len(), 1);
    }

    #[test]
    fn test_max_depth_skips_wide_spans() {
        let features = vec![feature(0, 0, 0.5, 0.9), feature(5, 0, 0.5, 0.9)];
        assert!(discover_circuits(&features, 0.0, 3).is_empty());
        assert_eq!(discover_circuits(&features, 0.0, 5).len(), 1);
    }

    #[test]
    fn test_classification_rules() {
        // Both very sparse wins over everything else.
        assert_eq!(
            classify(&feature(0, 0, 0.6, 0.9), &feature(1, 0, 0.6, 0.95)),
            CircuitType::SparsePathway
        );
        // Both highly active.
        assert_eq!(
            classify(&feature(0, 0, 0.7, 0.2), &feature(1, 0, 0.9, 0.3)),
            CircuitType::ActivationAmplifier
        );
        // Near-equal activation.
        assert_eq!(
            classify(&feature(0, 0, 0.30, 0.2), &feature(1, 0, 0.35, 0.3)),
            CircuitType::PatternMaintainer
        );
        // Everything else transforms.
        assert_eq!(
            classify(&feature(0, 0, 0.1, 0.2), &feature(1, 0, 0.45, 0.3)),
            CircuitType::FeatureTransformer
        );
    }

    #[test]
    fn test_result_sorted_and_capped() {
        // 3 layers × 20 features of varying strength produce far more than
        // MAX_CIRCUITS candidates at a zero threshold.
        let mut features = Vec::new();
        for layer in 0..3 {
            for idx in 0..20 {
                features.push(feature(layer, idx, 0.5, 0.5 + (idx as f32) * 0.02));
            }
        }
        let circuits = discover_circuits(&features, 0.0, 3);
        assert_eq!(circuits.len(), MAX_CIRCUITS);
        for pair in circuits.windows(2) {
            assert!(pair[0].strength >= pair[1].strength);
        }
    }

    #[test]
    fn test_pair_cap_per_layer() {
        // 60 features per layer: only the first 50 per side participate, so
        // feature index 59 never appears.
        let mut features = Vec::new();
        for layer in 0..2 {
            for idx in 0..60 {
                features.push(feature(layer, idx, 0.5, 0.9));
            }
        }
        let circuits = discover_circuits(&features, 0.0, 1);
        assert!(circuits
            .iter()
            .all(|c| c.source_feature < MAX_FEATURES_PER_LAYER
                && c.target_feature < MAX_FEATURES_PER_LAYER));
    }

    #[test]
    fn test_circuit_type_serializes_snake_case() {
        let json = serde_json::to_string(&CircuitType::SparsePathway).unwrap();
        assert_eq!(json, "\"sparse_pathway\"");
        assert_eq!(CircuitType::FeatureTransformer.as_str(), "feature_transformer");
    }
}
