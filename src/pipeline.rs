//! End-to-end analysis pipeline.
//!
//! Coordinates activation loading, training, persistence, feature
//! extraction, interpretability analysis, and circuit discovery for one
//! session across its layers. Per-layer failures are logged and skipped so
//! a bad layer reduces output instead of aborting the run.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::activations::ActivationSource;
use crate::analysis::{InterpretabilityAnalyzer, InterpretabilityReport};
use crate::circuits::{discover_circuits, Circuit, CircuitSink};
use crate::features::{DiscoveredFeature, FeatureExtractor};
use crate::persist::{encode_model, ModelMetrics, ModelStore};
use crate::train::{Trainer, TrainerConfig};

/// Pipeline configuration for a full session run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub latent_dim: usize,
    pub sparsity_penalty: f32,
    pub learning_rate: f32,
    pub max_epochs: usize,
    pub min_circuit_strength: f32,
    pub max_circuit_depth: usize,
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let train = TrainerConfig::default();
        Self {
            latent_dim: train.latent_dim,
            sparsity_penalty: train.sparsity_penalty,
            learning_rate: train.learning_rate,
            max_epochs: train.max_epochs,
            min_circuit_strength: 0.1,
            max_circuit_depth: 3,
            seed: train.seed,
        }
    }
}

/// Per-layer results for a completed layer.
#[derive(Debug, Serialize)]
pub struct LayerOutcome {
    pub layer: usize,
    pub final_loss: f32,
    pub epochs_run: usize,
    pub feature_count: usize,
    pub report: InterpretabilityReport,
}

/// Aggregated results for a session run.
#[derive(Debug, Serialize)]
pub struct PipelineResults {
    pub session: i64,
    pub layers: Vec<LayerOutcome>,
    /// Layers skipped for no-data or after a logged failure.
    pub skipped_layers: Vec<usize>,
    pub circuits: Vec<Circuit>,
}

/// Runs the train → persist → extract → analyze → discover sequence.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline for `session` over `layers`.
    ///
    /// Circuits discovered across the per-layer features are enqueued into
    /// the sink fire-and-forget and also returned in the results.
    pub fn run(
        &self,
        source: &dyn ActivationSource,
        store: &dyn ModelStore,
        sink: &dyn CircuitSink,
        session: i64,
        layers: &[usize],
    ) -> Result<PipelineResults> {
        anyhow::ensure!(
            session > 0,
            "session identifier must be positive, got {session}"
        );

        info!("pipeline start: session {session}, {} layers", layers.len());

        let mut outcomes = Vec::new();
        let mut skipped = Vec::new();
        let mut all_features: Vec<DiscoveredFeature> = Vec::new();

        for &layer in layers {
            match self.run_layer(source, store, session, layer) {
                Ok(Some((outcome, features))) => {
                    all_features.extend(features);
                    outcomes.push(outcome);
                }
                Ok(None) => {
                    warn!("layer {layer}: no activations captured, skipping");
                    skipped.push(layer);
                }
                Err(err) => {
                    // One bad layer reduces output; it does not abort the run.
                    warn!("layer {layer} failed, skipping: {err:#}");
                    skipped.push(layer);
                }
            }
        }

        let circuits = discover_circuits(
            &all_features,
            self.config.min_circuit_strength,
            self.config.max_circuit_depth,
        );
        for circuit in &circuits {
            sink.enqueue(circuit);
        }

        info!(
            "pipeline done: {} layers analyzed, {} skipped, {} circuits",
            outcomes.len(),
            skipped.len(),
            circuits.len()
        );

        Ok(PipelineResults {
            session,
            layers: outcomes,
            skipped_layers: skipped,
            circuits,
        })
    }

    /// One layer: `Ok(None)` when the layer has no data.
    fn run_layer(
        &self,
        source: &dyn ActivationSource,
        store: &dyn ModelStore,
        session: i64,
        layer: usize,
    ) -> Result<Option<(LayerOutcome, Vec<DiscoveredFeature>)>> {
        let activations = source
            .load(session, layer)
            .with_context(|| format!("failed to load activations for layer {layer}"))?;
        if activations.is_empty() {
            return Ok(None);
        }

        info!(
            "layer {layer}: {} activation vectors of dim {}",
            activations.len(),
            activations.dim()
        );

        let trainer = Trainer::new(TrainerConfig {
            latent_dim: self.config.latent_dim,
            sparsity_penalty: self.config.sparsity_penalty,
            learning_rate: self.config.learning_rate,
            max_epochs: self.config.max_epochs,
            seed: self.config.seed,
        })?;
        let Some(outcome) = trainer.train(&activations)? else {
            return Ok(None);
        };

        let metrics = ModelMetrics {
            final_loss: outcome.best_loss,
            average_sparsity: outcome.model.average_sparsity(),
        };
        store
            .save(session, layer, &encode_model(&outcome.model), &metrics)
            .with_context(|| format!("failed to persist model for layer {layer}"))?;

        let features = FeatureExtractor::new().extract(&outcome.model, &activations, layer)?;
        let Some(report) = InterpretabilityAnalyzer::new().analyze(&outcome.model, &activations)?
        else {
            return Ok(None);
        };

        Ok(Some((
            LayerOutcome {
                layer,
                final_loss: outcome.best_loss,
                epochs_run: outcome.epochs_run,
                feature_count: features.len(),
                report,
            },
            features,
        )))
    }
}
