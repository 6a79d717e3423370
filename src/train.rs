//! Mini-batch training loop for the skip transcoder.
//!
//! The optimizer is an approximate, hand-written update (see
//! [`Trainer::train`]) rather than a backpropagated gradient of the combined
//! loss. It is kept that way deliberately; exact backprop is a non-goal.

use anyhow::Result;
use ndarray::ArrayView1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::activations::ActivationBatch;
use crate::model::SkipTranscoder;

/// Mini-batch size for the training loop.
pub const BATCH_SIZE: usize = 32;

/// Epochs without best-loss improvement before training stops early.
pub const PATIENCE: usize = 10;

/// Fixed scale for the encoder's input-proportional nudge. Part of the
/// approximate update rule, not a tuned hyperparameter.
const ENCODER_NUDGE: f32 = 1e-3;

/// Training hyperparameters.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Latent dimension L of the model to construct.
    pub latent_dim: usize,
    /// L1 penalty λ on latent activations (≥ 0).
    pub sparsity_penalty: f32,
    /// Step size for parameter updates (> 0).
    pub learning_rate: f32,
    /// Upper bound on epochs (≥ 1); early stopping may end sooner.
    pub max_epochs: usize,
    /// Seed for model initialization and epoch shuffling.
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            latent_dim: 64,
            sparsity_penalty: 0.01,
            learning_rate: 0.001,
            max_epochs: 100,
            seed: crate::model::DEFAULT_MODEL_SEED,
        }
    }
}

/// A trained model together with its training summary.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub model: SkipTranscoder,
    /// Best epoch loss seen during the run.
    pub best_loss: f32,
    /// Epochs actually executed (≤ `max_epochs`).
    pub epochs_run: usize,
}

/// Runs the epoch/mini-batch loop and applies parameter updates.
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    /// Validate hyperparameters and build a trainer.
    pub fn new(config: TrainerConfig) -> Result<Self> {
        anyhow::ensure!(config.latent_dim > 0, "latent_dim must be positive");
        anyhow::ensure!(
            config.sparsity_penalty >= 0.0,
            "sparsity_penalty must be non-negative, got {}",
            config.sparsity_penalty
        );
        anyhow::ensure!(
            config.learning_rate > 0.0,
            "learning_rate must be positive, got {}",
            config.learning_rate
        );
        anyhow::ensure!(config.max_epochs >= 1, "max_epochs must be at least 1");
        Ok(Self { config })
    }

    /// Hyperparameters in effect.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train a skip transcoder on the batch.
    ///
    /// Per epoch: shuffle sample order (seeded), split into mini-batches of
    /// [`BATCH_SIZE`], and for each sample compute
    /// `loss = Σ(forward(x)−x)² + λ·Σ|encode(x)|`. A batch's loss is the sum
    /// over its samples; the epoch loss is the mean over batches. Training
    /// stops after [`PATIENCE`] epochs without best-loss improvement.
    ///
    /// The parameter update is approximate: decoder rows move along the
    /// per-sample `error·latent` outer product, the decoder bias along the
    /// error, and the encoder columns of active latents get a fixed small
    /// input-scaled nudge. Skip parameters are not updated. Updates are
    /// applied in sample order, so a run is reproducible for a given
    /// (input ordering, seed).
    ///
    /// An empty batch is a no-data no-op: logged, `Ok(None)`.
    pub fn train(&self, activations: &ActivationBatch) -> Result<Option<TrainingOutcome>> {
        if activations.is_empty() {
            warn!("no activation vectors supplied; skipping training");
            return Ok(None);
        }

        let dim = activations.dim();
        let mut model = SkipTranscoder::with_seed(dim, self.config.latent_dim, self.config.seed)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        info!(
            "training skip transcoder: {} samples, D={dim}, L={}, lr={}, lambda={}",
            activations.len(),
            self.config.latent_dim,
            self.config.learning_rate,
            self.config.sparsity_penalty
        );

        let mut order: Vec<usize> = (0..activations.len()).collect();
        let mut best_loss = f32::INFINITY;
        let mut epochs_since_best = 0usize;
        let mut epochs_run = 0usize;

        for epoch in 0..self.config.max_epochs {
            epochs_run = epoch + 1;
            order.shuffle(&mut rng);

            let mut batch_losses: Vec<f32> = Vec::with_capacity(order.len() / BATCH_SIZE + 1);
            for chunk in order.chunks(BATCH_SIZE) {
                let mut batch_loss = 0.0_f32;
                for &idx in chunk {
                    let x = activations.get(idx).expect("index from batch range");
                    batch_loss += self.step(&mut model, x)?;
                }
                batch_losses.push(batch_loss);
            }

            let epoch_loss =
                batch_losses.iter().sum::<f32>() / batch_losses.len() as f32;

            if epoch_loss < best_loss {
                best_loss = epoch_loss;
                epochs_since_best = 0;
            } else {
                epochs_since_best += 1;
            }

            if (epoch + 1) % 10 == 0 {
                info!(
                    "epoch {}: loss={epoch_loss:.6}, avg_sparsity={:.3}",
                    epoch + 1,
                    model.average_sparsity()
                );
            }

            if epochs_since_best >= PATIENCE {
                info!(
                    "early stop at epoch {}: no improvement for {PATIENCE} epochs (best loss {best_loss:.6})",
                    epoch + 1
                );
                break;
            }
        }

        info!("training finished: best loss {best_loss:.6} after {epochs_run} epochs");
        Ok(Some(TrainingOutcome {
            model,
            best_loss,
            epochs_run,
        }))
    }

    /// One sample: loss, then the in-place approximate update.
    fn step(&self, model: &mut SkipTranscoder, x: &[f32]) -> Result<f32> {
        let latent = model.encode(x)?;
        let output = model.forward(x)?;

        let recon: f32 = output
            .iter()
            .zip(x.iter())
            .map(|(o, t)| (o - t) * (o - t))
            .sum();
        let l1: f32 = latent.iter().map(|z| z.abs()).sum();
        let loss = recon + self.config.sparsity_penalty * l1;

        let err: Vec<f32> = output.iter().zip(x.iter()).map(|(o, t)| o - t).collect();
        let err_view = ArrayView1::from(err.as_slice());
        let x_view = ArrayView1::from(x);
        let lr = self.config.learning_rate;

        // Decoder rows follow the error·latent outer product.
        for (j, &zj) in latent.iter().enumerate() {
            if zj > 0.0 {
                model.w_dec.row_mut(j).scaled_add(-lr * zj, &err_view);
            }
        }
        model.b_dec.scaled_add(-lr, &err_view);

        // Encoder columns of active latents: fixed small nudge scaled by the
        // input. This is the documented approximation, not a gradient.
        for (j, &zj) in latent.iter().enumerate() {
            if zj > 0.0 {
                model
                    .w_enc
                    .column_mut(j)
                    .scaled_add(-lr * ENCODER_NUDGE, &x_view);
                model.b_enc[j] -= lr * ENCODER_NUDGE;
            }
        }

        Ok(loss)
    }
}
