//! Train a skip transcoder on synthetic activations and print the
//! interpretability summary.
//!
//! Run with: cargo run --example train_synthetic

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use stir_rs::{
    ActivationBatch, FeatureExtractor, InterpretabilityAnalyzer, Trainer, TrainerConfig,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    println!("=== STIR-rs: synthetic training demo ===");

    // Synthetic "activations": a few latent directions plus noise, so the
    // transcoder has real structure to find.
    let dim = 16;
    let n = 200;
    let mut rng = StdRng::seed_from_u64(1);
    let noise = Normal::new(0.0_f32, 0.05).unwrap();
    let vectors: Vec<Vec<f32>> = (0..n)
        .map(|i| {
            (0..dim)
                .map(|d| {
                    let signal = if d % 4 == i % 4 { 1.0 } else { 0.0 };
                    signal + noise.sample(&mut rng)
                })
                .collect()
        })
        .collect();
    let batch = ActivationBatch::new(vectors)?;

    let trainer = Trainer::new(TrainerConfig {
        latent_dim: 32,
        max_epochs: 50,
        ..TrainerConfig::default()
    })?;
    let outcome = trainer
        .train(&batch)?
        .expect("non-empty batch always trains");

    println!(
        "trained: best loss {:.6} after {} epochs, avg sparsity {:.3}",
        outcome.best_loss,
        outcome.epochs_run,
        outcome.model.average_sparsity()
    );

    let features = FeatureExtractor::new().extract(&outcome.model, &batch, 0)?;
    println!("reliable features: {}", features.len());

    let report = InterpretabilityAnalyzer::new()
        .analyze(&outcome.model, &batch)?
        .expect("non-empty batch always analyzes");
    println!("\n{}", report.summary());

    Ok(())
}
