//! STIR-rs CLI: Skip-Transcoder Interpretability in Rust

use anyhow::Result;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use stir_rs::{
    compute_embeddings, ActivationSource, EmbeddingMethod, EmbeddingResult, FsModelStore,
    LoggingSink, Pipeline, PipelineConfig, SessionActivations,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "stir-rs")]
#[command(about = "Skip-Transcoder Interpretability in Rust")]
#[command(version)]
struct Cli {
    /// Path to a session activations JSON file
    #[arg(short, long)]
    activations: PathBuf,

    /// Output directory for models and reports
    #[arg(short, long, default_value = "outputs")]
    output: PathBuf,

    /// Latent dimension of the skip transcoder
    #[arg(long, default_value_t = 64)]
    latent_dim: usize,

    /// L1 sparsity penalty on latent activations
    #[arg(long, default_value_t = 0.01)]
    sparsity_penalty: f32,

    /// Learning rate for the approximate optimizer
    #[arg(long, default_value_t = 0.001)]
    learning_rate: f32,

    /// Maximum training epochs per layer
    #[arg(long, default_value_t = 100)]
    max_epochs: usize,

    /// Minimum strength for discovered circuits
    #[arg(long, default_value_t = 0.1)]
    min_circuit_strength: f32,

    /// Maximum layer span for discovered circuits
    #[arg(long, default_value_t = 3)]
    max_circuit_depth: usize,

    /// Target dimension for activation embeddings
    #[arg(long, default_value_t = 16)]
    target_dim: usize,

    /// Embedding method: random_projection, mean_pooling, or pca
    #[arg(long, default_value = "random_projection")]
    embedding_method: String,

    /// Seed for model initialization and shuffling
    #[arg(long, default_value_t = stir_rs::DEFAULT_MODEL_SEED)]
    seed: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse the method at the boundary; everything downstream is enum-typed.
    let method: EmbeddingMethod = cli.embedding_method.parse()?;

    println!("=== STIR-rs: Skip-Transcoder Interpretability ===");
    println!("Activations: {}", cli.activations.display());
    println!("Output:      {}", cli.output.display());
    println!("Latent dim:  {}", cli.latent_dim);
    println!("Embedding:   {method} -> {} dims", cli.target_dim);

    info!("loading activations...");
    let source = SessionActivations::load(&cli.activations)?;
    let session = source.session();
    let layers = source.layer_indices();
    info!("session {session}: {} layers captured", layers.len());

    std::fs::create_dir_all(&cli.output)?;
    let store = FsModelStore::new(cli.output.join("models"))?;
    let sink = LoggingSink;

    let pipeline = Pipeline::new(PipelineConfig {
        latent_dim: cli.latent_dim,
        sparsity_penalty: cli.sparsity_penalty,
        learning_rate: cli.learning_rate,
        max_epochs: cli.max_epochs,
        min_circuit_strength: cli.min_circuit_strength,
        max_circuit_depth: cli.max_circuit_depth,
        seed: cli.seed,
    });
    let results = pipeline.run(&source, &store, &sink, session, &layers)?;

    // Print results
    println!("\n=== Results ===");
    for outcome in &results.layers {
        println!(
            "Layer {:2}: loss {:.6} after {} epochs, {} features",
            outcome.layer, outcome.final_loss, outcome.epochs_run, outcome.feature_count
        );
    }
    for layer in &results.skipped_layers {
        println!("Layer {layer:2}: skipped");
    }
    println!("Circuits: {}", results.circuits.len());

    if let Some(best) = results.layers.iter().max_by_key(|l| l.feature_count) {
        println!("\n{}", best.report.summary());
    }

    // Save reports
    for outcome in &results.layers {
        let path = cli
            .output
            .join(format!("interpretability_{}.json", outcome.layer));
        std::fs::write(&path, serde_json::to_string_pretty(&outcome.report)?)?;
        info!("report saved to {}", path.display());
    }
    let circuits_path = cli.output.join("circuits.json");
    std::fs::write(
        &circuits_path,
        serde_json::to_string_pretty(&results.circuits)?,
    )?;
    info!("circuits saved to {}", circuits_path.display());

    // Embed each layer's activations with the chosen method.
    let mut embeddings: BTreeMap<usize, Vec<EmbeddingResult>> = BTreeMap::new();
    for &layer in &layers {
        let batch = source.load(session, layer)?;
        if batch.is_empty() {
            continue;
        }
        let inputs: Vec<(String, Vec<f32>)> = batch
            .samples()
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("s{session}_l{layer}_{i}"), v.clone()))
            .collect();
        embeddings.insert(layer, compute_embeddings(&inputs, cli.target_dim, method)?);
    }
    let embeddings_path = cli.output.join("embeddings.json");
    std::fs::write(
        &embeddings_path,
        serde_json::to_string_pretty(&embeddings)?,
    )?;
    info!("embeddings saved to {}", embeddings_path.display());

    Ok(())
}
