//! Reduce one batch of activations with all three embedding methods.
//!
//! Run with: cargo run --example embed_activations

use anyhow::Result;
use stir_rs::{compute_embeddings, EmbeddingMethod};

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    println!("=== STIR-rs: embedding demo ===");

    let inputs: Vec<(String, Vec<f32>)> = (0..4)
        .map(|i| {
            let v: Vec<f32> = (0..12).map(|d| ((i + d) as f32).sin()).collect();
            (format!("act_{i}"), v)
        })
        .collect();

    for method in [
        EmbeddingMethod::RandomProjection,
        EmbeddingMethod::MeanPooling,
        EmbeddingMethod::Pca,
    ] {
        let results = compute_embeddings(&inputs, 4, method)?;
        println!("\n{method}:");
        for r in &results {
            let rendered: Vec<String> = r.embedding.iter().map(|v| format!("{v:+.3}")).collect();
            println!("  {} -> [{}]", r.source_id, rendered.join(", "));
        }
    }

    Ok(())
}
