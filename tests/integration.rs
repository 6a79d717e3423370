//! Integration tests for STIR-rs
//!
//! End-to-end scenarios over synthetic activation data: training, feature
//! extraction, analysis, circuit discovery, embedding, and persistence.

use std::io::Write;
use std::sync::Mutex;

use stir_rs::{
    compute_embeddings, compute_embeddings_seeded, decode_model, discover_circuits, encode_model,
    Circuit, CircuitSink, DiscoveredFeature, EmbeddingMethod, FeatureExtractor, FsModelStore,
    InterpretabilityAnalyzer, ModelStore, Pipeline, PipelineConfig, SessionActivations,
    SkipTranscoder, Trainer, TrainerConfig,
};
use tempfile::NamedTempFile;

fn synthetic_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
    };
    (0..n).map(|_| (0..dim).map(|_| next()).collect()).collect()
}

fn batch(n: usize, dim: usize, seed: u64) -> stir_rs::ActivationBatch {
    stir_rs::ActivationBatch::new(synthetic_vectors(n, dim, seed)).unwrap()
}

/// Scenario 1: train D=8, L=16 on 50 random vectors for 5 epochs.
#[test]
fn test_train_small_model_end_to_end() {
    let trainer = Trainer::new(TrainerConfig {
        latent_dim: 16,
        max_epochs: 5,
        ..TrainerConfig::default()
    })
    .unwrap();

    let outcome = trainer.train(&batch(50, 8, 17)).unwrap().unwrap();
    assert_eq!(outcome.model.input_dim(), 8);
    assert_eq!(outcome.model.latent_dim(), 16);
    assert!(outcome.best_loss.is_finite());
}

/// Scenario 2: mean pooling D=10 -> T=5 worked example.
#[test]
fn test_mean_pooling_worked_example() {
    let inputs = vec![(
        "v0".to_string(),
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0],
    )];
    let results = compute_embeddings(&inputs, 5, EmbeddingMethod::MeanPooling).unwrap();
    assert_eq!(results.len(), 1);
    let expected = [1.5, 3.5, 5.5, 7.5, 9.5];
    for (got, want) in results[0].embedding.iter().zip(expected.iter()) {
        assert!((got - want).abs() < 1e-6);
    }
}

/// Scenario 3: empty activation list yields an empty result, no error.
#[test]
fn test_empty_embedding_input() {
    for method in [
        EmbeddingMethod::RandomProjection,
        EmbeddingMethod::MeanPooling,
        EmbeddingMethod::Pca,
    ] {
        let results = compute_embeddings(&[], 8, method).unwrap();
        assert!(results.is_empty());
    }
}

/// Scenario 4: two layers with one feature each above threshold yield
/// exactly one circuit with layer span 1.
#[test]
fn test_single_circuit_discovery() {
    let features = vec![
        DiscoveredFeature {
            layer_index: 0,
            feature_index: 2,
            average_activation: 0.4,
            sparsity_score: 0.9,
        },
        DiscoveredFeature {
            layer_index: 1,
            feature_index: 5,
            average_activation: 0.42,
            sparsity_score: 0.88,
        },
    ];
    let circuits = discover_circuits(&features, 0.1, 3);
    assert_eq!(circuits.len(), 1);
    assert_eq!(circuits[0].layer_span, 1);
    assert!(circuits[0].source_layer < circuits[0].target_layer);
}

/// Serialize a model, deserialize, and check outputs are bit-identical.
#[test]
fn test_blob_round_trip() {
    let model = SkipTranscoder::with_seed(12, 24, 5).unwrap();
    let restored = decode_model(&encode_model(&model)).unwrap();

    let x: Vec<f32> = (0..12).map(|i| (i as f32) * 0.17 - 1.0).collect();
    assert_eq!(model.encode(&x).unwrap(), restored.encode(&x).unwrap());
    assert_eq!(model.decode(&vec![0.3; 24]).unwrap(), restored.decode(&vec![0.3; 24]).unwrap());
    assert_eq!(model.forward(&x).unwrap(), restored.forward(&x).unwrap());
}

/// Random projections are reproducible across separate invocations.
#[test]
fn test_projection_reproducibility() {
    let inputs: Vec<(String, Vec<f32>)> = synthetic_vectors(5, 20, 9)
        .into_iter()
        .enumerate()
        .map(|(i, v)| (format!("a{i}"), v))
        .collect();

    let a = compute_embeddings_seeded(&inputs, 6, EmbeddingMethod::RandomProjection, 42).unwrap();
    let b = compute_embeddings_seeded(&inputs, 6, EmbeddingMethod::RandomProjection, 42).unwrap();
    for (ra, rb) in a.iter().zip(b.iter()) {
        assert_eq!(ra.embedding, rb.embedding);
    }
}

/// Full pipeline over a synthetic two-layer session file on disk.
#[test]
fn test_pipeline_from_session_file() {
    #[derive(Default)]
    struct CollectingSink {
        count: Mutex<usize>,
    }
    impl CircuitSink for CollectingSink {
        fn enqueue(&self, _circuit: &Circuit) {
            *self.count.lock().unwrap() += 1;
        }
    }

    // Write a session JSON the way the capture side would.
    let mut file = NamedTempFile::new().unwrap();
    let layers: Vec<serde_json::Value> = [0usize, 1]
        .iter()
        .map(|&layer| {
            serde_json::json!({
                "layer": layer,
                "vectors": synthetic_vectors(24, 6, 100 + layer as u64),
            })
        })
        .collect();
    let doc = serde_json::json!({ "session": 7, "layers": layers });
    write!(file, "{doc}").unwrap();

    let source = SessionActivations::load(file.path()).unwrap();
    assert_eq!(source.session(), 7);
    assert_eq!(source.layer_indices(), vec![0, 1]);

    let dir = tempfile::tempdir().unwrap();
    let store = FsModelStore::new(dir.path()).unwrap();
    let sink = CollectingSink::default();

    let results = Pipeline::new(PipelineConfig {
        latent_dim: 8,
        max_epochs: 3,
        min_circuit_strength: 0.0,
        ..PipelineConfig::default()
    })
    .run(&source, &store, &sink, 7, &[0, 1])
    .unwrap();

    assert_eq!(results.layers.len(), 2);
    assert_eq!(*sink.count.lock().unwrap(), results.circuits.len());

    // Persisted models decode and keep the trained dimensions.
    let blob = store.load(7, 0).unwrap().unwrap();
    let model = decode_model(&blob).unwrap();
    assert_eq!(model.input_dim(), 6);
    assert_eq!(model.latent_dim(), 8);

    // The per-layer reports serialize cleanly.
    let json = serde_json::to_string(&results.layers[0].report).unwrap();
    assert!(json.contains("statistics"));
}

/// Extraction and analysis agree on which features are active.
#[test]
fn test_extract_and_analyze_consistency() {
    let activations = batch(40, 6, 31);
    let trainer = Trainer::new(TrainerConfig {
        latent_dim: 12,
        max_epochs: 4,
        ..TrainerConfig::default()
    })
    .unwrap();
    let outcome = trainer.train(&activations).unwrap().unwrap();

    let features = FeatureExtractor::new()
        .extract(&outcome.model, &activations, 0)
        .unwrap();
    let report = InterpretabilityAnalyzer::new()
        .analyze(&outcome.model, &activations)
        .unwrap()
        .unwrap();

    assert_eq!(report.statistics.len(), 12);
    assert_eq!(report.selectivity.len(), 12);
    for feature in &features {
        let stats = &report.statistics[feature.feature_index];
        assert!(stats.active_count >= 5);
        assert!((stats.sparsity - feature.sparsity_score).abs() < 1e-6);
    }
    for correlation in &report.correlations {
        assert!(correlation.correlation.abs() > 0.1);
        assert!(correlation.correlation.abs() <= 1.0);
    }
}

/// Corrupt session files are rejected with a specific reason.
#[test]
fn test_corrupt_session_file_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    let doc = serde_json::json!({
        "session": 2,
        "layers": [{ "layer": 0, "vectors": [[1.0, 2.0], [3.0]] }],
    });
    write!(file, "{doc}").unwrap();

    let err = SessionActivations::load(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("corrupt"));
}
