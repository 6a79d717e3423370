// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f32 intentional in ML
#![allow(clippy::many_single_char_names)] // x, z, d, j standard in math
#![allow(clippy::similar_names)] // related variables like `w_enc`/`w_dec`
#![allow(clippy::module_name_repetitions)] // SkipTranscoder in model.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::return_self_not_must_use)] // #[must_use] on Self returns

//! STIR-rs: Skip-Transcoder Interpretability in Rust
//!
//! Trains sparse skip-transcoder models over captured neural-network layer
//! activations and analyzes the learned latent codes for interpretable
//! structure.
//!
//! ## Architecture
//!
//! - `activations`: activation batches, validation, and the source seam
//! - `model`: the skip-transcoder model (encode/decode/skip/forward)
//! - `train`: mini-batch training loop with early stopping
//! - `features`: reliable-feature extraction from latent codes
//! - `analysis`: per-feature statistics, correlations, selectivity,
//!   causal attribution, structural decomposition
//! - `circuits`: cross-layer circuit discovery and the sink seam
//! - `embedding`: random-projection / mean-pooling / approximate-PCA
//!   dimensionality reduction
//! - `persist`: byte-exact model blob codec and the store seam
//! - `pipeline`: end-to-end session orchestration

pub mod activations;
pub mod analysis;
pub mod circuits;
pub mod embedding;
pub mod features;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod train;

pub use activations::{ActivationBatch, ActivationSource, SessionActivations};
pub use analysis::{
    CausalAttribution, FeatureCorrelation, FeatureStatistics, InterpretabilityAnalyzer,
    InterpretabilityReport, StructuralDecomposition,
};
pub use circuits::{discover_circuits, Circuit, CircuitSink, CircuitType, LoggingSink};
pub use embedding::{
    compute_embeddings, compute_embeddings_seeded, EmbeddingMethod, EmbeddingResult,
    DEFAULT_PROJECTION_SEED,
};
pub use features::{DiscoveredFeature, FeatureExtractor};
pub use model::{SkipTranscoder, DEFAULT_MODEL_SEED};
pub use persist::{
    decode_model, encode_model, load_model, FsModelStore, ModelMetrics, ModelStore,
};
pub use pipeline::{LayerOutcome, Pipeline, PipelineConfig, PipelineResults};
pub use train::{Trainer, TrainerConfig, TrainingOutcome};
