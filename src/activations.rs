//! Activation batches and sources.
//!
//! Activation vectors are captured elsewhere and owned by an external store;
//! this module holds the borrowed-for-analysis representation: a batch of
//! fixed-dimension f32 vectors, validated on construction, plus the
//! [`ActivationSource`] seam the pipeline pulls from.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A batch of activation vectors sharing one dimension.
///
/// Construction validates uniformity and rejects corrupt payloads
/// (NaN/infinite values). An empty batch has dimension 0 and is a valid
/// no-data state, not an error.
#[derive(Debug, Clone, Default)]
pub struct ActivationBatch {
    dim: usize,
    samples: Vec<Vec<f32>>,
}

impl ActivationBatch {
    /// Build a batch from owned vectors. The dimension is taken from the
    /// first vector; every vector must match it and contain only finite
    /// values.
    pub fn new(samples: Vec<Vec<f32>>) -> Result<Self> {
        let Some(first) = samples.first() else {
            return Ok(Self::default());
        };
        let dim = first.len();
        anyhow::ensure!(dim > 0, "activation vectors must be non-empty");

        for (i, sample) in samples.iter().enumerate() {
            anyhow::ensure!(
                sample.len() == dim,
                "activation {i} has dimension {}, expected {dim}",
                sample.len()
            );
            if let Some(pos) = sample.iter().position(|v| !v.is_finite()) {
                anyhow::bail!("activation {i} contains a non-finite value at index {pos}");
            }
        }

        Ok(Self { dim, samples })
    }

    /// Decode a batch from raw little-endian f32 bytes.
    ///
    /// Validation failures carry a specific reason: byte length not
    /// divisible by 4, float count not divisible by `dim`, or non-finite
    /// payloads.
    pub fn from_le_bytes(dim: usize, bytes: &[u8]) -> Result<Self> {
        anyhow::ensure!(dim > 0, "activation dimension must be positive");
        anyhow::ensure!(
            bytes.len() % 4 == 0,
            "activation byte length {} is not divisible by 4",
            bytes.len()
        );
        let count = bytes.len() / 4;
        anyhow::ensure!(
            count % dim == 0,
            "activation float count {count} does not match declared dimension {dim}"
        );

        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let samples: Vec<Vec<f32>> = floats.chunks_exact(dim).map(<[f32]>::to_vec).collect();
        Self::new(samples)
    }

    /// Activation dimension D (0 for an empty batch).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of vectors in the batch.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the batch holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All vectors, in capture order.
    pub fn samples(&self) -> &[Vec<f32>] {
        &self.samples
    }

    /// A single vector by index.
    pub fn get(&self, index: usize) -> Option<&[f32]> {
        self.samples.get(index).map(Vec::as_slice)
    }
}

/// Yields activation batches for a (session, layer) pair.
///
/// The durable store behind this seam is external; implementations return an
/// empty batch for a layer with no captured data (no-data is not an error).
pub trait ActivationSource {
    fn load(&self, session: i64, layer: usize) -> Result<ActivationBatch>;
}

#[derive(Debug, Deserialize, Serialize)]
struct LayerRecord {
    layer: usize,
    vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct SessionFile {
    session: i64,
    layers: Vec<LayerRecord>,
}

/// In-memory activation source decoded from a session JSON file.
///
/// File shape: `{ "session": 3, "layers": [ { "layer": 0,
/// "vectors": [[...], ...] }, ... ] }`.
#[derive(Debug, Clone)]
pub struct SessionActivations {
    session: i64,
    layers: BTreeMap<usize, ActivationBatch>,
}

impl SessionActivations {
    /// Load and validate a session file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: SessionFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        anyhow::ensure!(
            file.session > 0,
            "session identifier must be positive, got {}",
            file.session
        );

        let mut layers = BTreeMap::new();
        for record in file.layers {
            let batch = ActivationBatch::new(record.vectors)
                .with_context(|| format!("layer {} has corrupt activations", record.layer))?;
            debug!(
                "session {}: layer {} holds {} vectors of dim {}",
                file.session,
                record.layer,
                batch.len(),
                batch.dim()
            );
            layers.insert(record.layer, batch);
        }

        Ok(Self {
            session: file.session,
            layers,
        })
    }

    /// Build a source directly from batches (used by tests and demos).
    pub fn from_batches(session: i64, batches: Vec<(usize, ActivationBatch)>) -> Result<Self> {
        anyhow::ensure!(
            session > 0,
            "session identifier must be positive, got {session}"
        );
        Ok(Self {
            session,
            layers: batches.into_iter().collect(),
        })
    }

    /// Session identifier carried by the file.
    pub fn session(&self) -> i64 {
        self.session
    }

    /// Layer indices present, ascending.
    pub fn layer_indices(&self) -> Vec<usize> {
        self.layers.keys().copied().collect()
    }
}

impl ActivationSource for SessionActivations {
    fn load(&self, session: i64, layer: usize) -> Result<ActivationBatch> {
        anyhow::ensure!(
            session > 0,
            "session identifier must be positive, got {session}"
        );
        anyhow::ensure!(
            session == self.session,
            "source holds session {}, requested {session}",
            self.session
        );
        // A missing layer is a no-data condition: hand back an empty batch.
        Ok(self.layers.get(&layer).cloned().unwrap_or_default())
    }
}
