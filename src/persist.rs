//! Model persistence: byte-exact blob codec and the store boundary.
//!
//! Blob layout (little-endian): `i32 D`, `i32 L`, then f32 arrays in order —
//! D×L encoder weights (row-major), L encoder bias, L×D decoder weights,
//! D decoder bias, D×D skip weights, D skip bias. The durable store itself
//! is an external collaborator behind [`ModelStore`].

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::SkipTranscoder;

/// Training metrics persisted alongside a model blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub final_loss: f32,
    pub average_sparsity: f32,
}

/// Serialize a model into its blob layout.
pub fn encode_model(model: &SkipTranscoder) -> Vec<u8> {
    let d = model.input_dim();
    let l = model.latent_dim();
    let float_count = d * l + l + l * d + d + d * d + d;
    let mut bytes = Vec::with_capacity(8 + 4 * float_count);

    bytes.extend_from_slice(&(d as i32).to_le_bytes());
    bytes.extend_from_slice(&(l as i32).to_le_bytes());
    for &w in &model.w_enc {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    for &w in &model.b_enc {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    for &w in &model.w_dec {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    for &w in &model.b_dec {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    for &w in &model.w_skip {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    for &w in &model.b_skip {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    bytes
}

/// Deserialize a model blob, validating layout and payload.
///
/// Corruption is reported with a specific reason: short header,
/// non-positive dimensions, byte length not matching the declared shape,
/// or non-finite parameter values.
pub fn decode_model(bytes: &[u8]) -> Result<SkipTranscoder> {
    anyhow::ensure!(
        bytes.len() >= 8,
        "model blob too short for header: {} bytes",
        bytes.len()
    );
    anyhow::ensure!(
        bytes.len() % 4 == 0,
        "model blob length {} is not divisible by 4",
        bytes.len()
    );

    let d = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let l = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    anyhow::ensure!(d > 0, "model blob declares non-positive input dim {d}");
    anyhow::ensure!(l > 0, "model blob declares non-positive latent dim {l}");
    let d = d as usize;
    let l = l as usize;

    let float_count = d * l + l + l * d + d + d * d + d;
    let expected = 8 + 4 * float_count;
    anyhow::ensure!(
        bytes.len() == expected,
        "model blob has {} bytes, expected {expected} for D={d}, L={l}",
        bytes.len()
    );

    let floats: Vec<f32> = bytes[8..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if let Some(pos) = floats.iter().position(|v| !v.is_finite()) {
        anyhow::bail!("model blob contains a non-finite value at float index {pos}");
    }

    let mut floats = floats.into_iter();
    let mut take = |count: usize| -> Vec<f32> { floats.by_ref().take(count).collect() };
    let w_enc = take(d * l);
    let b_enc = take(l);
    let w_dec = take(l * d);
    let b_dec = take(d);
    let w_skip = take(d * d);
    let b_skip = take(d);

    SkipTranscoder::from_parts(d, l, w_enc, b_enc, w_dec, b_dec, w_skip, b_skip)
}

/// Durable blob store keyed by (session, layer).
///
/// A missing model on load is a no-data condition (`Ok(None)`), not an
/// error; non-positive session identifiers are caller misuse.
pub trait ModelStore {
    fn load(&self, session: i64, layer: usize) -> Result<Option<Vec<u8>>>;
    fn save(&self, session: i64, layer: usize, blob: &[u8], metrics: &ModelMetrics) -> Result<()>;
}

/// Filesystem-backed store: one blob plus a metrics sidecar JSON per
/// (session, layer) under a root directory.
#[derive(Debug)]
pub struct FsModelStore {
    root: PathBuf,
}

impl FsModelStore {
    /// Create the store, making the root directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create model store at {}", root.display()))?;
        Ok(Self { root })
    }

    fn blob_path(&self, session: i64, layer: usize) -> PathBuf {
        self.root.join(format!("model_s{session}_l{layer}.bin"))
    }

    fn metrics_path(&self, session: i64, layer: usize) -> PathBuf {
        self.root.join(format!("model_s{session}_l{layer}.json"))
    }

    fn check_session(session: i64) -> Result<()> {
        anyhow::ensure!(
            session > 0,
            "session identifier must be positive, got {session}"
        );
        Ok(())
    }
}

impl ModelStore for FsModelStore {
    fn load(&self, session: i64, layer: usize) -> Result<Option<Vec<u8>>> {
        Self::check_session(session)?;
        let path = self.blob_path(session, layer);
        if !path.exists() {
            debug!("no persisted model for session {session}, layer {layer}");
            return Ok(None);
        }
        let blob = std::fs::read(&path)
            .with_context(|| format!("failed to read model blob {}", path.display()))?;
        Ok(Some(blob))
    }

    fn save(&self, session: i64, layer: usize, blob: &[u8], metrics: &ModelMetrics) -> Result<()> {
        Self::check_session(session)?;
        let path = self.blob_path(session, layer);
        std::fs::write(&path, blob)
            .with_context(|| format!("failed to write model blob {}", path.display()))?;
        std::fs::write(
            self.metrics_path(session, layer),
            serde_json::to_string_pretty(metrics)?,
        )
        .with_context(|| "failed to write model metrics sidecar")?;
        info!(
            "persisted model for session {session}, layer {layer} ({} bytes, loss {:.6})",
            blob.len(),
            metrics.final_loss
        );
        Ok(())
    }
}

/// Load and decode a persisted model, if one exists.
pub fn load_model(
    store: &dyn ModelStore,
    session: i64,
    layer: usize,
) -> Result<Option<SkipTranscoder>> {
    match store.load(session, layer)? {
        Some(blob) => Ok(Some(decode_model(&blob).with_context(|| {
            format!("model blob for session {session}, layer {layer} is corrupt")
        })?)),
        None => Ok(None),
    }
}
