//! Skip-transcoder model: sparse autoencoder with an additive linear skip path.
//!
//! The model reconstructs an activation vector as
//! `decode(encode(x)) + skip(x)`, where the ReLU in the encoder makes the
//! latent code non-negative and (after training with an L1 penalty) sparse.
//! All parameters are dense; "skip" names the architecture, not a sparse
//! weight layout.

use anyhow::Result;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Default seed for reproducible model construction. Overridable via
/// [`SkipTranscoder::with_seed`].
pub const DEFAULT_MODEL_SEED: u64 = 7;

/// Standard deviation for encoder/decoder weight initialization.
const INIT_STD: f32 = 0.01;

/// Latent indices whose mean absolute encoder-column magnitude falls below
/// this threshold count as "near-zero" in [`SkipTranscoder::average_sparsity`].
const SPARSITY_WEIGHT_THRESHOLD: f32 = 0.01;

/// Sparse autoencoder with a linear skip connection.
///
/// Shapes: encoder `D×L`, decoder `L×D`, skip `D×D` (initialized to the
/// identity), where `D` is the activation dimension and `L` the latent
/// dimension. Both are fixed at construction.
#[derive(Debug, Clone)]
pub struct SkipTranscoder {
    pub(crate) input_dim: usize,
    pub(crate) latent_dim: usize,
    /// Encoder weights, shape `(input_dim, latent_dim)`
    pub(crate) w_enc: Array2<f32>,
    /// Encoder bias, shape `(latent_dim,)`
    pub(crate) b_enc: Array1<f32>,
    /// Decoder weights, shape `(latent_dim, input_dim)`
    pub(crate) w_dec: Array2<f32>,
    /// Decoder bias, shape `(input_dim,)`
    pub(crate) b_dec: Array1<f32>,
    /// Skip weights, shape `(input_dim, input_dim)`
    pub(crate) w_skip: Array2<f32>,
    /// Skip bias, shape `(input_dim,)`
    pub(crate) b_skip: Array1<f32>,
}

impl SkipTranscoder {
    /// Create a model with the default seed.
    ///
    /// Construction is reproducible: the same `(input_dim, latent_dim, seed)`
    /// always yields bit-identical parameters.
    pub fn new(input_dim: usize, latent_dim: usize) -> Result<Self> {
        Self::with_seed(input_dim, latent_dim, DEFAULT_MODEL_SEED)
    }

    /// Create a model with an explicit seed.
    ///
    /// Encoder and decoder weights are drawn from `Normal(0, 0.01)` in a
    /// fixed order (encoder row-major, then decoder row-major); biases start
    /// at zero; the skip matrix starts as the identity.
    pub fn with_seed(input_dim: usize, latent_dim: usize, seed: u64) -> Result<Self> {
        anyhow::ensure!(input_dim > 0, "input_dim must be positive");
        anyhow::ensure!(latent_dim > 0, "latent_dim must be positive");

        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0_f32, INIT_STD).expect("valid normal parameters");

        let w_enc = Array2::from_shape_fn((input_dim, latent_dim), |_| normal.sample(&mut rng));
        let b_enc = Array1::zeros(latent_dim);
        let w_dec = Array2::from_shape_fn((latent_dim, input_dim), |_| normal.sample(&mut rng));
        let b_dec = Array1::zeros(input_dim);
        let w_skip = Array2::eye(input_dim);
        let b_skip = Array1::zeros(input_dim);

        Ok(Self {
            input_dim,
            latent_dim,
            w_enc,
            b_enc,
            w_dec,
            b_dec,
            w_skip,
            b_skip,
        })
    }

    /// Reassemble a model from raw parameter vectors (row-major weights).
    ///
    /// Used by the blob codec when reloading a persisted model.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        input_dim: usize,
        latent_dim: usize,
        w_enc: Vec<f32>,
        b_enc: Vec<f32>,
        w_dec: Vec<f32>,
        b_dec: Vec<f32>,
        w_skip: Vec<f32>,
        b_skip: Vec<f32>,
    ) -> Result<Self> {
        anyhow::ensure!(input_dim > 0, "input_dim must be positive");
        anyhow::ensure!(latent_dim > 0, "latent_dim must be positive");

        let w_enc = Array2::from_shape_vec((input_dim, latent_dim), w_enc)
            .map_err(|e| anyhow::anyhow!("encoder weights have wrong length: {e}"))?;
        let b_enc = Array1::from_vec(b_enc);
        anyhow::ensure!(
            b_enc.len() == latent_dim,
            "encoder bias has length {}, expected {latent_dim}",
            b_enc.len()
        );
        let w_dec = Array2::from_shape_vec((latent_dim, input_dim), w_dec)
            .map_err(|e| anyhow::anyhow!("decoder weights have wrong length: {e}"))?;
        let b_dec = Array1::from_vec(b_dec);
        anyhow::ensure!(
            b_dec.len() == input_dim,
            "decoder bias has length {}, expected {input_dim}",
            b_dec.len()
        );
        let w_skip = Array2::from_shape_vec((input_dim, input_dim), w_skip)
            .map_err(|e| anyhow::anyhow!("skip weights have wrong length: {e}"))?;
        let b_skip = Array1::from_vec(b_skip);
        anyhow::ensure!(
            b_skip.len() == input_dim,
            "skip bias has length {}, expected {input_dim}",
            b_skip.len()
        );

        Ok(Self {
            input_dim,
            latent_dim,
            w_enc,
            b_enc,
            w_dec,
            b_dec,
            w_skip,
            b_skip,
        })
    }

    /// Activation dimension D.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Latent dimension L.
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Encode an activation into its latent code: `ReLU(x·W_enc + b_enc)`.
    ///
    /// Returns a vector of length `latent_dim` with every element ≥ 0.
    pub fn encode(&self, x: &[f32]) -> Result<Vec<f32>> {
        self.check_input(x)?;
        let xv = ArrayView1::from(x);
        let pre = xv.dot(&self.w_enc) + &self.b_enc;
        Ok(pre.mapv(|v| v.max(0.0)).to_vec())
    }

    /// Decode a latent code back to activation space: `z·W_dec + b_dec`.
    pub fn decode(&self, z: &[f32]) -> Result<Vec<f32>> {
        anyhow::ensure!(
            z.len() == self.latent_dim,
            "latent has dimension {}, model expects {}",
            z.len(),
            self.latent_dim
        );
        let zv = ArrayView1::from(z);
        Ok((zv.dot(&self.w_dec) + &self.b_dec).to_vec())
    }

    /// Linear skip path: `x·W_skip + b_skip`.
    pub fn skip(&self, x: &[f32]) -> Result<Vec<f32>> {
        self.check_input(x)?;
        let xv = ArrayView1::from(x);
        Ok((xv.dot(&self.w_skip) + &self.b_skip).to_vec())
    }

    /// Full reconstruction: `decode(encode(x)) + skip(x)`, length `input_dim`.
    pub fn forward(&self, x: &[f32]) -> Result<Vec<f32>> {
        let latent = self.encode(x)?;
        let decoded = self.decode(&latent)?;
        let skipped = self.skip(x)?;
        Ok(decoded
            .iter()
            .zip(skipped.iter())
            .map(|(d, s)| d + s)
            .collect())
    }

    /// Fraction of latent indices whose mean absolute encoder-column
    /// magnitude (bias included) falls below 0.01.
    ///
    /// A weight-space proxy for "how often a feature is near-zero"; no
    /// forward pass over data is needed. Not an exact L0 computation.
    /// Always in `[0, 1]`.
    pub fn average_sparsity(&self) -> f32 {
        let near_zero = (0..self.latent_dim)
            .filter(|&j| {
                let col_sum: f32 = self.w_enc.column(j).iter().map(|w| w.abs()).sum();
                let mean_mag = (col_sum + self.b_enc[j].abs()) / (self.input_dim as f32 + 1.0);
                mean_mag < SPARSITY_WEIGHT_THRESHOLD
            })
            .count();
        near_zero as f32 / self.latent_dim as f32
    }

    fn check_input(&self, x: &[f32]) -> Result<()> {
        anyhow::ensure!(
            x.len() == self.input_dim,
            "activation has dimension {}, model expects {}",
            x.len(),
            self.input_dim
        );
        Ok(())
    }
}
