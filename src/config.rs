//! Configuration structures for the keyecho pipeline

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub filter: FilterConfig,
    pub segmenter: SegmenterConfig,
    pub similarity: SimilarityConfig,
    pub cluster: ClusterConfig,
    pub decode: DecodeConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, crate::error::ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| {
            crate::error::ConfigError::FileNotFound(path.display().to_string())
        })?;

        toml::from_str(&content).map_err(|e| crate::error::ConfigError::Parse(e.to_string()))
    }
}

/// Pre-filter applied to the float waveform before quantization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Filter kind
    pub kind: FilterKind,
    /// Cutoff frequency (Hz)
    pub cutoff_hz: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kind: FilterKind::HighPass1,
            cutoff_hz: 1000.0,
        }
    }
}

/// The closed set of supported pre-filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// No filtering
    None,
    /// First-order high-pass
    HighPass1,
    /// Second-order high-pass
    HighPass2,
}

impl FilterKind {
    /// Numeric filter id as used on the command line (0, 1, 2)
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(FilterKind::None),
            1 => Some(FilterKind::HighPass1),
            2 => Some(FilterKind::HighPass2),
            _ => None,
        }
    }
}

/// Keystroke detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Candidate threshold: envelope must exceed this multiple of the
    /// rolling background level
    pub threshold_clicks: f64,
    /// Window (samples) of the rolling background mean of the envelope
    pub history_size: usize,
    /// Window (samples) of the trailing sliding-max envelope; doubles as
    /// the local-max exclusion span
    pub attack_window: usize,
    /// Drop accepted candidates whose peak falls in the bottom quantile
    pub remove_low_power: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            threshold_clicks: 8.0,
            history_size: 512,
            attack_window: 2 * 1024,
            remove_low_power: true,
        }
    }
}

/// Cross-correlation similarity configuration, all values in samples
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Half-width of the alignment search between two presses
    pub align_window: usize,
    /// Step of the alignment search
    pub stride: usize,
    /// Window over which the normalized cross-correlation is computed
    pub corr_window: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            align_window: 96,
            stride: 2,
            corr_window: 512,
        }
    }
}

/// Acoustic clustering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster budget of the first outer iteration
    pub max_clusters_start: usize,
    /// Cluster budget increase per outer iteration
    pub max_clusters_step: usize,
    /// Number of outer iterations of the growth schedule
    pub outer_iterations: usize,
    /// Clusterings retained per outer iteration (one per annealing restart)
    pub clusterings_per_iteration: usize,
    /// Annealing proposals per restart
    pub mcmc_iterations: usize,
    /// Initial annealing temperature
    pub temperature_start: f64,
    /// Final annealing temperature
    pub temperature_end: f64,
    /// Seed of the explicit random source; the full pipeline is
    /// bit-identical across runs for a fixed seed
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_clusters_start: 29,
            max_clusters_step: 4,
            outer_iterations: 16,
            clusterings_per_iteration: 32,
            mcmc_iterations: 10_000,
            temperature_start: 5.0,
            temperature_end: 0.01,
            seed: 0,
        }
    }
}

/// Beam decoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Weight of the language-model term in the joint score
    pub w_english_freq: f64,
    /// Weight of the acoustic term in the joint score
    pub w_acoustic: f64,
    /// Beam width; `None` selects it from the ciphertext length
    pub n_hypotheses_to_keep: Option<usize>,
    /// Order of the n-gram language model
    pub ngram_order: usize,
    /// Beam rounds without top-score improvement before stopping
    pub convergence_rounds: usize,
    /// Enable the hint-refinement loop after decoding
    pub hint_refinement: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            w_english_freq: 20.0,
            w_acoustic: 1.0,
            n_hypotheses_to_keep: None,
            ngram_order: 6,
            convergence_rounds: 3,
            hint_refinement: false,
        }
    }
}

impl DecodeConfig {
    /// Effective beam width for a ciphertext of `n` presses.
    ///
    /// Longer ciphertexts carry a stronger language signal and get a
    /// narrower beam: `max(100, 2100 - 10 * clamp(n - 100, 0, 200))`.
    pub fn beam_width(&self, n: usize) -> usize {
        if let Some(k) = self.n_hypotheses_to_keep {
            return k;
        }
        let over = (n as i64 - 100).clamp(0, 200);
        (2100 - 10 * over).max(100) as usize
    }
}
