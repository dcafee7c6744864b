//! Pairwise acoustic similarity between detected key presses
//!
//! For every pair of presses the normalized cross-correlation of the audio
//! windows around their peaks is maximized over a bounded, strided
//! alignment search. The result is a dense symmetric matrix consumed by the
//! clusterer.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::audio::segment::KeyPress;
use crate::cancel::CancelToken;
use crate::config::SimilarityConfig;
use crate::error::Result;

/// Similarity of one ordered pair of presses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityEntry {
    /// Best normalized cross-correlation, in [-1, 1]
    pub cc: f64,
    /// Alignment offset (samples) at which the maximum was attained
    pub offset: i64,
}

/// Dense NxN matrix of pairwise similarities. Symmetric in `cc`,
/// anti-symmetric in `offset`; built once and read-only thereafter.
#[derive(Debug, Clone)]
pub struct SimilarityMap {
    n: usize,
    entries: Vec<SimilarityEntry>,
}

impl SimilarityMap {
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn get(&self, i: usize, j: usize) -> SimilarityEntry {
        self.entries[i * self.n + j]
    }

    pub fn cc(&self, i: usize, j: usize) -> f64 {
        self.entries[i * self.n + j].cc
    }

    /// Build a map from an explicit similarity function; the diagonal is
    /// forced to (1, 0) and `f` is mirrored over the upper triangle.
    /// Intended for synthetic evaluation and tests.
    pub fn from_cc<F: Fn(usize, usize) -> f64>(n: usize, f: F) -> Self {
        let mut map = Self::identity(n);
        for i in 0..n {
            for j in i + 1..n {
                let cc = f(i, j);
                map.entries[i * n + j] = SimilarityEntry { cc, offset: 0 };
                map.entries[j * n + i] = SimilarityEntry { cc, offset: 0 };
            }
        }
        map
    }

    /// Median of the off-diagonal `cc` values
    pub fn median_off_diagonal(&self) -> f64 {
        let mut values = Vec::with_capacity(self.n * (self.n - 1) / 2);
        for i in 0..self.n {
            for j in i + 1..self.n {
                values.push(self.cc(i, j));
            }
        }
        if values.is_empty() {
            return 0.0;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        values[values.len() / 2]
    }

    /// Extremes of the off-diagonal `cc` values
    pub fn min_max_off_diagonal(&self) -> (f64, f64) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for i in 0..self.n {
            for j in i + 1..self.n {
                let cc = self.cc(i, j);
                min = min.min(cc);
                max = max.max(cc);
            }
        }
        (min, max)
    }

    fn identity(n: usize) -> Self {
        let mut entries = vec![SimilarityEntry { cc: 0.0, offset: 0 }; n * n];
        for i in 0..n {
            entries[i * n + i] = SimilarityEntry { cc: 1.0, offset: 0 };
        }
        Self { n, entries }
    }
}

/// Compute the similarity map for a press collection.
///
/// Only the upper triangle is computed (in parallel); the lower triangle is
/// mirrored with negated offsets.
pub fn compute_similarity(
    waveform: &[i16],
    presses: &[KeyPress],
    config: &SimilarityConfig,
    cancel: &CancelToken,
) -> Result<SimilarityMap> {
    let n = presses.len();
    let mut map = SimilarityMap::identity(n);

    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .collect();

    info!("Computing similarity over {} press pairs", pairs.len());

    let computed: Vec<SimilarityEntry> = pairs
        .par_iter()
        .map(|&(i, j)| {
            if cancel.is_cancelled() {
                return SimilarityEntry { cc: 0.0, offset: 0 };
            }
            best_alignment(waveform, presses[i].pos, presses[j].pos, config)
        })
        .collect();

    cancel.check()?;

    for (&(i, j), entry) in pairs.iter().zip(&computed) {
        map.entries[i * n + j] = *entry;
        map.entries[j * n + i] = SimilarityEntry {
            cc: entry.cc,
            offset: -entry.offset,
        };
    }

    if n > 1 {
        let (min, max) = map.min_max_off_diagonal();
        debug!("Similarity map: min = {:.3}, max = {:.3}", min, max);
    }

    Ok(map)
}

/// Maximize the normalized cross-correlation of the windows around two
/// press peaks over a strided alignment search.
fn best_alignment(
    waveform: &[i16],
    pos_i: usize,
    pos_j: usize,
    config: &SimilarityConfig,
) -> SimilarityEntry {
    let half = (config.corr_window / 2) as i64;
    let align = config.align_window as i64;
    let stride = config.stride.max(1) as i64;

    let mut best_cc = -1.0f64;
    let mut best_offset = 0i64;

    let mut delta = -align;
    while delta <= align {
        let cc = cross_correlation(waveform, pos_i as i64, pos_j as i64 + delta, half);
        if cc > best_cc {
            best_cc = cc;
            best_offset = delta;
        }
        delta += stride;
    }

    SimilarityEntry {
        cc: best_cc,
        offset: best_offset,
    }
}

/// Normalized cross-correlation of two equal windows centered at `ci` and
/// `cj`. Samples outside the waveform are treated as zero.
fn cross_correlation(waveform: &[i16], ci: i64, cj: i64, half: i64) -> f64 {
    let n = waveform.len() as i64;
    let at = |idx: i64| -> f64 {
        if idx < 0 || idx >= n {
            0.0
        } else {
            waveform[idx as usize] as f64
        }
    };

    let mut dot = 0.0f64;
    let mut norm_i = 0.0f64;
    let mut norm_j = 0.0f64;
    for t in -half..half {
        let a = at(ci + t);
        let b = at(cj + t);
        dot += a * b;
        norm_i += a * a;
        norm_j += b * b;
    }

    let denom = (norm_i * norm_j).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}
