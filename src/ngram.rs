//! N-gram language model over the 27-letter alphabet (space + a..z)
//!
//! The on-disk format is a fixed header `{n: u32, alphabet: u32, count:
//! u64, floor_logp: f32}` followed by `count` records `{key: u64, logp:
//! f32}`, all little-endian. `key` is the base-27 packing of the n symbol
//! indices, high symbol first. Unknown keys resolve to the floor.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::info;

use crate::error::{PipelineError, Result};

/// Alphabet size: space plus the 26 Latin letters
pub const ALPHABET: u32 = 27;

/// Conventional file name of the 6-gram table inside a model directory
pub const NGRAM_FILE: &str = "ggwords-6-gram.dat.binary";

/// Read-only n-gram log-probability table
#[derive(Debug, Clone)]
pub struct FreqMap {
    n: usize,
    floor_logp: f32,
    table: HashMap<u64, f32>,
}

impl FreqMap {
    /// Order of the model
    pub fn order(&self) -> usize {
        self.n
    }

    /// Log-probability floor returned for unknown n-grams
    pub fn floor(&self) -> f64 {
        self.floor_logp as f64
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Log-probability of a packed n-gram key
    pub fn logp(&self, key: u64) -> f64 {
        self.table
            .get(&key)
            .copied()
            .unwrap_or(self.floor_logp) as f64
    }

    /// Sum of log-probabilities over all length-n windows of `symbols`.
    /// Fewer symbols than the model order score zero windows.
    pub fn score(&self, symbols: &[u8]) -> f64 {
        if symbols.len() < self.n {
            return 0.0;
        }
        symbols
            .windows(self.n)
            .map(|w| self.logp(pack(w)))
            .sum()
    }

    /// Load a binary table, validating the header against the requested
    /// order.
    pub fn load<P: AsRef<Path>>(path: P, expected_n: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);

        let n = read_u32(&mut reader)? as usize;
        let alphabet = read_u32(&mut reader)?;
        let count = read_u64(&mut reader)?;
        let floor_logp = read_f32(&mut reader)?;

        if alphabet != ALPHABET {
            return Err(PipelineError::BadFormat(format!(
                "{}: alphabet {} (expected {})",
                path.display(),
                alphabet,
                ALPHABET
            )));
        }
        if n != expected_n {
            return Err(PipelineError::BadFormat(format!(
                "{}: order {} (expected {})",
                path.display(),
                n,
                expected_n
            )));
        }

        let mut table = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let key = read_u64(&mut reader)?;
            let logp = read_f32(&mut reader)?;
            table.insert(key, logp);
        }

        info!("Loaded {} {}-grams from {}", table.len(), n, path.display());

        Ok(Self {
            n,
            floor_logp,
            table,
        })
    }

    /// Write the table in the binary format read by [`FreqMap::load`].
    /// Records are emitted in key order so the output is reproducible.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);

        writer.write_all(&(self.n as u32).to_le_bytes())?;
        writer.write_all(&ALPHABET.to_le_bytes())?;
        writer.write_all(&(self.table.len() as u64).to_le_bytes())?;
        writer.write_all(&self.floor_logp.to_le_bytes())?;

        let mut keys: Vec<u64> = self.table.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            writer.write_all(&key.to_le_bytes())?;
            writer.write_all(&self.table[&key].to_le_bytes())?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Build a model by counting the n-grams of a text corpus.
    ///
    /// Letters map to 1..26, everything else to space. The floor sits well
    /// below the rarest observed n-gram.
    pub fn train(corpus: &str, n: usize) -> Self {
        let symbols = text_to_symbols(corpus);

        let mut counts: HashMap<u64, u64> = HashMap::new();
        if symbols.len() >= n {
            for window in symbols.windows(n) {
                *counts.entry(pack(window)).or_insert(0) += 1;
            }
        }

        let total: u64 = counts.values().sum();
        let mut table = HashMap::with_capacity(counts.len());
        let mut min_logp = 0.0f32;
        for (key, count) in counts {
            let logp = ((count as f64) / (total as f64)).ln() as f32;
            min_logp = min_logp.min(logp);
            table.insert(key, logp);
        }

        Self {
            n,
            floor_logp: min_logp - 10.0,
            table,
        }
    }

    /// Construct a table from explicit entries (synthetic models)
    pub fn from_entries(n: usize, floor_logp: f32, entries: &[(u64, f32)]) -> Self {
        Self {
            n,
            floor_logp,
            table: entries.iter().copied().collect(),
        }
    }

    /// Entries sorted by key, for comparisons
    pub fn entries(&self) -> Vec<(u64, f32)> {
        let mut out: Vec<(u64, f32)> = self.table.iter().map(|(&k, &v)| (k, v)).collect();
        out.sort_unstable_by_key(|&(k, _)| k);
        out
    }
}

/// Pack symbol indices (each in 0..27) into a base-27 key, high symbol
/// first
pub fn pack(symbols: &[u8]) -> u64 {
    symbols
        .iter()
        .fold(0u64, |acc, &s| acc * ALPHABET as u64 + s as u64)
}

/// Map text to symbol indices: a..z (case-insensitive) to 1..26, anything
/// else to 0 (space)
pub fn text_to_symbols(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() {
                (c as u8 - b'a') + 1
            } else {
                0
            }
        })
        .collect()
}

/// Render symbol indices back to text; 27 (unassigned) prints as `?`
pub fn symbols_to_text(symbols: &[u8]) -> String {
    symbols
        .iter()
        .map(|&s| match s {
            0 => ' ',
            1..=26 => (b'a' + s - 1) as char,
            _ => '?',
        })
        .collect()
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|_| PipelineError::BadFormat("truncated n-gram file".into()))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|_| PipelineError::BadFormat("truncated n-gram file".into()))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|_| PipelineError::BadFormat("truncated n-gram file".into()))?;
    Ok(f32::from_le_bytes(buf))
}
