//! Acoustic keyboard eavesdropping
//!
//! Reconstructs the text typed on a physical keyboard from a mono audio
//! recording of the typing session, without training on the specific
//! keyboard or typist. The only other input is an n-gram model of the
//! target language.
//!
//! # Architecture
//!
//! The offline pipeline runs in four stages:
//!
//! - `audio`: waveform loading, pre-filtering, and keystroke detection
//! - `similarity`: pairwise cross-correlation of keystroke windows
//! - `cipher`: acoustic clustering and n-gram-guided beam decoding
//! - `pipeline`: the stage-serialized driver producing ranked hypotheses
//!
//! Supporting modules: `ngram` (language model), `config`, `error`,
//! `output` (ranking formats), `cancel` (cooperative cancellation), and
//! `bridge` (the polling host interface for app mode).
//!
//! # Example
//!
//! ```no_run
//! use keyecho::{CancelToken, Config, FreqMap};
//!
//! let config = Config::default();
//! let samples = keyecho::audio::load_recording("record.kbd").unwrap();
//! let model = FreqMap::load("data/ggwords-6-gram.dat.binary", 6).unwrap();
//!
//! let hypotheses =
//!     keyecho::pipeline::run(&samples, &config, &model, &CancelToken::new()).unwrap();
//! for hypothesis in hypotheses.iter().take(5) {
//!     println!("{}", hypothesis.decoded_marked(&keyecho::cipher::no_hints(0)));
//! }
//! ```

pub mod audio;
pub mod bridge;
pub mod cancel;
pub mod cipher;
pub mod config;
pub mod error;
pub mod ngram;
pub mod output;
pub mod pipeline;
pub mod similarity;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use cipher::{Clusterer, Clustering};
pub use config::{Config, FilterKind};
pub use error::{ConfigError, PipelineError, Result};
pub use ngram::FreqMap;
pub use similarity::{SimilarityEntry, SimilarityMap};
