//! Host bridge for app mode
//!
//! Wraps the pipeline for an event-loop host: the host polls `tick` and
//! `get_data`, pushes captured audio with `feed`, and steers recording
//! with string commands. Long-running work (model loading, decoding) runs
//! on background workers so the host loop stays responsive; communication
//! is a single status string plus a completion flag.
//!
//! Status tokens: `loading`, `loaded`, `recording <haveKeys> <cpm>`,
//! `decoding`, `done`, `error <message>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::audio::{find_key_presses, quantize, PreFilter, SAMPLE_RATE};
use crate::cancel::CancelToken;
use crate::cipher::Clustering;
use crate::config::Config;
use crate::error::PipelineError;
use crate::ngram::{FreqMap, NGRAM_FILE};
use crate::pipeline;

/// Wall-clock cap on a recording session
const RECORDING_LIMIT_SECS: f32 = 2.0 * 60.0;

const DEFAULT_KEYS_TO_CAPTURE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgeState {
    Loading,
    Idle,
    Recording,
    Decoding,
}

struct Shared {
    status: Mutex<String>,
    work_done: AtomicBool,
    model: Mutex<Option<Arc<FreqMap>>>,
    results: Mutex<Vec<Clustering>>,
}

/// The bridge owned by the host loop
pub struct HostBridge {
    config: Config,
    state: BridgeState,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    cancel: CancelToken,

    samples: Vec<f32>,
    keys_to_capture: usize,
    keys_have: usize,
    recording_started: Option<Instant>,
}

impl HostBridge {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: BridgeState::Loading,
            shared: Arc::new(Shared {
                status: Mutex::new(String::new()),
                work_done: AtomicBool::new(false),
                model: Mutex::new(None),
                results: Mutex::new(Vec::new()),
            }),
            worker: None,
            cancel: CancelToken::new(),
            samples: Vec::new(),
            keys_to_capture: DEFAULT_KEYS_TO_CAPTURE,
            keys_have: 0,
            recording_started: None,
        }
    }

    /// Start loading the n-gram model from `ngram_dir` on a worker
    pub fn init(&mut self, ngram_dir: &std::path::Path) {
        let path = ngram_dir.join(NGRAM_FILE);
        let order = self.config.decode.ngram_order;
        let shared = Arc::clone(&self.shared);

        self.set_status("loading");
        self.state = BridgeState::Loading;
        self.shared.work_done.store(false, Ordering::SeqCst);
        self.worker = Some(std::thread::spawn(move || {
            match FreqMap::load(&path, order) {
                Ok(model) => {
                    *shared.model.lock() = Some(Arc::new(model));
                }
                Err(e) => {
                    warn!("Failed to load n-grams: {e}");
                    *shared.status.lock() = format!("error {e}");
                }
            }
            shared.work_done.store(true, Ordering::SeqCst);
        }));
    }

    /// Handle a command from the host: `start [nKeys]` or `stop`
    pub fn set_data(&mut self, data: &str) {
        let mut parts = data.split_whitespace();
        match parts.next() {
            Some("start") => {
                if self.state == BridgeState::Idle {
                    if let Some(n) = parts.next().and_then(|s| s.parse().ok()) {
                        self.keys_to_capture = n;
                    }
                    info!("Starting recording, capturing {} keys", self.keys_to_capture);
                    self.samples.clear();
                    self.keys_have = 0;
                    self.cancel = CancelToken::new();
                    self.recording_started = Some(Instant::now());
                    self.state = BridgeState::Recording;
                }
            }
            Some("stop") => {
                self.cancel.cancel();
                if self.state == BridgeState::Recording {
                    self.state = BridgeState::Idle;
                }
            }
            Some(cmd) => warn!("Unknown command: {cmd}"),
            None => {}
        }
    }

    /// Take the current status token, clearing it
    pub fn get_data(&mut self) -> String {
        std::mem::take(&mut *self.shared.status.lock())
    }

    /// Append host-captured audio (mono f32 at 16 kHz). Ignored outside the
    /// recording state.
    pub fn feed(&mut self, samples: &[f32]) {
        if self.state == BridgeState::Recording {
            self.samples.extend_from_slice(samples);
        }
    }

    /// Decoded hypotheses of the last completed run, best first
    pub fn take_results(&mut self) -> Vec<Clustering> {
        std::mem::take(&mut *self.shared.results.lock())
    }

    /// Drive the state machine one step. Never blocks on a stage.
    pub fn tick(&mut self) {
        match self.state {
            BridgeState::Loading => {
                if self.shared.work_done.load(Ordering::SeqCst) {
                    self.join_worker();
                    self.state = BridgeState::Idle;
                    if self.shared.model.lock().is_some() {
                        self.set_status("loaded");
                    }
                }
            }
            BridgeState::Idle => {}
            BridgeState::Recording => self.tick_recording(),
            BridgeState::Decoding => {
                if self.shared.work_done.load(Ordering::SeqCst) {
                    self.join_worker();
                    self.state = BridgeState::Idle;
                }
            }
        }
    }

    fn tick_recording(&mut self) {
        let elapsed = self
            .recording_started
            .map(|t| t.elapsed().as_secs_f32())
            .unwrap_or(0.0);

        // count presses over what has been captured so far
        let detected = self.count_presses();
        if detected > self.keys_have {
            self.keys_have = detected;
            let cpm = if elapsed > 0.0 {
                60.0 * self.keys_have as f32 / elapsed
            } else {
                0.0
            };
            self.set_status(&format!("recording {} {:.2}", self.keys_have, cpm));
        }

        if elapsed > RECORDING_LIMIT_SECS {
            warn!("Recording limit reached");
        }

        if self.keys_have >= self.keys_to_capture || elapsed > RECORDING_LIMIT_SECS {
            self.start_decoding();
        }
    }

    fn count_presses(&self) -> usize {
        let mut samples = self.samples.clone();
        if samples.is_empty() {
            return 0;
        }
        if PreFilter::from_config(&self.config.filter)
            .apply(&mut samples, SAMPLE_RATE)
            .is_err()
        {
            return 0;
        }
        let waveform = quantize(&samples);
        match find_key_presses(&waveform, &self.config.segmenter, &self.cancel) {
            Ok(presses) => presses.len(),
            Err(_) => 0,
        }
    }

    fn start_decoding(&mut self) {
        let model = match self.shared.model.lock().clone() {
            Some(model) => model,
            None => {
                self.set_status("error model not loaded");
                self.state = BridgeState::Idle;
                return;
            }
        };

        self.set_status("decoding");
        self.state = BridgeState::Decoding;
        self.shared.work_done.store(false, Ordering::SeqCst);

        let samples = std::mem::take(&mut self.samples);
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let shared = Arc::clone(&self.shared);

        self.worker = Some(std::thread::spawn(move || {
            match pipeline::run(&samples, &config, &model, &cancel) {
                Ok(hypotheses) => {
                    *shared.results.lock() = hypotheses;
                    *shared.status.lock() = "done".to_string();
                }
                Err(PipelineError::Cancelled) => {
                    *shared.status.lock() = "error cancelled".to_string();
                }
                Err(e) => {
                    warn!("Decoding failed: {e}");
                    *shared.status.lock() = format!("error {e}");
                }
            }
            shared.work_done.store(true, Ordering::SeqCst);
        }));
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn set_status(&self, status: &str) {
        *self.shared.status.lock() = status.to_string();
    }
}

impl Drop for HostBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.join_worker();
    }
}
