//! Keystroke detection
//!
//! Finds the sample offsets of individual key press events: a trailing
//! sliding-max envelope over the rectified waveform is compared against a
//! rolling mean of that envelope, and peak samples that clear the
//! threshold become presses. The trailing envelope doubles as the
//! local-max exclusion window, and a refractory period keeps one
//! keystroke from reporting twice.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::config::SegmenterConfig;
use crate::error::{PipelineError, Result};

/// A detected key press, anchored at a sample offset. Immutable after
/// detection; its index in the collection is its identity downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    /// Sample offset of the press peak
    pub pos: usize,
}

/// Detect key presses in a quantized waveform.
///
/// Returns presses sorted by position, without duplicates. Fails with
/// `NoPresses` when no candidate survives.
pub fn find_key_presses(
    waveform: &[i16],
    config: &SegmenterConfig,
    cancel: &CancelToken,
) -> Result<Vec<KeyPress>> {
    let n = waveform.len();
    if n == 0 {
        return Err(PipelineError::NoPresses);
    }

    let amplitude: Vec<f64> = waveform.iter().map(|&s| (s as f64).abs()).collect();

    let envelope = sliding_max(&amplitude, config.attack_window);

    // prefix sums of the envelope for the rolling background mean
    let mut prefix = vec![0.0f64; n + 1];
    for i in 0..n {
        prefix[i + 1] = prefix[i] + envelope[i];
    }

    let history = config.history_size.max(1);
    let refractory = config.attack_window / 2;
    let mut presses = Vec::new();
    let mut last_accepted: Option<usize> = None;

    for t in 0..n {
        if t % 65536 == 0 {
            cancel.check()?;
        }

        // no background estimate before a full history window
        if t < history {
            continue;
        }

        // t must be the peak sample of the trailing exclusion window
        if amplitude[t] < envelope[t] || amplitude[t] == 0.0 {
            continue;
        }

        // running mean of the envelope over the preceding history window;
        // the trailing envelope only rises at the event itself, so this
        // still reflects the pre-event level
        let background = (prefix[t] - prefix[t - history]) / history as f64;

        if envelope[t] <= config.threshold_clicks * background {
            continue;
        }

        if let Some(last) = last_accepted {
            if t - last < refractory {
                continue;
            }
        }

        last_accepted = Some(t);
        presses.push(KeyPress { pos: t });
    }

    if config.remove_low_power && presses.len() >= 4 {
        presses = remove_low_power(presses, &amplitude);
    }

    if presses.is_empty() {
        return Err(PipelineError::NoPresses);
    }

    info!("Detected {} potential key presses", presses.len());
    Ok(presses)
}

/// Trailing sliding-window maximum via a monotonic deque: `out[t]` is the
/// maximum of `values[t - window + 1 ..= t]`, clamped at the start.
fn sliding_max(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = vec![0.0f64; values.len()];
    let mut deque: VecDeque<usize> = VecDeque::new();

    for (i, &value) in values.iter().enumerate() {
        while let Some(&back) = deque.back() {
            if values[back] <= value {
                deque.pop_back();
            } else {
                break;
            }
        }
        deque.push_back(i);

        while let Some(&front) = deque.front() {
            if front + window <= i {
                deque.pop_front();
            } else {
                break;
            }
        }

        if let Some(&front) = deque.front() {
            out[i] = values[front];
        }
    }

    out
}

/// Drop candidates whose peak amplitude is an outlier at the bottom of the
/// distribution (splits and stray transients, not real keystrokes).
fn remove_low_power(presses: Vec<KeyPress>, amplitude: &[f64]) -> Vec<KeyPress> {
    let mut peaks: Vec<f64> = presses.iter().map(|p| amplitude[p.pos]).collect();
    peaks.sort_by(|a, b| a.total_cmp(b));
    let median = peaks[peaks.len() / 2];
    let cutoff = 0.3 * median;

    let before = presses.len();
    let kept: Vec<KeyPress> = presses
        .into_iter()
        .filter(|p| amplitude[p.pos] >= cutoff)
        .collect();

    if kept.len() < before {
        debug!("Removed {} low-power candidates", before - kept.len());
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Impulse train: a single loud sample every `spacing` samples
    fn impulse_train(n_impulses: usize, spacing: usize, amplitude: i16) -> Vec<i16> {
        let mut waveform = vec![0i16; n_impulses * spacing + spacing];
        for k in 0..n_impulses {
            waveform[spacing / 2 + k * spacing] = amplitude;
        }
        waveform
    }

    #[test]
    fn test_sliding_max() {
        let values = vec![1.0, 3.0, 2.0, 5.0, 4.0];
        let out = sliding_max(&values, 2);
        assert_eq!(out, vec![1.0, 3.0, 3.0, 5.0, 5.0]);

        let wide = sliding_max(&values, 3);
        assert_eq!(wide, vec![1.0, 3.0, 3.0, 5.0, 5.0]);
    }

    #[test]
    fn test_empty_waveform() {
        let config = SegmenterConfig::default();
        let err = find_key_presses(&[], &config, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::NoPresses));
    }

    #[test]
    fn test_silence_has_no_presses() {
        let config = SegmenterConfig::default();
        let waveform = vec![0i16; 32000];
        let err = find_key_presses(&waveform, &config, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::NoPresses));
    }

    #[test]
    fn test_impulses_detected_at_exact_positions() {
        let config = SegmenterConfig::default();
        let spacing = 8000; // 500 ms at 16 kHz
        let waveform = impulse_train(10, spacing, 20000);

        let presses = find_key_presses(&waveform, &config, &CancelToken::new()).unwrap();
        assert_eq!(presses.len(), 10);
        for (k, press) in presses.iter().enumerate() {
            let expected = spacing / 2 + k * spacing;
            let diff = press.pos.abs_diff(expected);
            assert!(diff <= 80, "press {k} at {} expected {expected}", press.pos);
        }
    }

    #[test]
    fn test_refractory_merges_double_strikes() {
        let config = SegmenterConfig::default();
        let mut waveform = vec![0i16; 64000];
        // two spikes closer together than the exclusion window
        waveform[16000] = 20000;
        waveform[16000 + 700] = 18000;
        waveform[48000] = 20000;

        let presses = find_key_presses(&waveform, &config, &CancelToken::new()).unwrap();
        assert_eq!(presses.len(), 2);
    }

    #[test]
    fn test_cancellation() {
        let config = SegmenterConfig::default();
        let waveform = impulse_train(10, 8000, 20000);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = find_key_presses(&waveform, &config, &cancel).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
