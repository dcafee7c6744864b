//! Pre-filters applied to the float waveform before quantization

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type, Q_BUTTERWORTH_F32};
use tracing::debug;

use crate::config::{FilterConfig, FilterKind};
use crate::error::{PipelineError, Result};

/// The pre-filter variants form a small closed set; `apply` is the single
/// operation over them.
#[derive(Debug, Clone, Copy)]
pub enum PreFilter {
    None,
    /// First-order (one-pole) high-pass
    HighPass1 { cutoff_hz: f32 },
    /// Second-order Butterworth high-pass
    HighPass2 { cutoff_hz: f32 },
}

impl PreFilter {
    pub fn from_config(config: &FilterConfig) -> Self {
        match config.kind {
            FilterKind::None => PreFilter::None,
            FilterKind::HighPass1 => PreFilter::HighPass1 {
                cutoff_hz: config.cutoff_hz,
            },
            FilterKind::HighPass2 => PreFilter::HighPass2 {
                cutoff_hz: config.cutoff_hz,
            },
        }
    }

    /// Filter the waveform in place
    pub fn apply(&self, samples: &mut [f32], sample_rate: u32) -> Result<()> {
        match *self {
            PreFilter::None => Ok(()),
            PreFilter::HighPass1 { cutoff_hz } => {
                debug!("First-order high-pass: {} Hz", cutoff_hz);
                high_pass_one_pole(samples, cutoff_hz, sample_rate);
                Ok(())
            }
            PreFilter::HighPass2 { cutoff_hz } => {
                debug!("Second-order high-pass: {} Hz", cutoff_hz);
                let coeffs = Coefficients::<f32>::from_params(
                    Type::HighPass,
                    sample_rate.hz(),
                    cutoff_hz.hz(),
                    Q_BUTTERWORTH_F32,
                )
                .map_err(|e| {
                    PipelineError::Internal(format!("high-pass filter coefficients: {e:?}"))
                })?;

                let mut filter = DirectForm1::<f32>::new(coeffs);
                for sample in samples.iter_mut() {
                    *sample = filter.run(*sample);
                }
                Ok(())
            }
        }
    }
}

fn high_pass_one_pole(samples: &mut [f32], cutoff_hz: f32, sample_rate: u32) {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / sample_rate as f32;
    let alpha = rc / (rc + dt);

    let mut prev_x = 0.0f32;
    let mut prev_y = 0.0f32;
    for sample in samples.iter_mut() {
        let x = *sample;
        let y = alpha * (prev_y + x - prev_x);
        prev_x = x;
        prev_y = y;
        *sample = y;
    }
}
