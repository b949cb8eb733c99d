//! Sample-rate conversion for mixer inputs.
//!
//! The quality path runs rubato's FFT resampler over the whole buffer. If it
//! cannot be built or fails mid-stream, [`resample`] falls back to linear
//! interpolation so the mixing pipeline never stalls.

use rubato::{FftFixedIn, Resampler};
use tracing::warn;

use crate::error::ResampleError;

const CHUNK_FRAMES: usize = 1024;

/// Resampler selection for a mix pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleQuality {
    /// FFT resampler with linear fallback.
    Fft,
    /// Linear interpolation only; used for best-effort deadline mixes.
    Linear,
}

/// Converted samples and whether the fallback was taken.
#[derive(Debug, Clone, PartialEq)]
pub struct Resampled {
    /// Samples at the target rate.
    pub samples: Vec<f32>,
    /// True when the quality path failed and linear interpolation was used.
    pub fell_back: bool,
}

/// Number of output frames a conversion of `len` input frames produces.
pub fn output_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 {
        return 0;
    }
    (len as u64 * u64::from(to_rate)).div_ceil(u64::from(from_rate)) as usize
}

/// Converts `samples` from `from_rate` to `to_rate`. Never fails.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32, quality: ResampleQuality) -> Resampled {
    if from_rate == to_rate {
        return Resampled {
            samples: samples.to_vec(),
            fell_back: false,
        };
    }
    if quality == ResampleQuality::Linear {
        return Resampled {
            samples: resample_linear(samples, from_rate, to_rate),
            fell_back: false,
        };
    }
    match resample_fft(samples, from_rate, to_rate) {
        Ok(samples) => Resampled {
            samples,
            fell_back: false,
        },
        Err(err) => {
            warn!(from_rate, to_rate, error = %err, "quality resampler failed; using linear interpolation");
            Resampled {
                samples: resample_linear(samples, from_rate, to_rate),
                fell_back: true,
            }
        }
    }
}

/// Whole-buffer FFT resampling with the filter delay removed.
pub fn resample_fft(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, ResampleError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(ResampleError::InvalidRate {
            from: from_rate,
            to: to_rate,
        });
    }
    let expected = output_len(samples.len(), from_rate, to_rate);
    if expected == 0 {
        return Ok(Vec::new());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_FRAMES, 2, 1)?;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay + CHUNK_FRAMES);

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let n = resampler.input_frames_next();
        let input: [&[f32]; 1] = [&samples[pos..pos + n]];
        let block = resampler.process(&input[..], None)?;
        out.extend_from_slice(&block[0]);
        pos += n;
    }
    if pos < samples.len() {
        let input: [&[f32]; 1] = [&samples[pos..]];
        let block = resampler.process_partial(Some(&input[..]), None)?;
        out.extend_from_slice(&block[0]);
    }
    // Flush the filter tail until the delayed output covers the input.
    while out.len() < expected + delay {
        let block = resampler.process_partial::<&[f32]>(None, None)?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    out.drain(..delay.min(out.len()));
    out.resize(expected, 0.0);
    Ok(out)
}

/// Linear interpolation between neighbouring input samples.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let new_len = output_len(samples.len(), from_rate, to_rate);
    let last = samples.len() - 1;
    (0..new_len)
        .map(|i| {
            let src = i as f64 / ratio;
            let lo = (src.floor() as usize).min(last);
            let hi = (lo + 1).min(last);
            let frac = (src - lo as f64) as f32;
            samples[lo] * (1.0 - frac) + samples[hi] * frac
        })
        .collect()
}
