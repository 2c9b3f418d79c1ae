//! Kernel parameter initialization from isolated-note audio
//!
//! The spectral-mixture component kernel of each pitch is seeded with the
//! partial frequencies and energies read off the magnitude spectrum of a
//! training note. The frequency landscape of the ELBO is highly multi-modal,
//! so optimization has to start close to the true harmonic structure.

use crate::error::{GpError, Result};
use crate::kernels::Matern12SpectralMixture;
use crate::window::hann;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

/// Partials weaker than this fraction of the strongest one are dropped
pub const PARTIAL_ENERGY_FLOOR: f64 = 1e-3;

/// Magnitude spectrum (bins 0..=n/2) of a Hann-windowed signal
fn magnitude_spectrum(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    let window = hann(n);
    let mut buf: Vec<Complex<f64>> = y
        .iter()
        .zip(&window)
        .map(|(&s, &w)| Complex::new(s * w, 0.0))
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buf);

    buf[..n / 2 + 1].iter().map(|c| c.norm()).collect()
}

/// Parabolic interpolation around bin `k`: (offset in bins, peak height)
fn parabolic_peak(mag: &[f64], k: usize) -> (f64, f64) {
    if k == 0 || k + 1 >= mag.len() {
        return (0.0, mag[k]);
    }
    let (a, b, c) = (mag[k - 1], mag[k], mag[k + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < f64::EPSILON {
        return (0.0, b);
    }
    let p = (0.5 * (a - c) / denom).clamp(-0.5, 0.5);
    (p, b - 0.25 * (a - c) * p)
}

/// Extract up to `maxh` partials near the harmonics of `ideal_f0`
///
/// Returns `(frequencies, energies)` ordered by partial index, energies
/// normalised to sum to one.
pub fn init_cparam(y: &[f64], fs: f64, maxh: usize, ideal_f0: f64) -> Result<(Vec<f64>, Vec<f64>)> {
    if y.len() < 4 {
        return Err(GpError::DataShape(format!(
            "need at least 4 samples to estimate partials, got {}",
            y.len()
        )));
    }
    if maxh == 0 {
        return Err(GpError::InvalidParameter {
            name: "maxh".to_string(),
            value: 0.0,
            reason: "at least one partial must be requested",
        });
    }
    if !(ideal_f0 > 0.0 && ideal_f0 < fs / 2.0) {
        return Err(GpError::InvalidParameter {
            name: "ideal_f0".to_string(),
            value: ideal_f0,
            reason: "must lie between 0 and the Nyquist frequency",
        });
    }

    let n = y.len();
    let mag = magnitude_spectrum(y);
    let bin_hz = fs / n as f64;
    let last_bin = mag.len() - 1;

    let mut partials: Vec<(f64, f64)> = Vec::with_capacity(maxh);
    for h in 1..=maxh {
        let center = h as f64 * ideal_f0;
        if center >= fs / 2.0 {
            break;
        }
        let lo = (((center - ideal_f0 / 2.0) / bin_hz).round().max(1.0)) as usize;
        let hi = (((center + ideal_f0 / 2.0) / bin_hz).round() as usize).min(last_bin);
        if lo > hi {
            continue;
        }
        let k = (lo..=hi)
            .max_by(|&i, &j| mag[i].total_cmp(&mag[j]))
            .unwrap_or(lo);
        let (offset, peak) = parabolic_peak(&mag, k);
        partials.push(((k as f64 + offset) * bin_hz, peak * peak));
    }

    let strongest = partials.iter().map(|p| p.1).fold(0.0, f64::max);
    if strongest <= 0.0 {
        return Err(GpError::DataShape("signal has no spectral energy".to_string()));
    }
    let before = partials.len();
    partials.retain(|p| p.1 >= PARTIAL_ENERGY_FLOOR * strongest);
    if partials.len() < before {
        log::debug!(
            "f0 {:.1} Hz: kept {} of {} partials above the energy floor",
            ideal_f0,
            partials.len(),
            before
        );
    }

    let total: f64 = partials.iter().map(|p| p.1).sum();
    let frequencies = partials.iter().map(|p| p.0).collect();
    let energies = partials.iter().map(|p| p.1 / total).collect();
    Ok((frequencies, energies))
}

/// Equal-tempered frequency of a MIDI note (A4 = 69 = 440 Hz)
pub fn midi_to_hz(midi: u8) -> f64 {
    440.0 * 2f64.powf((midi as f64 - 69.0) / 12.0)
}

/// MIDI note from a MAPS-style file name, e.g. `MAPS_ISOL_NO_F_S0_M60_AkPnBcht.wav`
pub fn midi_from_name(name: &str) -> Option<u8> {
    name.split(|c: char| c == '_' || c == '.')
        .filter_map(|tok| tok.strip_prefix('M'))
        .find_map(|digits| {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                digits.parse::<u8>().ok().filter(|m| *m <= 127)
            } else {
                None
            }
        })
}

/// Ideal fundamental frequency encoded in a training file name
pub fn ideal_f0_from_name(name: &str) -> Option<f64> {
    midi_from_name(name).map(midi_to_hz)
}

/// Fundamental frequency by autocorrelation peak picking in `[fmin, fmax]`
pub fn estimate_f0(y: &[f64], fs: f64, fmin: f64, fmax: f64) -> Option<f64> {
    const MAX_FRAME: usize = 4096;
    let frame = &y[..y.len().min(MAX_FRAME)];
    let lag_min = (fs / fmax).floor().max(1.0) as usize;
    let lag_max = ((fs / fmin).ceil() as usize).min(frame.len().saturating_sub(2));
    if lag_min + 1 >= lag_max {
        return None;
    }

    let acf: Vec<f64> = (0..=lag_max + 1)
        .map(|lag| {
            frame[..frame.len() - lag]
                .iter()
                .zip(&frame[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect();
    if acf[0] <= 0.0 {
        return None;
    }

    let best = (lag_min..=lag_max).max_by(|&i, &j| acf[i].total_cmp(&acf[j]))?;
    if acf[best] <= 0.0 {
        return None;
    }
    let (offset, _) = parabolic_peak(&acf, best);
    Some(fs / (best as f64 + offset))
}

/// Sampled stationary kernel: ifft(|fft(y)|) truncated to `size` lags
///
/// Returns `(lags in seconds, values normalised to a unit maximum)`.
pub fn sampled_kernel(y: &[f64], fs: f64, size: usize) -> (Vec<f64>, Vec<f64>) {
    let n = y.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex<f64>> = y.iter().map(|&s| Complex::new(s, 0.0)).collect();
    forward.process(&mut buf);
    for c in buf.iter_mut() {
        *c = Complex::new(c.norm(), 0.0);
    }
    inverse.process(&mut buf);

    let size = size.min(n);
    let mut values: Vec<f64> = buf[..size].iter().map(|c| c.re / n as f64).collect();
    let peak = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if peak > 0.0 {
        values.iter_mut().for_each(|v| *v /= peak);
    }
    let lags = (0..size).map(|i| i as f64 / fs).collect();
    (lags, values)
}

/// Inducing inputs on a down-sampled grid plus the final time point
pub fn init_inducing(x: &[f64], fs: f64, per_second: f64) -> Vec<f64> {
    let dec = ((fs / per_second).floor() as usize).max(1);
    let mut z: Vec<f64> = x.iter().step_by(dec).copied().collect();
    if let Some(&last) = x.last() {
        if (x.len() - 1) % dec != 0 {
            z.push(last);
        }
    }
    z
}

/// Learnt or initialised component parameters of a single pitch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchKernelParams {
    /// Pitch identifier, derived from the training file name
    pub pitch: String,
    pub lengthscale: f64,
    pub energy: Vec<f64>,
    pub frequency: Vec<f64>,
    /// Lag axis of the sampled kernel (seconds)
    pub kernel_x: Vec<f64>,
    pub kernel_values: Vec<f64>,
}

impl PitchKernelParams {
    /// Initialise from the spectrum of an isolated training note
    pub fn from_training_audio(
        pitch: impl Into<String>,
        y: &[f64],
        fs: f64,
        ideal_f0: f64,
        max_partials: usize,
        lengthscale: f64,
        covsize: usize,
    ) -> Result<Self> {
        let (frequency, energy) = init_cparam(y, fs, max_partials, ideal_f0)?;
        let (kernel_x, kernel_values) = sampled_kernel(y, fs, covsize);
        Ok(Self {
            pitch: pitch.into(),
            lengthscale,
            energy,
            frequency,
            kernel_x,
            kernel_values,
        })
    }

    /// Component kernel seeded with these partials
    pub fn component_kernel(&self, variance: f64) -> Result<Matern12SpectralMixture> {
        Matern12SpectralMixture::new(variance, self.lengthscale, &self.energy, &self.frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn tone(partials: &[(f64, f64)], n: usize, fs: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                partials.iter().map(|&(f, a)| a * (2.0 * PI * f * t).sin()).sum()
            })
            .collect()
    }

    #[test]
    fn test_pure_sinusoid_gives_single_partial() {
        let fs = 16000.0;
        let y = tone(&[(440.0, 0.8)], 16000, fs);
        let (freq, energy) = init_cparam(&y, fs, 10, 440.0).unwrap();
        assert_eq!(freq.len(), 1);
        assert!((freq[0] - 440.0).abs() < 1.0, "estimated {}", freq[0]);
        assert_relative_eq!(energy[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_harmonic_partials_ordered() {
        let fs = 16000.0;
        let y = tone(&[(220.0, 1.0), (440.0, 0.5), (660.0, 0.25)], 16000, fs);
        let (freq, energy) = init_cparam(&y, fs, 6, 220.0).unwrap();
        assert_eq!(freq.len(), 3);
        for (h, f) in freq.iter().enumerate() {
            assert!((f - 220.0 * (h + 1) as f64).abs() < 1.0);
        }
        assert!(energy[0] > energy[1] && energy[1] > energy[2]);
        assert_relative_eq!(energy.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(energy[1] / energy[0], 0.25, epsilon = 1e-3);
    }

    #[test]
    fn test_invalid_f0_rejected() {
        let y = tone(&[(440.0, 1.0)], 1000, 16000.0);
        assert!(init_cparam(&y, 16000.0, 5, 0.0).is_err());
        assert!(init_cparam(&y, 16000.0, 5, 9000.0).is_err());
    }

    #[test]
    fn test_zero_partials_rejected() {
        let y = tone(&[(440.0, 1.0)], 1000, 16000.0);
        assert!(matches!(
            init_cparam(&y, 16000.0, 0, 440.0),
            Err(GpError::InvalidParameter { name, .. }) if name == "maxh"
        ));
    }

    #[test]
    fn test_midi_from_maps_name() {
        assert_eq!(midi_from_name("MAPS_ISOL_NO_F_S0_M60_AkPnBcht.wav"), Some(60));
        assert_eq!(midi_from_name("MAPS_ISOL_NO_F_S1_M69_AkPnBcht"), Some(69));
        assert_eq!(midi_from_name("MAPS_MUS-alb_se3_AkPnBcht.wav"), None);
        assert_relative_eq!(ideal_f0_from_name("x_M69_y.wav").unwrap(), 440.0);
        assert_relative_eq!(midi_to_hz(81), 880.0, epsilon = 1e-9);
    }

    #[test]
    fn test_autocorrelation_f0() {
        let fs = 16000.0;
        let y = tone(&[(440.0, 1.0), (880.0, 0.3)], 8000, fs);
        let f0 = estimate_f0(&y, fs, 60.0, 1000.0).unwrap();
        assert!((f0 - 440.0).abs() < 3.0, "estimated {}", f0);
    }

    #[test]
    fn test_sampled_kernel_is_normalised() {
        let fs = 16000.0;
        let y = tone(&[(440.0, 1.0)], 4000, fs);
        let (lags, values) = sampled_kernel(&y, fs, 441);
        assert_eq!(lags.len(), 441);
        assert_relative_eq!(values[0], 1.0, epsilon = 1e-12);
        assert!(values.iter().all(|v| *v <= 1.0 + 1e-12));
        assert_relative_eq!(lags[16], 1e-3, epsilon = 1e-12);
    }

    #[test]
    fn test_inducing_grid_includes_endpoint() {
        let x: Vec<f64> = (0..101).map(|i| i as f64 / 1000.0).collect();
        let z = init_inducing(&x, 1000.0, 100.0);
        // every 10th point: 0, 10, ..., 100 already ends on the last sample
        assert_eq!(z.len(), 11);
        let z = init_inducing(&x[..95], 1000.0, 100.0);
        assert_eq!(z.len(), 11);
        assert_relative_eq!(*z.last().unwrap(), x[94]);
    }
}
