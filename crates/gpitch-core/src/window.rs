//! Analysis windows and overlap-add reconstruction
//!
//! Overlapping windows advance by a hop of `(ws - 1) / 2` samples. Merging
//! applies a symmetric Hann taper to every window, forces the outer half of
//! the first and last window to unity, and sums the overlapping halves. For
//! odd `ws` the two Hann halves meeting in an overlap sum to exactly one.
//!
//! Sizes that do not divide evenly are truncated, never rejected.

use crate::params::logistic;
use std::f64::consts::PI;

/// Default zero-padding margin for disjoint segments (100 ms at 16 kHz)
pub const DEFAULT_AUGMENT: usize = 1600;

/// Hop between overlapping windows of size `ws`
pub fn hop(ws: usize) -> usize {
    ws.saturating_sub(1) / 2
}

/// Number of overlapping windows that fit in `n` samples
pub fn num_windows(n: usize, ws: usize) -> usize {
    let l = hop(ws);
    if l == 0 || n < ws {
        return 0;
    }
    (n - ws) / l + 1
}

/// Length of the signal reconstructed from `nw` overlapping windows
pub fn merged_len(nw: usize, ws: usize) -> usize {
    if nw == 0 {
        return 0;
    }
    hop(ws) * (nw - 1) + ws
}

/// Split a signal into overlapping windows of `ws` samples
///
/// Trailing samples that do not fill a whole hop are dropped.
pub fn windowed(x: &[f64], y: &[f64], ws: usize) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
    let n = x.len().min(y.len());
    let l = hop(ws);
    let nw = num_windows(n, ws);

    let used = merged_len(nw, ws);
    if used < n {
        log::warn!(
            "windowing {} samples into {} windows of {}: dropping {} tail samples",
            n,
            nw,
            ws,
            n - used
        );
    }

    let mut xout = Vec::with_capacity(nw);
    let mut yout = Vec::with_capacity(nw);
    for i in 0..nw {
        xout.push(x[i * l..i * l + ws].to_vec());
        yout.push(y[i * l..i * l + ws].to_vec());
    }
    (xout, yout)
}

/// Symmetric Hann window of length `n`
pub fn hann(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => (0..n)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
            .collect(),
    }
}

/// Taper applied to window `i` of `nw` before overlap-add
pub fn taper(i: usize, nw: usize, ws: usize) -> Vec<f64> {
    let l = hop(ws);
    let mut win = hann(ws);
    if i == 0 {
        win[..l].iter_mut().for_each(|w| *w = 1.0);
    }
    if i + 1 == nw {
        win[ws - l..].iter_mut().for_each(|w| *w = 1.0);
    }
    win
}

/// Reconstruct a continuous signal from overlapping windows
pub fn merged_y(y: &[Vec<f64>], ws: usize) -> Vec<f64> {
    let l = hop(ws);
    let nw = y.len();
    let n = merged_len(nw, ws);
    if nw == 0 {
        return Vec::new();
    }

    let tapered: Vec<Vec<f64>> = y
        .iter()
        .enumerate()
        .map(|(i, w)| {
            taper(i, nw, ws)
                .iter()
                .zip(w.iter())
                .map(|(t, v)| t * v)
                .collect()
        })
        .collect();

    let mut yout = vec![0.0; n];
    yout[..l].copy_from_slice(&tapered[0][..l]);
    yout[n - l - 1..].copy_from_slice(&tapered[nw - 1][ws - l - 1..]);

    for i in 0..nw - 1 {
        let left = &tapered[i][ws - l - 1..ws - 1];
        let right = &tapered[i + 1][..l];
        for (j, (a, b)) in left.iter().zip(right).enumerate() {
            yout[(i + 1) * l + j] = a + b;
        }
    }
    yout
}

/// Reconstruct the time axis of overlapping windows
pub fn merged_x(x: &[Vec<f64>], ws: usize) -> Vec<f64> {
    let l = hop(ws);
    let nw = x.len();
    let n = merged_len(nw, ws);
    if nw == 0 {
        return Vec::new();
    }

    let mut xout = vec![0.0; n];
    xout[..l].copy_from_slice(&x[0][..l]);
    xout[n - l - 1..].copy_from_slice(&x[nw - 1][ws - l - 1..]);
    for i in 0..nw - 1 {
        xout[(i + 1) * l..(i + 2) * l].copy_from_slice(&x[i][ws - l - 1..ws - 1]);
    }
    xout
}

/// Merge every per-window series of a batch, e.g. one per pitch
pub fn merge_windows(series: &[Vec<Vec<f64>>], ws: usize) -> Vec<Vec<f64>> {
    series.iter().map(|windows| merged_y(windows, ws)).collect()
}

/// Per-window sources logistic(g) * f
pub fn append_sources(f: &[Vec<f64>], g: &[Vec<f64>]) -> Vec<Vec<f64>> {
    f.iter()
        .zip(g)
        .map(|(fw, gw)| fw.iter().zip(gw).map(|(fv, gv)| logistic(*gv) * fv).collect())
        .collect()
}

/// Join disjoint segments back into one series, dropping `pad` samples of
/// zero-padding at both ends of each
pub fn concat_segments(segments: &[Vec<f64>], pad: usize) -> Vec<f64> {
    let mut out = Vec::new();
    for s in segments {
        if s.len() >= 2 * pad {
            out.extend_from_slice(&s[pad..s.len() - pad]);
        }
    }
    out
}

/// Options for disjoint segmentation
#[derive(Debug, Clone, Copy)]
pub struct SegmentOptions {
    /// Zero-padding added before and after every segment
    pub augment: Option<usize>,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            augment: Some(DEFAULT_AUGMENT),
        }
    }
}

/// Tile a signal into disjoint windows, optionally zero-padded
pub fn segment(
    x: &[f64],
    y: &[f64],
    window_size: usize,
    options: SegmentOptions,
) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
    let n = x.len().min(y.len());
    if window_size == 0 {
        return (Vec::new(), Vec::new());
    }
    let nseg = n / window_size;
    if nseg * window_size < n {
        log::warn!(
            "segmenting {} samples into windows of {}: dropping {} tail samples",
            n,
            window_size,
            n - nseg * window_size
        );
    }

    let mut xs = Vec::with_capacity(nseg);
    let mut ys = Vec::with_capacity(nseg);
    for i in 0..nseg {
        let range = i * window_size..(i + 1) * window_size;
        match options.augment {
            Some(aug) => {
                let (xa, ya) = augment(&x[range.clone()], &y[range], aug);
                xs.push(xa);
                ys.push(ya);
            }
            None => {
                xs.push(x[range.clone()].to_vec());
                ys.push(y[range].to_vec());
            }
        }
    }
    (xs, ys)
}

/// Pad `y` with `size` zeros at both ends, extending `x` at its own spacing
pub fn augment(x: &[f64], y: &[f64], size: usize) -> (Vec<f64>, Vec<f64>) {
    let dt = if x.len() >= 2 {
        (x[x.len() - 1] - x[0]) / (x.len() - 1) as f64
    } else {
        0.0
    };
    let x0 = x.first().copied().unwrap_or(0.0) - size as f64 * dt;
    let total = y.len() + 2 * size;

    let xa = (0..total).map(|i| x0 + i as f64 * dt).collect();
    let mut ya = vec![0.0; total];
    ya[size..size + y.len()].copy_from_slice(y);
    (xa, ya)
}
