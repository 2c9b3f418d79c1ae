//! WAV loading

use anyhow::{Context, Result};
use std::path::Path;

/// Mono signal in [-1, 1] with its sample rate
#[derive(Debug, Clone)]
pub struct Audio {
    pub samples: Vec<f64>,
    pub sample_rate: u32,
}

impl Audio {
    pub fn duration_s(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Sample times in seconds, starting at `offset` samples
    pub fn time_axis(&self, offset: usize) -> Vec<f64> {
        let fs = self.sample_rate as f64;
        (0..self.samples.len()).map(|i| (offset + i) as f64 / fs).collect()
    }

    /// Excerpt of `frames` samples starting at `start_s` seconds
    ///
    /// Returns the excerpt and the index of its first sample.
    pub fn excerpt(&self, start_s: f64, frames: Option<usize>) -> Result<(Audio, usize)> {
        if !(start_s >= 0.0) {
            anyhow::bail!("start must be non-negative, got {}", start_s);
        }
        let start = (start_s * self.sample_rate as f64).round() as usize;
        if start >= self.samples.len() {
            anyhow::bail!(
                "start {:.3}s is past the end of a {:.3}s signal",
                start_s,
                self.duration_s()
            );
        }
        let end = match frames {
            Some(n) => (start + n).min(self.samples.len()),
            None => self.samples.len(),
        };
        if let Some(n) = frames {
            if end - start < n {
                log::warn!("requested {} frames, only {} available", n, end - start);
            }
        }
        Ok((
            Audio {
                samples: self.samples[start..end].to_vec(),
                sample_rate: self.sample_rate,
            },
            start,
        ))
    }
}

/// Decode a WAV file, averaging channels down to mono
pub fn read_wav(path: &Path) -> Result<Audio> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f64>() / channels as f64)
            .collect()
    };
    log::debug!(
        "{}: {} samples @ {}Hz, {} channel(s)",
        path.display(),
        samples.len(),
        spec.sample_rate,
        channels
    );

    Ok(Audio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, frames: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in frames {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_reads_stereo_as_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, &[16384, 0, -16384, -16384]);

        let audio = read_wav(&path).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn test_excerpt() {
        let audio = Audio {
            samples: (0..100).map(|i| i as f64).collect(),
            sample_rate: 10,
        };
        let (ex, start) = audio.excerpt(2.0, Some(30)).unwrap();
        assert_eq!(start, 20);
        assert_eq!(ex.samples.len(), 30);
        assert_eq!(ex.samples[0], 20.0);
        assert_eq!(ex.time_axis(start)[0], 2.0);

        let (tail, _) = audio.excerpt(9.5, Some(30)).unwrap();
        assert_eq!(tail.samples.len(), 5);
        assert!(audio.excerpt(10.0, None).is_err());
        assert!(audio.excerpt(-1.0, None).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(read_wav(Path::new("/nonexistent/none.wav")).is_err());
    }
}
