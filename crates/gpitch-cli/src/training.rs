//! Learning per-pitch kernel parameters from isolated notes

use crate::audio::read_wav;
use anyhow::{Context, Result};
use gpitch_core::init::{estimate_f0, ideal_f0_from_name};
use gpitch_core::{PitchKernelParams, TranscriptionConfig};
use gpitch_store::{pitch_id_from_path, CovarianceSample, CovarianceStore, KernelParamStore};
use std::path::{Path, PathBuf};

/// Piano range searched when the file name carries no MIDI number
const F0_SEARCH_HZ: (f64, f64) = (27.5, 4186.0);

/// WAV files of a training directory, sorted by name
pub fn training_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list training directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if is_wav {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        anyhow::bail!("No WAV files in {}", dir.display());
    }
    Ok(files)
}

/// Initialise the component kernel of one pitch from its isolated note
pub fn train_pitch(path: &Path, config: &TranscriptionConfig) -> Result<PitchKernelParams> {
    let pitch = pitch_id_from_path(path)
        .with_context(|| format!("Cannot derive a pitch name from {}", path.display()))?;
    let audio = read_wav(path)?;
    if audio.sample_rate != config.sample_rate {
        anyhow::bail!(
            "{} is sampled at {}Hz, expected {}Hz",
            path.display(),
            audio.sample_rate,
            config.sample_rate
        );
    }
    let fs = audio.sample_rate as f64;

    let f0 = match ideal_f0_from_name(&pitch) {
        Some(f0) => f0,
        None => {
            let f0 = estimate_f0(&audio.samples, fs, F0_SEARCH_HZ.0, F0_SEARCH_HZ.1)
                .with_context(|| format!("No fundamental found in {}", path.display()))?;
            log::warn!("{}: no MIDI number in name, estimated f0 {:.2}Hz", pitch, f0);
            f0
        }
    };

    let params = PitchKernelParams::from_training_audio(
        pitch.as_str(),
        &audio.samples,
        fs,
        f0,
        config.model.max_partials,
        config.model.component_lengthscale,
        config.model.covsize,
    )
    .with_context(|| format!("Failed to initialise kernel of {}", pitch))?;
    log::info!(
        "{}: f0 {:.2}Hz, {} partials",
        pitch,
        f0,
        params.frequency.len()
    );
    Ok(params)
}

pub fn train_dir(dir: &Path, config: &TranscriptionConfig) -> Result<Vec<PitchKernelParams>> {
    training_files(dir)?
        .iter()
        .map(|path| train_pitch(path, config))
        .collect()
}

/// Persist learnt parameters and their sampled covariances
pub fn save_all(dir: &Path, params: &[PitchKernelParams]) -> Result<()> {
    let kernels = KernelParamStore::new(dir)?;
    let covariances = CovarianceStore::new(dir)?;
    for p in params {
        kernels.save(p)?;
        covariances.save(&CovarianceSample::toeplitz(p.pitch.as_str(), &p.kernel_values))?;
    }
    Ok(())
}

/// Keep only the pitches whose identifier contains one of `filters`
pub fn select_pitches(params: Vec<PitchKernelParams>, filters: &[String]) -> Result<Vec<PitchKernelParams>> {
    if filters.is_empty() {
        return Ok(params);
    }
    let selected: Vec<_> = params
        .into_iter()
        .filter(|p| filters.iter().any(|f| p.pitch.contains(f.as_str())))
        .collect();
    if selected.is_empty() {
        anyhow::bail!("No trained pitch matches {:?}", filters);
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn write_note(path: &Path, f0: f64, fs: u32, n: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: fs,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..n {
            let t = i as f64 / fs as f64;
            let s = 0.5 * (2.0 * PI * f0 * t).sin() + 0.2 * (2.0 * PI * 2.0 * f0 * t).sin();
            writer.write_sample((s * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_train_and_save_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_note(&dir.path().join("MAPS_ISOL_NO_F_S0_M69_AkPnBcht.wav"), 440.0, 16000, 8000);
        std::fs::write(dir.path().join("README.txt"), "not audio").unwrap();

        let config = TranscriptionConfig::default();
        let params = train_dir(dir.path(), &config).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].pitch, "MAPS_ISOL_NO_F_S0_M69_AkPnBcht");
        assert!((params[0].frequency[0] - 440.0).abs() < 2.0);

        let out = dir.path().join("params");
        save_all(&out, &params).unwrap();
        let store = KernelParamStore::new(&out).unwrap();
        assert_eq!(store.list().unwrap(), vec![params[0].pitch.clone()]);
        let cov = CovarianceStore::new(&out).unwrap().load(&params[0].pitch).unwrap();
        assert_eq!(cov.rows, params[0].kernel_values.len());
    }

    #[test]
    fn test_rejects_sample_rate_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MAPS_ISOL_NO_F_S0_M69_AkPnBcht.wav");
        write_note(&path, 440.0, 8000, 4000);
        assert!(train_pitch(&path, &TranscriptionConfig::default()).is_err());
    }

    #[test]
    fn test_select_pitches() {
        let p = |name: &str| PitchKernelParams {
            pitch: name.to_string(),
            lengthscale: 0.05,
            energy: vec![1.0],
            frequency: vec![440.0],
            kernel_x: vec![0.0],
            kernel_values: vec![1.0],
        };
        let all = vec![p("S0_M60_A"), p("S0_M64_A"), p("S0_M67_A")];
        let chosen = select_pitches(all.clone(), &["M64".to_string(), "M67".to_string()]).unwrap();
        assert_eq!(chosen.len(), 2);
        assert_eq!(select_pitches(all.clone(), &[]).unwrap().len(), 3);
        assert!(select_pitches(all, &["M99".to_string()]).is_err());
    }
}
