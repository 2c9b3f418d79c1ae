//! JSON output formatting

use anyhow::{Context, Result};
use gpitch_core::{Transcription, TranscriptionConfig};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
pub struct TranscriptionOutput<'a> {
    pub status: &'static str,
    pub input_file: String,
    pub sample_rate: u32,
    pub start_sample: usize,
    pub processing_time_seconds: f64,
    pub config: &'a TranscriptionConfig,
    pub transcription: &'a Transcription,
}

/// Per-pitch summary: mean activation and source power
pub fn summary(transcription: &Transcription) -> serde_json::Value {
    let pitches: Vec<_> = transcription
        .tracks
        .iter()
        .map(|t| {
            let n = t.activation.len().max(1) as f64;
            let activity = t
                .activation
                .iter()
                .map(|g| gpitch_core::params::logistic(*g))
                .sum::<f64>()
                / n;
            let energy = t.source.iter().map(|s| s * s).sum::<f64>() / n;
            serde_json::json!({
                "pitch": t.pitch,
                "mean_activation": activity,
                "source_power": energy,
            })
        })
        .collect();
    serde_json::json!({
        "num_samples": transcription.x.len(),
        "num_windows": transcription.elbo.len(),
        "pitches": pitches,
    })
}

/// Write to `path`, or pretty-print on stdout when none is given
pub fn write_json<T: Serialize>(value: &T, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            serde_json::to_writer(std::io::BufWriter::new(file), value)?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
