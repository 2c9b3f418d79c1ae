//! gptranscribe - Decompose a piano recording into per-pitch sources
//!
//! Usage: gptranscribe <test_wav> (--train <dir> | --params-dir <dir>) [options]

#[path = "../audio.rs"]
mod audio;
#[path = "../output.rs"]
mod output;
#[path = "../training.rs"]
mod training;

use anyhow::{Context, Result};
use clap::Parser;
use gpitch_core::{ExecutionContext, Transcriber, TranscriptionConfig};
use gpitch_store::KernelParamStore;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gptranscribe")]
#[command(about = "Gaussian-process source separation of pitched audio", long_about = None)]
struct Args {
    /// Recording to transcribe
    test_wav: PathBuf,

    /// Directory of isolated training notes, one WAV per pitch
    #[arg(long)]
    train: Option<PathBuf>,

    /// Learnt parameter directory: written after training, read otherwise
    #[arg(long)]
    params_dir: Option<PathBuf>,

    /// Restrict to pitches whose name contains one of these (comma separated)
    #[arg(long, value_delimiter = ',')]
    pitches: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Offset into the recording, in seconds
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// Number of samples to transcribe
    #[arg(long)]
    frames: Option<usize>,

    /// Output JSON file (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print a summary instead of the full per-sample result
    #[arg(long)]
    summary: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    // Default: no logs (clean JSON output for parsing)
    // Verbose: show Info level logs for debugging
    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    run(&args)
}

fn load_config(path: Option<&Path>) -> Result<TranscriptionConfig> {
    match path {
        Some(path) => TranscriptionConfig::from_toml_file(path),
        None => {
            let config = TranscriptionConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    let params = match (&args.train, &args.params_dir) {
        (Some(train_dir), params_dir) => {
            let params = training::train_dir(train_dir, &config)?;
            if let Some(dir) = params_dir {
                training::save_all(dir, &params)?;
            }
            params
        }
        (None, Some(dir)) => {
            let store = KernelParamStore::new(dir)?;
            let ids = store.list()?;
            if ids.is_empty() {
                anyhow::bail!("No learnt parameters in {}", dir.display());
            }
            store.load_all(&ids)?
        }
        (None, None) => anyhow::bail!("Either --train or --params-dir is required"),
    };
    let params = training::select_pitches(params, &args.pitches)?;

    let recording = audio::read_wav(&args.test_wav)?;
    if recording.sample_rate != config.sample_rate {
        anyhow::bail!(
            "{} is sampled at {}Hz, expected {}Hz",
            args.test_wav.display(),
            recording.sample_rate,
            config.sample_rate
        );
    }
    let (excerpt, start_sample) = recording.excerpt(args.start, args.frames)?;
    let x = excerpt.time_axis(start_sample);
    log::info!(
        "Transcribing {:.2}s of {} with {} pitches",
        excerpt.duration_s(),
        args.test_wav.display(),
        params.len()
    );

    let started = std::time::Instant::now();
    let context = ExecutionContext::from_config(&config);
    let mut transcriber = Transcriber::new(&x, &excerpt.samples, params, config.clone(), context)
        .context("Failed to set up transcription")?;
    let transcription = transcriber.run()?;
    let elapsed = started.elapsed();
    log::info!("Finished in {:.2}s", elapsed.as_secs_f64());

    if args.summary {
        return output::write_json(&output::summary(&transcription), args.output.as_deref());
    }
    let result = output::TranscriptionOutput {
        status: "success",
        input_file: args.test_wav.display().to_string(),
        sample_rate: excerpt.sample_rate,
        start_sample,
        processing_time_seconds: elapsed.as_secs_f64(),
        config: &config,
        transcription: &transcription,
    };
    output::write_json(&result, args.output.as_deref())
}
