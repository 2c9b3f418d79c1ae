//! Transcription configuration
//!
//! Every section has defaults, so a TOML file only needs the values it
//! changes.

use crate::window::DEFAULT_AUGMENT;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub sample_rate: u32,
    pub window: WindowConfig,
    pub inducing: InducingConfig,
    pub optimizer: OptimizerConfig,
    pub model: ModelConfig,
}

/// Analysis windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Samples per window; odd sizes merge exactly
    pub window_size: usize,
    /// Half-overlapping windows merged with a Hann cross-fade, else disjoint segments
    pub overlap: bool,
    /// Zero padding around disjoint segments
    pub augment: Option<usize>,
}

/// Inducing-input densities, points per second
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InducingConfig {
    pub activation_per_second: f64,
    pub component_per_second: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub maxiter: usize,
    pub learning_rate: f64,
    pub minibatch_size: Option<usize>,
    pub log_every: usize,
    /// Random restarts of the activation hyperparameters per window, 0 disables
    pub restarts: usize,
    /// Seed of the restart sampler; drawn from entropy when unset
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub whiten: bool,
    pub jitter: f64,
    pub noise_variance: f64,
    pub quadrature_points: usize,
    pub activation_variance: f64,
    pub activation_lengthscale: f64,
    pub component_variance: f64,
    pub component_lengthscale: f64,
    /// Learn the component envelope lengthscale per window
    pub train_component_lengthscale: bool,
    pub max_partials: usize,
    /// Length of the sampled kernel kept per pitch
    pub covsize: usize,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            window: WindowConfig::default(),
            inducing: InducingConfig::default(),
            optimizer: OptimizerConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: 1601,
            overlap: true,
            augment: Some(DEFAULT_AUGMENT),
        }
    }
}

impl Default for InducingConfig {
    fn default() -> Self {
        Self {
            activation_per_second: 100.0,
            component_per_second: 1600.0,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            maxiter: 100,
            learning_rate: 0.01,
            minibatch_size: None,
            log_every: 10,
            restarts: 0,
            seed: None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            whiten: true,
            jitter: 1e-6,
            noise_variance: 1.0,
            quadrature_points: 20,
            activation_variance: 4.0,
            activation_lengthscale: 0.5,
            component_variance: 1.0,
            component_lengthscale: 0.05,
            train_component_lengthscale: true,
            max_partials: 20,
            covsize: 441,
        }
    }
}

impl TranscriptionConfig {
    /// Load from a TOML file and validate
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: TranscriptionConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse TOML config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn sample_rate_hz(&self) -> f64 {
        f64::from(self.sample_rate)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sample_rate == 0 {
            anyhow::bail!("Sample rate must be > 0");
        }
        if self.window.window_size < 3 {
            anyhow::bail!("window_size must be >= 3");
        }
        if self.window.window_size % 2 == 0 {
            log::warn!(
                "window_size {} is even: merged windows lose one sample per overlap",
                self.window.window_size
            );
        }
        if !(self.inducing.activation_per_second > 0.0) || !(self.inducing.component_per_second > 0.0) {
            anyhow::bail!("inducing densities must be > 0");
        }
        if !(self.optimizer.learning_rate > 0.0) {
            anyhow::bail!("learning_rate must be > 0");
        }
        if self.optimizer.minibatch_size == Some(0) {
            anyhow::bail!("minibatch_size must be > 0");
        }
        if self.model.quadrature_points == 0 {
            anyhow::bail!("quadrature_points must be > 0");
        }
        if !(self.model.jitter >= 0.0) {
            anyhow::bail!("jitter must be >= 0");
        }
        for (name, v) in [
            ("noise_variance", self.model.noise_variance),
            ("activation_variance", self.model.activation_variance),
            ("activation_lengthscale", self.model.activation_lengthscale),
            ("component_variance", self.model.component_variance),
            ("component_lengthscale", self.model.component_lengthscale),
        ] {
            if !(v > 0.0) {
                anyhow::bail!("{} must be > 0, got {}", name, v);
            }
        }
        if self.model.max_partials == 0 {
            anyhow::bail!("max_partials must be > 0");
        }
        Ok(())
    }
}
