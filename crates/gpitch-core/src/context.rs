//! Numerics settings and randomness shared by one transcription run

use crate::config::TranscriptionConfig;
use crate::model::ModelOptions;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;

/// Owns the restart sampler and the numerical settings of a run
///
/// Created once per run and handed to the orchestrator; logs its lifetime.
#[derive(Debug)]
pub struct ExecutionContext {
    jitter: f64,
    quadrature_points: usize,
    seed: Option<u64>,
    rng: StdRng,
    started: Instant,
}

impl ExecutionContext {
    pub fn new(jitter: f64, quadrature_points: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        log::info!(
            "execution context: jitter {:e}, {} quadrature points, seed {}",
            jitter,
            quadrature_points,
            seed.map_or_else(|| "entropy".to_string(), |s| s.to_string())
        );
        Self {
            jitter,
            quadrature_points,
            seed,
            rng,
            started: Instant::now(),
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self::new(config.model.jitter, config.model.quadrature_points, config.optimizer.seed)
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn quadrature_points(&self) -> usize {
        self.quadrature_points
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Model options carrying this context's numerics
    pub fn model_options(&self, config: &TranscriptionConfig) -> ModelOptions {
        ModelOptions {
            whiten: config.model.whiten,
            minibatch_size: config.optimizer.minibatch_size,
            jitter: self.jitter,
            noise_variance: config.model.noise_variance,
            quadrature_points: self.quadrature_points,
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        log::info!(
            "execution context closed after {:.2}s",
            self.started.elapsed().as_secs_f64()
        );
    }
}
