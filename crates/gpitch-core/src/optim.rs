//! Stochastic variational inference driver
//!
//! Adam ascends the ELBO over the packed parameter vector of a
//! [`ModulatedGp`]. Restarts re-draw selected kernel hyperparameters
//! uniformly and keep every trial's outcome.

use crate::error::{GpError, Result};
use crate::model::{LatentRef, ModulatedGp};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::Serialize;
use std::time::Instant;

pub const DEFAULT_LOG_EVERY: usize = 10;

/// Adam optimizer in ascent form
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    pub fn new(learning_rate: f64, dim: usize) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: vec![0.0; dim],
            v: vec![0.0; dim],
            t: 0,
        }
    }

    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Move `theta` uphill along `grad`
    pub fn ascend(&mut self, theta: &mut [f64], grad: &[f64]) {
        self.t += 1;
        let c1 = 1.0 - self.beta1.powi(self.t);
        let c2 = 1.0 - self.beta2.powi(self.t);
        for i in 0..theta.len().min(grad.len()) {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grad[i];
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grad[i] * grad[i];
            let m_hat = self.m[i] / c1;
            let v_hat = self.v[i] / c2;
            theta[i] += self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SviOptions {
    pub maxiter: usize,
    pub learning_rate: f64,
    /// Record the objective every this many steps
    pub log_every: usize,
}

impl SviOptions {
    pub fn new(maxiter: usize, learning_rate: f64) -> Self {
        Self {
            maxiter,
            learning_rate,
            log_every: DEFAULT_LOG_EVERY,
        }
    }
}

/// Objective values recorded during one optimisation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationTrace {
    pub iterations: Vec<usize>,
    pub elbo: Vec<f64>,
    /// Seconds since the start of the run
    pub elapsed: Vec<f64>,
    /// Full-data ELBO after the last step
    pub final_elbo: f64,
}

impl OptimizationTrace {
    fn record(&mut self, iteration: usize, elbo: f64, elapsed: f64) {
        self.iterations.push(iteration);
        self.elbo.push(elbo);
        self.elapsed.push(elapsed);
    }
}

/// Minibatch SVI with the model's own minibatch size
pub fn optimize_svi(model: &mut ModulatedGp, maxiter: usize, learning_rate: f64) -> Result<OptimizationTrace> {
    optimize_with(model, &SviOptions::new(maxiter, learning_rate))
}

/// Full-data optimisation: every step sees all observations
pub fn optimize(model: &mut ModulatedGp, maxiter: usize, learning_rate: f64) -> Result<OptimizationTrace> {
    let size = model.data().minibatch_size();
    let n = model.num_data();
    model.data_mut().set_minibatch_size(n)?;
    let trace = optimize_with(model, &SviOptions::new(maxiter, learning_rate));
    model.data_mut().set_minibatch_size(size)?;
    trace
}

pub fn optimize_with(model: &mut ModulatedGp, options: &SviOptions) -> Result<OptimizationTrace> {
    if !(options.learning_rate > 0.0) {
        return Err(GpError::Config(format!(
            "learning rate must be positive, got {}",
            options.learning_rate
        )));
    }
    let log_every = options.log_every.max(1);
    let mut theta = model.pack();
    let mut adam = Adam::new(options.learning_rate, theta.len());

    // with fixed hyperparameters and full batches the projections never change
    let cached = if model.num_trainable_hyperparameters() == 0 && model.data().is_full_batch() {
        Some(model.projections(model.data().x())?)
    } else {
        None
    };

    log::debug!(
        "optimising {} parameters ({} hyperparameters) for {} steps, batch {}/{}",
        theta.len(),
        model.num_trainable_hyperparameters(),
        options.maxiter,
        model.data().minibatch_size(),
        model.num_data()
    );

    let start = Instant::now();
    let mut trace = OptimizationTrace::default();
    for iteration in 1..=options.maxiter {
        let (bx, by) = model.data_mut().next_batch();
        let (elbo, grad) = model.objective_and_gradient(&bx, &by, cached.as_deref())?;
        if !elbo.is_finite() {
            return Err(GpError::NonFinite { what: "ELBO", iteration });
        }
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(GpError::NonFinite { what: "gradient", iteration });
        }

        if iteration % log_every == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            log::debug!("iter {:>6}  elbo {:>14.4}  {:.2}s", iteration, elbo, elapsed);
            trace.record(iteration, elbo, elapsed);
        } else {
            log::trace!("iter {} elbo {}", iteration, elbo);
        }

        adam.ascend(&mut theta, &grad);
        model.unpack(&theta)?;
    }

    trace.final_elbo = model.build_likelihood()?;
    if !trace.final_elbo.is_finite() {
        return Err(GpError::NonFinite {
            what: "ELBO",
            iteration: options.maxiter,
        });
    }
    log::debug!(
        "optimisation finished: elbo {:.4} after {} steps in {:.2}s",
        trace.final_elbo,
        options.maxiter,
        start.elapsed().as_secs_f64()
    );
    Ok(trace)
}

/// A kernel hyperparameter re-drawn from U(low, high) on every restart
#[derive(Debug, Clone, Copy)]
pub struct HyperTarget {
    pub latent: LatentRef,
    /// Index into the kernel's `params()`
    pub param: usize,
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartTrial {
    pub initial: Vec<f64>,
    pub learnt: Vec<f64>,
    pub elbo: f64,
    /// Mean squared error of the predicted signal on the training data
    pub mse: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartReport {
    pub trials: Vec<RestartTrial>,
    /// Per-target mean of the learnt values, applied to the model
    pub mean_learnt: Vec<f64>,
}

impl RestartReport {
    /// Trial with the highest final ELBO
    pub fn best(&self) -> Option<&RestartTrial> {
        self.trials
            .iter()
            .max_by(|a, b| a.elbo.total_cmp(&b.elbo))
    }
}

fn target_value(model: &ModulatedGp, target: &HyperTarget) -> Result<f64> {
    let latent = model.latent(target.latent)?;
    latent
        .kernel
        .params()
        .get(target.param)
        .map(|p| p.value())
        .ok_or_else(|| GpError::Config(format!("kernel {} has no parameter {}", latent.kernel.name(), target.param)))
}

fn set_target_value(model: &mut ModulatedGp, target: &HyperTarget, value: f64) -> Result<()> {
    let latent = model.latent_mut(target.latent)?;
    let name = latent.kernel.name();
    let mut params = latent.kernel.params_mut();
    let p = params
        .get_mut(target.param)
        .ok_or_else(|| GpError::Config(format!("kernel {} has no parameter {}", name, target.param)))?;
    p.set_value(value)
}

/// Optimise from several random hyperparameter initialisations
///
/// Every trial starts from a copy of `model` with reset variational
/// parameters. The model is left with the mean learnt values applied and
/// its variational parameters reset.
pub fn optimize_restart<R: Rng + ?Sized>(
    model: &mut ModulatedGp,
    targets: &[HyperTarget],
    restarts: usize,
    options: &SviOptions,
    rng: &mut R,
) -> Result<RestartReport> {
    let mut dists = Vec::with_capacity(targets.len());
    for t in targets {
        if !(t.low < t.high) {
            return Err(GpError::Config(format!("empty restart range [{}, {})", t.low, t.high)));
        }
        // validate the index before spending any optimisation
        target_value(model, t)?;
        dists.push(Uniform::new(t.low, t.high));
    }

    let mut trials = Vec::with_capacity(restarts);
    for r in 0..restarts {
        let mut trial = model.clone();
        trial.reset_variational();
        let mut initial = Vec::with_capacity(targets.len());
        for (t, dist) in targets.iter().zip(&dists) {
            let value = dist.sample(rng);
            set_target_value(&mut trial, t, value)?;
            initial.push(value);
        }

        let trace = optimize_with(&mut trial, options)?;
        let learnt = targets
            .iter()
            .map(|t| target_value(&trial, t))
            .collect::<Result<Vec<_>>>()?;
        let pred = trial.predict_signal(trial.data().x())?;
        let y = trial.data().y();
        let mse = pred.iter().zip(y).map(|(p, v)| (p - v) * (p - v)).sum::<f64>() / y.len() as f64;

        log::info!(
            "restart {}/{}: elbo {:.4}, mse {:.3e}, initial {:?}, learnt {:?}",
            r + 1,
            restarts,
            trace.final_elbo,
            mse,
            initial,
            learnt
        );
        trials.push(RestartTrial {
            initial,
            learnt,
            elbo: trace.final_elbo,
            mse,
        });
    }

    let mut mean_learnt = vec![0.0; targets.len()];
    if !trials.is_empty() {
        for trial in &trials {
            for (acc, v) in mean_learnt.iter_mut().zip(&trial.learnt) {
                *acc += v;
            }
        }
        for acc in &mut mean_learnt {
            *acc /= trials.len() as f64;
        }
        for (t, &v) in targets.iter().zip(&mean_learnt) {
            set_target_value(model, t, v)?;
        }
        model.reset_variational();
    }

    Ok(RestartReport { trials, mean_learnt })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_adam_climbs_concave_quadratic() {
        // maximise -(x - 3)^2
        let mut theta = vec![0.0];
        let mut adam = Adam::new(0.1, 1);
        for _ in 0..500 {
            let grad = vec![-2.0 * (theta[0] - 3.0)];
            adam.ascend(&mut theta, &grad);
        }
        assert_relative_eq!(theta[0], 3.0, epsilon = 5e-2);
        assert_eq!(adam.steps(), 500);
    }

    #[test]
    fn test_first_adam_step_is_learning_rate() {
        let mut theta = vec![1.0, -1.0];
        let mut adam = Adam::new(0.05, 2);
        adam.ascend(&mut theta, &[10.0, -0.01]);
        assert_relative_eq!(theta[0], 1.05, epsilon = 1e-6);
        assert_relative_eq!(theta[1], -1.05, epsilon = 1e-4);
    }

    #[test]
    fn test_best_trial_by_elbo() {
        let report = RestartReport {
            trials: vec![
                RestartTrial { initial: vec![1.0], learnt: vec![1.5], elbo: -10.0, mse: 0.1 },
                RestartTrial { initial: vec![2.0], learnt: vec![2.5], elbo: -3.0, mse: 0.2 },
            ],
            mean_learnt: vec![2.0],
        };
        assert_relative_eq!(report.best().unwrap().learnt[0], 2.5);
    }
}
