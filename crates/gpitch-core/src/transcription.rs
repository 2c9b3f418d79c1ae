//! Window-by-window source decomposition of a test recording
//!
//! Every analysis window walks through
//! `Uninitialized -> InducingSet -> ModelBuilt -> Optimized -> Predicted`.
//! Only one model is alive at a time; building it for a window sends any
//! other unfinished window back to `InducingSet`.

use crate::config::TranscriptionConfig;
use crate::context::ExecutionContext;
use crate::error::{GpError, Result};
use crate::init::{self, PitchKernelParams};
use crate::kernels::Matern12;
use crate::model::{LatentRef, ModulatedGp, Source};
use crate::optim::{self, HyperTarget, OptimizationTrace, RestartReport, SviOptions};
use crate::window::{self, SegmentOptions};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WindowState {
    Uninitialized,
    InducingSet,
    ModelBuilt,
    Optimized,
    Predicted,
}

/// Inducing inputs of one window, shared by all pitches
#[derive(Debug, Clone)]
struct WindowInducing {
    activation: Vec<f64>,
    component: Vec<f64>,
}

/// Predictions for one pitch in one window
#[derive(Debug, Clone, Serialize)]
pub struct PitchWindow {
    pub pitch: String,
    pub mean_f: Vec<f64>,
    pub var_f: Vec<f64>,
    pub mean_g: Vec<f64>,
    pub var_g: Vec<f64>,
    /// logistic(mean_g) * mean_f
    pub source: Vec<f64>,
    pub component_variance: f64,
    pub activation_variance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowResult {
    pub index: usize,
    pub x: Vec<f64>,
    pub elbo: f64,
    pub trace: OptimizationTrace,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restarts: Option<RestartReport>,
    pub pitches: Vec<PitchWindow>,
}

/// Merged, continuous-time results of one pitch
#[derive(Debug, Clone, Serialize)]
pub struct PitchTrack {
    pub pitch: String,
    pub component: Vec<f64>,
    pub component_var: Vec<f64>,
    pub activation: Vec<f64>,
    pub activation_var: Vec<f64>,
    pub source: Vec<f64>,
    /// Learnt kernel variances, one per window
    pub component_variance: Vec<f64>,
    pub activation_variance: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transcription {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub tracks: Vec<PitchTrack>,
    /// Final ELBO of every window
    pub elbo: Vec<f64>,
}

/// Per-window decomposition of a signal into pitch sources
pub struct Transcriber {
    config: TranscriptionConfig,
    context: ExecutionContext,
    pitches: Vec<PitchKernelParams>,
    xs: Vec<Vec<f64>>,
    ys: Vec<Vec<f64>>,
    states: Vec<WindowState>,
    inducing: Vec<Option<WindowInducing>>,
    model: Option<ModulatedGp>,
    pending: Option<(OptimizationTrace, Option<RestartReport>)>,
    results: Vec<Option<WindowResult>>,
}

impl Transcriber {
    /// Cut the recording into analysis windows
    ///
    /// * `x`, `y` - sample times (seconds) and samples of the test recording
    /// * `pitches` - one learnt component kernel per pitch to look for
    /// * `config` - windowing, inducing density, optimizer and model defaults
    /// * `context` - jitter, quadrature and the rng used by restarts
    ///
    /// With `window.overlap` the windows advance by `(ws - 1) / 2` samples,
    /// otherwise the signal is split into disjoint padded segments. Every
    /// window starts `Uninitialized`.
    pub fn new(
        x: &[f64],
        y: &[f64],
        pitches: Vec<PitchKernelParams>,
        config: TranscriptionConfig,
        context: ExecutionContext,
    ) -> Result<Self> {
        if pitches.is_empty() {
            return Err(GpError::DataShape("no pitch models to transcribe with".to_string()));
        }
        if x.len() != y.len() {
            return Err(GpError::DataShape(format!(
                "x has {} samples but y has {}",
                x.len(),
                y.len()
            )));
        }
        let ws = config.window.window_size;
        let (xs, ys) = if config.window.overlap {
            window::windowed(x, y, ws)
        } else {
            window::segment(x, y, ws, SegmentOptions { augment: config.window.augment })
        };
        if xs.is_empty() {
            return Err(GpError::DataShape(format!(
                "window of {} samples does not fit a signal of {}",
                ws,
                x.len()
            )));
        }

        let nw = xs.len();
        log::info!(
            "transcribing {} samples with {} pitches in {} windows of {}{}",
            x.len(),
            pitches.len(),
            nw,
            ws,
            if config.window.overlap { " (overlapping)" } else { "" }
        );
        Ok(Self {
            config,
            context,
            pitches,
            xs,
            ys,
            states: vec![WindowState::Uninitialized; nw],
            inducing: vec![None; nw],
            model: None,
            pending: None,
            results: vec![None; nw],
        })
    }

    /// Number of analysis windows cut from the recording
    pub fn num_windows(&self) -> usize {
        self.xs.len()
    }

    /// Current state of window `i`, `None` when out of range
    pub fn state(&self, i: usize) -> Option<WindowState> {
        self.states.get(i).copied()
    }

    pub fn pitches(&self) -> &[PitchKernelParams] {
        &self.pitches
    }

    /// The live model, built for the window most recently reset
    pub fn model(&self) -> Option<&ModulatedGp> {
        self.model.as_ref()
    }

    /// Predictions of window `i` once it reached `Predicted`
    pub fn result(&self, i: usize) -> Option<&WindowResult> {
        self.results.get(i).and_then(Option::as_ref)
    }

    fn check_window(&self, i: usize) -> Result<()> {
        if i >= self.xs.len() {
            return Err(GpError::DataShape(format!(
                "window {} out of range ({} windows)",
                i,
                self.xs.len()
            )));
        }
        Ok(())
    }

    fn expect_state(&self, i: usize, expected: WindowState) -> Result<()> {
        self.check_window(i)?;
        let found = self.states[i];
        if found != expected {
            return Err(GpError::WindowState { window: i, found, expected });
        }
        Ok(())
    }

    /// Place inducing inputs on the window's time support
    ///
    /// Activation and component grids follow `inducing.*_per_second` and
    /// always include the last sample. Allowed from any state.
    pub fn init_inducing(&mut self, i: usize) -> Result<()> {
        self.check_window(i)?;
        let fs = self.config.sample_rate_hz();
        let x = &self.xs[i];
        let ind = WindowInducing {
            activation: init::init_inducing(x, fs, self.config.inducing.activation_per_second),
            component: init::init_inducing(x, fs, self.config.inducing.component_per_second),
        };
        log::debug!(
            "window {}: {} activation and {} component inducing inputs",
            i,
            ind.activation.len(),
            ind.component.len()
        );
        self.inducing[i] = Some(ind);
        self.states[i] = WindowState::InducingSet;
        Ok(())
    }

    /// Build the window model with fresh variational parameters
    ///
    /// Requires `InducingSet`. Component kernels come from the pitch library
    /// with the configured variance, activations are Matern-1/2 with the
    /// configured defaults. Any other window left in `ModelBuilt` or
    /// `Optimized` falls back to `InducingSet`.
    pub fn reset_model(&mut self, i: usize) -> Result<()> {
        self.expect_state(i, WindowState::InducingSet)?;
        let ind = self.inducing[i]
            .as_ref()
            .ok_or_else(|| GpError::DataShape(format!("window {} has no inducing inputs", i)))?;
        let mc = &self.config.model;

        let mut sources = Vec::with_capacity(self.pitches.len());
        for pitch in &self.pitches {
            let mut kc = pitch.component_kernel(mc.component_variance)?;
            if !mc.train_component_lengthscale {
                kc.lengthscale.fix();
            }
            let ka = Matern12::new(mc.activation_variance, mc.activation_lengthscale)?;
            sources.push(Source::new(
                Box::new(kc),
                ind.component.clone(),
                Box::new(ka),
                ind.activation.clone(),
            ));
        }

        // windows are small: always optimise on the full window
        let mut options = self.context.model_options(&self.config);
        options.minibatch_size = None;
        self.model = Some(ModulatedGp::new(
            self.xs[i].clone(),
            self.ys[i].clone(),
            sources,
            &options,
        )?);
        self.pending = None;

        for state in self.states.iter_mut() {
            if matches!(state, WindowState::ModelBuilt | WindowState::Optimized) {
                *state = WindowState::InducingSet;
            }
        }
        self.states[i] = WindowState::ModelBuilt;
        Ok(())
    }

    /// Restart targets: activation variance and lengthscale of every pitch
    fn restart_targets(&self) -> Vec<HyperTarget> {
        let mc = &self.config.model;
        (0..self.pitches.len())
            .flat_map(|s| {
                [
                    HyperTarget {
                        latent: LatentRef::activation(s),
                        param: 0,
                        low: 0.5 * mc.activation_variance,
                        high: 2.0 * mc.activation_variance,
                    },
                    HyperTarget {
                        latent: LatentRef::activation(s),
                        param: 1,
                        low: 0.5 * mc.activation_lengthscale,
                        high: 2.0 * mc.activation_lengthscale,
                    },
                ]
            })
            .collect()
    }

    /// Optimise the live model on its window
    ///
    /// Requires `ModelBuilt`. With `optimizer.restarts > 0` the activation
    /// hyperparameters are first re-drawn and averaged over the restarts.
    pub fn optimize_window(&mut self, i: usize) -> Result<()> {
        self.expect_state(i, WindowState::ModelBuilt)?;
        let oc = &self.config.optimizer;
        let options = SviOptions {
            maxiter: oc.maxiter,
            learning_rate: oc.learning_rate,
            log_every: oc.log_every,
        };
        let restarts = oc.restarts;
        let targets = if restarts > 0 { self.restart_targets() } else { Vec::new() };

        let model = self
            .model
            .as_mut()
            .ok_or_else(|| GpError::DataShape("no model built".to_string()))?;
        let report = if restarts > 0 {
            Some(optim::optimize_restart(model, &targets, restarts, &options, self.context.rng())?)
        } else {
            None
        };
        let trace = optim::optimize_with(model, &options)?;
        log::info!(
            "window {}/{}: elbo {:.4}",
            i + 1,
            self.xs.len(),
            trace.final_elbo
        );

        self.pending = Some((trace, report));
        self.states[i] = WindowState::Optimized;
        Ok(())
    }

    /// Predict every pitch's component and activation on the window
    ///
    /// Requires `Optimized`. The source of a pitch is logistic(g) * f.
    pub fn predict_window(&mut self, i: usize) -> Result<()> {
        self.expect_state(i, WindowState::Optimized)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| GpError::DataShape("no model built".to_string()))?;
        let x = &self.xs[i];

        let mut pitches = Vec::with_capacity(self.pitches.len());
        for (s, pitch) in self.pitches.iter().enumerate() {
            let f = model.predict(LatentRef::component(s), x)?;
            let g = model.predict(LatentRef::activation(s), x)?;
            let source = window::append_sources(
                std::slice::from_ref(&f.mean),
                std::slice::from_ref(&g.mean),
            )
            .pop()
            .unwrap_or_default();
            let variance = |at: LatentRef| -> Result<f64> {
                Ok(model.latent(at)?.kernel.params().first().map_or(0.0, |p| p.value()))
            };
            pitches.push(PitchWindow {
                pitch: pitch.pitch.clone(),
                component_variance: variance(LatentRef::component(s))?,
                activation_variance: variance(LatentRef::activation(s))?,
                mean_f: f.mean,
                var_f: f.var,
                mean_g: g.mean,
                var_g: g.var,
                source,
            });
        }

        let (trace, restarts) = self.pending.take().unwrap_or_default();
        self.results[i] = Some(WindowResult {
            index: i,
            x: x.clone(),
            elbo: trace.final_elbo,
            trace,
            restarts,
            pitches,
        });
        self.states[i] = WindowState::Predicted;
        Ok(())
    }

    /// Reset, optimise and predict one window
    ///
    /// Inducing inputs are placed first when missing; a finished window is
    /// processed again from scratch.
    pub fn process_window(&mut self, i: usize) -> Result<()> {
        self.check_window(i)?;
        if self.states[i] == WindowState::Uninitialized {
            self.init_inducing(i)?;
        } else if self.states[i] != WindowState::InducingSet {
            self.states[i] = WindowState::InducingSet;
        }
        self.reset_model(i)?;
        self.optimize_window(i)?;
        self.predict_window(i)
    }

    /// Process every window in order and merge the results
    pub fn run(&mut self) -> Result<Transcription> {
        for i in 0..self.num_windows() {
            self.process_window(i)?;
        }
        self.merge()
    }

    /// Overlap-add or concatenate one per-window series
    fn join(&self, series: &[Vec<f64>]) -> Vec<f64> {
        let ws = self.config.window.window_size;
        if self.config.window.overlap {
            window::merged_y(series, ws)
        } else {
            window::concat_segments(series, self.config.window.augment.unwrap_or(0))
        }
    }

    /// Merge the predicted windows into continuous series
    ///
    /// Fails with `WindowState` unless every window is `Predicted`.
    pub fn merge(&self) -> Result<Transcription> {
        let mut windows = Vec::with_capacity(self.results.len());
        for (i, r) in self.results.iter().enumerate() {
            let r = r.as_ref().ok_or(GpError::WindowState {
                window: i,
                found: self.states[i],
                expected: WindowState::Predicted,
            })?;
            windows.push(r);
        }

        let ws = self.config.window.window_size;
        let x = if self.config.window.overlap {
            window::merged_x(&self.xs, ws)
        } else {
            window::concat_segments(&self.xs, self.config.window.augment.unwrap_or(0))
        };
        let y = self.join(&self.ys);

        let mut tracks = Vec::with_capacity(self.pitches.len());
        for (s, pitch) in self.pitches.iter().enumerate() {
            let gather = |pick: fn(&PitchWindow) -> &Vec<f64>| -> Vec<Vec<f64>> {
                windows.iter().map(|w| pick(&w.pitches[s]).clone()).collect()
            };
            tracks.push(PitchTrack {
                pitch: pitch.pitch.clone(),
                component: self.join(&gather(|p| &p.mean_f)),
                component_var: self.join(&gather(|p| &p.var_f)),
                activation: self.join(&gather(|p| &p.mean_g)),
                activation_var: self.join(&gather(|p| &p.var_g)),
                source: self.join(&gather(|p| &p.source)),
                component_variance: windows.iter().map(|w| w.pitches[s].component_variance).collect(),
                activation_variance: windows.iter().map(|w| w.pitches[s].activation_variance).collect(),
            });
        }

        Ok(Transcription {
            x,
            y,
            tracks,
            elbo: windows.iter().map(|w| w.elbo).collect(),
        })
    }
}
