use super::svgp::{LatentRef, ModelOptions, ModulatedGp, Prediction};
use super::Source;
use crate::error::Result;
use crate::kernels::Kernel;
use crate::optim::{self, OptimizationTrace};

/// Per-source predictions of a two-source model, indexed by source
#[derive(Debug, Clone, Default)]
pub struct LooPrediction {
    pub mean_f: Vec<Vec<f64>>,
    pub var_f: Vec<Vec<f64>>,
    pub mean_g: Vec<Vec<f64>>,
    pub var_g: Vec<Vec<f64>>,
}

/// Leave-one-out model: the pitch of interest against everything else
///
/// Source 0 is the isolated pitch, source 1 the rest. All four latents share
/// the same inducing inputs at construction.
#[derive(Debug, Clone)]
pub struct LooGp {
    gp: ModulatedGp,
}

impl LooGp {
    pub fn new(
        x: Vec<f64>,
        y: Vec<f64>,
        kf: [Box<dyn Kernel>; 2],
        kg: [Box<dyn Kernel>; 2],
        z: Vec<f64>,
        options: &ModelOptions,
    ) -> Result<Self> {
        let [kf1, kf2] = kf;
        let [kg1, kg2] = kg;
        let sources = vec![
            Source::new(kf1, z.clone(), kg1, z.clone()),
            Source::new(kf2, z.clone(), kg2, z),
        ];
        Ok(Self {
            gp: ModulatedGp::new(x, y, sources, options)?,
        })
    }

    pub fn gp(&self) -> &ModulatedGp {
        &self.gp
    }

    pub fn gp_mut(&mut self) -> &mut ModulatedGp {
        &mut self.gp
    }

    pub fn build_prior_kl(&self) -> Result<f64> {
        self.gp.build_prior_kl()
    }

    pub fn elbo(&self) -> Result<f64> {
        self.gp.build_likelihood()
    }

    /// Two consecutive Adam runs of `maxiter` steps each
    ///
    /// The second run starts with fresh moment estimates; the returned trace
    /// covers both, numbered continuously.
    pub fn optimize_svi(&mut self, maxiter: usize, learning_rate: f64) -> Result<OptimizationTrace> {
        let mut trace = optim::optimize_svi(&mut self.gp, maxiter, learning_rate)?;
        let second = optim::optimize_svi(&mut self.gp, maxiter, learning_rate)?;
        trace
            .iterations
            .extend(second.iterations.iter().map(|i| i + maxiter));
        trace.elbo.extend(second.elbo);
        let offset = trace.elapsed.last().copied().unwrap_or(0.0);
        trace.elapsed.extend(second.elapsed.iter().map(|t| t + offset));
        trace.final_elbo = second.final_elbo;
        Ok(trace)
    }

    pub fn predict_f(&self, source: usize, x_new: &[f64]) -> Result<Prediction> {
        self.gp.predict(LatentRef::component(source), x_new)
    }

    pub fn predict_g(&self, source: usize, x_new: &[f64]) -> Result<Prediction> {
        self.gp.predict(LatentRef::activation(source), x_new)
    }

    pub fn predict_all(&self, x_new: &[f64]) -> Result<LooPrediction> {
        let mut out = LooPrediction::default();
        for s in 0..self.gp.num_sources() {
            let f = self.predict_f(s, x_new)?;
            let g = self.predict_g(s, x_new)?;
            out.mean_f.push(f.mean);
            out.var_f.push(f.var);
            out.mean_g.push(g.mean);
            out.var_g.push(g.var);
        }
        Ok(out)
    }
}
