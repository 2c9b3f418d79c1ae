use super::svgp::{LatentRef, ModelOptions, ModulatedGp, Prediction};
use super::Source;
use crate::error::Result;
use crate::kernels::Kernel;
use crate::optim::{self, OptimizationTrace};

/// Window-wise predictions of a single-source model
#[derive(Debug, Clone, Default)]
pub struct ModGpWindows {
    pub mean_f: Vec<Vec<f64>>,
    pub var_f: Vec<Vec<f64>>,
    pub mean_g: Vec<Vec<f64>>,
    pub var_g: Vec<Vec<f64>>,
    pub x: Vec<Vec<f64>>,
}

/// Modulated GP with one source: y = logistic(g) * f + noise
///
/// Component and activation share the same inducing inputs at construction.
#[derive(Debug, Clone)]
pub struct ModGp {
    gp: ModulatedGp,
}

impl ModGp {
    pub fn new(
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<f64>,
        kern_com: Box<dyn Kernel>,
        kern_act: Box<dyn Kernel>,
        options: &ModelOptions,
    ) -> Result<Self> {
        let source = Source::new(kern_com, z.clone(), kern_act, z);
        Ok(Self {
            gp: ModulatedGp::new(x, y, vec![source], options)?,
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

    /// One Adam run of `maxiter` stochastic steps
    ///
    /// A single run with the model's minibatch size. Two-pitch models
    /// restart the optimiser between phases (see [`super::LooGp`]), this one
    /// does not.
    pub fn optimize_svi(&mut self, maxiter: usize, learning_rate: f64) -> Result<OptimizationTrace> {
        optim::optimize_svi(&mut self.gp, maxiter, learning_rate)
    }

    /// Full-batch Adam run, restoring the minibatch size afterwards
    pub fn optimize(&mut self, maxiter: usize, learning_rate: f64) -> Result<OptimizationTrace> {
        optim::optimize(&mut self.gp, maxiter, learning_rate)
    }

    pub fn predict_com(&self, x_new: &[f64]) -> Result<Prediction> {
        self.gp.predict(LatentRef::component(0), x_new)
    }

    pub fn predict_act(&self, x_new: &[f64]) -> Result<Prediction> {
        self.gp.predict(LatentRef::activation(0), x_new)
    }

    /// Predict both latents on every window of `xs`
    pub fn predict_all(&self, xs: &[Vec<f64>]) -> Result<ModGpWindows> {
        let mut out = ModGpWindows::default();
        for x in xs {
            let f = self.predict_com(x)?;
            let g = self.predict_act(x)?;
            out.mean_f.push(f.mean);
            out.var_f.push(f.var);
            out.mean_g.push(g.mean);
            out.var_g.push(g.var);
            out.x.push(x.clone());
        }
        Ok(out)
    }

    /// Fix or free the partial energies and frequencies of the component
    pub fn fix_component_spectrum(&mut self, energy: bool, frequency: bool) {
        for source in self.gp.sources_mut() {
            source.component.kernel.set_spectrum_trainable(!energy, !frequency);
        }
    }
}
