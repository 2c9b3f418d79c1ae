//! Shared sparse variational machinery for modulated GP models

use super::{Latent, LatentKind, Source};
use crate::error::{GpError, Result};
use crate::likelihood::{ModulatedLikelihood, SourceMarginals};
use crate::params::Parameter;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Diagonal jitter added to every Kzz before factorisation
pub const DEFAULT_JITTER: f64 = 1e-6;

/// Seed of the minibatch sampler
const MINIBATCH_SEED: u64 = 0;

/// Relative step of the central differences used for hyperparameters
const HYPER_FD_STEP: f64 = 1e-5;

/// Construction options shared by all modulated models
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub whiten: bool,
    /// `None` trains on the full data every step
    pub minibatch_size: Option<usize>,
    pub jitter: f64,
    pub noise_variance: f64,
    pub quadrature_points: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            whiten: true,
            minibatch_size: None,
            jitter: DEFAULT_JITTER,
            noise_variance: 1e-3,
            quadrature_points: 20,
        }
    }
}

/// Observed data with a seeded minibatch sampler
#[derive(Debug, Clone)]
pub struct MinibatchData {
    x: Vec<f64>,
    y: Vec<f64>,
    minibatch_size: usize,
    rng: StdRng,
}

impl MinibatchData {
    /// Wrap observations, sampling batches from a `StdRng` seeded with 0
    ///
    /// `minibatch_size` of `None` (or larger than the data) means full batches.
    pub fn new(x: Vec<f64>, y: Vec<f64>, minibatch_size: Option<usize>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(GpError::DataShape(format!(
                "x has {} samples but y has {}",
                x.len(),
                y.len()
            )));
        }
        if x.is_empty() {
            return Err(GpError::DataShape("no observations".to_string()));
        }
        let mut data = Self {
            minibatch_size: x.len(),
            x,
            y,
            rng: StdRng::seed_from_u64(MINIBATCH_SEED),
        };
        if let Some(size) = minibatch_size {
            data.set_minibatch_size(size)?;
        }
        Ok(data)
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn minibatch_size(&self) -> usize {
        self.minibatch_size
    }

    pub fn is_full_batch(&self) -> bool {
        self.minibatch_size == self.x.len()
    }

    /// Change the batch size; it must lie in `1..=len()`
    pub fn set_minibatch_size(&mut self, size: usize) -> Result<()> {
        if size == 0 || size > self.x.len() {
            return Err(GpError::DataShape(format!(
                "minibatch size {} outside 1..={}",
                size,
                self.x.len()
            )));
        }
        self.minibatch_size = size;
        Ok(())
    }

    /// Draw the next minibatch, without replacement, in time order
    pub fn next_batch(&mut self) -> (Vec<f64>, Vec<f64>) {
        if self.is_full_batch() {
            return (self.x.clone(), self.y.clone());
        }
        let mut idx = index::sample(&mut self.rng, self.x.len(), self.minibatch_size).into_vec();
        idx.sort_unstable();
        let bx = idx.iter().map(|&i| self.x[i]).collect();
        let by = idx.iter().map(|&i| self.y[i]).collect();
        (bx, by)
    }
}

/// Address of one latent function in a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatentRef {
    pub source: usize,
    pub kind: LatentKind,
}

impl LatentRef {
    pub fn component(source: usize) -> Self {
        Self { source, kind: LatentKind::Component }
    }

    pub fn activation(source: usize) -> Self {
        Self { source, kind: LatentKind::Activation }
    }
}

/// Posterior marginals of a latent function
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub mean: Vec<f64>,
    pub var: Vec<f64>,
}

/// Kzz factor and the projections of one latent onto a set of inputs
#[derive(Debug, Clone)]
pub(crate) struct Projection {
    /// L^-1 Kzx
    a: DMatrix<f64>,
    /// Maps q_mu to the marginal mean: `a` when whitened, L^-T a otherwise
    b: DMatrix<f64>,
    kdiag: DVector<f64>,
    chol: Cholesky<f64, Dyn>,
}

fn project(latent: &Latent, x: &[f64], jitter: f64, whiten: bool) -> Result<Projection> {
    let m = latent.num_inducing();
    let kzz = latent.kernel.k_symm(&latent.z) + DMatrix::identity(m, m) * jitter;
    let not_pd = || GpError::NotPositiveDefinite {
        what: "Kzz",
        size: m,
        jitter,
    };
    let chol = Cholesky::new(kzz).ok_or_else(not_pd)?;
    let l = chol.l();
    let kzx = latent.kernel.k(&latent.z, x);
    let a = l.solve_lower_triangular(&kzx).ok_or_else(not_pd)?;
    let b = if whiten {
        a.clone()
    } else {
        l.tr_solve_lower_triangular(&a).ok_or_else(not_pd)?
    };
    Ok(Projection {
        a,
        b,
        kdiag: latent.kernel.k_diag(x),
        chol,
    })
}

/// Marginal mean, variance and the factor C = q_sqrt^T B
fn marginals(latent: &Latent, proj: &Projection) -> (DVector<f64>, DVector<f64>, DMatrix<f64>) {
    let mean = proj.b.tr_mul(&latent.q_mu);
    let c = latent.q_sqrt.tr_mul(&proj.b);
    let var = DVector::from_fn(proj.kdiag.len(), |i, _| {
        proj.kdiag[i] - proj.a.column(i).norm_squared() + c.column(i).norm_squared()
    });
    (mean, var, c)
}

/// KL[q(u) || p(u)] with its gradient in (q_mu, q_sqrt)
fn gauss_kl(
    latent: &Latent,
    chol: &Cholesky<f64, Dyn>,
    whiten: bool,
) -> Result<(f64, DVector<f64>, DMatrix<f64>)> {
    let m = latent.num_inducing();
    let q_mu = &latent.q_mu;
    let q_sqrt = &latent.q_sqrt;
    let logdet_s: f64 = 2.0 * (0..m).map(|i| q_sqrt[(i, i)].abs().ln()).sum::<f64>();
    let inv_diag = DMatrix::from_diagonal(&DVector::from_fn(m, |i, _| 1.0 / q_sqrt[(i, i)]));

    if whiten {
        let kl = 0.5 * (q_sqrt.norm_squared() + q_mu.norm_squared() - m as f64 - logdet_s);
        return Ok((kl, q_mu.clone(), q_sqrt - inv_diag));
    }

    let lk = chol.l();
    let w = lk
        .solve_lower_triangular(q_sqrt)
        .ok_or(GpError::NotPositiveDefinite {
            what: "Kzz",
            size: m,
            jitter: 0.0,
        })?;
    let kinv_mu = chol.solve(q_mu);
    let logdet_k: f64 = 2.0 * (0..m).map(|i| lk[(i, i)].ln()).sum::<f64>();
    let kl = 0.5 * (w.norm_squared() + q_mu.dot(&kinv_mu) - m as f64 + logdet_k - logdet_s);
    let grad_sqrt = chol.solve(q_sqrt) - inv_diag;
    Ok((kl, kinv_mu, grad_sqrt))
}

/// Sparse variational GP over sources of modulated latent functions
#[derive(Debug, Clone)]
pub struct ModulatedGp {
    sources: Vec<Source>,
    likelihood: ModulatedLikelihood,
    data: MinibatchData,
    whiten: bool,
    jitter: f64,
}

impl ModulatedGp {
    /// Build a model over `sources`, each carrying its own kernels and
    /// inducing inputs
    ///
    /// * `x`, `y` - sample times (seconds) and observations, of equal length
    /// * `options` - whitening, jitter, noise, quadrature and batch settings
    ///
    /// Every latent starts at q(u) = N(0, I), i.e. the prior when whitened.
    pub fn new(x: Vec<f64>, y: Vec<f64>, sources: Vec<Source>, options: &ModelOptions) -> Result<Self> {
        if sources.is_empty() {
            return Err(GpError::DataShape("model needs at least one source".to_string()));
        }
        for s in &sources {
            if s.component.z.is_empty() || s.activation.z.is_empty() {
                return Err(GpError::DataShape("empty inducing set".to_string()));
            }
        }
        if !(options.jitter >= 0.0) {
            return Err(GpError::Config(format!("jitter must be >= 0, got {}", options.jitter)));
        }
        Ok(Self {
            sources,
            likelihood: ModulatedLikelihood::new(options.noise_variance, options.quadrature_points)?,
            data: MinibatchData::new(x, y, options.minibatch_size)?,
            whiten: options.whiten,
            jitter: options.jitter,
        })
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut [Source] {
        &mut self.sources
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Component or activation latent of one source, by index
    pub fn latent(&self, at: LatentRef) -> Result<&Latent> {
        self.sources
            .get(at.source)
            .map(|s| s.latent(at.kind))
            .ok_or_else(|| GpError::DataShape(format!("no source {}", at.source)))
    }

    /// Mutable access to a latent, e.g. to fix kernel parameters
    pub fn latent_mut(&mut self, at: LatentRef) -> Result<&mut Latent> {
        self.sources
            .get_mut(at.source)
            .map(|s| s.latent_mut(at.kind))
            .ok_or_else(|| GpError::DataShape(format!("no source {}", at.source)))
    }

    fn latents(&self) -> impl Iterator<Item = &Latent> {
        self.sources.iter().flat_map(|s| [&s.component, &s.activation])
    }

    fn latents_mut(&mut self) -> impl Iterator<Item = &mut Latent> {
        self.sources
            .iter_mut()
            .flat_map(|s| [&mut s.component, &mut s.activation])
    }

    pub fn likelihood(&self) -> &ModulatedLikelihood {
        &self.likelihood
    }

    pub fn likelihood_mut(&mut self) -> &mut ModulatedLikelihood {
        &mut self.likelihood
    }

    pub fn data(&self) -> &MinibatchData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut MinibatchData {
        &mut self.data
    }

    /// Full data size N, which scales every stochastic ELBO estimate
    pub fn num_data(&self) -> usize {
        self.data.len()
    }

    pub fn whiten(&self) -> bool {
        self.whiten
    }

    /// Switch parameterisation; q(u) is not converted, reset it afterwards
    pub fn set_whiten(&mut self, whiten: bool) {
        self.whiten = whiten;
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Replace the observations, keeping the minibatch size where it fits
    pub fn reset_data(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<()> {
        let size = self.data.minibatch_size();
        let full = self.data.is_full_batch();
        let keep = (!full && size <= x.len()).then_some(size);
        self.data = MinibatchData::new(x, y, keep)?;
        Ok(())
    }

    /// Window reset: new data, one inducing set for every latent, and
    /// zero-mean / identity variational parameters
    pub fn reset(&mut self, x: Vec<f64>, y: Vec<f64>, z: &[f64]) -> Result<()> {
        if z.is_empty() {
            return Err(GpError::DataShape("empty inducing set".to_string()));
        }
        self.reset_data(x, y)?;
        for latent in self.latents_mut() {
            latent.reset(z.to_vec());
        }
        Ok(())
    }

    /// Reset q(u) of every latent without moving the inducing inputs
    pub fn reset_variational(&mut self) {
        for latent in self.latents_mut() {
            let z = std::mem::take(&mut latent.z);
            latent.reset(z);
        }
    }

    pub(crate) fn projections(&self, x: &[f64]) -> Result<Vec<Projection>> {
        self.latents()
            .map(|l| project(l, x, self.jitter, self.whiten))
            .collect()
    }

    /// Sum of KL divergences of every latent
    pub fn build_prior_kl(&self) -> Result<f64> {
        let mut total = 0.0;
        for latent in self.latents() {
            let m = latent.num_inducing();
            let kzz = latent.kernel.k_symm(&latent.z) + DMatrix::identity(m, m) * self.jitter;
            let chol = Cholesky::new(kzz).ok_or(GpError::NotPositiveDefinite {
                what: "Kzz",
                size: m,
                jitter: self.jitter,
            })?;
            total += gauss_kl(latent, &chol, self.whiten)?.0;
        }
        Ok(total)
    }

    /// ELBO on the full data set
    pub fn build_likelihood(&self) -> Result<f64> {
        self.elbo_on(self.data.x(), self.data.y())
    }

    /// Stochastic ELBO estimate on a batch, rescaled to the full data size
    pub fn elbo_on(&self, x: &[f64], y: &[f64]) -> Result<f64> {
        let projections = self.projections(x)?;
        Ok(self.evaluate(&projections, y, false)?.0)
    }

    fn evaluate(&self, projections: &[Projection], y: &[f64], with_grad: bool) -> Result<(f64, Vec<f64>)> {
        let batch = y.len();
        if batch == 0 {
            return Err(GpError::DataShape("empty batch".to_string()));
        }
        let scale = self.num_data() as f64 / batch as f64;

        let mut marg = Vec::with_capacity(self.sources.len());
        let mut factors = Vec::with_capacity(2 * self.sources.len());
        for (s, source) in self.sources.iter().enumerate() {
            let (f_mean, f_var, cf) = marginals(&source.component, &projections[2 * s]);
            let (g_mean, g_var, cg) = marginals(&source.activation, &projections[2 * s + 1]);
            marg.push(SourceMarginals {
                f_mean,
                f_var,
                g_mean,
                g_var,
            });
            factors.push(cf);
            factors.push(cg);
        }

        let (var_exp, lik_grads) = self.likelihood.variational_expectations(y, &marg, with_grad);

        let mut kl_total = 0.0;
        let mut grad = Vec::with_capacity(if with_grad { self.num_variational() } else { 0 });
        for (li, latent) in self.latents().enumerate() {
            let proj = &projections[li];
            let (kl, kl_mu, kl_sqrt) = gauss_kl(latent, &proj.chol, self.whiten)?;
            kl_total += kl;
            if !with_grad {
                continue;
            }

            let g = &lik_grads[li / 2];
            let (d_mean, d_var) = if li % 2 == 0 {
                (&g.f_mean, &g.f_var)
            } else {
                (&g.g_mean, &g.g_var)
            };
            let grad_mu = &proj.b * d_mean * scale - kl_mu;
            let mut bd = proj.b.clone();
            for (j, mut col) in bd.column_iter_mut().enumerate() {
                col *= 2.0 * scale * d_var[j];
            }
            let grad_sqrt = bd * factors[li].transpose() - kl_sqrt;

            grad.extend(grad_mu.iter());
            let m = latent.num_inducing();
            for j in 0..m {
                for i in j..m {
                    grad.push(grad_sqrt[(i, j)]);
                }
            }
        }

        Ok((var_exp * scale - kl_total, grad))
    }

    /// Length of the variational block at the front of [`ModulatedGp::pack`]
    pub fn num_variational(&self) -> usize {
        self.latents().map(Latent::variational_len).sum()
    }

    /// Hyperparameters the optimizer may change, in a stable order
    pub fn trainable_hyperparameters(&self) -> Vec<&Parameter> {
        let mut out: Vec<&Parameter> = self
            .latents()
            .flat_map(|l| l.kernel.params())
            .filter(|p| p.trainable)
            .collect();
        if self.likelihood.noise_variance.trainable {
            out.push(&self.likelihood.noise_variance);
        }
        out
    }

    pub fn trainable_hyperparameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut out: Vec<&mut Parameter> = self
            .sources
            .iter_mut()
            .flat_map(|s| {
                let mut ps = s.component.kernel.params_mut();
                ps.extend(s.activation.kernel.params_mut());
                ps
            })
            .filter(|p| p.trainable)
            .collect();
        if self.likelihood.noise_variance.trainable {
            out.push(&mut self.likelihood.noise_variance);
        }
        out
    }

    pub fn num_trainable_hyperparameters(&self) -> usize {
        self.trainable_hyperparameters().len()
    }

    /// Flatten variational parameters and raw trainable hyperparameters
    pub fn pack(&self) -> Vec<f64> {
        let mut theta = Vec::with_capacity(self.num_variational());
        for latent in self.latents() {
            theta.extend(latent.q_mu.iter());
            let m = latent.num_inducing();
            for j in 0..m {
                for i in j..m {
                    theta.push(latent.q_sqrt[(i, j)]);
                }
            }
        }
        theta.extend(self.trainable_hyperparameters().iter().map(|p| p.raw()));
        theta
    }

    /// Inverse of [`ModulatedGp::pack`]
    pub fn unpack(&mut self, theta: &[f64]) -> Result<()> {
        let expected = self.num_variational() + self.num_trainable_hyperparameters();
        if theta.len() != expected {
            return Err(GpError::DataShape(format!(
                "parameter vector has {} entries, model needs {}",
                theta.len(),
                expected
            )));
        }
        let mut it = theta.iter().copied();
        for latent in self.latents_mut() {
            let m = latent.num_inducing();
            for i in 0..m {
                latent.q_mu[i] = it.next().unwrap_or_default();
            }
            for j in 0..m {
                for i in j..m {
                    latent.q_sqrt[(i, j)] = it.next().unwrap_or_default();
                }
            }
        }
        for p in self.trainable_hyperparameters_mut() {
            p.set_raw(it.next().unwrap_or_default());
        }
        Ok(())
    }

    /// ELBO and its gradient in the packed coordinates
    ///
    /// Variational gradients are analytic; hyperparameter gradients use
    /// central differences of the ELBO on the same batch.
    pub(crate) fn objective_and_gradient(
        &mut self,
        x: &[f64],
        y: &[f64],
        cached: Option<&[Projection]>,
    ) -> Result<(f64, Vec<f64>)> {
        let (elbo, mut grad) = match cached {
            Some(projections) => self.evaluate(projections, y, true)?,
            None => {
                let projections = self.projections(x)?;
                self.evaluate(&projections, y, true)?
            }
        };

        for idx in 0..self.num_trainable_hyperparameters() {
            let raw = self.trainable_hyperparameters()[idx].raw();
            let h = HYPER_FD_STEP * raw.abs().max(1.0);

            self.trainable_hyperparameters_mut()[idx].set_raw(raw + h);
            let up = self.elbo_on(x, y);
            self.trainable_hyperparameters_mut()[idx].set_raw(raw - h);
            let down = self.elbo_on(x, y);
            self.trainable_hyperparameters_mut()[idx].set_raw(raw);

            grad.push((up? - down?) / (2.0 * h));
        }
        Ok((elbo, grad))
    }

    /// Posterior mean and variance of one latent at new inputs
    pub fn predict(&self, at: LatentRef, x_new: &[f64]) -> Result<Prediction> {
        let latent = self.latent(at)?;
        let proj = project(latent, x_new, self.jitter, self.whiten)?;
        let (mean, var, _) = marginals(latent, &proj);
        Ok(Prediction {
            mean: mean.iter().copied().collect(),
            var: var.iter().map(|v| v.max(0.0)).collect(),
        })
    }

    /// Predictive mean of the observed signal at new inputs
    pub fn predict_signal(&self, x_new: &[f64]) -> Result<Vec<f64>> {
        let projections = self.projections(x_new)?;
        let marg: Vec<SourceMarginals> = self
            .sources
            .iter()
            .enumerate()
            .map(|(s, source)| {
                let (f_mean, f_var, _) = marginals(&source.component, &projections[2 * s]);
                let (g_mean, g_var, _) = marginals(&source.activation, &projections[2 * s + 1]);
                SourceMarginals {
                    f_mean,
                    f_var,
                    g_mean,
                    g_var,
                }
            })
            .collect();
        Ok(self.likelihood.predict_mean(&marg).iter().copied().collect())
    }
}
