//! Amplitude-modulation likelihood
//!
//! y_n ~ N(sum_k logistic(g_k(x_n)) f_k(x_n), noise_variance)
//!
//! Under a factorised Gaussian posterior the expectation over every `f_k` is
//! closed form; the logistic moments over `g_k` use Gauss-Hermite quadrature.

use crate::error::Result;
use crate::params::{logistic, Parameter};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use std::f64::consts::PI;

/// Variances below this are treated as this value inside the quadrature
const MIN_VARIANCE: f64 = 1e-12;

/// Gauss-Hermite rule, weights normalised to sum to one
#[derive(Debug, Clone)]
pub struct GaussHermite {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl GaussHermite {
    /// Golub-Welsch: nodes are the eigenvalues of the Jacobi matrix of the
    /// Hermite polynomials, weights the squared first eigenvector entries.
    pub fn new(n: usize) -> Self {
        let n = n.max(1);
        let mut jacobi = DMatrix::zeros(n, n);
        for k in 1..n {
            let beta = (k as f64 / 2.0).sqrt();
            jacobi[(k, k - 1)] = beta;
            jacobi[(k - 1, k)] = beta;
        }
        let eig = SymmetricEigen::new(jacobi);
        let mut pairs: Vec<(f64, f64)> = (0..n)
            .map(|i| (eig.eigenvalues[i], eig.eigenvectors[(0, i)].powi(2)))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let total: f64 = pairs.iter().map(|p| p.1).sum();
        Self {
            nodes: pairs.iter().map(|p| p.0).collect(),
            weights: pairs.iter().map(|p| p.1 / total).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// E[h(g)] for g ~ N(mean, var), with h evaluated at sqrt(2) scaled nodes
    pub fn expect<F: Fn(f64) -> f64>(&self, mean: f64, var: f64, h: F) -> f64 {
        let s = (2.0 * var.max(MIN_VARIANCE)).sqrt();
        self.nodes
            .iter()
            .zip(&self.weights)
            .map(|(&t, &w)| w * h(mean + s * t))
            .sum()
    }
}

/// Logistic moments of g ~ N(mean, var) and their derivatives
#[derive(Debug, Clone, Copy, Default)]
struct LogisticMoments {
    /// E[sigma(g)]
    a: f64,
    /// E[sigma(g)^2]
    b: f64,
    da_dmean: f64,
    da_dvar: f64,
    db_dmean: f64,
    db_dvar: f64,
}

impl GaussHermite {
    fn logistic_moments(&self, mean: f64, var: f64) -> LogisticMoments {
        let s = (2.0 * var.max(MIN_VARIANCE)).sqrt();
        let mut m = LogisticMoments::default();
        for (&t, &w) in self.nodes.iter().zip(&self.weights) {
            let sig = logistic(mean + s * t);
            let dsig = sig * (1.0 - sig);
            m.a += w * sig;
            m.b += w * sig * sig;
            m.da_dmean += w * dsig;
            m.db_dmean += w * 2.0 * sig * dsig;
            m.da_dvar += w * dsig * t / s;
            m.db_dvar += w * 2.0 * sig * dsig * t / s;
        }
        // flat in var below the clamp
        if var < MIN_VARIANCE {
            m.da_dvar = 0.0;
            m.db_dvar = 0.0;
        }
        m
    }
}

/// Posterior marginals of one source at the batch inputs
#[derive(Debug, Clone)]
pub struct SourceMarginals {
    pub f_mean: DVector<f64>,
    pub f_var: DVector<f64>,
    pub g_mean: DVector<f64>,
    pub g_var: DVector<f64>,
}

/// Derivatives of the summed expectations with respect to the marginals
#[derive(Debug, Clone)]
pub struct SourceGradients {
    pub f_mean: DVector<f64>,
    pub f_var: DVector<f64>,
    pub g_mean: DVector<f64>,
    pub g_var: DVector<f64>,
}

impl SourceGradients {
    fn zeros(n: usize) -> Self {
        Self {
            f_mean: DVector::zeros(n),
            f_var: DVector::zeros(n),
            g_mean: DVector::zeros(n),
            g_var: DVector::zeros(n),
        }
    }
}

/// Gaussian observation of a sum of logistic-modulated components
#[derive(Debug, Clone)]
pub struct ModulatedLikelihood {
    pub noise_variance: Parameter,
    quadrature: GaussHermite,
}

impl ModulatedLikelihood {
    pub fn new(noise_variance: f64, quadrature_points: usize) -> Result<Self> {
        Ok(Self {
            noise_variance: Parameter::positive("noise_variance", noise_variance)?,
            quadrature: GaussHermite::new(quadrature_points),
        })
    }

    /// Sum over the batch of E_q[log p(y_n | f, g)]
    ///
    /// Gradients are only computed when `with_grad` is set.
    pub fn variational_expectations(
        &self,
        y: &[f64],
        sources: &[SourceMarginals],
        with_grad: bool,
    ) -> (f64, Vec<SourceGradients>) {
        let n = y.len();
        let noise = self.noise_variance.value();
        let half_inv = 0.5 / noise;
        let log_norm = -0.5 * (2.0 * PI * noise).ln();

        let mut grads: Vec<SourceGradients> = if with_grad {
            sources.iter().map(|_| SourceGradients::zeros(n)).collect()
        } else {
            Vec::new()
        };

        let mut moments = vec![LogisticMoments::default(); sources.len()];
        let mut total = 0.0;
        for i in 0..n {
            let mut residual = y[i];
            let mut spread = 0.0;
            for (k, s) in sources.iter().enumerate() {
                let m = self.quadrature.logistic_moments(s.g_mean[i], s.g_var[i]);
                let mu = s.f_mean[i];
                residual -= mu * m.a;
                spread += (mu * mu + s.f_var[i]) * m.b - mu * mu * m.a * m.a;
                moments[k] = m;
            }
            let q = residual * residual + spread;
            total += log_norm - half_inv * q;

            if with_grad {
                for (k, s) in sources.iter().enumerate() {
                    let m = moments[k];
                    let mu = s.f_mean[i];
                    let dq_dmu = -2.0 * residual * m.a + 2.0 * mu * (m.b - m.a * m.a);
                    let dq_dvar = m.b;
                    let dq_da = -2.0 * residual * mu - 2.0 * mu * mu * m.a;
                    let dq_db = mu * mu + s.f_var[i];
                    let g = &mut grads[k];
                    g.f_mean[i] = -half_inv * dq_dmu;
                    g.f_var[i] = -half_inv * dq_dvar;
                    g.g_mean[i] = -half_inv * (dq_da * m.da_dmean + dq_db * m.db_dmean);
                    g.g_var[i] = -half_inv * (dq_da * m.da_dvar + dq_db * m.db_dvar);
                }
            }
        }
        (total, grads)
    }

    /// Predictive mean of y: sum_k E[sigma(g_k)] E[f_k]
    pub fn predict_mean(&self, sources: &[SourceMarginals]) -> DVector<f64> {
        let n = sources.first().map_or(0, |s| s.f_mean.len());
        let mut out = DVector::zeros(n);
        for s in sources {
            for i in 0..n {
                let a = self.quadrature.expect(s.g_mean[i], s.g_var[i], logistic);
                out[i] += a * s.f_mean[i];
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn marginals(f_mean: f64, f_var: f64, g_mean: f64, g_var: f64) -> SourceMarginals {
        SourceMarginals {
            f_mean: DVector::from_element(1, f_mean),
            f_var: DVector::from_element(1, f_var),
            g_mean: DVector::from_element(1, g_mean),
            g_var: DVector::from_element(1, g_var),
        }
    }

    #[test]
    fn test_quadrature_gaussian_moments() {
        let gh = GaussHermite::new(20);
        assert_eq!(gh.len(), 20);
        assert_relative_eq!(gh.expect(0.3, 2.0, |_| 1.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(gh.expect(0.3, 2.0, |g| g), 0.3, epsilon = 1e-10);
        assert_relative_eq!(gh.expect(0.3, 2.0, |g| (g - 0.3).powi(2)), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_deterministic_limit_matches_gaussian_log_density() {
        let lik = ModulatedLikelihood::new(0.1, 20).unwrap();
        let s = marginals(0.8, 0.0, 1.5, 0.0);
        let y = 0.2;
        let (ve, _) = lik.variational_expectations(&[y], &[s], false);
        let mean = logistic(1.5) * 0.8;
        let expected = -0.5 * (2.0 * PI * 0.1).ln() - 0.5 * (y - mean).powi(2) / 0.1;
        assert_relative_eq!(ve, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let lik = ModulatedLikelihood::new(0.05, 20).unwrap();
        let y = [0.4];
        let base = [0.7, 0.3, -0.4, 0.5];
        let eval = |v: [f64; 4]| {
            let s = vec![
                marginals(v[0], v[1], v[2], v[3]),
                marginals(-0.2, 0.1, 0.6, 0.2),
            ];
            lik.variational_expectations(&y, &s, false).0
        };
        let s = vec![
            marginals(base[0], base[1], base[2], base[3]),
            marginals(-0.2, 0.1, 0.6, 0.2),
        ];
        let (_, grads) = lik.variational_expectations(&y, &s, true);
        let analytic = [
            grads[0].f_mean[0],
            grads[0].f_var[0],
            grads[0].g_mean[0],
            grads[0].g_var[0],
        ];
        let h = 1e-6;
        for d in 0..4 {
            let mut up = base;
            let mut down = base;
            up[d] += h;
            down[d] -= h;
            let numeric = (eval(up) - eval(down)) / (2.0 * h);
            assert_relative_eq!(analytic[d], numeric, epsilon = 1e-5, max_relative = 1e-4);
        }
    }

    #[test]
    fn test_clamped_variance_has_no_variance_gradient() {
        let gh = GaussHermite::new(20);
        let m = gh.logistic_moments(0.3, 0.0);
        assert_eq!(m.da_dvar, 0.0);
        assert_eq!(m.db_dvar, 0.0);
        assert!(m.da_dmean > 0.0);
        assert_relative_eq!(m.a, logistic(0.3), epsilon = 1e-6);

        let open = gh.logistic_moments(0.3, 0.5);
        assert!(open.da_dvar.abs() > 0.0);
    }

    #[test]
    fn test_predict_mean_uses_logistic_expectation() {
        let lik = ModulatedLikelihood::new(0.1, 20).unwrap();
        let s = marginals(2.0, 0.5, 0.0, 1.0);
        // E[sigma(g)] = 0.5 for a zero-mean symmetric g
        assert_relative_eq!(lik.predict_mean(&[s])[0], 1.0, epsilon = 1e-10);
    }
}
