//! Covariance functions over 1-D time inputs
//!
//! Component kernels are quasi-periodic (Matern-1/2 envelopes times cosine
//! mixtures); activation kernels are smooth Matern kernels.

mod combination;
mod spectral;
mod stationary;

pub use combination::{Product, Sum};
pub use spectral::{Matern12SpectralMixture, MercerMatern12SpectralMixture};
pub use stationary::{Matern12, Matern12Cosine, Matern32};

use crate::params::Parameter;
use nalgebra::{DMatrix, DVector};
use std::fmt;

/// A covariance function k(x, x')
pub trait Kernel: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Covariance matrix between `x` (rows) and `x2` (columns)
    fn k(&self, x: &[f64], x2: &[f64]) -> DMatrix<f64>;

    /// Diagonal of `k(x, x)`
    fn k_diag(&self, x: &[f64]) -> DVector<f64>;

    fn k_symm(&self, x: &[f64]) -> DMatrix<f64> {
        self.k(x, x)
    }

    /// Parameters in a fixed order, stable across calls
    fn params(&self) -> Vec<&Parameter>;

    fn params_mut(&mut self) -> Vec<&mut Parameter>;

    fn box_clone(&self) -> Box<dyn Kernel>;

    /// Toggle trainability of partial energies and frequencies, if any
    fn set_spectrum_trainable(&mut self, _energy: bool, _frequency: bool) {}

    fn fix_all(&mut self) {
        for p in self.params_mut() {
            p.fix();
        }
    }
}

impl Clone for Box<dyn Kernel> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Evaluate a function of the lag r = |x - x'| over all pairs
pub(crate) fn stationary_matrix<F>(x: &[f64], x2: &[f64], f: F) -> DMatrix<f64>
where
    F: Fn(f64) -> f64,
{
    DMatrix::from_fn(x.len(), x2.len(), |i, j| f((x[i] - x2[j]).abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::SymmetricEigen;

    fn inputs() -> Vec<f64> {
        // irregular, finite time points over 20 ms
        (0..40).map(|i| (i as f64 * 0.37).sin().abs() * 0.02 + i as f64 * 1e-4).collect()
    }

    fn all_kernels() -> Vec<Box<dyn Kernel>> {
        let energy = [0.6, 0.3, 0.1];
        let freq = [220.0, 440.0, 660.0];
        vec![
            Box::new(Matern12::new(2.0, 0.01).unwrap()),
            Box::new(Matern32::new(1.5, 0.02).unwrap()),
            Box::new(Matern12Cosine::new(0.7, 0.05, 1.0 / 440.0).unwrap()),
            Box::new(Matern12SpectralMixture::new(0.8, 0.1, &energy, &freq).unwrap()),
            Box::new(MercerMatern12SpectralMixture::new(0.8, 0.1, &energy, &freq).unwrap()),
            Box::new(Product::new(vec![
                Box::new(Matern32::new(1.0, 0.25).unwrap()),
                Box::new(MercerMatern12SpectralMixture::new(0.25, 1.0, &energy, &freq).unwrap()),
            ])),
            Box::new(Sum::new(vec![
                Box::new(Matern12Cosine::new(0.5, 0.05, 1.0 / 330.0).unwrap()),
                Box::new(Matern12SpectralMixture::new(0.5, 0.2, &energy, &freq).unwrap()),
            ])),
        ]
    }

    #[test]
    fn test_kdiag_matches_diagonal_of_k() {
        let x = inputs();
        for kern in all_kernels() {
            let k = kern.k_symm(&x);
            let d = kern.k_diag(&x);
            for i in 0..x.len() {
                assert_relative_eq!(k[(i, i)], d[i], epsilon = 1e-10, max_relative = 1e-8);
            }
        }
    }

    #[test]
    fn test_k_is_symmetric_psd() {
        let x = inputs();
        for kern in all_kernels() {
            let k = kern.k_symm(&x);
            for i in 0..x.len() {
                for j in 0..x.len() {
                    assert_relative_eq!(k[(i, j)], k[(j, i)], epsilon = 1e-12);
                }
            }
            let trace: f64 = k.diagonal().sum();
            let eig = SymmetricEigen::new(k);
            let min = eig.eigenvalues.min();
            assert!(min > -1e-9 * trace, "{} min eigenvalue {}", kern.name(), min);
        }
    }

    #[test]
    fn test_mercer_equals_trig_sum() {
        let energy = [0.5, 0.25, 0.125, 0.0625];
        let freq = [261.6, 523.3, 784.9, 1046.5];
        let sm = Matern12SpectralMixture::new(1.3, 0.03, &energy, &freq).unwrap();
        let mercer = MercerMatern12SpectralMixture::new(1.3, 0.03, &energy, &freq).unwrap();
        let x = inputs();
        let x2: Vec<f64> = x.iter().map(|t| t + 3.3e-4).collect();
        let a = sm.k(&x, &x2);
        let b = mercer.k(&x, &x2);
        assert_eq!(a.shape(), (x.len(), x2.len()));
        for (u, v) in a.iter().zip(b.iter()) {
            assert_relative_eq!(u, v, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_cosine_kernel_values() {
        let kern = Matern12Cosine::new(2.0, 0.5, 0.01).unwrap();
        let k = kern.k(&[0.0], &[0.005, 0.01]);
        // half a period: cos = -1; full period: cos = 1
        assert_relative_eq!(k[(0, 0)], -2.0 * (-0.01_f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(k[(0, 1)], 2.0 * (-0.02_f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_mismatched_partials_rejected() {
        assert!(Matern12SpectralMixture::new(1.0, 1.0, &[1.0, 2.0], &[100.0]).is_err());
        assert!(MercerMatern12SpectralMixture::new(1.0, 1.0, &[1.0], &[100.0, 200.0]).is_err());
        assert!(Matern12SpectralMixture::new(1.0, 1.0, &[], &[]).is_err());
    }

    #[test]
    fn test_params_are_stably_ordered() {
        let mut kern = Matern12SpectralMixture::new(1.0, 0.1, &[0.7, 0.3], &[110.0, 220.0]).unwrap();
        let names: Vec<String> = kern.params().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, ["variance", "lengthscale", "energy", "energy", "frequency", "frequency"]);
        kern.params_mut()[5].set_value(230.0).unwrap();
        assert_relative_eq!(kern.frequencies()[1], 230.0, max_relative = 1e-9);
    }
}
