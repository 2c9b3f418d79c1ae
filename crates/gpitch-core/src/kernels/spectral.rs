//! Matern-1/2 spectral-mixture kernels
//!
//! Both kernels model a harmonic source as a sum of partials with energies
//! `e_p` at frequencies `f_p`, damped by a shared exponential envelope:
//!
//! k(r) = variance * exp(-r / lengthscale) * sum_p e_p cos(2 pi f_p r)
//!
//! [`MercerMatern12SpectralMixture`] evaluates the same covariance through the
//! explicit feature map phi(x) = [sqrt(e_p) cos(2 pi f_p x), sqrt(e_p) sin(2 pi f_p x)].

use super::{stationary_matrix, Kernel};
use crate::error::{GpError, Result};
use crate::params::{set_trainable, Parameter};
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

fn build_partials(
    kernel: &'static str,
    energy: &[f64],
    frequency: &[f64],
) -> Result<(Vec<Parameter>, Vec<Parameter>)> {
    if energy.len() != frequency.len() || energy.is_empty() {
        return Err(GpError::KernelShape {
            kernel,
            energies: energy.len(),
            frequencies: frequency.len(),
        });
    }
    let mut energies = Vec::with_capacity(energy.len());
    let mut frequencies = Vec::with_capacity(frequency.len());
    // spectrum is fixed by default, only the envelope is learnt
    for (&e, &f) in energy.iter().zip(frequency) {
        energies.push(Parameter::positive("energy", e)?.with_trainable(false));
        frequencies.push(Parameter::positive("frequency", f)?.with_trainable(false));
    }
    Ok((energies, frequencies))
}

macro_rules! spectral_accessors {
    ($ty:ty) => {
        impl $ty {
            pub fn num_partials(&self) -> usize {
                self.energy.len()
            }

            pub fn energies(&self) -> Vec<f64> {
                self.energy.iter().map(Parameter::value).collect()
            }

            pub fn frequencies(&self) -> Vec<f64> {
                self.frequency.iter().map(Parameter::value).collect()
            }

            fn all_params(&self) -> Vec<&Parameter> {
                let mut out = vec![&self.variance, &self.lengthscale];
                out.extend(self.energy.iter());
                out.extend(self.frequency.iter());
                out
            }

            fn all_params_mut(&mut self) -> Vec<&mut Parameter> {
                let mut out = vec![&mut self.variance, &mut self.lengthscale];
                out.extend(self.energy.iter_mut());
                out.extend(self.frequency.iter_mut());
                out
            }

            fn total_energy(&self) -> f64 {
                self.energy.iter().map(Parameter::value).sum()
            }
        }
    };
}

/// Spectral mixture evaluated as a trigonometric sum per entry
#[derive(Debug, Clone)]
pub struct Matern12SpectralMixture {
    pub variance: Parameter,
    pub lengthscale: Parameter,
    pub energy: Vec<Parameter>,
    pub frequency: Vec<Parameter>,
}

impl Matern12SpectralMixture {
    pub fn new(variance: f64, lengthscale: f64, energy: &[f64], frequency: &[f64]) -> Result<Self> {
        let (energy, frequency) = build_partials("matern12_spectral_mixture", energy, frequency)?;
        Ok(Self {
            variance: Parameter::positive("variance", variance)?,
            lengthscale: Parameter::positive("lengthscale", lengthscale)?,
            energy,
            frequency,
        })
    }
}

spectral_accessors!(Matern12SpectralMixture);

impl Kernel for Matern12SpectralMixture {
    fn name(&self) -> &'static str {
        "matern12_spectral_mixture"
    }

    fn k(&self, x: &[f64], x2: &[f64]) -> DMatrix<f64> {
        let var = self.variance.value();
        let ls = self.lengthscale.value();
        let partials: Vec<(f64, f64)> = self
            .energy
            .iter()
            .zip(&self.frequency)
            .map(|(e, f)| (e.value(), 2.0 * PI * f.value()))
            .collect();
        stationary_matrix(x, x2, |r| {
            let mix: f64 = partials.iter().map(|&(e, w)| e * (w * r).cos()).sum();
            var * (-r / ls).exp() * mix
        })
    }

    fn k_diag(&self, x: &[f64]) -> DVector<f64> {
        DVector::from_element(x.len(), self.variance.value() * self.total_energy())
    }

    fn params(&self) -> Vec<&Parameter> {
        self.all_params()
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        self.all_params_mut()
    }

    fn box_clone(&self) -> Box<dyn Kernel> {
        Box::new(self.clone())
    }

    fn set_spectrum_trainable(&mut self, energy: bool, frequency: bool) {
        set_trainable(self.energy.iter_mut(), energy);
        set_trainable(self.frequency.iter_mut(), frequency);
    }
}

/// Spectral mixture evaluated through finite Mercer features
#[derive(Debug, Clone)]
pub struct MercerMatern12SpectralMixture {
    pub variance: Parameter,
    pub lengthscale: Parameter,
    pub energy: Vec<Parameter>,
    pub frequency: Vec<Parameter>,
}

impl MercerMatern12SpectralMixture {
    pub fn new(variance: f64, lengthscale: f64, energy: &[f64], frequency: &[f64]) -> Result<Self> {
        let (energy, frequency) =
            build_partials("mercer_matern12_spectral_mixture", energy, frequency)?;
        Ok(Self {
            variance: Parameter::positive("variance", variance)?,
            lengthscale: Parameter::positive("lengthscale", lengthscale)?,
            energy,
            frequency,
        })
    }

    /// Feature matrix, 2P x N: cosine rows followed by sine rows
    pub fn features(&self, x: &[f64]) -> DMatrix<f64> {
        let p = self.num_partials();
        let mut phi = DMatrix::zeros(2 * p, x.len());
        for (i, (e, f)) in self.energy.iter().zip(&self.frequency).enumerate() {
            let amp = e.value().sqrt();
            let w = 2.0 * PI * f.value();
            for (j, &t) in x.iter().enumerate() {
                let (s, c) = (w * t).sin_cos();
                phi[(i, j)] = amp * c;
                phi[(i + p, j)] = amp * s;
            }
        }
        phi
    }
}

spectral_accessors!(MercerMatern12SpectralMixture);

impl Kernel for MercerMatern12SpectralMixture {
    fn name(&self) -> &'static str {
        "mercer_matern12_spectral_mixture"
    }

    fn k(&self, x: &[f64], x2: &[f64]) -> DMatrix<f64> {
        let var = self.variance.value();
        let ls = self.lengthscale.value();
        let phi = self.features(x);
        let phi2 = self.features(x2);
        let mut k = phi.tr_mul(&phi2);
        for j in 0..x2.len() {
            for i in 0..x.len() {
                k[(i, j)] *= var * (-(x[i] - x2[j]).abs() / ls).exp();
            }
        }
        k
    }

    fn k_diag(&self, x: &[f64]) -> DVector<f64> {
        DVector::from_element(x.len(), self.variance.value() * self.total_energy())
    }

    fn params(&self) -> Vec<&Parameter> {
        self.all_params()
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        self.all_params_mut()
    }

    fn box_clone(&self) -> Box<dyn Kernel> {
        Box::new(self.clone())
    }

    fn set_spectrum_trainable(&mut self, energy: bool, frequency: bool) {
        set_trainable(self.energy.iter_mut(), energy);
        set_trainable(self.frequency.iter_mut(), frequency);
    }
}
