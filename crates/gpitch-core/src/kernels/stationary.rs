//! Single-envelope stationary kernels

use super::{stationary_matrix, Kernel};
use crate::error::Result;
use crate::params::Parameter;
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

/// Matern 1/2 (exponential) kernel: variance * exp(-r / lengthscale)
#[derive(Debug, Clone)]
pub struct Matern12 {
    pub variance: Parameter,
    pub lengthscale: Parameter,
}

impl Matern12 {
    pub fn new(variance: f64, lengthscale: f64) -> Result<Self> {
        Ok(Self {
            variance: Parameter::positive("variance", variance)?,
            lengthscale: Parameter::positive("lengthscale", lengthscale)?,
        })
    }
}

impl Kernel for Matern12 {
    fn name(&self) -> &'static str {
        "matern12"
    }

    fn k(&self, x: &[f64], x2: &[f64]) -> DMatrix<f64> {
        let var = self.variance.value();
        let ls = self.lengthscale.value();
        stationary_matrix(x, x2, |r| var * (-r / ls).exp())
    }

    fn k_diag(&self, x: &[f64]) -> DVector<f64> {
        DVector::from_element(x.len(), self.variance.value())
    }

    fn params(&self) -> Vec<&Parameter> {
        vec![&self.variance, &self.lengthscale]
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.variance, &mut self.lengthscale]
    }

    fn box_clone(&self) -> Box<dyn Kernel> {
        Box::new(self.clone())
    }
}

/// Matern 3/2 kernel, used for smooth envelopes
#[derive(Debug, Clone)]
pub struct Matern32 {
    pub variance: Parameter,
    pub lengthscale: Parameter,
}

impl Matern32 {
    pub fn new(variance: f64, lengthscale: f64) -> Result<Self> {
        Ok(Self {
            variance: Parameter::positive("variance", variance)?,
            lengthscale: Parameter::positive("lengthscale", lengthscale)?,
        })
    }
}

impl Kernel for Matern32 {
    fn name(&self) -> &'static str {
        "matern32"
    }

    fn k(&self, x: &[f64], x2: &[f64]) -> DMatrix<f64> {
        let var = self.variance.value();
        let ls = self.lengthscale.value();
        let sqrt3 = 3f64.sqrt();
        stationary_matrix(x, x2, |r| {
            let s = sqrt3 * r / ls;
            var * (1.0 + s) * (-s).exp()
        })
    }

    fn k_diag(&self, x: &[f64]) -> DVector<f64> {
        DVector::from_element(x.len(), self.variance.value())
    }

    fn params(&self) -> Vec<&Parameter> {
        vec![&self.variance, &self.lengthscale]
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.variance, &mut self.lengthscale]
    }

    fn box_clone(&self) -> Box<dyn Kernel> {
        Box::new(self.clone())
    }
}

/// Matern 1/2 times cosine: a single damped harmonic
#[derive(Debug, Clone)]
pub struct Matern12Cosine {
    pub variance: Parameter,
    pub lengthscale: Parameter,
    pub period: Parameter,
}

impl Matern12Cosine {
    pub fn new(variance: f64, lengthscale: f64, period: f64) -> Result<Self> {
        Ok(Self {
            variance: Parameter::positive("variance", variance)?,
            lengthscale: Parameter::positive("lengthscale", lengthscale)?,
            period: Parameter::positive("period", period)?,
        })
    }
}

impl Kernel for Matern12Cosine {
    fn name(&self) -> &'static str {
        "matern12_cosine"
    }

    fn k(&self, x: &[f64], x2: &[f64]) -> DMatrix<f64> {
        let var = self.variance.value();
        let ls = self.lengthscale.value();
        let period = self.period.value();
        stationary_matrix(x, x2, |r| var * (-r / ls).exp() * (2.0 * PI * r / period).cos())
    }

    fn k_diag(&self, x: &[f64]) -> DVector<f64> {
        DVector::from_element(x.len(), self.variance.value())
    }

    fn params(&self) -> Vec<&Parameter> {
        vec![&self.variance, &self.lengthscale, &self.period]
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.variance, &mut self.lengthscale, &mut self.period]
    }

    fn box_clone(&self) -> Box<dyn Kernel> {
        Box::new(self.clone())
    }
}
