//! Sum and product combinators

use super::Kernel;
use crate::params::Parameter;
use nalgebra::{DMatrix, DVector};

/// Sum of kernels, e.g. one term per pitch
#[derive(Debug, Clone)]
pub struct Sum {
    parts: Vec<Box<dyn Kernel>>,
}

impl Sum {
    pub fn new(parts: Vec<Box<dyn Kernel>>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[Box<dyn Kernel>] {
        &self.parts
    }
}

impl Kernel for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn k(&self, x: &[f64], x2: &[f64]) -> DMatrix<f64> {
        let mut k = DMatrix::zeros(x.len(), x2.len());
        for part in &self.parts {
            k += part.k(x, x2);
        }
        k
    }

    fn k_diag(&self, x: &[f64]) -> DVector<f64> {
        let mut d = DVector::zeros(x.len());
        for part in &self.parts {
            d += part.k_diag(x);
        }
        d
    }

    fn params(&self) -> Vec<&Parameter> {
        self.parts.iter().flat_map(|p| p.params()).collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        self.parts.iter_mut().flat_map(|p| p.params_mut()).collect()
    }

    fn box_clone(&self) -> Box<dyn Kernel> {
        Box::new(self.clone())
    }

    fn set_spectrum_trainable(&mut self, energy: bool, frequency: bool) {
        for part in &mut self.parts {
            part.set_spectrum_trainable(energy, frequency);
        }
    }
}

/// Elementwise product of kernels
#[derive(Debug, Clone)]
pub struct Product {
    parts: Vec<Box<dyn Kernel>>,
}

impl Product {
    pub fn new(parts: Vec<Box<dyn Kernel>>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[Box<dyn Kernel>] {
        &self.parts
    }
}

impl Kernel for Product {
    fn name(&self) -> &'static str {
        "product"
    }

    fn k(&self, x: &[f64], x2: &[f64]) -> DMatrix<f64> {
        let mut k = DMatrix::from_element(x.len(), x2.len(), 1.0);
        for part in &self.parts {
            k.component_mul_assign(&part.k(x, x2));
        }
        k
    }

    fn k_diag(&self, x: &[f64]) -> DVector<f64> {
        let mut d = DVector::from_element(x.len(), 1.0);
        for part in &self.parts {
            d.component_mul_assign(&part.k_diag(x));
        }
        d
    }

    fn params(&self) -> Vec<&Parameter> {
        self.parts.iter().flat_map(|p| p.params()).collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        self.parts.iter_mut().flat_map(|p| p.params_mut()).collect()
    }

    fn box_clone(&self) -> Box<dyn Kernel> {
        Box::new(self.clone())
    }

    fn set_spectrum_trainable(&mut self, energy: bool, frequency: bool) {
        for part in &mut self.parts {
            part.set_spectrum_trainable(energy, frequency);
        }
    }
}
