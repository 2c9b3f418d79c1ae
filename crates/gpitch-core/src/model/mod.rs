//! Sparse variational GP models with modulated latent functions
//!
//! Every source owns a quasi-periodic component `f` and a smooth activation
//! `g`; each latent function has its own inducing inputs `Z` and variational
//! parameters `q_mu`, `q_sqrt` (lower triangular). [`ModGp`] models a single
//! source, [`LooGp`] two sources.

mod loogp;
mod modgp;
mod svgp;


pub use loogp::{LooGp, LooPrediction};
pub use modgp::{ModGp, ModGpWindows};
pub use svgp::{LatentRef, MinibatchData, ModelOptions, ModulatedGp, Prediction, DEFAULT_JITTER};

use crate::kernels::Kernel;
use nalgebra::{DMatrix, DVector};

/// Which latent function of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatentKind {
    Component,
    Activation,
}

/// A latent GP: kernel, inducing inputs and variational posterior q(u)
#[derive(Debug, Clone)]
pub struct Latent {
    pub kernel: Box<dyn Kernel>,
    pub z: Vec<f64>,
    pub q_mu: DVector<f64>,
    pub q_sqrt: DMatrix<f64>,
}

impl Latent {
    /// New latent with a zero-mean, identity-covariance posterior
    pub fn new(kernel: Box<dyn Kernel>, z: Vec<f64>) -> Self {
        let m = z.len();
        Self {
            kernel,
            z,
            q_mu: DVector::zeros(m),
            q_sqrt: DMatrix::identity(m, m),
        }
    }

    pub fn num_inducing(&self) -> usize {
        self.z.len()
    }

    /// Replace the inducing inputs and reset q(u)
    pub fn reset(&mut self, z: Vec<f64>) {
        let m = z.len();
        self.z = z;
        self.q_mu = DVector::zeros(m);
        self.q_sqrt = DMatrix::identity(m, m);
    }

    /// Number of free variational scalars: mean plus lower triangle
    pub(crate) fn variational_len(&self) -> usize {
        let m = self.num_inducing();
        m + m * (m + 1) / 2
    }
}

/// A component/activation pair
#[derive(Debug, Clone)]
pub struct Source {
    pub component: Latent,
    pub activation: Latent,
}

impl Source {
    pub fn new(
        kern_com: Box<dyn Kernel>,
        z_com: Vec<f64>,
        kern_act: Box<dyn Kernel>,
        z_act: Vec<f64>,
    ) -> Self {
        Self {
            component: Latent::new(kern_com, z_com),
            activation: Latent::new(kern_act, z_act),
        }
    }

    pub fn latent(&self, kind: LatentKind) -> &Latent {
        match kind {
            LatentKind::Component => &self.component,
            LatentKind::Activation => &self.activation,
        }
    }

    pub fn latent_mut(&mut self, kind: LatentKind) -> &mut Latent {
        match kind {
            LatentKind::Component => &mut self.component,
            LatentKind::Activation => &mut self.activation,
        }
    }
}
