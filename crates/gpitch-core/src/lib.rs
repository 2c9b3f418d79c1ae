//! gpitch core - Gaussian-process source decomposition of music
//!
//! Each pitch is modelled as a quasi-periodic component modulated by a
//! smooth activation, y = sum_k logistic(g_k) * f_k + noise, and fitted per
//! analysis window with sparse variational inference.

pub mod config;
pub mod context;
pub mod error;
pub mod init;
pub mod kernels;
pub mod likelihood;
pub mod model;
pub mod optim;
pub mod params;
pub mod transcription;
pub mod window;

pub use config::TranscriptionConfig;
pub use context::ExecutionContext;
pub use error::{GpError, Result};
pub use init::{init_cparam, PitchKernelParams};
pub use kernels::Kernel;
pub use model::{LatentRef, LooGp, ModGp, ModelOptions, ModulatedGp, Prediction};
pub use optim::{optimize, optimize_restart, optimize_svi, OptimizationTrace};
pub use params::{Parameter, Transform};
pub use transcription::{Transcriber, Transcription, WindowState};
