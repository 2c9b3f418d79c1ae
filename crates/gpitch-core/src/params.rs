//! Constrained model parameters
//!
//! Every hyperparameter is stored as an unconstrained `raw` value and mapped
//! through a monotonic transform. The optimizer only ever sees `raw`, and it
//! only touches parameters whose `trainable` flag is set.

use crate::error::{GpError, Result};
use serde::{Deserialize, Serialize};

/// Lower bound added by the positive transform
pub const POSITIVE_LOWER: f64 = 1e-6;

/// Mapping from the unconstrained optimizer space to the parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    /// softplus(raw) + 1e-6
    Positive,
    Identity,
}

impl Transform {
    pub fn forward(self, raw: f64) -> f64 {
        match self {
            Transform::Positive => softplus(raw) + POSITIVE_LOWER,
            Transform::Identity => raw,
        }
    }

    pub fn backward(self, value: f64) -> Option<f64> {
        match self {
            Transform::Positive => {
                let shifted = value - POSITIVE_LOWER;
                if shifted > 0.0 && shifted.is_finite() {
                    Some(softplus_inv(shifted))
                } else {
                    None
                }
            }
            Transform::Identity => value.is_finite().then_some(value),
        }
    }
}

/// Numerically stable log(1 + exp(x))
pub fn softplus(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else if x < -30.0 {
        x.exp()
    } else {
        x.exp().ln_1p()
    }
}

/// Inverse of [`softplus`] for y > 0
pub fn softplus_inv(y: f64) -> f64 {
    if y > 30.0 {
        y
    } else {
        y.exp_m1().ln()
    }
}

/// Logistic sigmoid
pub fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// A single scalar hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    raw: f64,
    pub transform: Transform,
    pub trainable: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64, transform: Transform) -> Result<Self> {
        let name = name.into();
        let raw = transform.backward(value).ok_or_else(|| GpError::InvalidParameter {
            name: name.clone(),
            value,
            reason: domain_reason(transform),
        })?;
        Ok(Self {
            name,
            raw,
            transform,
            trainable: true,
        })
    }

    pub fn positive(name: impl Into<String>, value: f64) -> Result<Self> {
        Self::new(name, value, Transform::Positive)
    }

    pub fn value(&self) -> f64 {
        self.transform.forward(self.raw)
    }

    pub fn set_value(&mut self, value: f64) -> Result<()> {
        self.raw = self
            .transform
            .backward(value)
            .ok_or_else(|| GpError::InvalidParameter {
                name: self.name.clone(),
                value,
                reason: domain_reason(self.transform),
            })?;
        Ok(())
    }

    pub fn raw(&self) -> f64 {
        self.raw
    }

    pub fn set_raw(&mut self, raw: f64) {
        self.raw = raw;
    }

    pub fn fix(&mut self) {
        self.trainable = false;
    }

    pub fn free(&mut self) {
        self.trainable = true;
    }

    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }
}

fn domain_reason(transform: Transform) -> &'static str {
    match transform {
        Transform::Positive => "must be finite and greater than the positive lower bound",
        Transform::Identity => "must be finite",
    }
}

/// Set the trainable flag of every parameter in the group
pub fn set_trainable<'a, I>(params: I, trainable: bool)
where
    I: IntoIterator<Item = &'a mut Parameter>,
{
    for p in params {
        p.trainable = trainable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_positive_round_trip() {
        for &v in &[1e-4, 0.05, 1.0, 440.0, 1e4] {
            let p = Parameter::positive("x", v).unwrap();
            assert_relative_eq!(p.value(), v, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_positive_rejects_non_positive() {
        assert!(Parameter::positive("variance", 0.0).is_err());
        assert!(Parameter::positive("variance", -1.0).is_err());
        assert!(Parameter::positive("variance", f64::NAN).is_err());
    }

    #[test]
    fn test_any_raw_maps_to_positive_value() {
        let mut p = Parameter::positive("lengthscale", 1.0).unwrap();
        for &raw in &[-100.0, -5.0, 0.0, 5.0, 100.0] {
            p.set_raw(raw);
            assert!(p.value() > 0.0);
        }
    }

    #[test]
    fn test_logistic_is_stable() {
        assert_relative_eq!(logistic(0.0), 0.5);
        assert!(logistic(-800.0) >= 0.0);
        assert!(logistic(800.0) <= 1.0);
    }
}
