//! Binary store of sampled covariance matrices used as kernel targets

use crate::check_pitch_id;
use anyhow::Context;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Row-major dense matrix tagged with the pitch it was measured on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceSample {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl CovarianceSample {
    pub fn new(name: impl Into<String>, rows: usize, cols: usize, data: Vec<f64>) -> anyhow::Result<Self> {
        if rows * cols != data.len() {
            anyhow::bail!("{}x{} matrix given {} values", rows, cols, data.len());
        }
        Ok(Self {
            name: name.into(),
            rows,
            cols,
            data,
        })
    }

    /// Stationary covariance from a sampled kernel k(0..n): K[i][j] = k(|i - j|)
    pub fn toeplitz(name: impl Into<String>, kernel_values: &[f64]) -> Self {
        let n = kernel_values.len();
        let mut data = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                data.push(kernel_values[i.abs_diff(j)]);
            }
        }
        Self {
            name: name.into(),
            rows: n,
            cols: n,
            data,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(row * self.cols + col).copied()
    }
}

/// bincode files `{name}_cov.bin` under one directory
pub struct CovarianceStore {
    dir: PathBuf,
}

impl CovarianceStore {
    pub fn new(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create covariance directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}_cov.bin", name))
    }

    pub fn save(&self, sample: &CovarianceSample) -> anyhow::Result<PathBuf> {
        check_pitch_id(&sample.name)?;
        let path = self.path_for(&sample.name);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        bincode::serialize_into(BufWriter::new(file), sample)
            .with_context(|| format!("Failed to encode covariance: {}", path.display()))?;
        info!("Saved {}x{} covariance to {}", sample.rows, sample.cols, path.display());
        Ok(path)
    }

    pub fn load(&self, name: &str) -> anyhow::Result<CovarianceSample> {
        check_pitch_id(name)?;
        let path = self.path_for(name);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let sample: CovarianceSample = bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("Failed to decode covariance: {}", path.display()))?;
        if sample.rows * sample.cols != sample.data.len() {
            anyhow::bail!("{}: corrupt matrix shape", path.display());
        }
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toeplitz_layout() {
        let s = CovarianceSample::toeplitz("M69", &[1.0, 0.5, 0.25]);
        assert_eq!(s.rows, 3);
        assert_eq!(s.get(0, 2), Some(0.25));
        assert_eq!(s.get(2, 1), Some(0.5));
        assert_eq!(s.get(1, 1), Some(1.0));
        assert_eq!(s.get(3, 0), None);
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CovarianceStore::new(dir.path()).unwrap();
        let s = CovarianceSample::toeplitz("M60", &[2.0, 1.0]);
        let path = store.save(&s).unwrap();
        assert!(path.ends_with("M60_cov.bin"));
        assert_eq!(store.load("M60").unwrap(), s);
        assert!(store.load("M61").is_err());
    }

    #[test]
    fn test_shape_checked() {
        assert!(CovarianceSample::new("M60", 2, 2, vec![1.0; 3]).is_err());
        assert!(CovarianceSample::new("M60", 1, 3, vec![1.0; 3]).is_ok());
    }
}
