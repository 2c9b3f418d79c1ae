//! Persistence of per-pitch kernel parameters and covariance samples
//!
//! Both stores are plain directories with one file per pitch, keyed by the
//! pitch identifier derived from the training file name.

pub mod covariance;
pub mod params;

pub use covariance::{CovarianceSample, CovarianceStore};
pub use params::KernelParamStore;

use std::path::Path;

/// Pitch identifier of a training file: its name without extension
pub fn pitch_id_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

fn check_pitch_id(pitch_id: &str) -> anyhow::Result<()> {
    if pitch_id.is_empty() || pitch_id.contains(['/', '\\']) || pitch_id.starts_with('.') {
        anyhow::bail!("Invalid pitch identifier: {:?}", pitch_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_id_strips_extension() {
        let id = pitch_id_from_path(Path::new("/data/ISOL/NO/MAPS_ISOL_NO_F_S0_M60_AkPnBcht.wav"));
        assert_eq!(id.as_deref(), Some("MAPS_ISOL_NO_F_S0_M60_AkPnBcht"));
    }

    #[test]
    fn test_rejects_path_like_ids() {
        assert!(check_pitch_id("M60").is_ok());
        assert!(check_pitch_id("../M60").is_err());
        assert!(check_pitch_id("").is_err());
    }
}
