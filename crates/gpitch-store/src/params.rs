//! Directory of learnt kernel parameters, one JSON file per pitch

use crate::check_pitch_id;
use anyhow::Context;
use gpitch_core::PitchKernelParams;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// JSON store for [`PitchKernelParams`] keyed by pitch identifier
pub struct KernelParamStore {
    dir: PathBuf,
}

impl KernelParamStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create parameter directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, pitch_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", pitch_id))
    }

    pub fn contains(&self, pitch_id: &str) -> bool {
        self.path_for(pitch_id).is_file()
    }

    /// Write the parameters under `params.pitch`, replacing any previous file
    pub fn save(&self, params: &PitchKernelParams) -> anyhow::Result<PathBuf> {
        check_pitch_id(&params.pitch)?;
        let path = self.path_for(&params.pitch);
        let json = serde_json::to_string_pretty(params)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write kernel parameters: {}", path.display()))?;
        info!(
            "Saved {} partials for {} to {}",
            params.frequency.len(),
            params.pitch,
            path.display()
        );
        Ok(path)
    }

    pub fn load(&self, pitch_id: &str) -> anyhow::Result<PitchKernelParams> {
        check_pitch_id(pitch_id)?;
        let path = self.path_for(pitch_id);
        if !path.is_file() {
            anyhow::bail!("No kernel parameters for {} in {}", pitch_id, self.dir.display());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read kernel parameters: {}", path.display()))?;
        let params: PitchKernelParams = serde_json::from_str(&content)
            .with_context(|| format!("Malformed kernel parameters: {}", path.display()))?;
        if params.energy.len() != params.frequency.len() {
            anyhow::bail!(
                "{}: {} energies for {} frequencies",
                path.display(),
                params.energy.len(),
                params.frequency.len()
            );
        }
        debug!("Loaded kernel parameters for {}", pitch_id);
        Ok(params)
    }

    /// Stored pitch identifiers, sorted
    pub fn list(&self) -> anyhow::Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = crate::pitch_id_from_path(&path) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load every requested pitch, in order
    pub fn load_all(&self, pitch_ids: &[String]) -> anyhow::Result<Vec<PitchKernelParams>> {
        pitch_ids.iter().map(|id| self.load(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pitch: &str) -> PitchKernelParams {
        PitchKernelParams {
            pitch: pitch.to_string(),
            lengthscale: 0.05,
            energy: vec![0.7, 0.3],
            frequency: vec![440.0, 880.5],
            kernel_x: vec![0.0, 1.0 / 16000.0],
            kernel_values: vec![1.0, 0.9],
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = KernelParamStore::new(dir.path()).unwrap();
        let p = params("M69");
        let path = store.save(&p).unwrap();
        assert!(path.ends_with("M69.json"));
        assert!(store.contains("M69"));
        assert_eq!(store.load("M69").unwrap(), p);
    }

    #[test]
    fn test_list_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = KernelParamStore::new(dir.path().join("nested")).unwrap();
        store.save(&params("M76")).unwrap();
        store.save(&params("M60")).unwrap();
        fs::write(store.dir().join("notes.txt"), "x").unwrap();
        assert_eq!(store.list().unwrap(), vec!["M60".to_string(), "M76".to_string()]);

        let all = store.load_all(&["M76".to_string()]).unwrap();
        assert_eq!(all[0].pitch, "M76");
    }

    #[test]
    fn test_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let store = KernelParamStore::new(dir.path()).unwrap();
        assert!(store.load("M69").is_err());

        fs::write(dir.path().join("M61.json"), "{\"pitch\": 1}").unwrap();
        assert!(store.load("M61").is_err());

        let mut bad = params("M62");
        bad.energy.pop();
        store.save(&bad).unwrap();
        assert!(store.load("M62").is_err());
    }
}
