use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::debug;

use crate::config::MappingConfig;
use crate::error::KiraError;
use crate::snapshot::AnnotationSnapshot;

/// Built snapshots on disk, one JSON file per job under `<cache_dir>/snapshots`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: Utf8PathBuf,
}

impl SnapshotStore {
    pub fn new(cache_dir: &Utf8Path) -> Self {
        Self {
            root: cache_dir.join("snapshots"),
        }
    }

    pub fn from_config(config: &MappingConfig) -> Self {
        Self::new(&config.cache_dir)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn snapshot_path(&self, job_id: &str) -> Result<Utf8PathBuf, KiraError> {
        validate_job_id(job_id)?;
        Ok(self.root.join(format!("{job_id}.json")))
    }

    pub fn exists(&self, job_id: &str) -> bool {
        self.snapshot_path(job_id)
            .map(|path| path.as_std_path().is_file())
            .unwrap_or(false)
    }

    pub fn ensure_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    /// Writes through a temp file in the same directory, so readers never
    /// see a partial snapshot.
    pub fn save(
        &self,
        job_id: &str,
        snapshot: &AnnotationSnapshot,
    ) -> Result<Utf8PathBuf, KiraError> {
        let path = self.snapshot_path(job_id)?;
        self.ensure_root()?;

        let content = serde_json::to_vec_pretty(snapshot)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("kira-vm-snapshot")
            .suffix(".tmp")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        debug!(path = %path, bytes = content.len(), "snapshot written");
        Ok(path)
    }

    pub fn load(&self, job_id: &str) -> Result<AnnotationSnapshot, KiraError> {
        let path = self.snapshot_path(job_id)?;
        if !path.as_std_path().is_file() {
            return Err(KiraError::SnapshotNotFound(job_id.to_string()));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::Filesystem(format!("{path}: {err}")))
    }

    pub fn remove(&self, job_id: &str) -> Result<bool, KiraError> {
        let path = self.snapshot_path(job_id)?;
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(true)
    }
}

/// Job ids become file names.
fn validate_job_id(job_id: &str) -> Result<(), KiraError> {
    let is_valid = !job_id.is_empty()
        && job_id != "."
        && job_id != ".."
        && job_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
    if !is_valid {
        return Err(KiraError::InvalidJob(format!("invalid job id: {job_id}")));
    }
    Ok(())
}
