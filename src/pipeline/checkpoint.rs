//! JSON checkpoint file for Pipeline State.
//!
//! Writes are optimistic: the store remembers the version it last wrote (or
//! loaded) and refuses to overwrite a file that some other writer changed
//! in the meantime. A store is bound to one job on first save (or on
//! `open`) and refuses state from any other job.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::state::PipelineState;
use crate::errors::CheckpointError;

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    /// Version this store last saw on disk; `None` for a fresh file.
    last_version: Option<u64>,
    /// Job this store writes for; `None` until the first save.
    job_id: Option<String>,
}

/// Just enough of the file to compare versions and owners.
#[derive(Deserialize)]
struct CheckpointHeader {
    version: u64,
    job_id: String,
}

impl CheckpointStore {
    /// A store for a new job. Fails on save if the file already holds state.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_version: None,
            job_id: None,
        }
    }

    /// Load existing state and return a store that may continue writing it.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Self, PipelineState), CheckpointError> {
        let path = path.into();
        let state = Self::load(&path)?;
        let store = Self {
            path,
            last_version: Some(state.version),
            job_id: Some(state.job_id.clone()),
        };
        Ok((store, state))
    }

    pub fn load(path: &Path) -> Result<PipelineState, CheckpointError> {
        let content = fs::read_to_string(path).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| CheckpointError::Serde {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_version(&self) -> Option<u64> {
        self.last_version
    }

    /// The job this store is bound to, once it has saved or opened state.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    fn job_mismatch(&self, owner: &str, job_id: &str) -> CheckpointError {
        CheckpointError::JobMismatch {
            path: self.path.clone(),
            owner: owner.to_string(),
            job_id: job_id.to_string(),
        }
    }

    fn on_disk(&self) -> Result<Option<CheckpointHeader>, CheckpointError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;
        let header = serde_json::from_str(&content).map_err(|source| CheckpointError::Serde {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(header))
    }

    /// Write `state`, failing with `JobMismatch` if the store or the file
    /// belongs to another job and with `StaleVersion` if the file changed
    /// since this store last touched it.
    pub fn save(&mut self, state: &PipelineState) -> Result<(), CheckpointError> {
        if let Some(owner) = &self.job_id
            && *owner != state.job_id
        {
            return Err(self.job_mismatch(owner, &state.job_id));
        }
        if let Some(found) = self.on_disk()? {
            if found.job_id != state.job_id {
                return Err(self.job_mismatch(&found.job_id, &state.job_id));
            }
            if self.last_version != Some(found.version) {
                return Err(CheckpointError::StaleVersion {
                    expected: self.last_version,
                    found: found.version,
                });
            }
        }

        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(state).map_err(|source| CheckpointError::Serde {
            path: self.path.clone(),
            source,
        })?;
        // Write to a sibling then rename so readers never see a partial file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        self.last_version = Some(state.version);
        self.job_id = Some(state.job_id.clone());
        Ok(())
    }
}
