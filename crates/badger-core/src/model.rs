//! The trained model artifact and its on-disk store.
//!
//! Exactly one artifact exists at a time, at a fixed configured path. Every
//! retrain fully overwrites it; the swap is a temp-file write followed by a
//! rename so a concurrent reader sees either the old or the new artifact,
//! never a partial one.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Feature centroid for one internal label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassCentroid {
    /// 0-based internal label.
    pub label: u32,
    /// Number of reference images that contributed.
    pub samples: usize,
    /// Unit-length feature centroid.
    pub centroid: Vec<f32>,
}

/// Summary of the gallery's feature statistics, produced by the recognizer
/// training capability and consumed by prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionModel {
    pub format_version: u32,
    pub feature_dim: usize,
    pub classes: Vec<ClassCentroid>,
}

impl RecognitionModel {
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }
}

#[derive(Error, Debug)]
pub enum ModelStoreError {
    #[error("model artifact i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("model artifact is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Owner of the single persisted model artifact.
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current artifact; `None` when nothing has been trained yet.
    pub fn load(&self) -> Result<Option<RecognitionModel>, ModelStoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Atomically replace the artifact with `model`.
    pub fn replace(&self, model: &RecognitionModel) -> Result<(), ModelStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(model)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
