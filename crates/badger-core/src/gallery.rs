//! On-disk organization of reference photos, one directory per identity.
//!
//! Layout under the photo root:
//!
//! ```text
//! photos/
//!   employee_1/20250811T093012412_9f2c...jpg
//!   employee_2/...
//! ```
//!
//! Entries that do not parse as identity directories are skipped during
//! enumeration, never reported as errors.

use crate::types::EmployeeId;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("no photos enrolled for {0}")]
    NotFound(EmployeeId),
    #[error("photo storage failed: {0}")]
    Storage(#[from] std::io::Error),
}

/// Durable store of reference photos keyed by identity.
pub struct GalleryStore {
    root: PathBuf,
}

impl GalleryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a reference photo for `id`, replacing any previously enrolled
    /// photos for that identity.
    ///
    /// The filename is time-based with a random suffix so repeated
    /// enrollments can never collide. Returns the path written.
    pub fn enroll(&self, id: EmployeeId, image: &[u8]) -> Result<PathBuf, GalleryError> {
        fs::create_dir_all(&self.root)?;

        let dir = self.root.join(id.dir_name());
        if dir.exists() {
            // Replace semantics: prior reference photos are discarded.
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir(&dir)?;

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let path = dir.join(format!("{stamp}_{}.jpg", uuid::Uuid::new_v4().simple()));
        fs::write(&path, image)?;

        tracing::info!(identity = %id, path = %path.display(), "photo enrolled");
        Ok(path)
    }

    /// Every identity discoverable on disk, with its photo paths, ordered by
    /// external label.
    ///
    /// A missing photo root is created, not an error. Non-directories and
    /// entries whose names do not parse as identity labels are skipped.
    pub fn enumerate_all(&self) -> Result<Vec<(EmployeeId, Vec<PathBuf>)>, GalleryError> {
        fs::create_dir_all(&self.root)?;

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(EmployeeId::from_dir_name) else {
                tracing::debug!(
                    entry = %name.to_string_lossy(),
                    "skipping entry that is not an identity directory"
                );
                continue;
            };
            entries.push((id, Self::list_photos(&entry.path())?));
        }

        entries.sort_by_key(|(id, _)| id.external());
        Ok(entries)
    }

    /// Photo paths for a single identity. `NotFound` if the identity has no
    /// directory.
    pub fn enumerate_one(&self, id: EmployeeId) -> Result<Vec<PathBuf>, GalleryError> {
        let dir = self.root.join(id.dir_name());
        if !dir.is_dir() {
            return Err(GalleryError::NotFound(id));
        }
        Self::list_photos(&dir)
    }

    fn list_photos(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
        let mut photos = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                photos.push(entry.path());
            }
        }
        photos.sort();
        Ok(photos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, GalleryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("photos"));
        (dir, store)
    }

    fn id(n: u32) -> EmployeeId {
        EmployeeId::new(n).unwrap()
    }

    #[test]
    fn test_enroll_creates_root_and_identity_dir() {
        let (_tmp, store) = store();
        let path = store.enroll(id(1), b"bytes").unwrap();
        assert!(path.starts_with(store.root().join("employee_1")));
        assert_eq!(fs::read(&path).unwrap(), b"bytes");
    }

    #[test]
    fn test_enroll_replaces_prior_photos() {
        let (_tmp, store) = store();
        let first = store.enroll(id(1), b"old").unwrap();
        let second = store.enroll(id(1), b"new").unwrap();

        assert!(!first.exists(), "prior photo should be discarded");
        let photos = store.enumerate_one(id(1)).unwrap();
        assert_eq!(photos, vec![second]);
    }

    #[test]
    fn test_enumerate_all_skips_foreign_entries() {
        let (_tmp, store) = store();
        store.enroll(id(2), b"b").unwrap();
        store.enroll(id(1), b"a").unwrap();
        fs::create_dir_all(store.root().join("visitor_1")).unwrap();
        fs::create_dir_all(store.root().join("employee_oops")).unwrap();
        fs::write(store.root().join("stray.txt"), b"x").unwrap();

        let all = store.enumerate_all().unwrap();
        let ids: Vec<u32> = all.iter().map(|(id, _)| id.external()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_enumerate_all_on_missing_root_is_empty() {
        let (_tmp, store) = store();
        assert!(store.enumerate_all().unwrap().is_empty());
        assert!(store.root().is_dir(), "root should have been created");
    }

    #[test]
    fn test_enumerate_one_missing_identity() {
        let (_tmp, store) = store();
        store.enroll(id(1), b"a").unwrap();
        assert!(matches!(
            store.enumerate_one(id(9)),
            Err(GalleryError::NotFound(missing)) if missing.external() == 9
        ));
    }
}
