//! Building the trained model from the gallery.
//!
//! Failure tolerance is per-image: files that cannot be read or decoded are
//! logged and skipped. Only an entirely empty usable set is an error, and in
//! that case the caller's existing artifact is left untouched — the trainer
//! never persists anything itself.

use crate::gallery::{GalleryError, GalleryStore};
use crate::model::RecognitionModel;
use crate::recognizer::{Recognizer, RecognizerError};
use crate::types::{decode_grayscale, EmployeeId};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("no usable training images in the gallery")]
    EmptyTrainingSet,
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("recognizer training failed: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// What a training pass consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrainingReport {
    /// Identities that contributed at least one usable image.
    pub identities: usize,
    /// Images trained on.
    pub images: usize,
    /// Unreadable or undecodable files skipped.
    pub skipped: usize,
}

/// Rebuild the model from every identity in the gallery.
pub fn train_all(
    gallery: &GalleryStore,
    recognizer: &mut dyn Recognizer,
) -> Result<(RecognitionModel, TrainingReport), TrainError> {
    let mut samples = Vec::new();
    let mut identities = 0usize;
    let mut skipped = 0usize;

    for (id, paths) in gallery.enumerate_all()? {
        let before = samples.len();
        for path in paths {
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable photo");
                    skipped += 1;
                    continue;
                }
            };
            match decode_grayscale(&bytes) {
                Ok(image) => samples.push((image, id.internal())),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping undecodable photo");
                    skipped += 1;
                }
            }
        }
        if samples.len() > before {
            identities += 1;
        }
    }

    if samples.is_empty() {
        return Err(TrainError::EmptyTrainingSet);
    }

    let model = recognizer.train(&samples)?;
    let report = TrainingReport {
        identities,
        images: samples.len(),
        skipped,
    };
    tracing::info!(
        images = report.images,
        identities = report.identities,
        skipped = report.skipped,
        "training complete"
    );
    Ok((model, report))
}

/// Retrain triggered for a single identity.
///
/// The identity must exist in the gallery; the rebuild still covers the full
/// gallery so the shared artifact never loses other identities and the label
/// space stays consistent with prior training.
pub fn train_one(
    gallery: &GalleryStore,
    id: EmployeeId,
    recognizer: &mut dyn Recognizer,
) -> Result<(RecognitionModel, TrainingReport), TrainError> {
    gallery.enumerate_one(id)?;
    train_all(gallery, recognizer)
}
