//! Recognizer training and prediction.
//!
//! [`Recognizer`] is the capability contract: `train` condenses labeled face
//! rasters into a [`RecognitionModel`], `predict` returns the single nearest
//! label with a distance-like confidence. [`OnnxRecognizer`] is the bundled
//! backend, extracting L2-normalized embeddings from 112×112 crops via ONNX
//! Runtime and matching by nearest centroid.

use crate::model::{ClassCentroid, RecognitionModel, MODEL_FORMAT_VERSION};
use crate::types::{FaceRegion, Prediction};
use image::{imageops, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const EMBED_INPUT_SIZE: u32 = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;

/// Multiplier mapping the distance between unit-length feature vectors onto
/// the service's confidence scale: a confidence of 100 corresponds to a raw
/// distance of 1.0.
pub const CONFIDENCE_SCALE: f32 = 100.0;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("embedding model file not found: {0}")]
    ModelNotFound(String),
    #[error("embedding inference failed: {0}")]
    InferenceFailed(String),
    #[error("training requires at least one labeled image")]
    EmptySampleSet,
    #[error("trained model has no classes")]
    EmptyModel,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Recognizer capability: training and single-best-guess prediction.
pub trait Recognizer {
    /// Condense `(raster, internal label)` pairs into a model. At least one
    /// pair is required.
    fn train(&mut self, samples: &[(GrayImage, u32)]) -> Result<RecognitionModel, RecognizerError>;

    /// Nearest enrolled label for a cropped face, with a distance-like
    /// confidence (lower = stronger).
    fn predict(
        &mut self,
        model: &RecognitionModel,
        face: &GrayImage,
    ) -> Result<Prediction, RecognizerError>;
}

/// Crop a detected region out of the probe, clamped to the image bounds.
pub fn crop_region(image: &GrayImage, region: &FaceRegion) -> GrayImage {
    let x = region.x.min(image.width().saturating_sub(1));
    let y = region.y.min(image.height().saturating_sub(1));
    let width = region.width.clamp(1, image.width() - x);
    let height = region.height.clamp(1, image.height() - y);
    imageops::crop_imm(image, x, y, width, height).to_image()
}

pub(crate) fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

pub(crate) fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Average per-label embeddings into unit-length centroids.
///
/// Shared by every backend so the artifact format never depends on which
/// capability produced the features.
pub(crate) fn build_model(
    embeddings: Vec<(u32, Vec<f32>)>,
) -> Result<RecognitionModel, RecognizerError> {
    let Some(feature_dim) = embeddings.first().map(|(_, e)| e.len()) else {
        return Err(RecognizerError::EmptySampleSet);
    };

    // BTreeMap keeps class order deterministic across retrains.
    let mut sums: BTreeMap<u32, (Vec<f32>, usize)> = BTreeMap::new();
    for (label, embedding) in embeddings {
        let (sum, count) = sums
            .entry(label)
            .or_insert_with(|| (vec![0.0; feature_dim], 0));
        for (s, v) in sum.iter_mut().zip(embedding.iter()) {
            *s += v;
        }
        *count += 1;
    }

    let classes = sums
        .into_iter()
        .map(|(label, (mut sum, samples))| {
            for v in sum.iter_mut() {
                *v /= samples as f32;
            }
            // Renormalize so centroid distances share the per-sample scale.
            l2_normalize(&mut sum);
            ClassCentroid {
                label,
                samples,
                centroid: sum,
            }
        })
        .collect();

    Ok(RecognitionModel {
        format_version: MODEL_FORMAT_VERSION,
        feature_dim,
        classes,
    })
}

/// Nearest centroid by Euclidean distance, scaled to the confidence range.
pub(crate) fn nearest_class(
    model: &RecognitionModel,
    embedding: &[f32],
) -> Result<Prediction, RecognizerError> {
    let mut best: Option<Prediction> = None;
    for class in &model.classes {
        let confidence = euclidean(embedding, &class.centroid) * CONFIDENCE_SCALE;
        if best.map_or(true, |b| confidence < b.confidence) {
            best = Some(Prediction {
                label: class.label,
                confidence,
            });
        }
    }
    best.ok_or(RecognizerError::EmptyModel)
}

/// ONNX-backed embedding recognizer.
pub struct OnnxRecognizer {
    session: Session,
}

impl OnnxRecognizer {
    /// Load the face embedding ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded face embedding model"
        );

        Ok(Self { session })
    }

    /// Extract an L2-normalized embedding from a face crop.
    fn embed(&mut self, face: &GrayImage) -> Result<Vec<f32>, RecognizerError> {
        let input = preprocess(face);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding output: {e}")))?;

        if data.is_empty() {
            return Err(RecognizerError::InferenceFailed(
                "embedding output is empty".to_string(),
            ));
        }

        let mut embedding = data.to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

/// Resize a face crop to the embedding input and normalize into NCHW.
fn preprocess(face: &GrayImage) -> Array4<f32> {
    let resized = imageops::resize(
        face,
        EMBED_INPUT_SIZE,
        EMBED_INPUT_SIZE,
        imageops::FilterType::Triangle,
    );

    let size = EMBED_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let pixel = resized.get_pixel(x as u32, y as u32).0[0] as f32;
            let normalized = (pixel - EMBED_MEAN) / EMBED_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }
    tensor
}

impl Recognizer for OnnxRecognizer {
    fn train(&mut self, samples: &[(GrayImage, u32)]) -> Result<RecognitionModel, RecognizerError> {
        if samples.is_empty() {
            return Err(RecognizerError::EmptySampleSet);
        }
        let mut embeddings = Vec::with_capacity(samples.len());
        for (image, label) in samples {
            embeddings.push((*label, self.embed(image)?));
        }
        build_model(embeddings)
    }

    fn predict(
        &mut self,
        model: &RecognitionModel,
        face: &GrayImage,
    ) -> Result<Prediction, RecognizerError> {
        let embedding = self.embed(face)?;
        if embedding.len() != model.feature_dim {
            return Err(RecognizerError::InferenceFailed(format!(
                "embedding dimension {} does not match trained model dimension {}",
                embedding.len(),
                model.feature_dim
            )));
        }
        nearest_class(model, &embedding)
    }
}
