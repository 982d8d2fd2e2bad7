//! Deterministic capability backend for tests, demos and development.
//!
//! No model files: the detector reports one full-frame region for any image
//! with visible texture, and the recognizer derives features from a 4×4
//! brightness grid. Useful for exercising the full enroll → train → match
//! pipeline without ONNX assets; the detection tunables have no effect here.

use crate::detector::{DetectorError, FaceDetector};
use crate::model::RecognitionModel;
use crate::recognizer::{build_model, l2_normalize, nearest_class, Recognizer, RecognizerError};
use crate::types::{DetectionParams, FaceRegion, Prediction};
use image::GrayImage;

const GRID: u32 = 4;
/// Brightness standard deviation below which a frame counts as empty scene.
const MIN_STDDEV: f32 = 1.0;

/// Mock detector: one full-frame region for any textured image, nothing for
/// a flat one.
#[derive(Debug, Default)]
pub struct MockFaceDetector;

impl FaceDetector for MockFaceDetector {
    fn detect(
        &mut self,
        image: &GrayImage,
        _params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        if brightness_stddev(image) < MIN_STDDEV {
            return Ok(Vec::new());
        }
        Ok(vec![FaceRegion {
            x: 0,
            y: 0,
            width: image.width(),
            height: image.height(),
            score: 1.0,
        }])
    }
}

/// Mock recognizer over brightness-grid features.
#[derive(Debug, Default)]
pub struct MockRecognizer;

impl Recognizer for MockRecognizer {
    fn train(&mut self, samples: &[(GrayImage, u32)]) -> Result<RecognitionModel, RecognizerError> {
        if samples.is_empty() {
            return Err(RecognizerError::EmptySampleSet);
        }
        let embeddings = samples
            .iter()
            .map(|(image, label)| (*label, grid_features(image)))
            .collect();
        build_model(embeddings)
    }

    fn predict(
        &mut self,
        model: &RecognitionModel,
        face: &GrayImage,
    ) -> Result<Prediction, RecognizerError> {
        nearest_class(model, &grid_features(face))
    }
}

fn brightness_stddev(image: &GrayImage) -> f32 {
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let n = pixels.len() as f32;
    let mean = pixels.iter().map(|&p| p as f32).sum::<f32>() / n;
    let variance = pixels
        .iter()
        .map(|&p| (p as f32 - mean).powi(2))
        .sum::<f32>()
        / n;
    variance.sqrt()
}

/// Mean brightness per cell of a 4×4 grid, L2-normalized.
fn grid_features(image: &GrayImage) -> Vec<f32> {
    let mut features = vec![0.0f32; (GRID * GRID) as usize];
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return features;
    }

    let mut counts = vec![0u32; features.len()];
    for (x, y, pixel) in image.enumerate_pixels() {
        let cell_x = (x * GRID / width).min(GRID - 1);
        let cell_y = (y * GRID / height).min(GRID - 1);
        let idx = (cell_y * GRID + cell_x) as usize;
        features[idx] += pixel.0[0] as f32 / 255.0;
        counts[idx] += 1;
    }
    for (f, c) in features.iter_mut().zip(counts) {
        if c > 0 {
            *f /= c as f32;
        }
    }

    l2_normalize(&mut features);
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::CONFIDENCE_SCALE;
    use image::Luma;

    /// Image whose right half is bright.
    fn right_bright(brightness: u8) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, _| {
            Luma([if x >= 32 { brightness } else { 0 }])
        })
    }

    /// Image whose left half is bright.
    fn left_bright() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, _| Luma([if x < 32 { 255 } else { 0 }]))
    }

    #[test]
    fn test_flat_image_has_no_face() {
        let mut detector = MockFaceDetector;
        let flat = GrayImage::from_pixel(64, 64, Luma([90u8]));
        let regions = detector
            .detect(&flat, &DetectionParams::default())
            .unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn test_textured_image_yields_full_frame_region() {
        let mut detector = MockFaceDetector;
        let regions = detector
            .detect(&right_bright(255), &DetectionParams::default())
            .unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!((regions[0].width, regions[0].height), (64, 64));
    }

    #[test]
    fn test_train_and_predict_round_trip() {
        let mut recognizer = MockRecognizer;
        let model = recognizer
            .train(&[(right_bright(255), 0), (left_bright(), 1)])
            .unwrap();

        let hit = recognizer.predict(&model, &right_bright(255)).unwrap();
        assert_eq!(hit.label, 0);
        assert!(hit.confidence < 1.0);

        let other = recognizer.predict(&model, &left_bright()).unwrap();
        assert_eq!(other.label, 1);
    }

    #[test]
    fn test_confidence_monotonicity() {
        let mut recognizer = MockRecognizer;
        let model = recognizer.train(&[(right_bright(255), 0)]).unwrap();

        // A probe closer in appearance to the enrolled reference scores a
        // confidence no worse (lower is better) than a dissimilar one.
        let near = recognizer.predict(&model, &right_bright(230)).unwrap();
        let far = recognizer.predict(&model, &left_bright()).unwrap();
        assert!(near.confidence <= far.confidence);
        assert!(far.confidence > CONFIDENCE_SCALE);
    }
}
