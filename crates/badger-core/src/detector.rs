//! Face-region detection.
//!
//! [`FaceDetector`] is the capability contract; [`OnnxFaceDetector`] is the
//! bundled backend, running a single-output face detection model
//! (`[1, 5, N]` = cx, cy, w, h, score in input space) via ONNX Runtime with
//! letterbox preprocessing and vote-counting NMS.

use crate::types::{DetectionParams, FaceRegion};
use image::{imageops, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_INPUT_SIZE: usize = 640;
const DETECTOR_MEAN: f32 = 127.5;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_SCORE_THRESHOLD: f32 = 0.5;
const DETECTOR_NMS_IOU: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model file not found: {0}")]
    ModelNotFound(String),
    #[error("detection inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face-region detection capability.
///
/// Returns the detected regions in the detector's own order (strongest
/// first); an empty result means no face, not an error.
pub trait FaceDetector {
    fn detect(
        &mut self,
        image: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Coordinate mapping for letterbox preprocessing.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Fit a `width` × `height` frame into the square model input.
///
/// Downscaling is unbounded; upscaling of small sources is capped at
/// `max_upscale` to avoid feeding the model pure interpolation blur.
fn letterbox_for(width: u32, height: u32, input: usize, max_upscale: f32) -> Letterbox {
    let scale_w = input as f32 / width as f32;
    let scale_h = input as f32 / height as f32;
    let scale = scale_w.min(scale_h).min(max_upscale.max(1.0));

    let new_w = (width as f32 * scale).round();
    let new_h = (height as f32 * scale).round();
    Letterbox {
        scale,
        pad_x: (input as f32 - new_w) / 2.0,
        pad_y: (input as f32 - new_h) / 2.0,
    }
}

/// ONNX-backed face detector.
pub struct OnnxFaceDetector {
    session: Session,
    input_size: usize,
}

impl OnnxFaceDetector {
    /// Load the detection ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name().to_string()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        Ok(Self {
            session,
            input_size: DETECTOR_INPUT_SIZE,
        })
    }

    /// Resize + pad the grayscale frame into a normalized NCHW tensor.
    fn preprocess(&self, image: &GrayImage, letterbox: &Letterbox) -> Array4<f32> {
        let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).max(1);
        let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).max(1);
        let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);

        let pad_x = letterbox.pad_x.floor() as usize;
        let pad_y = letterbox.pad_y.floor() as usize;

        let mut tensor = Array4::<f32>::zeros((1, 3, self.input_size, self.input_size));
        for y in 0..self.input_size {
            for x in 0..self.input_size {
                let inside_x = x >= pad_x && x < pad_x + new_w as usize;
                let inside_y = y >= pad_y && y < pad_y + new_h as usize;
                let pixel = if inside_x && inside_y {
                    resized.get_pixel((x - pad_x) as u32, (y - pad_y) as u32).0[0] as f32
                } else {
                    DETECTOR_MEAN // pad value normalizes to 0.0
                };

                let normalized = (pixel - DETECTOR_MEAN) / DETECTOR_STD;
                // Grayscale → 3-channel: replicate Y into R, G, B.
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }
        tensor
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(
        &mut self,
        image: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        let letterbox = letterbox_for(
            image.width(),
            image.height(),
            self.input_size,
            params.scale_factor,
        );
        let input = self.preprocess(image, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detection output: {e}")))?;
        let dims: Vec<usize> = shape.as_ref().iter().map(|&d| d as usize).collect();
        if dims.len() != 3 || dims[1] != 5 {
            return Err(DetectorError::InferenceFailed(format!(
                "expected [1, 5, N] detection output, got {dims:?}"
            )));
        }

        let raw = decode_output(
            data,
            dims[2],
            &letterbox,
            DETECTOR_SCORE_THRESHOLD,
            image.width(),
            image.height(),
        );

        Ok(nms(raw, DETECTOR_NMS_IOU, params.min_neighbors))
    }
}

/// Decode a `[1, 5, N]` (cx, cy, w, h, score) tensor laid out plane-major,
/// mapping boxes from letterboxed input space back into frame space.
fn decode_output(
    data: &[f32],
    count: usize,
    letterbox: &Letterbox,
    score_threshold: f32,
    frame_w: u32,
    frame_h: u32,
) -> Vec<FaceRegion> {
    let mut regions = Vec::new();
    for i in 0..count {
        let score = data[4 * count + i];
        if score <= score_threshold {
            continue;
        }

        let cx = data[i];
        let cy = data[count + i];
        let w = data[2 * count + i];
        let h = data[3 * count + i];

        let x1 = (cx - w / 2.0 - letterbox.pad_x) / letterbox.scale;
        let y1 = (cy - h / 2.0 - letterbox.pad_y) / letterbox.scale;
        let x2 = x1 + w / letterbox.scale;
        let y2 = y1 + h / letterbox.scale;

        let x1 = x1.clamp(0.0, frame_w as f32);
        let y1 = y1.clamp(0.0, frame_h as f32);
        let x2 = x2.clamp(0.0, frame_w as f32);
        let y2 = y2.clamp(0.0, frame_h as f32);

        let width = (x2 - x1).round() as u32;
        let height = (y2 - y1).round() as u32;
        if width == 0 || height == 0 {
            continue;
        }

        regions.push(FaceRegion {
            x: x1.round() as u32,
            y: y1.round() as u32,
            width,
            height,
            score,
        });
    }
    regions
}

/// Non-maximum suppression with a vote floor.
///
/// A kept region absorbs every raw detection overlapping it above
/// `iou_threshold`; regions backed by fewer than `min_votes` raw detections
/// (the suppressed neighbors plus the region itself) are discarded. Output is
/// ordered strongest score first.
fn nms(mut detections: Vec<FaceRegion>, iou_threshold: f32, min_votes: u32) -> Vec<FaceRegion> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::new();

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        let mut votes = 1u32;
        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
                votes += 1;
            }
        }
        if votes >= min_votes.max(1) {
            keep.push(detections[i]);
        }
    }

    keep
}

/// Intersection-over-union of two regions.
fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let x1 = a.x.max(b.x) as f32;
    let y1 = a.y.max(b.y) as f32;
    let x2 = ((a.x + a.width).min(b.x + b.width)) as f32;
    let y2 = ((a.y + a.height).min(b.y + b.height)) as f32;

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = (a.width * a.height) as f32 + (b.width * b.height) as f32 - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
