//! Identity decision for a probe image.

use crate::detector::{DetectorError, FaceDetector};
use crate::model::RecognitionModel;
use crate::recognizer::{crop_region, Recognizer, RecognizerError};
use crate::types::{DetectionParams, EmployeeId, MatchDecision, Prediction};
use image::GrayImage;
use thiserror::Error;

/// Fixed accept threshold: a region matches when its confidence (distance)
/// is strictly below this.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 100.0;

/// How detected regions are turned into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Accept the first region scoring under the threshold, in detector
    /// order, even if a later region would score better.
    #[default]
    FirstAcceptable,
    /// Score every region and accept the best one if it is under the
    /// threshold.
    BestOfAll,
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(MatchPolicy::FirstAcceptable),
            "best" => Ok(MatchPolicy::BestOfAll),
            other => Err(format!("unknown match policy {other:?} (expected \"first\" or \"best\")")),
        }
    }
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

/// Stateless decision policy over the detection and prediction capabilities.
pub struct Matcher {
    pub threshold: f32,
    pub policy: MatchPolicy,
    pub detection: DetectionParams,
}

impl Matcher {
    pub fn new(threshold: f32, policy: MatchPolicy, detection: DetectionParams) -> Self {
        Self {
            threshold,
            policy,
            detection,
        }
    }

    /// Decide an identity for `probe` against `model`.
    pub fn identify(
        &self,
        probe: &GrayImage,
        model: &RecognitionModel,
        detector: &mut dyn FaceDetector,
        recognizer: &mut dyn Recognizer,
    ) -> Result<MatchDecision, MatchError> {
        let regions = detector.detect(probe, &self.detection)?;
        if regions.is_empty() {
            return Ok(MatchDecision::NoFaceDetected);
        }

        let mut best: Option<Prediction> = None;
        for region in &regions {
            let face = crop_region(probe, region);
            let prediction = recognizer.predict(model, &face)?;
            tracing::debug!(
                label = prediction.label,
                confidence = prediction.confidence,
                "scored face region"
            );

            if self.policy == MatchPolicy::FirstAcceptable && prediction.confidence < self.threshold
            {
                return Ok(MatchDecision::Match {
                    identity: EmployeeId::from_internal(prediction.label),
                    confidence: prediction.confidence,
                });
            }
            if best.map_or(true, |b| prediction.confidence < b.confidence) {
                best = Some(prediction);
            }
        }

        match best {
            Some(best) if best.confidence < self.threshold => Ok(MatchDecision::Match {
                identity: EmployeeId::from_internal(best.label),
                confidence: best.confidence,
            }),
            Some(best) => Ok(MatchDecision::NoMatchFound {
                best_confidence: Some(best.confidence),
            }),
            None => Ok(MatchDecision::NoMatchFound {
                best_confidence: None,
            }),
        }
    }
}
