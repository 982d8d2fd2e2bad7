use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory name prefix for an enrolled identity under the photo root.
pub const EMPLOYEE_DIR_PREFIX: &str = "employee_";

/// An enrolled person, addressed externally as `employee_<N>` (1-based).
///
/// The recognizer trains on the 0-based internal label `N - 1`; both
/// directions of the mapping live here so training and prediction can never
/// disagree about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmployeeId(u32);

impl EmployeeId {
    /// External (1-based) label. Returns `None` for zero.
    pub fn new(external: u32) -> Option<Self> {
        (external > 0).then_some(Self(external))
    }

    /// The identity the recognizer reports for an internal label.
    pub fn from_internal(label: u32) -> Self {
        Self(label + 1)
    }

    pub fn external(&self) -> u32 {
        self.0
    }

    /// 0-based label handed to the recognizer training capability.
    pub fn internal(&self) -> u32 {
        self.0 - 1
    }

    /// Gallery directory name, e.g. `employee_7`.
    pub fn dir_name(&self) -> String {
        format!("{EMPLOYEE_DIR_PREFIX}{}", self.0)
    }

    /// Validating parse of a gallery directory name.
    ///
    /// Anything that is not `employee_<positive integer>` yields `None` and is
    /// skipped by enumeration rather than treated as an error.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let suffix = name.strip_prefix(EMPLOYEE_DIR_PREFIX)?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse::<u32>().ok().and_then(Self::new)
    }
}

impl std::fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{EMPLOYEE_DIR_PREFIX}{}", self.0)
    }
}

/// Rectangular face region reported by the detection capability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector score in [0, 1]. Unrelated to the match confidence, which is
    /// distance-like.
    pub score: f32,
}

/// Tunables forwarded to the face-region detection capability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    pub scale_factor: f32,
    pub min_neighbors: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.3,
            min_neighbors: 5,
        }
    }
}

/// Single best guess from the recognizer prediction capability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// 0-based internal label.
    pub label: u32,
    /// Distance-like score; lower is a stronger match.
    pub confidence: f32,
}

/// Outcome of scoring a probe image.
///
/// The two negative outcomes are deliberately distinct: a photo with no
/// detectable face is bad input, a photo whose faces all score at or above
/// the threshold is a weak match.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    Match {
        identity: EmployeeId,
        confidence: f32,
    },
    NoFaceDetected,
    NoMatchFound {
        /// Best (lowest) confidence observed across all regions, if any.
        best_confidence: Option<f32>,
    },
}

impl MatchDecision {
    pub fn matched(&self) -> bool {
        matches!(self, MatchDecision::Match { .. })
    }

    pub fn identity(&self) -> Option<EmployeeId> {
        match self {
            MatchDecision::Match { identity, .. } => Some(*identity),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
#[error("could not decode image: {0}")]
pub struct DecodeError(#[from] image::ImageError);

/// Decode encoded image bytes into a grayscale raster.
pub fn decode_grayscale(bytes: &[u8]) -> Result<GrayImage, DecodeError> {
    Ok(image::load_from_memory(bytes)?.to_luma8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip() {
        let id = EmployeeId::new(7).unwrap();
        assert_eq!(id.internal(), 6);
        assert_eq!(EmployeeId::from_internal(6), id);
        assert_eq!(id.to_string(), "employee_7");
    }

    #[test]
    fn test_zero_external_label_rejected() {
        assert!(EmployeeId::new(0).is_none());
        assert!(EmployeeId::from_dir_name("employee_0").is_none());
    }

    #[test]
    fn test_dir_name_round_trip() {
        let id = EmployeeId::new(42).unwrap();
        assert_eq!(EmployeeId::from_dir_name(&id.dir_name()), Some(id));
    }

    #[test]
    fn test_malformed_dir_names_skipped() {
        for name in [
            "employee_",
            "employee_abc",
            "employee_1a",
            "employee_+3",
            "employee_-3",
            "visitor_1",
            ".git",
            "employee1",
        ] {
            assert!(EmployeeId::from_dir_name(name).is_none(), "{name}");
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_grayscale(b"not an image at all").is_err());
    }

    #[test]
    fn test_decode_png_to_grayscale() {
        let img = GrayImage::from_pixel(8, 8, image::Luma([200u8]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();

        let decoded = decode_grayscale(bytes.get_ref()).unwrap();
        assert_eq!(decoded.dimensions(), (8, 8));
        assert_eq!(decoded.get_pixel(3, 3).0[0], 200);
    }

    #[test]
    fn test_no_match_is_distinct_from_no_face() {
        let no_face = MatchDecision::NoFaceDetected;
        let no_match = MatchDecision::NoMatchFound {
            best_confidence: Some(180.0),
        };
        assert_ne!(no_face, no_match);
        assert!(!no_face.matched());
        assert!(no_match.identity().is_none());
    }
}
