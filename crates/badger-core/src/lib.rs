//! badger-core — employee face identification over a photo gallery.
//!
//! The gallery store keeps reference photos on disk, one directory per
//! identity. The trainer condenses them into a single persisted model
//! artifact through a pluggable recognizer capability; the matcher scores a
//! probe image against that artifact and produces an identity decision with
//! a distance-like confidence.

pub mod detector;
pub mod gallery;
pub mod matcher;
pub mod mock;
pub mod model;
pub mod recognizer;
pub mod trainer;
pub mod types;

pub use gallery::GalleryStore;
pub use matcher::{MatchPolicy, Matcher, DEFAULT_CONFIDENCE_THRESHOLD};
pub use model::{ModelStore, RecognitionModel};
pub use types::{decode_grayscale, DetectionParams, EmployeeId, MatchDecision};
