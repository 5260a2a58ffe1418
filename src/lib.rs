//! Clinical facial-geometry measurement engine.
//!
//! Frames from a video or still source are normalized onto a canonical
//! 1024x1024 canvas, measured through a registry of clinical measures,
//! and captured as replayable snapshots that can be trimmed, saved to a
//! document, and exported as CSV.
//!
//! The detector backends are trait seams ([`detector::FaceDetector`],
//! [`detector::BackgroundRemover`]); the engine itself carries no model
//! weights.

pub mod clip;
pub mod config;
pub mod detector;
pub mod document;
pub mod error;
pub mod export;
pub mod geometry;
pub mod lateral;
pub mod measures;
pub mod normalize;
pub mod session;
pub mod smoothing;
pub mod types;

#[doc(hidden)]
pub mod test_utils;

pub use config::EngineConfig;
pub use error::{FaceError, Result};
pub use normalize::{FaceFrame, NormalizationEngine};
pub use types::{FrameSnapshot, HeadPose, LandmarkSet, Point};
