//! mien-core — Face detection and recognition engine.
//!
//! Uses a Haar-style cascade classifier for face detection and
//! histogram + local-binary-pattern signatures for recognition.
//! No neural inference; everything runs on the CPU.

pub mod detector;
pub mod features;
pub mod matcher;
pub mod render;
pub mod template;
pub mod types;

pub use detector::{DetectorParams, FaceDetector};
pub use features::FeatureExtractor;
pub use matcher::{GalleryMatch, Matcher};
pub use template::TemplateBuilder;
pub use types::{FaceRegion, MatchResult, Signature, Template};
