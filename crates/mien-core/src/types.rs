use serde::{Deserialize, Serialize};

/// Number of bins in every histogram this pipeline produces.
pub const HISTOGRAM_BINS: usize = 256;

/// Added to L1-normalization denominators so a degenerate (all-black)
/// crop never divides by zero.
pub const NORMALIZE_EPSILON: f32 = 1e-7;

/// Acceptance threshold for single-shot comparisons (enroll/recognize).
pub const SINGLE_SHOT_THRESHOLD: f32 = 0.65;

/// Acceptance threshold for continuous-stream overlays. Kept separate
/// from [`SINGLE_SHOT_THRESHOLD`] on purpose; the two are tuned
/// independently.
pub const STREAM_THRESHOLD: f32 = 0.60;

/// Axis-aligned face rectangle in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Area in samples.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// One instantaneous appearance feature vector extracted from a single
/// detected face region. Both histograms are L1-normalized at extraction
/// time; a Signature is never mutated after it is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    /// 256-bin luminance histogram over the 100×100 canvas.
    pub intensity: Vec<f32>,
    /// 256-bin histogram of 8-bit local binary pattern codes.
    pub lbp: Vec<f32>,
    /// Size of the source region (w, h).
    pub region_size: (u32, u32),
    /// Position of the source region (x, y).
    pub region_position: (u32, u32),
}

/// The persisted, averaged signature representing one enrolled identity.
///
/// Built once from ≥ 1 signatures and replaced wholesale on re-training;
/// never mutated in place. `schema_version` pins the wire format so
/// enrollment and matching cannot silently drift apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub schema_version: u32,
    pub mean_intensity: Vec<f32>,
    pub mean_lbp: Vec<f32>,
    pub stddev_intensity: Vec<f32>,
    pub stddev_lbp: Vec<f32>,
    pub sample_count: usize,
}

/// Result of scoring a probe against a reference.
///
/// `score` is a combined histogram correlation in [-1, 1]. It is only
/// meaningfully ordered, not a calibrated probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub is_match: bool,
    pub score: f32,
}

impl MatchResult {
    /// The "no usable histograms" outcome.
    pub fn no_match() -> Self {
        Self { is_match: false, score: 0.0 }
    }
}
