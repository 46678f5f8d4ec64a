//! Cascade face detector.
//!
//! Classic Haar-style cascade of weighted-rectangle stump stages,
//! evaluated over integral images with a multi-scale sliding window.
//! The model ships as a versioned JSON file loaded at startup.

use crate::features::{equalize, luminance};
use crate::types::FaceRegion;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Wire format version of the cascade model file.
pub const CASCADE_SCHEMA_VERSION: u32 = 1;

/// Windows with luminance stddev below this are treated as featureless
/// and rejected before any stage runs.
const MIN_WINDOW_STDDEV: f64 = 1.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade model not found: {0}")]
    ModelNotFound(String),
    #[error("unsupported cascade schema version {0} (expected {CASCADE_SCHEMA_VERSION})")]
    UnsupportedSchema(u32),
    #[error("malformed cascade model: {0}")]
    Malformed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

/// One weighted rectangle of a Haar-like feature, in window coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

/// Decision stump: weighted-rectangle sum thresholded against the
/// variance-normalized window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    pub rects: Vec<FeatureRect>,
    pub threshold: f32,
    pub pass_value: f32,
    pub fail_value: f32,
}

/// One boosted stage; a window is rejected as soon as a stage sum falls
/// below the stage threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f32,
    pub stumps: Vec<Stump>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeModel {
    pub schema_version: u32,
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<Stage>,
}

/// Scan parameters. No process-wide toggles; every pipeline invocation
/// carries its own detector instance.
#[derive(Debug, Clone, Copy)]
pub struct DetectorParams {
    /// Multiplicative step between scan scales.
    pub scale_factor: f32,
    /// Minimum cluster size for an accepted detection.
    pub min_neighbors: u32,
    /// Minimum accepted region side, in samples.
    pub min_size: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self { scale_factor: 1.1, min_neighbors: 3, min_size: 30 }
    }
}

/// Cascade-based face detector.
pub struct FaceDetector {
    model: CascadeModel,
    params: DetectorParams,
}

impl FaceDetector {
    /// Load the cascade model from a JSON file.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }
        let raw = std::fs::read_to_string(model_path)?;
        let model: CascadeModel = serde_json::from_str(&raw)?;

        tracing::info!(
            path = model_path,
            stages = model.stages.len(),
            window = format!("{}x{}", model.window_width, model.window_height),
            "loaded cascade model"
        );

        Self::from_model(model, DetectorParams::default())
    }

    /// Build a detector from an in-memory model, validating it first.
    pub fn from_model(model: CascadeModel, params: DetectorParams) -> Result<Self, DetectorError> {
        if model.schema_version != CASCADE_SCHEMA_VERSION {
            return Err(DetectorError::UnsupportedSchema(model.schema_version));
        }
        if model.window_width == 0 || model.window_height == 0 {
            return Err(DetectorError::Malformed("zero-sized scan window".into()));
        }
        if model.stages.is_empty() {
            return Err(DetectorError::Malformed("cascade has no stages".into()));
        }
        for stage in &model.stages {
            for stump in &stage.stumps {
                for rect in &stump.rects {
                    if rect.x + rect.width > model.window_width
                        || rect.y + rect.height > model.window_height
                    {
                        return Err(DetectorError::Malformed(format!(
                            "feature rect {}x{}+{}+{} exceeds {}x{} window",
                            rect.width, rect.height, rect.x, rect.y,
                            model.window_width, model.window_height
                        )));
                    }
                }
            }
        }

        Ok(Self { model, params })
    }

    /// Detect face regions in an RGB24 frame.
    ///
    /// Luminance conversion and global histogram equalization happen
    /// here, then a multi-scale sliding-window cascade scan. Candidate
    /// order follows scan order; callers must not assume any ordering by
    /// position or size. Returns an empty vector — never an error — on
    /// any internal inconsistency; zero faces is a normal outcome.
    pub fn detect(&self, rgb: &[u8], width: u32, height: u32) -> Vec<FaceRegion> {
        let w = width as usize;
        let h = height as usize;
        if w == 0 || h == 0 || rgb.len() < w * h * 3 {
            return Vec::new();
        }

        let mut gray = luminance(rgb, width, height);
        equalize(&mut gray);

        let integral = IntegralImage::build(&gray, w, h);
        let raw = self.scan(&integral, w, h);
        group_regions(raw, self.params.min_neighbors)
    }

    /// Slide the cascade window over every scale that fits the frame.
    fn scan(&self, ii: &IntegralImage, w: usize, h: usize) -> Vec<FaceRegion> {
        let base_w = self.model.window_width as f32;
        let base_h = self.model.window_height as f32;
        let min_size = self.params.min_size as usize;
        let mut hits = Vec::new();

        let mut factor = 1.0f32;
        loop {
            let win_w = (base_w * factor).round() as usize;
            let win_h = (base_h * factor).round() as usize;
            if win_w > w || win_h > h || win_w == 0 || win_h == 0 {
                break;
            }

            if win_w >= min_size && win_h >= min_size {
                let step = (factor.round() as usize).max(1);
                let inv_area = 1.0 / (win_w * win_h) as f64;

                let mut y = 0;
                while y + win_h <= h {
                    let mut x = 0;
                    while x + win_w <= w {
                        if self.window_passes(ii, x, y, win_w, win_h, factor, inv_area) {
                            hits.push(FaceRegion::new(
                                x as u32,
                                y as u32,
                                win_w as u32,
                                win_h as u32,
                            ));
                        }
                        x += step;
                    }
                    y += step;
                }
            }

            factor *= self.params.scale_factor;
        }

        hits
    }

    /// Run every stage against one window position.
    fn window_passes(
        &self,
        ii: &IntegralImage,
        wx: usize,
        wy: usize,
        win_w: usize,
        win_h: usize,
        factor: f32,
        inv_area: f64,
    ) -> bool {
        // Variance normalization: a flat window carries no structure and
        // can never be a face.
        let sum = ii.rect_sum(wx, wy, win_w, win_h) as f64;
        let sq_sum = ii.rect_sq_sum(wx, wy, win_w, win_h) as f64;
        let mean = sum * inv_area;
        let variance = sq_sum * inv_area - mean * mean;
        if variance <= 0.0 {
            return false;
        }
        let stddev = variance.sqrt();
        if stddev < MIN_WINDOW_STDDEV {
            return false;
        }

        for stage in &self.model.stages {
            let mut stage_sum = 0.0f64;
            for stump in &stage.stumps {
                let mut feature = 0.0f64;
                for rect in &stump.rects {
                    let rx = wx + (rect.x as f32 * factor).round() as usize;
                    let ry = wy + (rect.y as f32 * factor).round() as usize;
                    // Rounding can push a scaled rect one sample past the
                    // window; clamp against the image instead of panicking.
                    if rx >= ii.width || ry >= ii.height {
                        continue;
                    }
                    let rw = ((rect.width as f32 * factor).round() as usize)
                        .max(1)
                        .min(ii.width - rx);
                    let rh = ((rect.height as f32 * factor).round() as usize)
                        .max(1)
                        .min(ii.height - ry);
                    feature += rect.weight as f64 * ii.rect_sum(rx, ry, rw, rh) as f64;
                }
                let normalized = feature * inv_area / stddev;
                stage_sum += if normalized >= stump.threshold as f64 {
                    stump.pass_value as f64
                } else {
                    stump.fail_value as f64
                };
            }
            if stage_sum < stage.threshold as f64 {
                return false;
            }
        }

        true
    }
}

/// Summed-area tables (plain and squared) with a one-sample border.
struct IntegralImage {
    sums: Vec<u64>,
    sq_sums: Vec<u64>,
    stride: usize,
    width: usize,
    height: usize,
}

impl IntegralImage {
    fn build(gray: &[u8], w: usize, h: usize) -> Self {
        let stride = w + 1;
        let mut sums = vec![0u64; stride * (h + 1)];
        let mut sq_sums = vec![0u64; stride * (h + 1)];

        for y in 0..h {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = gray[y * w + x] as u64;
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sums[idx] = sums[y * stride + x + 1] + row_sum;
                sq_sums[idx] = sq_sums[y * stride + x + 1] + row_sq;
            }
        }

        Self { sums, sq_sums, stride, width: w, height: h }
    }

    fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let s = self.stride;
        let a = self.sums[y * s + x];
        let b = self.sums[y * s + x + w];
        let c = self.sums[(y + h) * s + x];
        let d = self.sums[(y + h) * s + x + w];
        d + a - b - c
    }

    fn rect_sq_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let s = self.stride;
        let a = self.sq_sums[y * s + x];
        let b = self.sq_sums[y * s + x + w];
        let c = self.sq_sums[(y + h) * s + x];
        let d = self.sq_sums[(y + h) * s + x + w];
        d + a - b - c
    }
}

/// Cluster raw window hits and keep clusters with at least
/// `min_neighbors` members, emitting the member average. A
/// `min_neighbors` of 0 or 1 keeps every cluster.
fn group_regions(hits: Vec<FaceRegion>, min_neighbors: u32) -> Vec<FaceRegion> {
    let mut clusters: Vec<(FaceRegion, Vec<FaceRegion>)> = Vec::new();

    for hit in hits {
        match clusters.iter_mut().find(|(rep, _)| similar(rep, &hit)) {
            Some((_, members)) => members.push(hit),
            None => clusters.push((hit, vec![hit])),
        }
    }

    clusters
        .into_iter()
        .filter(|(_, members)| members.len() as u32 >= min_neighbors.max(1))
        .map(|(_, members)| average_region(&members))
        .collect()
}

/// Two rectangles are "the same detection" when all four edges are
/// within 20% of the smaller width/height.
fn similar(a: &FaceRegion, b: &FaceRegion) -> bool {
    let dx = (0.2 * a.width.min(b.width) as f32) as i64;
    let dy = (0.2 * a.height.min(b.height) as f32) as i64;
    let close = |p: u32, q: u32, d: i64| (p as i64 - q as i64).abs() <= d;

    close(a.x, b.x, dx)
        && close(a.y, b.y, dy)
        && close(a.x + a.width, b.x + b.width, dx)
        && close(a.y + a.height, b.y + b.height, dy)
}

fn average_region(members: &[FaceRegion]) -> FaceRegion {
    let n = members.len() as u64;
    let sum = |f: fn(&FaceRegion) -> u32| -> u32 {
        (members.iter().map(|r| f(r) as u64).sum::<u64>() / n) as u32
    };
    FaceRegion::new(sum(|r| r.x), sum(|r| r.y), sum(|r| r.width), sum(|r| r.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One stage, one stump: passes any window whose mean/stddev ratio is
    /// non-negative — i.e. everything with measurable structure.
    fn permissive_model() -> CascadeModel {
        CascadeModel {
            schema_version: CASCADE_SCHEMA_VERSION,
            window_width: 8,
            window_height: 8,
            stages: vec![Stage {
                threshold: 0.5,
                stumps: vec![Stump {
                    rects: vec![FeatureRect { x: 0, y: 0, width: 8, height: 8, weight: 1.0 }],
                    threshold: 0.0,
                    pass_value: 1.0,
                    fail_value: -1.0,
                }],
            }],
        }
    }

    fn solid_rgb(w: u32, h: u32, v: u8) -> Vec<u8> {
        vec![v; (w * h * 3) as usize]
    }

    #[test]
    fn test_blank_image_yields_no_faces() {
        let detector = FaceDetector::from_model(
            permissive_model(),
            DetectorParams { min_neighbors: 1, min_size: 8, ..Default::default() },
        )
        .unwrap();
        // Uniform image: every window has zero variance.
        let faces = detector.detect(&solid_rgb(64, 64, 128), 64, 64);
        assert!(faces.is_empty());
    }

    #[test]
    fn test_structured_image_yields_candidates() {
        let detector = FaceDetector::from_model(
            permissive_model(),
            DetectorParams { min_neighbors: 1, min_size: 8, ..Default::default() },
        )
        .unwrap();

        // Checkerboard-ish frame: plenty of variance everywhere.
        let w = 32u32;
        let h = 32u32;
        let mut rgb = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let v = if (x / 4 + y / 4) % 2 == 0 { 230u8 } else { 20u8 };
                rgb.extend_from_slice(&[v, v, v]);
            }
        }

        let faces = detector.detect(&rgb, w, h);
        assert!(!faces.is_empty());
        assert!(faces.iter().all(|f| f.width >= 8 && f.height >= 8));
    }

    #[test]
    fn test_min_size_filters_small_scales() {
        let detector = FaceDetector::from_model(
            permissive_model(),
            DetectorParams { min_neighbors: 1, min_size: 30, ..Default::default() },
        )
        .unwrap();

        let mut rgb = solid_rgb(64, 64, 0);
        for (i, px) in rgb.chunks_exact_mut(3).enumerate() {
            let v = ((i * 37) % 251) as u8;
            px.copy_from_slice(&[v, v, v]);
        }

        for face in detector.detect(&rgb, 64, 64) {
            assert!(face.width >= 30, "region below min_size: {face:?}");
            assert!(face.height >= 30);
        }
    }

    #[test]
    fn test_truncated_buffer_is_empty_not_panic() {
        let detector = FaceDetector::from_model(
            permissive_model(),
            DetectorParams { min_neighbors: 1, min_size: 8, ..Default::default() },
        )
        .unwrap();
        assert!(detector.detect(&[1, 2, 3], 64, 64).is_empty());
        assert!(detector.detect(&[], 0, 0).is_empty());
    }

    #[test]
    fn test_integral_rect_sums() {
        // 3x3 plane 1..9; total 45, top-left 2x2 = 1+2+4+5 = 12.
        let gray: Vec<u8> = (1..=9).collect();
        let ii = IntegralImage::build(&gray, 3, 3);
        assert_eq!(ii.rect_sum(0, 0, 3, 3), 45);
        assert_eq!(ii.rect_sum(0, 0, 2, 2), 12);
        assert_eq!(ii.rect_sum(1, 1, 2, 2), 5 + 6 + 8 + 9);
        assert_eq!(ii.rect_sq_sum(0, 0, 1, 1), 1);
        assert_eq!(ii.rect_sq_sum(2, 2, 1, 1), 81);
    }

    #[test]
    fn test_group_regions_min_neighbors() {
        let cluster = vec![
            FaceRegion::new(100, 100, 50, 50),
            FaceRegion::new(102, 101, 50, 50),
            FaceRegion::new(99, 103, 51, 49),
        ];
        let lone = FaceRegion::new(300, 300, 40, 40);

        let mut hits = cluster.clone();
        hits.push(lone);

        let grouped = group_regions(hits.clone(), 3);
        assert_eq!(grouped.len(), 1);
        let avg = grouped[0];
        assert!(avg.x >= 99 && avg.x <= 102);
        assert!(avg.width >= 49 && avg.width <= 51);

        // min_neighbors 1 keeps the loner too.
        let grouped = group_regions(hits, 1);
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn test_model_validation() {
        let mut model = permissive_model();
        model.schema_version = 7;
        assert!(matches!(
            FaceDetector::from_model(model, DetectorParams::default()),
            Err(DetectorError::UnsupportedSchema(7))
        ));

        let mut model = permissive_model();
        model.stages.clear();
        assert!(matches!(
            FaceDetector::from_model(model, DetectorParams::default()),
            Err(DetectorError::Malformed(_))
        ));

        let mut model = permissive_model();
        model.stages[0].stumps[0].rects[0].width = 100;
        assert!(matches!(
            FaceDetector::from_model(model, DetectorParams::default()),
            Err(DetectorError::Malformed(_))
        ));
    }

    #[test]
    fn test_model_json_roundtrip() {
        let model = permissive_model();
        let raw = serde_json::to_string(&model).unwrap();
        let back: CascadeModel = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.schema_version, CASCADE_SCHEMA_VERSION);
        assert_eq!(back.stages.len(), 1);
        assert_eq!(back.window_width, 8);
    }
}
