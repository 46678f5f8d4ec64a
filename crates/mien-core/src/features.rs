//! Appearance signature extraction — intensity histogram + local binary
//! patterns over a fixed 100×100 luminance canvas.
//!
//! The canvas normalizes scale so templates captured at different
//! distances stay comparable. The LBP pass is the hottest loop in the
//! system; it runs over raw row slices.

use crate::types::{FaceRegion, Signature, HISTOGRAM_BINS, NORMALIZE_EPSILON};

/// Side length of the normalized face canvas.
pub const CANVAS_SIZE: usize = 100;

/// Convert packed RGB24 to luminance using Rec. 601 integer weights.
pub fn luminance(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixels = (width as usize) * (height as usize);
    let mut gray = Vec::with_capacity(pixels);
    for px in rgb.chunks_exact(3).take(pixels) {
        let y = (77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32) >> 8;
        gray.push(y as u8);
    }
    // Short input yields a short plane; callers treat missing rows as black.
    gray.resize(pixels, 0);
    gray
}

/// Global histogram equalization over a luminance plane, in place.
pub fn equalize(gray: &mut [u8]) {
    if gray.is_empty() {
        return;
    }
    let mut hist = [0u32; HISTOGRAM_BINS];
    for &p in gray.iter() {
        hist[p as usize] += 1;
    }

    let mut cdf = [0u32; HISTOGRAM_BINS];
    let mut running = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }

    let total = gray.len() as f32;
    let cdf_min = cdf.iter().copied().find(|&v| v > 0).unwrap_or(0) as f32;
    let denom = total - cdf_min;
    if denom <= 0.0 {
        // Single-valued image; equalization is a no-op.
        return;
    }

    let mut map = [0u8; HISTOGRAM_BINS];
    for i in 0..HISTOGRAM_BINS {
        let v = ((cdf[i] as f32 - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
        map[i] = v.round() as u8;
    }
    for p in gray.iter_mut() {
        *p = map[*p as usize];
    }
}

/// Builds [`Signature`]s from detected face regions.
pub struct FeatureExtractor {
    canvas: usize,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self { canvas: CANVAS_SIZE }
    }

    /// Extract an appearance signature for `region` of an RGB24 frame.
    ///
    /// Crop → bilinear resize to the canvas → luminance → intensity
    /// histogram → LBP code map → LBP histogram. Regions are clamped to
    /// the frame; a fully out-of-bounds region produces a black canvas
    /// (the epsilon in normalization keeps that finite).
    pub fn extract(&self, rgb: &[u8], width: u32, height: u32, region: &FaceRegion) -> Signature {
        let crop = crop_rgb(rgb, width, height, region);
        let resized = resize_bilinear_rgb(
            &crop.data,
            crop.width,
            crop.height,
            self.canvas,
            self.canvas,
        );
        let gray = luminance(&resized, self.canvas as u32, self.canvas as u32);

        let intensity = normalized_histogram(&gray);
        let codes = lbp_map(&gray, self.canvas, self.canvas);
        let lbp = normalized_histogram(&codes);

        Signature {
            intensity,
            lbp,
            region_size: (region.width, region.height),
            region_position: (region.x, region.y),
        }
    }
}

struct RgbCrop {
    data: Vec<u8>,
    width: usize,
    height: usize,
}

/// Copy `region` out of an RGB24 frame, clamped to frame bounds.
fn crop_rgb(rgb: &[u8], width: u32, height: u32, region: &FaceRegion) -> RgbCrop {
    let fw = width as usize;
    let fh = height as usize;
    let x0 = (region.x as usize).min(fw);
    let y0 = (region.y as usize).min(fh);
    let x1 = (region.x as usize + region.width as usize).min(fw);
    let y1 = (region.y as usize + region.height as usize).min(fh);
    let cw = x1.saturating_sub(x0);
    let ch = y1.saturating_sub(y0);

    if cw == 0 || ch == 0 || rgb.len() < fw * fh * 3 {
        return RgbCrop { data: vec![0u8; 3], width: 1, height: 1 };
    }

    let mut data = Vec::with_capacity(cw * ch * 3);
    for y in y0..y1 {
        let start = (y * fw + x0) * 3;
        data.extend_from_slice(&rgb[start..start + cw * 3]);
    }
    RgbCrop { data, width: cw, height: ch }
}

/// Bilinear resize of an RGB24 buffer.
fn resize_bilinear_rgb(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    let mut dst = vec![0u8; dst_w * dst_h * 3];
    if src_w == 0 || src_h == 0 || src.len() < src_w * src_h * 3 {
        return dst;
    }

    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;

    for y in 0..dst_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = src[(y0 * src_w + x0) * 3 + c] as f32;
                let tr = src[(y0 * src_w + x1) * 3 + c] as f32;
                let bl = src[(y1 * src_w + x0) * 3 + c] as f32;
                let br = src[(y1 * src_w + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                dst[(y * dst_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    dst
}

/// LBP code map over the interior of a luminance plane.
///
/// For each interior sample the 8 neighbors are compared in a fixed
/// clockwise order starting at the upper-left; a bit is set iff the
/// neighbor is strictly greater than the center (ties contribute 0).
/// Output is (w-2)×(h-2).
pub fn lbp_map(gray: &[u8], w: usize, h: usize) -> Vec<u8> {
    if w < 3 || h < 3 || gray.len() < w * h {
        return Vec::new();
    }
    let ow = w - 2;
    let mut out = vec![0u8; ow * (h - 2)];

    for y in 1..h - 1 {
        let above = &gray[(y - 1) * w..y * w];
        let row = &gray[y * w..(y + 1) * w];
        let below = &gray[(y + 1) * w..(y + 2) * w];
        let dst = &mut out[(y - 1) * ow..y * ow];

        for x in 1..w - 1 {
            let c = row[x];
            let mut code = 0u8;
            code |= ((above[x - 1] > c) as u8) << 7;
            code |= ((above[x] > c) as u8) << 6;
            code |= ((above[x + 1] > c) as u8) << 5;
            code |= ((row[x + 1] > c) as u8) << 4;
            code |= ((below[x + 1] > c) as u8) << 3;
            code |= ((below[x] > c) as u8) << 2;
            code |= ((below[x - 1] > c) as u8) << 1;
            code |= (row[x - 1] > c) as u8;
            dst[x - 1] = code;
        }
    }

    out
}

/// 256-bin L1-normalized histogram over byte samples.
pub fn normalized_histogram(samples: &[u8]) -> Vec<f32> {
    let mut counts = [0u32; HISTOGRAM_BINS];
    for &s in samples {
        counts[s as usize] += 1;
    }
    let denom = samples.len() as f32 + NORMALIZE_EPSILON;
    counts.iter().map(|&c| c as f32 / denom).collect()
}
