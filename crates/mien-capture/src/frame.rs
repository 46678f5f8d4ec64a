//! Frame type and pixel-format conversion.

use thiserror::Error;

/// A captured RGB24 camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Number of bytes a well-formed buffer must hold.
    pub fn expected_len(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * 3
    }

    /// Average luminance (0.0–255.0), Rec. 601 weighting.
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: u64 = self
            .data
            .chunks_exact(3)
            .map(|p| (77 * p[0] as u64 + 150 * p[1] as u64 + 29 * p[2] as u64) >> 8)
            .sum();
        sum as f32 / (self.data.len() / 3) as f32
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to interleaved RGB24.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], with U and V shared
/// by the pair. Uses the BT.601 limited-range conversion.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width as usize) * (height as usize);
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in yuyv[..expected].chunks_exact(4) {
        let u = quad[1] as i32 - 128;
        let v = quad[3] as i32 - 128;
        for &y in [quad[0], quad[2]].iter() {
            let c = 298 * (y as i32 - 16);
            rgb.push(clamp_u8((c + 409 * v + 128) >> 8));
            rgb.push(clamp_u8((c - 100 * u - 208 * v + 128) >> 8));
            rgb.push(clamp_u8((c + 516 * u + 128) >> 8));
        }
    }
    Ok(rgb)
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_gray_pixels() {
        // Neutral chroma (U = V = 128) must map Y straight onto a gray
        // pixel, modulo the limited-range expansion.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(&rgb[..3], &[0, 0, 0]);
        assert_eq!(&rgb[3..], &[255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_length() {
        let yuyv: Vec<u8> = vec![128; 4 * 2 * 2]; // 4x2 pixels
        let rgb = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_yuyv_too_short() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame {
            data: vec![128; 4 * 3],
            width: 2,
            height: 2,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        let avg = frame.avg_brightness();
        assert!((avg - 128.0).abs() < 2.0, "avg = {avg}");
    }

    #[test]
    fn test_expected_len() {
        assert_eq!(Frame::expected_len(640, 480), 640 * 480 * 3);
    }
}
