//! Signature/template comparison via histogram correlation.
//!
//! One Pearson-style correlation routine serves both call shapes:
//! probe-signature vs stored template (means) and probe vs raw signature.
//! The combined score weights intensity 0.6 and LBP 0.4, matching how
//! much each channel separates identities in practice.

use crate::types::{MatchResult, Signature, Template, SINGLE_SHOT_THRESHOLD, STREAM_THRESHOLD};

/// Pearson correlation between two equal-length histograms, in [-1, 1].
///
/// Returns 0.0 for degenerate input (mismatched lengths, or either side
/// with zero variance).
pub fn correlation(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&v| v as f64).sum::<f64>() / n;

    let mut cov = 0.0f64;
    let mut var_a = 0.0f64;
    let mut var_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x as f64 - mean_a;
        let dy = y as f64 - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom > 0.0 {
        (cov / denom) as f32
    } else {
        0.0
    }
}

/// The one place the 0.6 / 0.4 channel weighting lives.
fn combined_score(
    probe_intensity: &[f32],
    probe_lbp: &[f32],
    ref_intensity: &[f32],
    ref_lbp: &[f32],
    threshold: f32,
) -> MatchResult {
    if probe_intensity.is_empty() || ref_intensity.is_empty() {
        return MatchResult::no_match();
    }

    let intensity_corr = correlation(probe_intensity, ref_intensity);
    let lbp_corr = if probe_lbp.is_empty() || ref_lbp.is_empty() {
        0.0
    } else {
        correlation(probe_lbp, ref_lbp)
    };

    let score = intensity_corr * 0.6 + lbp_corr * 0.4;
    MatchResult { is_match: score > threshold, score }
}

/// Best gallery hit for a probe.
#[derive(Debug, Clone)]
pub struct GalleryMatch {
    pub identity: String,
    pub result: MatchResult,
}

/// Scores probes against templates (or other signatures) at a fixed
/// acceptance threshold.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    pub threshold: f32,
}

impl Matcher {
    /// Matcher tuned for one-off comparisons (threshold 0.65).
    pub fn single_shot() -> Self {
        Self { threshold: SINGLE_SHOT_THRESHOLD }
    }

    /// Matcher tuned for continuous-stream overlays (threshold 0.60).
    pub fn streaming() -> Self {
        Self { threshold: STREAM_THRESHOLD }
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Score a probe signature against a stored template.
    pub fn compare(&self, probe: &Signature, reference: &Template) -> MatchResult {
        combined_score(
            &probe.intensity,
            &probe.lbp,
            &reference.mean_intensity,
            &reference.mean_lbp,
            self.threshold,
        )
    }

    /// Score two raw signatures against each other. Shares the same
    /// correlation and weighting as the template path.
    pub fn compare_signatures(&self, probe: &Signature, other: &Signature) -> MatchResult {
        combined_score(
            &probe.intensity,
            &probe.lbp,
            &other.intensity,
            &other.lbp,
            self.threshold,
        )
    }

    /// Linear scan over an ordered gallery, returning the best-scoring
    /// match above threshold. Ties keep the first-seen identity, so scan
    /// order (gallery insertion order) is stable. O(N) per probe — fine
    /// at single-site roster scale.
    pub fn best_match(
        &self,
        probe: &Signature,
        gallery: &[(String, Template)],
    ) -> Option<GalleryMatch> {
        let mut best: Option<GalleryMatch> = None;

        for (identity, template) in gallery {
            let result = self.compare(probe, template);
            if !result.is_match {
                continue;
            }
            let better = match &best {
                None => true,
                Some(prev) => result.score > prev.result.score,
            };
            if better {
                best = Some(GalleryMatch { identity: identity.clone(), result });
            }
        }

        best
    }
}
