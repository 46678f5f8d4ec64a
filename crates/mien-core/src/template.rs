//! Template construction and the versioned wire format.
//!
//! A template is the element-wise mean and population standard deviation
//! of the signatures captured during enrollment. Re-training replaces the
//! whole template; nothing is updated in place.

use crate::types::{Signature, Template};
use thiserror::Error;

/// Wire format version written into every serialized template.
pub const TEMPLATE_SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("cannot build a template from zero signatures")]
    NoSignatures,
    #[error("unsupported template schema version {0} (expected {TEMPLATE_SCHEMA_VERSION})")]
    UnsupportedSchema(u32),
    #[error("template codec: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Aggregates enrollment signatures into one reference template.
pub struct TemplateBuilder;

impl TemplateBuilder {
    /// Build a template from one or more signatures.
    ///
    /// Mean and stddev are order-independent, so callers may hand the
    /// captures over in any order. An empty slice is a programming error
    /// at the call site and fails loudly.
    pub fn build(signatures: &[Signature]) -> Result<Template, TemplateError> {
        if signatures.is_empty() {
            return Err(TemplateError::NoSignatures);
        }

        let (mean_intensity, stddev_intensity) =
            mean_stddev(signatures.iter().map(|s| s.intensity.as_slice()));
        let (mean_lbp, stddev_lbp) = mean_stddev(signatures.iter().map(|s| s.lbp.as_slice()));

        Ok(Template {
            schema_version: TEMPLATE_SCHEMA_VERSION,
            mean_intensity,
            mean_lbp,
            stddev_intensity,
            stddev_lbp,
            sample_count: signatures.len(),
        })
    }
}

impl Template {
    /// Serialize to the versioned JSON wire format.
    pub fn to_json(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the wire format, rejecting unknown versions.
    pub fn from_json(raw: &str) -> Result<Self, TemplateError> {
        let template: Template = serde_json::from_str(raw)?;
        if template.schema_version != TEMPLATE_SCHEMA_VERSION {
            return Err(TemplateError::UnsupportedSchema(template.schema_version));
        }
        Ok(template)
    }
}

/// Element-wise mean and population standard deviation across rows.
fn mean_stddev<'a>(rows: impl Iterator<Item = &'a [f32]> + Clone) -> (Vec<f32>, Vec<f32>) {
    let count = rows.clone().count();
    if count == 0 {
        return (Vec::new(), Vec::new());
    }
    let bins = rows.clone().next().map_or(0, |r| r.len());

    let mut mean = vec![0.0f64; bins];
    for row in rows.clone() {
        for (m, &v) in mean.iter_mut().zip(row.iter()) {
            *m += v as f64;
        }
    }
    let n = count as f64;
    for m in mean.iter_mut() {
        *m /= n;
    }

    let mut var = vec![0.0f64; bins];
    for row in rows {
        for ((v, &x), &m) in var.iter_mut().zip(row.iter()).zip(mean.iter()) {
            let d = x as f64 - m;
            *v += d * d;
        }
    }

    let stddev = var.iter().map(|&v| (v / n).sqrt() as f32).collect();
    (mean.iter().map(|&m| m as f32).collect(), stddev)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(intensity: Vec<f32>, lbp: Vec<f32>) -> Signature {
        Signature {
            intensity,
            lbp,
            region_size: (100, 100),
            region_position: (0, 0),
        }
    }

    #[test]
    fn test_build_empty_fails() {
        assert!(matches!(
            TemplateBuilder::build(&[]),
            Err(TemplateError::NoSignatures)
        ));
    }

    #[test]
    fn test_build_single_signature() {
        let s = sig(vec![0.25, 0.75], vec![0.5, 0.5]);
        let t = TemplateBuilder::build(std::slice::from_ref(&s)).unwrap();
        assert_eq!(t.sample_count, 1);
        assert_eq!(t.mean_intensity, vec![0.25, 0.75]);
        assert_eq!(t.mean_lbp, vec![0.5, 0.5]);
        assert!(t.stddev_intensity.iter().all(|&v| v == 0.0));
        assert!(t.stddev_lbp.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_build_mean_and_population_stddev() {
        let a = sig(vec![0.0, 1.0], vec![0.2, 0.8]);
        let b = sig(vec![1.0, 0.0], vec![0.6, 0.4]);
        let t = TemplateBuilder::build(&[a, b]).unwrap();

        assert_eq!(t.sample_count, 2);
        assert!((t.mean_intensity[0] - 0.5).abs() < 1e-6);
        assert!((t.mean_intensity[1] - 0.5).abs() < 1e-6);
        // Population stddev of {0, 1} is 0.5.
        assert!((t.stddev_intensity[0] - 0.5).abs() < 1e-6);
        assert!((t.mean_lbp[0] - 0.4).abs() < 1e-6);
        assert!((t.stddev_lbp[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_build_is_order_insensitive() {
        let a = sig(vec![0.1, 0.9, 0.0], vec![0.3, 0.3, 0.4]);
        let b = sig(vec![0.5, 0.2, 0.3], vec![0.1, 0.8, 0.1]);
        let c = sig(vec![0.4, 0.4, 0.2], vec![0.6, 0.2, 0.2]);

        let t1 = TemplateBuilder::build(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let t2 = TemplateBuilder::build(&[c, a, b]).unwrap();

        for (x, y) in t1.mean_intensity.iter().zip(t2.mean_intensity.iter()) {
            assert!((x - y).abs() < 1e-7);
        }
        for (x, y) in t1.stddev_lbp.iter().zip(t2.stddev_lbp.iter()) {
            assert!((x - y).abs() < 1e-7);
        }
        assert_eq!(t1.sample_count, t2.sample_count);
    }

    #[test]
    fn test_json_roundtrip() {
        let s = sig(vec![0.25; 4], vec![0.25; 4]);
        let t = TemplateBuilder::build(&[s]).unwrap();
        let raw = t.to_json().unwrap();
        let back = Template::from_json(&raw).unwrap();
        assert_eq!(back.schema_version, TEMPLATE_SCHEMA_VERSION);
        assert_eq!(back.mean_intensity, t.mean_intensity);
        assert_eq!(back.sample_count, 1);
    }

    #[test]
    fn test_unknown_schema_rejected() {
        let s = sig(vec![1.0], vec![1.0]);
        let mut t = TemplateBuilder::build(&[s]).unwrap();
        t.schema_version = 99;
        let raw = t.to_json().unwrap();
        assert!(matches!(
            Template::from_json(&raw),
            Err(TemplateError::UnsupportedSchema(99))
        ));
    }
}
