//! Live-stream loop: capture → detect → recognize → annotate → MJPEG.
//!
//! Runs on the engine thread, which owns the camera. Frames go to any
//! `io::Write` as JPEG parts separated by a `--frame` multipart boundary;
//! the loop ends on sink failure or when the cancel token fires. A session
//! that cannot produce frames yields placeholder images instead, so the
//! stream keeps its cadence while the camera recovers.

use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use mien_capture::CaptureSession;
use mien_core::render::{self, RegionOverlay, RegionVerdict};
use mien_core::types::MatchResult;
use mien_core::{FaceDetector, FeatureExtractor, Matcher, Template};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const FRAME_BOUNDARY: &[u8] = b"--frame";
const JPEG_QUALITY: u8 = 80;
const PLACEHOLDER_MESSAGE: &str = "CAMERA NOT AVAILABLE";

/// Cooperative cancellation shared between the stream loop and whoever
/// asked for the stream.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Decides which stream frames get the full recognition pass. Frames that
/// are skipped still get detection boxes.
pub trait SamplingPolicy: Send {
    fn should_analyze(&mut self, frame_index: u64) -> bool;
}

/// Analyze every Nth frame, starting with the first.
pub struct EveryNth {
    interval: u64,
}

impl EveryNth {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: u64::from(interval.max(1)),
        }
    }
}

impl SamplingPolicy for EveryNth {
    fn should_analyze(&mut self, frame_index: u64) -> bool {
        frame_index % self.interval == 0
    }
}

pub struct StreamParams {
    pub fps: u32,
    /// Placeholder dimensions when no camera frame is available.
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default)]
pub struct StreamStats {
    pub frames_emitted: u64,
    pub placeholder_frames: u64,
    pub analyzed_frames: u64,
    pub matches: u64,
}

#[allow(clippy::too_many_arguments)]
pub fn run_stream(
    session: &mut CaptureSession,
    detector: &FaceDetector,
    extractor: &FeatureExtractor,
    matcher: &Matcher,
    gallery: &[(String, Template)],
    policy: &mut dyn SamplingPolicy,
    params: &StreamParams,
    sink: &mut dyn Write,
    cancel: &CancelToken,
) -> StreamStats {
    let mut stats = StreamStats::default();
    let frame_interval = Duration::from_millis(1000 / u64::from(params.fps.max(1)));
    let mut frame_index: u64 = 0;

    if !session.is_streaming() {
        session.open();
    }

    while !cancel.is_cancelled() {
        let mut image = match next_image(session) {
            Some(image) => image,
            None => {
                stats.placeholder_frames += 1;
                render::placeholder(params.width, params.height, PLACEHOLDER_MESSAGE, Local::now())
            }
        };

        let regions = detector.detect(image.as_raw(), image.width(), image.height());
        let analyze = !regions.is_empty() && policy.should_analyze(frame_index);

        let overlays: Vec<RegionOverlay> = if analyze {
            stats.analyzed_frames += 1;
            regions
                .iter()
                .map(|region| {
                    let signature =
                        extractor.extract(image.as_raw(), image.width(), image.height(), region);
                    let verdict = match best_of_gallery(matcher, &signature, gallery) {
                        Some((identity, result)) if result.is_match => {
                            stats.matches += 1;
                            RegionVerdict::Recognized {
                                label: identity,
                                result,
                            }
                        }
                        _ => RegionVerdict::Unknown,
                    };
                    RegionOverlay {
                        region: *region,
                        verdict,
                    }
                })
                .collect()
        } else {
            regions
                .iter()
                .map(|region| RegionOverlay {
                    region: *region,
                    verdict: RegionVerdict::DetectionOnly,
                })
                .collect()
        };

        render::annotate(&mut image, &overlays, Local::now());

        let mut jpeg = Vec::new();
        if let Err(e) = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&image)
        {
            tracing::warn!(error = %e, "jpeg encode failed; dropping frame");
            frame_index += 1;
            continue;
        }

        if let Err(e) = write_part(sink, &jpeg) {
            tracing::info!(error = %e, "stream sink closed");
            break;
        }

        stats.frames_emitted += 1;
        frame_index += 1;
        std::thread::sleep(frame_interval);
    }

    // The consumer is gone (or asked us to stop); give the device back.
    session.close();
    tracing::info!(
        frames = stats.frames_emitted,
        placeholders = stats.placeholder_frames,
        "stream ended"
    );
    stats
}

/// Next camera frame as an image, reconnecting on the way if the session
/// lost its source. `None` means this round gets a placeholder.
fn next_image(session: &mut CaptureSession) -> Option<RgbImage> {
    if !session.is_streaming() {
        session.recover();
    }
    let frame = session.read()?;
    RgbImage::from_raw(frame.width, frame.height, frame.data)
}

/// Highest-scoring gallery entry for a probe, matched or not.
fn best_of_gallery(
    matcher: &Matcher,
    probe: &mien_core::Signature,
    gallery: &[(String, Template)],
) -> Option<(String, MatchResult)> {
    let mut best: Option<(String, MatchResult)> = None;
    for (identity, template) in gallery {
        let result = matcher.compare(probe, template);
        let better = best
            .as_ref()
            .map_or(true, |(_, prev)| result.score > prev.score);
        if better {
            best = Some((identity.clone(), result));
        }
    }
    best
}

fn write_part(sink: &mut dyn Write, jpeg: &[u8]) -> std::io::Result<()> {
    sink.write_all(FRAME_BOUNDARY)?;
    sink.write_all(b"\r\nContent-Type: image/jpeg\r\n\r\n")?;
    sink.write_all(jpeg)?;
    sink.write_all(b"\r\n")?;
    sink.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mien_capture::scripted::{ScriptedBackend, ScriptedRead};
    use mien_capture::{CaptureBackend, CaptureHints};
    use mien_core::detector::{CascadeModel, DetectorParams, FeatureRect, Stage, Stump};

    /// Sink that fails after a fixed number of write calls. Each emitted
    /// frame costs four writes.
    struct LimitedSink {
        buf: Vec<u8>,
        writes_left: usize,
    }

    impl Write for LimitedSink {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            if self.writes_left == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "sink closed",
                ));
            }
            self.writes_left -= 1;
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn test_detector() -> FaceDetector {
        let model = CascadeModel {
            schema_version: 1,
            window_width: 8,
            window_height: 8,
            stages: vec![Stage {
                threshold: 0.0,
                stumps: vec![Stump {
                    rects: vec![FeatureRect {
                        x: 0,
                        y: 0,
                        width: 8,
                        height: 8,
                        weight: 1.0,
                    }],
                    threshold: f32::MIN,
                    pass_value: 1.0,
                    fail_value: -1.0,
                }],
            }],
        };
        FaceDetector::from_model(model, DetectorParams::default()).unwrap()
    }

    fn test_session(backend: ScriptedBackend) -> mien_capture::CaptureSession {
        let hints = CaptureHints {
            width: 64,
            height: 48,
            ..CaptureHints::default()
        };
        let backends: Vec<Box<dyn CaptureBackend>> = vec![Box::new(backend)];
        mien_capture::CaptureSession::with_hints(backends, 0, hints)
    }

    fn fast_params() -> StreamParams {
        StreamParams {
            fps: 1000,
            width: 64,
            height: 48,
        }
    }

    fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .filter(|w| *w == needle)
            .count()
    }

    #[test]
    fn test_cancelled_stream_emits_nothing() {
        let mut session = test_session(ScriptedBackend::endless("cam", ScriptedRead::Solid(50)));
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut sink = LimitedSink {
            buf: Vec::new(),
            writes_left: 100,
        };
        let stats = run_stream(
            &mut session,
            &test_detector(),
            &FeatureExtractor::new(),
            &Matcher::streaming(),
            &[],
            &mut EveryNth::new(5),
            &fast_params(),
            &mut sink,
            &cancel,
        );
        assert_eq!(stats.frames_emitted, 0);
        assert!(sink.buf.is_empty());
    }

    #[test]
    fn test_stream_stops_on_sink_error() {
        let mut session = test_session(ScriptedBackend::endless("cam", ScriptedRead::Solid(50)));
        // Two full frames (4 writes each), then the pipe breaks.
        let mut sink = LimitedSink {
            buf: Vec::new(),
            writes_left: 8,
        };
        let stats = run_stream(
            &mut session,
            &test_detector(),
            &FeatureExtractor::new(),
            &Matcher::streaming(),
            &[],
            &mut EveryNth::new(5),
            &fast_params(),
            &mut sink,
            &CancelToken::new(),
        );
        assert_eq!(stats.frames_emitted, 2);
        assert_eq!(count_occurrences(&sink.buf, FRAME_BOUNDARY), 2);
        // JPEG SOI marker right after the part headers.
        assert!(count_occurrences(&sink.buf, &[0xFF, 0xD8]) >= 2);
    }

    #[test]
    fn test_dead_camera_streams_placeholders() {
        let mut session = test_session(ScriptedBackend::refusing("cam"));
        let mut sink = LimitedSink {
            buf: Vec::new(),
            writes_left: 4,
        };
        let stats = run_stream(
            &mut session,
            &test_detector(),
            &FeatureExtractor::new(),
            &Matcher::streaming(),
            &[],
            &mut EveryNth::new(5),
            &fast_params(),
            &mut sink,
            &CancelToken::new(),
        );
        assert_eq!(stats.frames_emitted, 1);
        assert!(stats.placeholder_frames >= 1);
        assert_eq!(count_occurrences(&sink.buf, FRAME_BOUNDARY), 1);
    }

    #[test]
    fn test_every_nth_policy() {
        let mut policy = EveryNth::new(5);
        let analyzed: Vec<u64> = (0..12).filter(|&i| policy.should_analyze(i)).collect();
        assert_eq!(analyzed, vec![0, 5, 10]);

        // Zero is clamped rather than dividing by it.
        let mut every_frame = EveryNth::new(0);
        assert!(every_frame.should_analyze(7));
    }
}
