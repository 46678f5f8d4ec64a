//! Engine thread: single owner of the camera and detector.
//!
//! Callers hold a clone-safe [`EngineHandle`] and talk to the engine over
//! an mpsc channel with oneshot replies. Running everything camera-facing
//! on one dedicated OS thread serializes device access without locks; the
//! gallery arrives by value with each request, so the engine never touches
//! the store.

use crate::stream::{self, CancelToken, EveryNth, StreamParams, StreamStats};
use mien_capture::{CaptureBackend, CaptureHints, CaptureSession, SessionState};
use mien_core::detector::DetectorError;
use mien_core::template::TemplateError;
use mien_core::types::MatchResult;
use mien_core::{FaceDetector, FeatureExtractor, Matcher, Signature, Template, TemplateBuilder};
use std::io::Write;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Capture attempts allowed per requested enrollment sample.
pub const ENROLL_ATTEMPT_FACTOR: usize = 5;
/// Fewest signatures that make a usable template.
pub const MIN_ENROLL_SIGNATURES: usize = 3;
/// Frames inspected before a single-shot recognition gives up.
const RECOGNIZE_ATTEMPTS: usize = 10;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("camera unavailable")]
    CameraUnavailable,
    #[error("collected {collected} usable samples, need at least {needed}")]
    InsufficientSamples { collected: usize, needed: usize },
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment capture run.
#[derive(Debug)]
pub struct EnrollOutcome {
    pub template: Template,
    /// Frames consumed to collect the signatures.
    pub attempts: usize,
}

/// Recognition is a value in every no-signal case; only infrastructure
/// failures surface as errors.
#[derive(Debug)]
pub enum RecognizeOutcome {
    EmptyGallery,
    NoFace,
    NoMatch { best_score: f32 },
    Match { identity: String, score: f32 },
}

pub struct EngineStatus {
    pub session_state: SessionState,
    pub backend: Option<String>,
}

enum EngineRequest {
    Enroll {
        samples: usize,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
    Recognize {
        gallery: Vec<(String, Template)>,
        threshold: f32,
        reply: oneshot::Sender<Result<RecognizeOutcome, EngineError>>,
    },
    RecognizeImage {
        rgb: Vec<u8>,
        width: u32,
        height: u32,
        gallery: Vec<(String, Template)>,
        threshold: f32,
        reply: oneshot::Sender<RecognizeOutcome>,
    },
    Stream {
        gallery: Vec<(String, Template)>,
        threshold: f32,
        interval: u32,
        fps: u32,
        sink: Box<dyn Write + Send>,
        cancel: CancelToken,
        reply: oneshot::Sender<StreamStats>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Capture signatures from the camera and build a template.
    pub async fn enroll(&self, samples: usize) -> Result<EnrollOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                samples,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// One-off recognition against the given gallery.
    pub async fn recognize(
        &self,
        gallery: Vec<(String, Template)>,
        threshold: f32,
    ) -> Result<RecognizeOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                gallery,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Recognition over a caller-supplied RGB24 buffer instead of the
    /// camera.
    pub async fn recognize_image(
        &self,
        rgb: Vec<u8>,
        width: u32,
        height: u32,
        gallery: Vec<(String, Template)>,
        threshold: f32,
    ) -> Result<RecognizeOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::RecognizeImage {
                rgb,
                width,
                height,
                gallery,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Run the annotated MJPEG stream into `sink` until cancelled or the
    /// sink fails.
    pub async fn stream(
        &self,
        gallery: Vec<(String, Template)>,
        threshold: f32,
        interval: u32,
        fps: u32,
        sink: Box<dyn Write + Send>,
        cancel: CancelToken,
    ) -> Result<StreamStats, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Stream {
                gallery,
                threshold,
                interval,
                fps,
                sink,
                cancel,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The cascade model loads synchronously (fail-fast); the camera opens
/// lazily on the first request that needs it, since a missing camera is a
/// recoverable condition, not a startup failure.
pub fn spawn_engine(
    model_path: &str,
    backends: Vec<Box<dyn CaptureBackend>>,
    camera_index: u32,
    hints: CaptureHints,
) -> Result<EngineHandle, EngineError> {
    let detector = FaceDetector::load(model_path)?;
    let extractor = FeatureExtractor::new();
    let mut session = CaptureSession::with_hints(backends, camera_index, hints);

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("mien-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { samples, reply } => {
                        let result = run_enroll(&mut session, &detector, &extractor, samples);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize {
                        gallery,
                        threshold,
                        reply,
                    } => {
                        let result =
                            run_recognize(&mut session, &detector, &extractor, &gallery, threshold);
                        let _ = reply.send(result);
                    }
                    EngineRequest::RecognizeImage {
                        rgb,
                        width,
                        height,
                        gallery,
                        threshold,
                        reply,
                    } => {
                        let outcome = recognize_buffer(
                            &detector, &extractor, &rgb, width, height, &gallery, threshold,
                        );
                        let _ = reply.send(outcome);
                    }
                    EngineRequest::Stream {
                        gallery,
                        threshold,
                        interval,
                        fps,
                        mut sink,
                        cancel,
                        reply,
                    } => {
                        let matcher = Matcher::with_threshold(threshold);
                        let mut policy = EveryNth::new(interval);
                        let params = StreamParams {
                            fps,
                            width: hints.width,
                            height: hints.height,
                        };
                        let stats = stream::run_stream(
                            &mut session,
                            &detector,
                            &extractor,
                            &matcher,
                            &gallery,
                            &mut policy,
                            &params,
                            &mut *sink,
                            &cancel,
                        );
                        let _ = reply.send(stats);
                    }
                    EngineRequest::Status { reply } => {
                        // Probe the camera so status reflects reality, not
                        // just history.
                        if !session.is_streaming() {
                            session.open();
                        }
                        let _ = reply.send(EngineStatus {
                            session_state: session.state(),
                            backend: session.active_backend().map(str::to_string),
                        });
                    }
                }
            }
            session.close();
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

fn ensure_streaming(session: &mut CaptureSession) -> Result<(), EngineError> {
    if session.is_streaming() || session.open() {
        Ok(())
    } else {
        Err(EngineError::CameraUnavailable)
    }
}

/// Capture frames until `samples` signatures are collected or the attempt
/// budget (`samples * 5`) runs out. Frames without a detectable face
/// consume budget but contribute nothing.
fn run_enroll(
    session: &mut CaptureSession,
    detector: &FaceDetector,
    extractor: &FeatureExtractor,
    samples: usize,
) -> Result<EnrollOutcome, EngineError> {
    ensure_streaming(session)?;

    let budget = samples * ENROLL_ATTEMPT_FACTOR;
    let mut signatures: Vec<Signature> = Vec::with_capacity(samples);
    let mut attempts = 0usize;

    while attempts < budget && signatures.len() < samples {
        attempts += 1;
        if !session.is_streaming() {
            session.recover();
        }
        let Some(frame) = session.read() else {
            continue;
        };
        let regions = detector.detect(&frame.data, frame.width, frame.height);
        let Some(region) = regions.first() else {
            continue;
        };
        signatures.push(extractor.extract(&frame.data, frame.width, frame.height, region));
    }

    tracing::info!(
        collected = signatures.len(),
        attempts,
        "enrollment capture finished"
    );

    if signatures.len() < MIN_ENROLL_SIGNATURES {
        return Err(EngineError::InsufficientSamples {
            collected: signatures.len(),
            needed: MIN_ENROLL_SIGNATURES,
        });
    }

    let template = TemplateBuilder::build(&signatures)?;
    Ok(EnrollOutcome { template, attempts })
}

fn run_recognize(
    session: &mut CaptureSession,
    detector: &FaceDetector,
    extractor: &FeatureExtractor,
    gallery: &[(String, Template)],
    threshold: f32,
) -> Result<RecognizeOutcome, EngineError> {
    if gallery.is_empty() {
        return Ok(RecognizeOutcome::EmptyGallery);
    }
    ensure_streaming(session)?;

    for _ in 0..RECOGNIZE_ATTEMPTS {
        if !session.is_streaming() {
            session.recover();
        }
        let Some(frame) = session.read() else {
            continue;
        };
        let outcome = recognize_buffer(
            detector,
            extractor,
            &frame.data,
            frame.width,
            frame.height,
            gallery,
            threshold,
        );
        if !matches!(outcome, RecognizeOutcome::NoFace) {
            return Ok(outcome);
        }
    }

    Ok(RecognizeOutcome::NoFace)
}

/// Shared detect → extract → match path for camera frames and decoded
/// images.
fn recognize_buffer(
    detector: &FaceDetector,
    extractor: &FeatureExtractor,
    rgb: &[u8],
    width: u32,
    height: u32,
    gallery: &[(String, Template)],
    threshold: f32,
) -> RecognizeOutcome {
    if gallery.is_empty() {
        return RecognizeOutcome::EmptyGallery;
    }

    let regions = detector.detect(rgb, width, height);
    let Some(region) = regions.first() else {
        return RecognizeOutcome::NoFace;
    };

    let signature = extractor.extract(rgb, width, height, region);
    let matcher = Matcher::with_threshold(threshold);

    let mut best: Option<(String, MatchResult)> = None;
    for (identity, template) in gallery {
        let result = matcher.compare(&signature, template);
        let better = best
            .as_ref()
            .map_or(true, |(_, prev)| result.score > prev.score);
        if better {
            best = Some((identity.clone(), result));
        }
    }

    match best {
        Some((identity, result)) if result.is_match => RecognizeOutcome::Match {
            identity,
            score: result.score,
        },
        Some((_, result)) => RecognizeOutcome::NoMatch {
            best_score: result.score,
        },
        None => RecognizeOutcome::NoMatch { best_score: 0.0 },
    }
}
