//! V4L2 capture backend via the `v4l` crate (Linux only).

use crate::frame::{self, Frame};
use crate::session::{CaptureBackend, CaptureError, CaptureHints, VideoSource};
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Capture backend for `/dev/video*` device nodes.
pub struct V4l2Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB on read.
    Yuyv,
    /// Interleaved RGB24, passed through.
    Rgb3,
}

impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn open(&self, index: u32, hints: CaptureHints) -> Result<Box<dyn VideoSource>, CaptureError> {
        let device_path = format!("/dev/video{index}");
        if !Path::new(&device_path).exists() {
            return Err(CaptureError::DeviceNotFound(device_path));
        }

        let device = Device::with_path(&device_path)
            .map_err(|e| CaptureError::OpenFailed(format!("{device_path}: {e}")))?;

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::OpenFailed(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::Unsupported(format!(
                "{device_path} is not a video capture device"
            )));
        }

        tracing::info!(
            device = %device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut fmt = device
            .format()
            .map_err(|e| CaptureError::OpenFailed(format!("get format: {e}")))?;
        fmt.width = hints.width;
        fmt.height = hints.height;
        fmt.fourcc = FourCC::new(b"YUYV");

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CaptureError::OpenFailed(format!("set format: {e}")))?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else {
            return Err(CaptureError::Unsupported(format!(
                "pixel format {:?} (need YUYV or RGB3)",
                negotiated.fourcc
            )));
        };

        if hints.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(hints.fps);
            if let Err(e) = device.set_params(&params) {
                tracing::warn!(device = %device_path, error = %e, "failed to set frame rate");
            }
        }

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Box::new(V4l2Source {
            device,
            width: negotiated.width,
            height: negotiated.height,
            buffers: hints.buffers.max(1),
            pixel_format,
        }))
    }
}

struct V4l2Source {
    device: Device,
    width: u32,
    height: u32,
    buffers: u32,
    pixel_format: PixelFormat,
}

impl VideoSource for V4l2Source {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        // A fresh mmap stream per read keeps the device borrow local;
        // with a single-buffer queue the dequeued frame is current.
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, self.buffers)
            .map_err(|e| CaptureError::ReadFailed(format!("create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CaptureError::ReadFailed(format!("dequeue buffer: {e}")))?;

        let data = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)
                .map_err(|e| CaptureError::ReadFailed(e.to_string()))?,
            PixelFormat::Rgb3 => {
                let expected = Frame::expected_len(self.width, self.height);
                if buf.len() < expected {
                    return Err(CaptureError::ReadFailed(format!(
                        "RGB3 buffer too short: expected {expected}, got {}",
                        buf.len()
                    )));
                }
                buf[..expected].to_vec()
            }
        };

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }
}
