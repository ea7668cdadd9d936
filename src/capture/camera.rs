//! Live camera capture through `nokhwa`.
//!
//! `nokhwa` camera handles are not `Send`, so the device is opened and
//! read on its own `camera` thread. Decoded RGB frames are forwarded over a
//! small channel to whichever thread owns the [`CameraSource`].

use super::{Frame, FrameSource, PixelFormat, SourceError};
use crossbeam::channel::{self, Receiver, Sender};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Frames buffered between the camera thread and the reader.
const CHANNEL_DEPTH: usize = 2;

struct StreamInfo {
    width: u32,
    height: u32,
    fps: u32,
}

/// A camera device opened by index.
pub struct CameraSource {
    index: u32,
    width: u32,
    height: u32,
    fps: u32,
    frames: Option<Receiver<Result<Frame, String>>>,
    stop: Arc<AtomicBool>,
}

impl CameraSource {
    /// Opens device `index` at its highest frame rate.
    ///
    /// Blocks until the device has started streaming or failed to.
    pub fn open(index: u32) -> Result<Self, SourceError> {
        let (ready_tx, ready_rx) = channel::bounded(1);
        let (frame_tx, frame_rx) = channel::bounded(CHANNEL_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("camera".into())
            .spawn(move || stream(index, ready_tx, frame_tx, thread_stop))?;

        let info = ready_rx
            .recv()
            .map_err(|_| "camera thread exited during startup".to_string())
            .and_then(|ready| ready)
            .map_err(|reason| SourceError::OpenFailed {
                identifier: index.to_string(),
                reason,
            })?;

        tracing::info!(
            index,
            width = info.width,
            height = info.height,
            fps = info.fps,
            "Camera stream opened"
        );

        Ok(Self {
            index,
            width: info.width,
            height: info.height,
            fps: info.fps,
            frames: Some(frame_rx),
            stop,
        })
    }
}

fn open_camera(index: u32) -> Result<(Camera, StreamInfo), String> {
    let requested =
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera =
        Camera::new(CameraIndex::Index(index), requested).map_err(|e| e.to_string())?;
    camera.open_stream().map_err(|e| e.to_string())?;

    let resolution = camera.resolution();
    let info = StreamInfo {
        width: resolution.width(),
        height: resolution.height(),
        fps: camera.frame_rate(),
    };
    Ok((camera, info))
}

/// Body of the `camera` thread.
fn stream(
    index: u32,
    ready: Sender<Result<StreamInfo, String>>,
    frames: Sender<Result<Frame, String>>,
    stop: Arc<AtomicBool>,
) {
    let (mut camera, info) = match open_camera(index) {
        Ok(opened) => opened,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };
    let (width, height) = (info.width, info.height);
    if ready.send(Ok(info)).is_err() {
        return;
    }

    let mut sequence = 0u64;
    while !stop.load(Ordering::Acquire) {
        let decoded = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbFormat>())
            .map_err(|e| e.to_string());

        let item = decoded.and_then(|image| {
            if image.width() != width || image.height() != height {
                return Err(format!(
                    "camera switched to {}x{} mid-stream",
                    image.width(),
                    image.height()
                ));
            }
            Ok(Frame::new(
                image.into_raw(),
                width,
                height,
                PixelFormat::Rgb8,
                sequence,
            ))
        });
        let failed = item.is_err();
        if frames.send(item).is_err() || failed {
            break;
        }
        sequence += 1;
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!(index, error = %e, "Failed to stop camera stream");
    }
    tracing::debug!(index, "Camera thread exiting");
}

impl FrameSource for CameraSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let frames = self.frames.as_ref().ok_or(SourceError::NotOpen)?;
        match frames.recv() {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(reason)) => Err(SourceError::ReadFailed(reason)),
            Err(_) => Err(SourceError::ReadFailed(format!(
                "camera {} thread stopped",
                self.index
            ))),
        }
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn nominal_fps(&self) -> u32 {
        self.fps
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if self.frames.take().is_some() {
            tracing::debug!(index = self.index, "Camera source closed");
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
