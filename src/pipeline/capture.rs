use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use nokhwa::{
    Buffer, Camera, NokhwaError,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use super::{
    camera::{CameraBackend, CameraDevice, CaptureError, VideoSource},
    rgba_converter::{self, PixelFormat},
};
use crate::{
    error::{PipelineError, Result},
    types::Frame,
};

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

const FRAME_WAIT: Duration = Duration::from_millis(500);
const MAX_READ_FAILURES: u32 = 60;

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Fall back to any format Nokhwa can decode, but prefer higher FPS to
        // avoid very low default rates (e.g. 15 FPS) that some drivers reject.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

/// Camera backend for the platform's native capture API.
#[derive(Clone, Debug, Default)]
pub struct NokhwaBackend;

impl CameraBackend for NokhwaBackend {
    fn devices(&self) -> anyhow::Result<Vec<CameraDevice>> {
        let cameras = query(ApiBackend::Auto)?;
        Ok(cameras
            .iter()
            .enumerate()
            .map(|(position, info)| CameraDevice {
                index: device_number(info).unwrap_or(position as u32),
                label: info.human_name(),
            })
            .collect())
    }

    fn open(&self, device_index: u32) -> Result<Box<dyn VideoSource>> {
        let cameras = query(ApiBackend::Auto).map_err(|err| open_error(&err))?;
        if cameras.is_empty() {
            return Err(PipelineError::DeviceUnavailable);
        }

        let index = CameraIndex::Index(device_index);
        // Fail fast before spawning the capture thread.
        build_camera(index.clone())?;

        let (frame_tx, frame_rx) = bounded(1);
        let stream = CameraStream::spawn(index, frame_tx);
        Ok(Box::new(NokhwaSource { stream, frame_rx }))
    }
}

fn device_number(info: &CameraInfo) -> Option<u32> {
    match info.index() {
        CameraIndex::Index(idx) => Some(*idx),
        CameraIndex::String(_) => None,
    }
}

fn open_error(err: &NokhwaError) -> PipelineError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("authoriz")
    {
        PipelineError::PermissionDenied(message)
    } else {
        log::warn!("camera open failed: {message}");
        PipelineError::DeviceUnavailable
    }
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err),
            },
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err
        .map(|err| open_error(&err))
        .unwrap_or(PipelineError::DeviceUnavailable))
}

fn pixel_format(format: FrameFormat) -> PixelFormat {
    match format {
        FrameFormat::NV12 => PixelFormat::Nv12,
        FrameFormat::YUYV => PixelFormat::Yuyv,
        FrameFormat::MJPEG => PixelFormat::Mjpeg,
        FrameFormat::RAWRGB => PixelFormat::Rgb,
        FrameFormat::RAWBGR => PixelFormat::Bgr,
        FrameFormat::GRAY => PixelFormat::Gray,
    }
}

/// Capture thread owning the nokhwa camera. Stopping it closes the device.
#[derive(Debug)]
struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    fn spawn(index: CameraIndex, frame_tx: Sender<Buffer>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::spawn(move || {
            let mut camera = match build_camera(index) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to open camera: {err:?}");
                    return;
                }
            };

            let mut failures = 0u32;
            while !stop_flag.load(Ordering::Relaxed) {
                let frame_start = Instant::now();
                match camera.frame() {
                    Ok(buffer) => {
                        failures = 0;
                        // Drop if the loop is busy; it only ever wants the newest frame.
                        let _ = frame_tx.try_send(buffer);
                    }
                    Err(err) => {
                        failures += 1;
                        log::warn!(
                            "camera frame read failed (after {:?}): {err:?}",
                            frame_start.elapsed()
                        );
                        if failures >= MAX_READ_FAILURES {
                            log::error!("giving up on camera after {failures} failed reads");
                            break;
                        }
                    }
                }
            }

            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err:?}");
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct NokhwaSource {
    // Held for its Drop: stops the capture thread and closes the device.
    #[allow(dead_code)]
    stream: CameraStream,
    frame_rx: Receiver<Buffer>,
}

impl NokhwaSource {
    fn recv_latest(&self) -> std::result::Result<Buffer, CaptureError> {
        let mut buffer = match self.frame_rx.recv_timeout(FRAME_WAIT) {
            Ok(buffer) => buffer,
            Err(RecvTimeoutError::Timeout) => {
                return Err(CaptureError::Transient(format!(
                    "no frame within {FRAME_WAIT:?}"
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CaptureError::Lost("capture thread exited".into()));
            }
        };
        while let Ok(newer) = self.frame_rx.try_recv() {
            buffer = newer;
        }
        Ok(buffer)
    }
}

impl VideoSource for NokhwaSource {
    fn read_frame(&mut self, frame: &mut Frame) -> std::result::Result<(), CaptureError> {
        let buffer = self.recv_latest()?;
        let resolution = buffer.resolution();
        let (width, height) = rgba_converter::convert_into(
            buffer.buffer(),
            pixel_format(buffer.source_frame_format()),
            resolution.width_x,
            resolution.height_y,
            &mut frame.rgba,
        )
        .map_err(|err| CaptureError::Transient(format!("{err:#}")))?;

        frame.width = width;
        frame.height = height;
        Ok(())
    }
}
