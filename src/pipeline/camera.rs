//! Camera session lifecycle.
//!
//! The session exclusively owns the open [`VideoSource`]. Dropping the source is what
//! releases the device, so every path out of `Running` (stop, device loss, teardown)
//! releases it by construction.

use std::{fmt, sync::Arc, thread};

use crossbeam_channel::{RecvTimeoutError, bounded};
use thiserror::Error;

use crate::{
    config::CameraConfig,
    error::{PipelineError, Result},
    types::Frame,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraDevice {
    pub index: u32,
    pub label: String,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The frame was missed but the device is still usable.
    #[error("frame capture failed: {0}")]
    Transient(String),
    /// The device went away and the session cannot continue.
    #[error("capture device lost: {0}")]
    Lost(String),
}

/// A live frame source. Dropping it releases the underlying device.
pub trait VideoSource: Send {
    /// Fills `frame` (buffer, width and height) with the next captured image.
    fn read_frame(&mut self, frame: &mut Frame) -> std::result::Result<(), CaptureError>;
}

/// Acquires video sources from the platform.
pub trait CameraBackend: Send + Sync {
    fn devices(&self) -> anyhow::Result<Vec<CameraDevice>>;

    /// Opens the device. Expected failures are `DeviceUnavailable` and `PermissionDenied`.
    fn open(&self, device_index: u32) -> Result<Box<dyn VideoSource>>;
}

/// Identity of one activation; results tagged with an older id are stale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next(self) -> Self {
        SessionId(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraState {
    Off,
    Initializing,
    Running,
    Error,
}

impl CameraState {
    pub fn label(&self) -> &'static str {
        match self {
            CameraState::Off => "Camera Off",
            CameraState::Initializing => "Starting Camera",
            CameraState::Running => "Camera Active",
            CameraState::Error => "Camera Error",
        }
    }
}

enum SessionState {
    Off,
    Initializing,
    Running {
        source: Box<dyn VideoSource>,
        failures: u32,
    },
    Error,
}

/// Result of asking the session for one frame.
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured,
    /// Nothing usable this tick; the session is still running.
    Skipped,
    /// The session left `Running` because the device is gone.
    Lost(String),
    NotRunning,
}

pub struct CameraSession {
    backend: Arc<dyn CameraBackend>,
    config: CameraConfig,
    state: SessionState,
    session_id: SessionId,
    last_error: Option<String>,
}

impl CameraSession {
    pub fn new(backend: Arc<dyn CameraBackend>, config: CameraConfig) -> Self {
        Self {
            backend,
            config,
            state: SessionState::Off,
            session_id: SessionId::default(),
            last_error: None,
        }
    }

    pub fn state(&self) -> CameraState {
        match self.state {
            SessionState::Off => CameraState::Off,
            SessionState::Initializing => CameraState::Initializing,
            SessionState::Running { .. } => CameraState::Running,
            SessionState::Error => CameraState::Error,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running { .. })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn devices(&self) -> anyhow::Result<Vec<CameraDevice>> {
        self.backend.devices()
    }

    pub fn select_device(&mut self, device_index: u32) {
        self.config.device_index = device_index;
    }

    /// Opens the configured device, waiting at most `activation_timeout`.
    pub fn activate(&mut self) -> Result<SessionId> {
        if matches!(
            self.state,
            SessionState::Running { .. } | SessionState::Initializing
        ) {
            return Err(PipelineError::AlreadyActive);
        }

        self.state = SessionState::Initializing;
        let timeout = self.config.activation_timeout();
        let device_index = self.config.device_index;
        log::info!("activating camera {device_index} (timeout {timeout:?})");

        let (open_tx, open_rx) = bounded(1);
        let backend = Arc::clone(&self.backend);
        thread::spawn(move || {
            // A source that opens after the caller gave up is dropped here, releasing it.
            let _ = open_tx.send(backend.open(device_index));
        });

        match open_rx.recv_timeout(timeout) {
            Ok(Ok(source)) => {
                self.session_id = self.session_id.next();
                self.state = SessionState::Running {
                    source,
                    failures: 0,
                };
                self.last_error = None;
                log::info!("camera session {} running", self.session_id);
                Ok(self.session_id)
            }
            Ok(Err(err)) => Err(self.fail(err)),
            Err(RecvTimeoutError::Timeout) => Err(self.fail(PipelineError::ActivationTimeout(timeout))),
            Err(RecvTimeoutError::Disconnected) => Err(self.fail(PipelineError::DeviceUnavailable)),
        }
    }

    /// Releases the device. Safe to call in any state; returns whether a device was held.
    pub fn deactivate(&mut self) -> bool {
        let was_running = self.is_running();
        // Replacing the state drops the source.
        self.state = SessionState::Off;
        self.session_id = self.session_id.next();
        if was_running {
            log::info!("camera released");
        }
        was_running
    }

    pub fn capture(&mut self, frame: &mut Frame) -> CaptureOutcome {
        let max_failures = self.config.max_consecutive_failures.max(1);
        let SessionState::Running { source, failures } = &mut self.state else {
            return CaptureOutcome::NotRunning;
        };

        let lost = match source.read_frame(frame) {
            Ok(()) if frame.is_well_formed() => {
                *failures = 0;
                return CaptureOutcome::Captured;
            }
            Ok(()) => {
                log::debug!(
                    "discarding malformed frame {}x{} ({} bytes)",
                    frame.width,
                    frame.height,
                    frame.rgba.len()
                );
                *failures += 1;
                None
            }
            Err(CaptureError::Transient(reason)) => {
                log::debug!("camera frame read failed: {reason}");
                *failures += 1;
                None
            }
            Err(CaptureError::Lost(reason)) => Some(reason),
        };

        let lost = lost.or_else(|| {
            (*failures >= max_failures).then(|| format!("{failures} consecutive capture failures"))
        });

        match lost {
            Some(reason) => {
                self.fail(PipelineError::DeviceLost(reason.clone()));
                CaptureOutcome::Lost(reason)
            }
            None => CaptureOutcome::Skipped,
        }
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        log::error!("camera session failed: {err}");
        self.state = SessionState::Error;
        self.session_id = self.session_id.next();
        self.last_error = Some(err.to_string());
        err
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;

    struct CountingSource {
        open: Arc<AtomicUsize>,
        script: Arc<Mutex<Vec<std::result::Result<(), CaptureError>>>>,
    }

    impl VideoSource for CountingSource {
        fn read_frame(&mut self, frame: &mut Frame) -> std::result::Result<(), CaptureError> {
            if let Some(step) = self.script.lock().unwrap().pop() {
                step?;
            }
            frame.width = 2;
            frame.height = 2;
            frame.rgba.resize(16, 0);
            Ok(())
        }
    }

    impl Drop for CountingSource {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    enum Mode {
        Ok,
        Missing,
        Denied,
        Slow(Duration),
    }

    struct CountingBackend {
        open: Arc<AtomicUsize>,
        mode: Mode,
        script: Arc<Mutex<Vec<std::result::Result<(), CaptureError>>>>,
    }

    impl CountingBackend {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                open: Arc::new(AtomicUsize::new(0)),
                mode,
                script: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    impl CameraBackend for CountingBackend {
        fn devices(&self) -> anyhow::Result<Vec<CameraDevice>> {
            Ok(vec![CameraDevice {
                index: 0,
                label: "fake".into(),
            }])
        }

        fn open(&self, _device_index: u32) -> Result<Box<dyn VideoSource>> {
            match self.mode {
                Mode::Missing => return Err(PipelineError::DeviceUnavailable),
                Mode::Denied => return Err(PipelineError::PermissionDenied("user said no".into())),
                Mode::Slow(delay) => thread::sleep(delay),
                Mode::Ok => {}
            }
            self.open.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSource {
                open: Arc::clone(&self.open),
                script: Arc::clone(&self.script),
            }))
        }
    }

    fn config(timeout_ms: u64) -> CameraConfig {
        CameraConfig {
            activation_timeout_ms: timeout_ms,
            max_consecutive_failures: 3,
            ..CameraConfig::default()
        }
    }

    fn blank_frame() -> Frame {
        Frame {
            rgba: Vec::new(),
            width: 0,
            height: 0,
            timestamp: 0,
        }
    }

    #[test]
    fn handle_held_exactly_while_running() {
        let backend = CountingBackend::new(Mode::Ok);
        let mut session = CameraSession::new(backend.clone(), config(1_000));

        for _ in 0..5 {
            assert_eq!(backend.open.load(Ordering::SeqCst), 0);
            session.activate().unwrap();
            assert_eq!(session.state(), CameraState::Running);
            assert_eq!(backend.open.load(Ordering::SeqCst), 1);
            assert!(session.deactivate());
            assert_eq!(session.state(), CameraState::Off);
        }
        assert_eq!(backend.open.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn second_activation_is_rejected() {
        let backend = CountingBackend::new(Mode::Ok);
        let mut session = CameraSession::new(backend.clone(), config(1_000));
        session.activate().unwrap();
        assert!(matches!(session.activate(), Err(PipelineError::AlreadyActive)));
        assert_eq!(backend.open.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_failures_surface_as_error_state() {
        let mut session = CameraSession::new(CountingBackend::new(Mode::Missing), config(1_000));
        assert!(matches!(session.activate(), Err(PipelineError::DeviceUnavailable)));
        assert_eq!(session.state(), CameraState::Error);
        assert!(session.last_error().is_some());

        let mut session = CameraSession::new(CountingBackend::new(Mode::Denied), config(1_000));
        assert!(matches!(session.activate(), Err(PipelineError::PermissionDenied(_))));
    }

    #[test]
    fn slow_device_times_out_and_is_released_later() {
        let backend = CountingBackend::new(Mode::Slow(Duration::from_millis(100)));
        let mut session = CameraSession::new(backend.clone(), config(10));
        assert!(matches!(
            session.activate(),
            Err(PipelineError::ActivationTimeout(_))
        ));
        assert_eq!(session.state(), CameraState::Error);

        thread::sleep(Duration::from_millis(300));
        assert_eq!(backend.open.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_releases_device() {
        let backend = CountingBackend::new(Mode::Ok);
        {
            let mut session = CameraSession::new(backend.clone(), config(1_000));
            session.activate().unwrap();
            assert_eq!(backend.open.load(Ordering::SeqCst), 1);
        }
        assert_eq!(backend.open.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn repeated_transient_failures_lose_the_device() {
        let backend = CountingBackend::new(Mode::Ok);
        *backend.script.lock().unwrap() = (0..3)
            .map(|_| Err(CaptureError::Transient("no frame".into())))
            .collect();
        let mut session = CameraSession::new(backend.clone(), config(1_000));
        let first = session.activate().unwrap();

        let mut frame = blank_frame();
        assert_eq!(session.capture(&mut frame), CaptureOutcome::Skipped);
        assert_eq!(session.capture(&mut frame), CaptureOutcome::Skipped);
        assert!(matches!(session.capture(&mut frame), CaptureOutcome::Lost(_)));
        assert_eq!(session.state(), CameraState::Error);
        assert!(session.session_id() > first);
        assert_eq!(backend.open.load(Ordering::SeqCst), 0);
        assert_eq!(session.capture(&mut frame), CaptureOutcome::NotRunning);
    }

    #[test]
    fn captured_frame_is_filled() {
        let backend = CountingBackend::new(Mode::Ok);
        let mut session = CameraSession::new(backend, config(1_000));
        session.activate().unwrap();
        let mut frame = blank_frame();
        assert_eq!(session.capture(&mut frame), CaptureOutcome::Captured);
        assert_eq!((frame.width, frame.height), (2, 2));
    }
}
