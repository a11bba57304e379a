//! The interpreter: one owned controller wiring camera, extraction, classification,
//! overlay and teaching together behind a polled status surface.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use image::RgbaImage;

use crate::{
    config::Config,
    error::{PipelineError, Result},
    pipeline::{
        CameraBackend, CameraDevice, CameraSession, CameraState, CaptureOutcome, Classifier,
        FeatureVector, FramePool, InferenceResponse, InferenceWorker, LandmarkExtractor,
        ModelStatus, OverlayRenderer, PredictionSmoother, SessionId, TemplateClassifier,
    },
    teach::{self, Dataset, SampleSummary, TrainingRecorder},
    types::{Clock, Frame, Prediction},
};

/// Coarse state for presentation, derived from camera, model and recorder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusLabel {
    CameraOff,
    Starting,
    LoadingModel,
    Ready,
    Recording,
    Error,
}

impl StatusLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLabel::CameraOff => "Camera off",
            StatusLabel::Starting => "Starting camera",
            StatusLabel::LoadingModel => "Loading model",
            StatusLabel::Ready => "Ready",
            StatusLabel::Recording => "Recording",
            StatusLabel::Error => "Error",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub camera_state: CameraState,
    pub model_loaded: bool,
    pub model_status: ModelStatus,
    pub current_prediction: Option<Prediction>,
    pub recording: bool,
    pub record_count: usize,
    pub last_error: Option<String>,
    pub label: StatusLabel,
}

/// What a single loop iteration did.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// The camera is not running.
    Inactive,
    /// No usable frame this tick.
    Skipped,
    /// The extractor found no subject; the overlay was cleared.
    NoSubject,
    Processed { points: usize, submitted: bool },
    /// The device failed for good. Carries the interrupted recording, if any.
    DeviceLost {
        reason: String,
        interrupted: Option<(String, usize)>,
    },
}

pub struct InterpreterController {
    config: Config,
    clock: Clock,
    camera: CameraSession,
    frames: FramePool,
    extractor: Box<dyn LandmarkExtractor>,
    classifier: Classifier,
    worker: InferenceWorker,
    smoother: PredictionSmoother,
    overlay: OverlayRenderer,
    surface: RgbaImage,
    recorder: TrainingRecorder,
    current_prediction: Option<Prediction>,
    transcript: Vec<String>,
    last_error: Option<String>,
}

impl InterpreterController {
    pub fn new(
        config: Config,
        backend: Arc<dyn CameraBackend>,
        extractor: Box<dyn LandmarkExtractor>,
        classifier: Classifier,
    ) -> Self {
        classifier.load();
        Self {
            clock: Clock::new(),
            camera: CameraSession::new(backend, config.camera.clone()),
            frames: FramePool::new(config.pipeline.frame_pool_size),
            extractor,
            worker: InferenceWorker::spawn(classifier.clone()),
            classifier,
            smoother: PredictionSmoother::new(config.classifier.smoothing_window),
            overlay: OverlayRenderer::new(config.overlay.clone()),
            surface: RgbaImage::new(0, 0),
            recorder: TrainingRecorder::new(),
            current_prediction: None,
            transcript: Vec::new(),
            last_error: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    // ---- camera lifecycle ----

    pub fn list_cameras(&self) -> anyhow::Result<Vec<CameraDevice>> {
        self.camera.devices()
    }

    /// Chooses the device used by the next activation.
    pub fn select_camera(&mut self, device_index: u32) -> Result<()> {
        if self.camera.is_running() {
            return Err(PipelineError::AlreadyActive);
        }
        self.camera.select_device(device_index);
        self.config.camera.device_index = device_index;
        Ok(())
    }

    /// Starts the camera. Classifier loading, begun at construction, is retried here
    /// after a failure.
    pub fn activate_camera(&mut self) -> Result<SessionId> {
        match self.camera.activate() {
            Ok(session) => {
                self.reset_predictions();
                self.last_error = None;
                self.classifier.load();
                Ok(session)
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Releases the camera. Safe in any state.
    ///
    /// A recording in progress is sealed with whatever it captured and reported as
    /// `SessionInterrupted`; the camera is released either way.
    pub fn deactivate_camera(&mut self) -> Result<()> {
        self.camera.deactivate();
        self.reset_predictions();
        let size = self.surface.dimensions();
        self.overlay.render(&mut self.surface, size, None);

        match self.interrupt_recording() {
            Some((label, frames)) => {
                let err = PipelineError::SessionInterrupted { label, frames };
                self.last_error = Some(err.to_string());
                Err(err)
            }
            None => Ok(()),
        }
    }

    pub fn camera_state(&self) -> CameraState {
        self.camera.state()
    }

    // ---- overlay ----

    pub fn set_overlay_enabled(&mut self, enabled: bool) {
        self.overlay.set_enabled(enabled);
    }

    pub fn overlay_enabled(&self) -> bool {
        self.overlay.is_enabled()
    }

    /// The overlay drawn for the most recent frame, sized to that frame.
    pub fn overlay_surface(&self) -> &RgbaImage {
        &self.surface
    }

    // ---- classifier ----

    pub fn model_loaded(&self) -> bool {
        self.classifier.is_ready()
    }

    /// Blocks until the model is ready, bounded by `classifier.load_timeout`.
    pub fn wait_model_ready(&self) -> Result<()> {
        self.classifier.load();
        self.classifier
            .wait_ready(self.config.classifier.load_timeout())
    }

    /// Switches to a nearest-template classifier built from the taught samples.
    ///
    /// Returns the number of distinct labels it recognizes.
    pub fn adopt_taught_signs(&mut self) -> Result<usize> {
        let templates = TemplateClassifier::from_dataset(self.recorder.dataset())?;
        let labels = templates.labels().len();
        self.classifier = Classifier::preloaded(Box::new(templates));
        self.worker = InferenceWorker::spawn(self.classifier.clone());
        self.reset_predictions();
        log::info!("classifier replaced by {labels} taught signs");
        Ok(labels)
    }

    pub fn current_prediction(&self) -> Option<&Prediction> {
        self.current_prediction.as_ref()
    }

    /// Appends the current label to the transcript when it clears `commit_threshold`.
    pub fn commit_prediction(&mut self) -> Option<String> {
        let prediction = self.current_prediction.as_ref()?;
        if let Some(threshold) = self.config.classifier.commit_threshold {
            if prediction.probability < threshold {
                log::debug!(
                    "not committing {}: below threshold {threshold}",
                    prediction.display_text()
                );
                return None;
            }
        }
        self.transcript.push(prediction.label.clone());
        Some(prediction.label.clone())
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    // ---- teaching ----

    /// Fails with `CameraNotRunning` unless the camera is running.
    pub fn start_recording(&mut self, label: &str) -> Result<()> {
        if !self.camera.is_running() {
            return Err(PipelineError::CameraNotRunning);
        }
        self.recorder.start(label, self.clock.now())
    }

    pub fn stop_recording(&mut self, label: &str, category: &str) -> Result<SampleSummary> {
        self.recorder.stop(label, category, self.clock.now())
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn record_count(&self) -> usize {
        self.recorder.record_count()
    }

    pub fn dataset(&self) -> &Dataset {
        self.recorder.dataset()
    }

    /// Replaces the accumulated samples, e.g. with a previously exported dataset.
    pub fn restore_dataset(&mut self, dataset: Dataset) -> Result<()> {
        if self.recorder.is_recording() {
            return Err(PipelineError::AlreadyRecording);
        }
        log::info!("restored dataset with {} samples", dataset.len());
        self.recorder = TrainingRecorder::with_dataset(dataset);
        Ok(())
    }

    pub fn discard_sample(&mut self, id: u64) -> Result<SampleSummary> {
        self.recorder.discard_sample(id)
    }

    pub fn discard_last(&mut self) -> Option<SampleSummary> {
        self.recorder.discard_last()
    }

    pub fn export_dataset(&self) -> Result<Vec<u8>> {
        teach::export(self.recorder.dataset())
    }

    pub fn export_dataset_to(&self, path: &Path) -> Result<usize> {
        teach::export_to_path(self.recorder.dataset(), path)
    }

    // ---- status ----

    pub fn status(&self) -> Status {
        let camera_state = self.camera.state();
        let model_status = self.classifier.status();
        let model_error = self.model_error(&model_status);
        let recording = self.recorder.is_recording();

        let label = if camera_state == CameraState::Error || model_error.is_some() {
            StatusLabel::Error
        } else {
            match camera_state {
                CameraState::Off => StatusLabel::CameraOff,
                CameraState::Initializing => StatusLabel::Starting,
                _ if model_status != ModelStatus::Ready => StatusLabel::LoadingModel,
                _ if recording => StatusLabel::Recording,
                _ => StatusLabel::Ready,
            }
        };

        Status {
            camera_state,
            model_loaded: model_status == ModelStatus::Ready,
            model_status,
            current_prediction: self.current_prediction.clone(),
            recording,
            record_count: self.recorder.record_count(),
            last_error: self
                .last_error
                .clone()
                .or_else(|| model_error.map(|err| err.to_string())),
            label,
        }
    }

    fn model_error(&self, status: &ModelStatus) -> Option<PipelineError> {
        let timeout = self.config.classifier.load_timeout();
        match status {
            ModelStatus::Failed(reason) => Some(PipelineError::ModelLoadFailed(reason.clone())),
            ModelStatus::Loading
                if self
                    .classifier
                    .loading_for()
                    .is_some_and(|elapsed| elapsed >= timeout) =>
            {
                Some(PipelineError::ModelLoadTimeout(timeout))
            }
            _ => None,
        }
    }

    // ---- loop ----

    /// Runs one loop iteration: applies finished inferences, then captures and processes
    /// one frame.
    pub fn tick(&mut self) -> TickOutcome {
        let responses = self.worker.poll(self.camera.session_id());
        self.apply_inferences(responses);

        if !self.camera.is_running() {
            return TickOutcome::Inactive;
        }

        let mut frame = self.frames.acquire(self.clock.now());
        let outcome = match self.camera.capture(&mut frame) {
            CaptureOutcome::Captured => self.process(&frame),
            CaptureOutcome::Skipped => TickOutcome::Skipped,
            CaptureOutcome::NotRunning => TickOutcome::Inactive,
            CaptureOutcome::Lost(reason) => self.device_lost(reason),
        };
        self.frames.release(frame);
        outcome
    }

    /// Waits up to `timeout` for queued inferences and applies them. Returns how many
    /// predictions were applied.
    pub fn settle(&mut self, timeout: Duration) -> usize {
        let responses = self.worker.drain(self.camera.session_id(), timeout);
        self.apply_inferences(responses)
    }

    /// Ticks at `pipeline.frame_interval` until `stop` is set, the camera is
    /// deactivated, or the device is lost.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        let interval = self.config.pipeline.frame_interval();
        log::info!("frame loop running every {interval:?}");
        while !stop.load(Ordering::Relaxed) {
            let started = Instant::now();
            match self.tick() {
                TickOutcome::Inactive => break,
                TickOutcome::DeviceLost {
                    interrupted: Some((label, frames)),
                    ..
                } => return Err(PipelineError::SessionInterrupted { label, frames }),
                TickOutcome::DeviceLost { reason, .. } => {
                    return Err(PipelineError::DeviceLost(reason));
                }
                _ => {}
            }
            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
        log::info!("frame loop stopped");
        Ok(())
    }

    fn process(&mut self, frame: &Frame) -> TickOutcome {
        let landmarks = match self.extractor.extract(frame) {
            Ok(set) => set,
            Err(err) => {
                if err.is_transient() {
                    log::debug!("frame at {} ms skipped: {err}", frame.timestamp);
                } else {
                    log::warn!("landmark extraction failed: {err}");
                }
                self.overlay
                    .render(&mut self.surface, (frame.width, frame.height), None);
                return TickOutcome::NoSubject;
            }
        };

        self.overlay.render(
            &mut self.surface,
            (frame.width, frame.height),
            Some(&landmarks),
        );

        let mut submitted = false;
        if self.classifier.is_ready() && !landmarks.is_empty() {
            match FeatureVector::from_landmarks(&landmarks) {
                Ok(features) => {
                    self.worker.submit(
                        self.camera.session_id(),
                        features,
                        landmarks.source_timestamp,
                    );
                    submitted = true;
                }
                Err(err) => log::debug!("no features for frame at {} ms: {err}", frame.timestamp),
            }
        }

        let points = landmarks.len();
        self.recorder.append(landmarks);
        TickOutcome::Processed { points, submitted }
    }

    fn apply_inferences(&mut self, responses: Vec<InferenceResponse>) -> usize {
        let mut applied = 0;
        for response in responses {
            match response.result {
                Ok(prediction) => {
                    self.current_prediction = Some(self.smoother.push(prediction));
                    applied += 1;
                }
                Err(err) => log::debug!(
                    "inference for frame at {} ms failed: {err}",
                    response.timestamp
                ),
            }
        }
        applied
    }

    fn device_lost(&mut self, reason: String) -> TickOutcome {
        self.reset_predictions();
        let interrupted = self.interrupt_recording();
        let err = match &interrupted {
            Some((label, frames)) => PipelineError::SessionInterrupted {
                label: label.clone(),
                frames: *frames,
            },
            None => PipelineError::DeviceLost(reason.clone()),
        };
        self.last_error = Some(err.to_string());
        TickOutcome::DeviceLost {
            reason,
            interrupted,
        }
    }

    fn interrupt_recording(&mut self) -> Option<(String, usize)> {
        self.recorder
            .interrupt(&self.config.recorder.default_category, self.clock.now())
    }

    fn reset_predictions(&mut self) {
        self.worker.cancel();
        self.smoother.reset();
        self.current_prediction = None;
    }
}

impl Drop for InterpreterController {
    fn drop(&mut self) {
        if self.camera.is_running() {
            if let Err(err) = self.deactivate_camera() {
                log::warn!("camera shut down during teardown: {err}");
            }
        }
    }
}
