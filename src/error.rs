use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no capture device available")]
    DeviceUnavailable,

    #[error("camera access was denied: {0}")]
    PermissionDenied(String),

    #[error("camera session is already active")]
    AlreadyActive,

    #[error("camera did not start within {0:?}")]
    ActivationTimeout(Duration),

    #[error("camera is not running")]
    CameraNotRunning,

    #[error("capture device lost: {0}")]
    DeviceLost(String),

    #[error("classifier model is not ready")]
    NotReady,

    #[error("classifier model failed to load: {0}")]
    ModelLoadFailed(String),

    #[error("classifier model did not load within {0:?}")]
    ModelLoadTimeout(Duration),

    #[error("no subject detected in frame")]
    ExtractionFailed,

    #[error("inference failed: {0}")]
    InferenceError(String),

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("invalid recording label {0:?}")]
    InvalidLabel(String),

    #[error("no recording in progress")]
    NotRecording,

    #[error("recording of {label:?} interrupted after {frames} frames")]
    SessionInterrupted { label: String, frames: usize },

    #[error("dataset has no samples")]
    EmptyDataset,

    #[error("sample {0} holds non-finite landmark values")]
    CorruptSample(u64),

    #[error("duplicate sample id {0}")]
    DuplicateSample(u64),

    #[error("no sample with id {0}")]
    UnknownSample(u64),

    #[error("unsupported dataset format version {found} (expected {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Per-frame failures are absorbed by the loop; everything else is surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::ExtractionFailed | PipelineError::InferenceError(_)
        )
    }
}
