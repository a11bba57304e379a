pub mod camera;
#[cfg(feature = "camera-nokhwa")]
pub mod capture;
pub mod classifier;
pub mod frame_pool;
pub mod handpose;
pub mod landmarks;
pub mod rgba_converter;
pub mod skeleton;
pub mod smoothing;
pub mod templates;

// Re-exports for convenience
pub use camera::{
    CameraBackend, CameraDevice, CameraSession, CameraState, CaptureError, CaptureOutcome,
    SessionId, VideoSource,
};
#[cfg(feature = "camera-nokhwa")]
pub use capture::NokhwaBackend;
pub use classifier::{
    Classifier, ClassifierModel, InferenceResponse, InferenceWorker, ModelLoader, ModelStatus,
};
pub use frame_pool::FramePool;
pub use handpose::HandposeExtractor;
pub use landmarks::{FEATURE_LEN, FeatureVector, LandmarkExtractor, NUM_HAND_LANDMARKS};
pub use skeleton::{OverlayRenderer, OverlaySurface};
pub use smoothing::PredictionSmoother;
pub use templates::TemplateClassifier;
