//! Real-time sign recognition and teaching pipeline.
//!
//! [`InterpreterController`] owns the camera session and drives frames through landmark
//! extraction, classification, the skeleton overlay and, while teaching, the training
//! recorder. Hardware and models sit behind traits in [`pipeline`] so the loop can run
//! against any backend.

pub mod config;
pub mod controller;
pub mod error;
pub mod gesture;
pub mod model_download;
pub mod pipeline;
pub mod teach;
pub mod types;

pub use config::Config;
pub use controller::{InterpreterController, Status, StatusLabel, TickOutcome};
pub use error::{PipelineError, Result};
pub use types::{Clock, Frame, Landmark, LandmarkSet, Prediction, Timestamp};
