//! Teaching mode: labelled recordings and their export.

pub mod dataset;
pub mod export;
pub mod recorder;

pub use dataset::{Dataset, SampleSummary, TrainingSample};
pub use export::{FORMAT_VERSION, export, export_to_path, import, import_from_path};
pub use recorder::TrainingRecorder;
