use std::sync::Arc;

use anyhow::{Context, anyhow};
use ndarray::Array2;
use ort::{session::Session, value::Tensor};

use crate::{
    config::ClassifierConfig,
    model_download::{ModelKind, ensure_model_ready, log_download_event},
    pipeline::{
        classifier::{ClassifierModel, ModelLoader, softmax},
        handpose::load_session,
        landmarks::{FEATURE_LEN, FeatureVector},
    },
};

/// Sign classifier backed by an ONNX model taking a `(1, 42)` feature tensor and
/// returning one logit per class.
pub struct OrtGestureModel {
    session: Session,
    labels: Vec<String>,
}

impl OrtGestureModel {
    pub fn load(config: &ClassifierConfig) -> anyhow::Result<Self> {
        ensure_model_ready(
            ModelKind::GestureClassifier,
            &config.model_path,
            log_download_event,
        )?;
        let session = load_session(&config.model_path)?;
        log::info!(
            "loaded gesture classification model from {} ({} labels)",
            config.model_path.display(),
            config.labels.len()
        );
        Ok(Self {
            session,
            labels: config.labels.clone(),
        })
    }
}

impl ClassifierModel for OrtGestureModel {
    fn predict(&mut self, features: &FeatureVector) -> anyhow::Result<(String, f32)> {
        let input = Array2::from_shape_vec((1, FEATURE_LEN), features.as_slice().to_vec())
            .map_err(|err| anyhow!("failed to build classifier input: {err}"))?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("gesture model inference failed")?;

        let logits: Vec<f32> = outputs[0]
            .try_extract_array::<f32>()
            .context("failed to extract logits")?
            .iter()
            .copied()
            .collect();
        let probabilities = softmax(&logits);
        let (class, probability) =
            argmax(&probabilities).ok_or_else(|| anyhow!("gesture model returned no logits"))?;
        Ok((label_for(&self.labels, class), probability))
    }
}

/// Loader for the classifier's background thread; the session is created on first use.
pub fn ort_model_loader(config: ClassifierConfig) -> ModelLoader {
    Arc::new(move || -> anyhow::Result<Box<dyn ClassifierModel>> {
        Ok(Box::new(OrtGestureModel::load(&config)?))
    })
}

fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
}

fn label_for(labels: &[String], class: usize) -> String {
    labels
        .get(class)
        .cloned()
        .unwrap_or_else(|| format!("class {class}"))
}
