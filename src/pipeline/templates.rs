use super::{
    classifier::{ClassifierModel, softmax},
    landmarks::{FEATURE_LEN, FeatureVector},
};
use crate::{
    error::{PipelineError, Result},
    teach::Dataset,
};

/// Logit scale applied to negated distances before the softmax.
const SHARPNESS: f32 = 4.0;

struct Template {
    label: String,
    centroid: FeatureVector,
}

/// Nearest-centroid classifier built from recorded samples, one template per sample.
///
/// Lets a freshly taught sign be recognized without a trained network.
pub struct TemplateClassifier {
    labels: Vec<String>,
    templates: Vec<Template>,
}

impl TemplateClassifier {
    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let mut labels: Vec<String> = Vec::new();
        let mut templates = Vec::new();

        for sample in dataset.samples() {
            let features: Vec<FeatureVector> = sample
                .frames
                .iter()
                .filter_map(|set| FeatureVector::from_landmarks(set).ok())
                .collect();
            let Some(centroid) = mean(&features) else {
                log::debug!(
                    "sample {} ({:?}) has no usable frames, skipping",
                    sample.id,
                    sample.label
                );
                continue;
            };
            if !labels.contains(&sample.label) {
                labels.push(sample.label.clone());
            }
            templates.push(Template {
                label: sample.label.clone(),
                centroid,
            });
        }

        if templates.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }
        log::info!(
            "built {} templates for {} labels",
            templates.len(),
            labels.len()
        );
        Ok(Self { labels, templates })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl ClassifierModel for TemplateClassifier {
    fn predict(&mut self, features: &FeatureVector) -> anyhow::Result<(String, f32)> {
        let distances: Vec<f32> = self
            .labels
            .iter()
            .map(|label| {
                self.templates
                    .iter()
                    .filter(|t| &t.label == label)
                    .map(|t| t.centroid.squared_distance(features).sqrt())
                    .fold(f32::INFINITY, f32::min)
            })
            .collect();

        let logits: Vec<f32> = distances.iter().map(|d| -d * SHARPNESS).collect();
        let probabilities = softmax(&logits);
        let (best, probability) = probabilities
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or_else(|| anyhow::anyhow!("template classifier has no labels"))?;
        Ok((self.labels[best].clone(), probability))
    }
}

fn mean(vectors: &[FeatureVector]) -> Option<FeatureVector> {
    if vectors.is_empty() {
        return None;
    }
    let mut sum = vec![0.0f32; FEATURE_LEN];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v.as_slice()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    FeatureVector::from_values(sum.into_iter().map(|x| x / n).collect()).ok()
}
