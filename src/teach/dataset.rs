use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, Result},
    types::{LandmarkSet, Timestamp},
};

/// One labelled recording: every landmark set captured between start and stop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub id: u64,
    pub label: String,
    pub category: String,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    pub frames: Vec<LandmarkSet>,
}

impl TrainingSample {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Summary handed back when a recording is sealed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleSummary {
    pub id: u64,
    pub label: String,
    pub category: String,
    pub frames: usize,
}

impl From<&TrainingSample> for SampleSummary {
    fn from(sample: &TrainingSample) -> Self {
        Self {
            id: sample.id,
            label: sample.label.clone(),
            category: sample.category.clone(),
            frames: sample.frames.len(),
        }
    }
}

/// Ordered collection of sealed samples. Ids are never reused, even after a discard.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    samples: Vec<TrainingSample>,
    next_id: u64,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a dataset from stored samples. The id counter resumes at `next_id` or past
    /// the highest stored id, whichever is later.
    pub(crate) fn from_parts(samples: Vec<TrainingSample>, next_id: u64) -> Result<Self> {
        let mut seen = HashSet::with_capacity(samples.len());
        for sample in &samples {
            if !seen.insert(sample.id) {
                return Err(PipelineError::DuplicateSample(sample.id));
            }
        }
        let next_id = samples
            .iter()
            .map(|s| s.id + 1)
            .max()
            .unwrap_or(0)
            .max(next_id);
        Ok(Self { samples, next_id })
    }

    /// The id the next sealed sample will get.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn samples(&self) -> &[TrainingSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&TrainingSample> {
        self.samples.iter().find(|s| s.id == id)
    }

    /// Distinct labels in first-seen order.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for sample in &self.samples {
            if !labels.contains(&sample.label.as_str()) {
                labels.push(&sample.label);
            }
        }
        labels
    }

    pub(crate) fn push(
        &mut self,
        label: String,
        category: String,
        start_timestamp: Timestamp,
        end_timestamp: Timestamp,
        frames: Vec<LandmarkSet>,
    ) -> &TrainingSample {
        let id = self.next_id;
        self.next_id += 1;
        self.samples.push(TrainingSample {
            id,
            label,
            category,
            start_timestamp,
            end_timestamp,
            frames,
        });
        &self.samples[self.samples.len() - 1]
    }

    pub(crate) fn remove(&mut self, id: u64) -> Result<TrainingSample> {
        let idx = self
            .samples
            .iter()
            .position(|s| s.id == id)
            .ok_or(PipelineError::UnknownSample(id))?;
        Ok(self.samples.remove(idx))
    }

    pub(crate) fn pop(&mut self) -> Option<TrainingSample> {
        self.samples.pop()
    }
}
