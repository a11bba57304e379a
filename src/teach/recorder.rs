use super::dataset::{Dataset, SampleSummary, TrainingSample};
use crate::{
    error::{PipelineError, Result},
    types::{LandmarkSet, Timestamp},
};

#[derive(Debug)]
struct ActiveRecording {
    label: String,
    started: Timestamp,
    frames: Vec<LandmarkSet>,
}

/// Captures landmark sequences under a label and seals them into the owned [`Dataset`].
///
/// At most one recording is active. Samples only enter the dataset when sealed, so a
/// reader never observes a partial one.
#[derive(Debug, Default)]
pub struct TrainingRecorder {
    active: Option<ActiveRecording>,
    dataset: Dataset,
}

impl TrainingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(dataset: Dataset) -> Self {
        Self {
            active: None,
            dataset,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_label(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.label.as_str())
    }

    /// Frames captured by the active recording, 0 when idle.
    pub fn record_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.frames.len())
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn start(&mut self, label: &str, timestamp: Timestamp) -> Result<()> {
        let label = validate_label(label)?;
        if self.active.is_some() {
            return Err(PipelineError::AlreadyRecording);
        }
        log::info!("recording started for {label:?}");
        self.active = Some(ActiveRecording {
            label,
            started: timestamp,
            frames: Vec::new(),
        });
        Ok(())
    }

    /// Adds one landmark set to the active recording. Returns false when idle or when
    /// the set holds non-finite values, which are dropped as degraded frames.
    pub fn append(&mut self, set: LandmarkSet) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if !set.is_finite() {
            log::debug!(
                "dropping degraded frame at {} for {:?}",
                set.source_timestamp,
                active.label
            );
            return false;
        }
        active.frames.push(set);
        true
    }

    /// Seals the active recording. `label` must name it.
    pub fn stop(
        &mut self,
        label: &str,
        category: &str,
        timestamp: Timestamp,
    ) -> Result<SampleSummary> {
        let active = self.active.as_ref().ok_or(PipelineError::NotRecording)?;
        let label = validate_label(label)?;
        if active.label != label {
            return Err(PipelineError::InvalidLabel(label));
        }
        let category = match category.trim() {
            "" => "PHRASE".to_string(),
            c => c.to_string(),
        };

        let Some(active) = self.active.take() else {
            return Err(PipelineError::NotRecording);
        };
        let sample = self.seal(active, category, timestamp);
        log::info!(
            "recorded sample {} for {:?} with {} frames",
            sample.id,
            sample.label,
            sample.frames.len()
        );
        Ok(SampleSummary::from(sample))
    }

    /// Seals whatever the active recording holds after the session ended underneath it.
    ///
    /// Returns the interrupted label and frame count, or `None` when idle.
    pub fn interrupt(&mut self, category: &str, timestamp: Timestamp) -> Option<(String, usize)> {
        let active = self.active.take()?;
        let sample = self.seal(active, category.to_string(), timestamp);
        log::warn!(
            "recording of {:?} interrupted after {} frames",
            sample.label,
            sample.frames.len()
        );
        Some((sample.label.clone(), sample.frames.len()))
    }

    pub fn discard_sample(&mut self, id: u64) -> Result<SampleSummary> {
        let removed = self.dataset.remove(id)?;
        Ok(SampleSummary::from(&removed))
    }

    pub fn discard_last(&mut self) -> Option<SampleSummary> {
        self.dataset.pop().map(|s| SampleSummary::from(&s))
    }

    fn seal(
        &mut self,
        active: ActiveRecording,
        category: String,
        timestamp: Timestamp,
    ) -> &TrainingSample {
        let end = timestamp.max(active.started);
        self.dataset
            .push(active.label, category, active.started, end, active.frames)
    }
}

fn validate_label(label: &str) -> Result<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidLabel(label.to_string()));
    }
    Ok(trimmed.to_string())
}
