//! JSON dataset artifact.
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "next_id": 1,
//!   "samples": [
//!     {
//!       "id": 0, "label": "HELLO", "category": "PHRASE",
//!       "start_timestamp": 1200, "end_timestamp": 2200,
//!       "frames": [{ "points": [{ "x": 0.5, "y": 0.4, "z": 0.0, "confidence": 0.9 }], "source_timestamp": 1233 }]
//!     }
//!   ]
//! }
//! ```

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::dataset::{Dataset, TrainingSample};
use crate::{
    error::{PipelineError, Result},
    types::LandmarkSet,
};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ArtifactRef<'a> {
    format_version: u32,
    next_id: u64,
    samples: &'a [TrainingSample],
}

#[derive(Deserialize)]
struct ArtifactHeader {
    format_version: u32,
}

#[derive(Deserialize)]
struct Artifact {
    #[serde(default)]
    next_id: u64,
    samples: Vec<TrainingSample>,
}

/// Serializes every sample in insertion order. Identical datasets give identical bytes.
///
/// Fails with `CorruptSample` rather than writing an artifact `import` would reject.
pub fn export(dataset: &Dataset) -> Result<Vec<u8>> {
    if dataset.is_empty() {
        return Err(PipelineError::EmptyDataset);
    }
    if let Some(bad) = dataset
        .samples()
        .iter()
        .find(|s| !s.frames.iter().all(LandmarkSet::is_finite))
    {
        return Err(PipelineError::CorruptSample(bad.id));
    }
    let artifact = ArtifactRef {
        format_version: FORMAT_VERSION,
        next_id: dataset.next_id(),
        samples: dataset.samples(),
    };
    Ok(serde_json::to_vec_pretty(&artifact)?)
}

pub fn import(bytes: &[u8]) -> Result<Dataset> {
    let header: ArtifactHeader = serde_json::from_slice(bytes)?;
    if header.format_version != FORMAT_VERSION {
        return Err(PipelineError::UnsupportedFormat {
            found: header.format_version,
            expected: FORMAT_VERSION,
        });
    }
    let artifact: Artifact = serde_json::from_slice(bytes)?;
    Dataset::from_parts(artifact.samples, artifact.next_id)
}

/// Writes the artifact through a temporary sibling file so `path` is either the old
/// content or the complete new one.
pub fn export_to_path(dataset: &Dataset, path: &Path) -> Result<usize> {
    let bytes = export(dataset)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }

    log::info!(
        "exported {} samples ({} bytes) to {}",
        dataset.len(),
        bytes.len(),
        path.display()
    );
    Ok(bytes.len())
}

pub fn import_from_path(path: &Path) -> Result<Dataset> {
    let bytes = fs::read(path)?;
    import(&bytes)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "dataset".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::landmarks::fixtures;
    use crate::teach::TrainingRecorder;

    fn dataset() -> Dataset {
        let mut recorder = TrainingRecorder::new();
        for (label, frames) in [("HELLO", 3), ("A", 2)] {
            recorder.start(label, 100).unwrap();
            for i in 0..frames {
                recorder.append(fixtures::hand(1.0, 100 + i));
            }
            recorder.stop(label, "PHRASE", 200).unwrap();
        }
        recorder.dataset().clone()
    }

    #[test]
    fn empty_dataset_cannot_be_exported() {
        assert!(matches!(
            export(&Dataset::new()),
            Err(PipelineError::EmptyDataset)
        ));
    }

    #[test]
    fn export_is_deterministic() {
        let data = dataset();
        assert_eq!(export(&data).unwrap(), export(&data).unwrap());
    }

    #[test]
    fn import_restores_samples() {
        let data = dataset();
        let restored = import(&export(&data).unwrap()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn artifact_carries_version_and_fields() {
        let bytes = export(&dataset()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["format_version"], FORMAT_VERSION);
        let first = &value["samples"][0];
        assert_eq!(first["label"], "HELLO");
        assert_eq!(first["category"], "PHRASE");
        assert_eq!(first["frames"].as_array().unwrap().len(), 3);
        assert_eq!(first["frames"][0]["points"].as_array().unwrap().len(), 21);
    }

    #[test]
    fn non_finite_landmarks_fail_export() {
        let mut data = dataset();
        let mut set = fixtures::hand(1.0, 300);
        set.points[0].z = f32::NAN;
        let id = data.push("B".into(), "PHRASE".into(), 300, 301, vec![set]).id;
        assert!(matches!(
            export(&data),
            Err(PipelineError::CorruptSample(bad)) if bad == id
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signs.json");
        assert!(export_to_path(&data, &path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn discarded_ids_stay_retired_after_import() {
        let mut recorder = TrainingRecorder::with_dataset(dataset());
        let dropped = recorder.discard_last().unwrap();
        let restored = import(&export(recorder.dataset()).unwrap()).unwrap();
        assert_eq!(restored.next_id(), dropped.id + 1);

        let mut recorder = TrainingRecorder::with_dataset(restored);
        recorder.start("C", 0).unwrap();
        let summary = recorder.stop("C", "PHRASE", 1).unwrap();
        assert_ne!(summary.id, dropped.id);
    }

    #[test]
    fn duplicate_ids_fail_import() {
        let raw = br#"{"format_version": 1, "samples": [
            {"id": 3, "label": "A", "category": "PHRASE", "start_timestamp": 0, "end_timestamp": 1, "frames": []},
            {"id": 3, "label": "B", "category": "PHRASE", "start_timestamp": 1, "end_timestamp": 2, "frames": []}
        ]}"#;
        assert!(matches!(import(raw), Err(PipelineError::DuplicateSample(3))));
    }

    #[test]
    fn other_versions_are_rejected() {
        let raw = br#"{"format_version": 9, "samples": []}"#;
        assert!(matches!(
            import(raw),
            Err(PipelineError::UnsupportedFormat {
                found: 9,
                expected: FORMAT_VERSION
            })
        ));
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(
            import(b"not json"),
            Err(PipelineError::Serialization(_))
        ));
    }

    #[test]
    fn export_to_path_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("signs.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"old").unwrap();

        let data = dataset();
        let written = export_to_path(&data, &path).unwrap();
        assert_eq!(written, fs::metadata(&path).unwrap().len() as usize);
        assert!(!tmp_path_for(&path).exists());
        assert_eq!(import_from_path(&path).unwrap(), data);
    }

    #[test]
    fn failed_export_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signs.json");
        assert!(export_to_path(&Dataset::new(), &path).is_err());
        assert!(!path.exists());
    }
}
