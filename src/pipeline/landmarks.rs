//! Landmark extraction seam and the feature encoding fed to classifiers.

use crate::{
    error::{PipelineError, Result},
    types::{Frame, LandmarkSet},
};

pub const NUM_HAND_LANDMARKS: usize = 21;
pub const FEATURE_LEN: usize = NUM_HAND_LANDMARKS * 2;

const WRIST: usize = 0;
const INDEX_MCP: usize = 5;
const MIDDLE_MCP: usize = 9;
const PINKY_MCP: usize = 17;

/// Converts a frame into landmarks.
///
/// Returns `ExtractionFailed` when no subject is present. An empty [`LandmarkSet`] is a
/// valid result distinct from that failure.
pub trait LandmarkExtractor: Send {
    fn extract(&mut self, frame: &Frame) -> Result<LandmarkSet>;
}

impl<F> LandmarkExtractor for F
where
    F: FnMut(&Frame) -> Result<LandmarkSet> + Send,
{
    fn extract(&mut self, frame: &Frame) -> Result<LandmarkSet> {
        self(frame)
    }
}

/// Fixed-length classifier input derived from 21 hand landmarks.
///
/// Points are translated so the wrist is the origin, scaled by palm width (index to
/// pinky knuckle, falling back to wrist to middle knuckle) and flattened as
/// `[x0, y0, x1, y1, ..]`. Depth is dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn from_landmarks(set: &LandmarkSet) -> Result<Self> {
        if set.points.len() != NUM_HAND_LANDMARKS {
            return Err(PipelineError::InferenceError(format!(
                "expected {NUM_HAND_LANDMARKS} landmarks, got {}",
                set.points.len()
            )));
        }

        let wrist = set.points[WRIST];
        let pts: Vec<[f32; 2]> = set
            .points
            .iter()
            .map(|p| [p.x - wrist.x, p.y - wrist.y])
            .collect();

        let palm_width = distance(pts[INDEX_MCP], pts[PINKY_MCP]);
        let scale = if palm_width > 1e-6 {
            palm_width
        } else {
            distance(pts[MIDDLE_MCP], [0.0, 0.0])
        };
        if !scale.is_finite() || scale <= 1e-6 {
            return Err(PipelineError::InferenceError(
                "degenerate hand: zero palm size".into(),
            ));
        }

        let mut values = Vec::with_capacity(FEATURE_LEN);
        for [x, y] in pts {
            values.push(x / scale);
            values.push(y / scale);
        }
        Ok(Self { values })
    }

    /// Wraps raw values, rejecting anything that is not a finite `FEATURE_LEN` vector.
    pub fn from_values(values: Vec<f32>) -> Result<Self> {
        if values.len() != FEATURE_LEN {
            return Err(PipelineError::InferenceError(format!(
                "feature vector must have {FEATURE_LEN} values, got {}",
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::InferenceError(
                "feature vector contains non-finite values".into(),
            ));
        }
        Ok(Self { values })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn squared_distance(&self, other: &FeatureVector) -> f32 {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}
