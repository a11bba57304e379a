use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Milliseconds elapsed since the owning controller's clock was created.
pub type Timestamp = u64;

/// Monotonic clock shared by every stage of one controller.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.since(Instant::now())
    }

    pub fn since(&self, instant: Instant) -> Timestamp {
        instant
            .checked_duration_since(self.epoch)
            .unwrap_or(Duration::ZERO)
            .as_millis() as Timestamp
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Timestamp,
}

impl Frame {
    pub fn expected_len(width: u32, height: u32) -> usize {
        (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(4)
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() == Self::expected_len(self.width, self.height)
    }
}

/// A detected keypoint. `x` and `y` are normalized to the frame, `z` is model-relative depth.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub confidence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            z,
            confidence,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.z.is_finite()
            && self.confidence.is_finite()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: Vec<Landmark>,
    pub source_timestamp: Timestamp,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>, source_timestamp: Timestamp) -> Self {
        Self {
            points,
            source_timestamp,
        }
    }

    pub fn empty(source_timestamp: Timestamp) -> Self {
        Self::new(Vec::new(), source_timestamp)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// False when any coordinate is NaN or infinite; such sets cannot be exported.
    pub fn is_finite(&self) -> bool {
        self.points.iter().all(Landmark::is_finite)
    }

    /// Points projected into pixel space for a surface of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> Vec<(f32, f32)> {
        self.points
            .iter()
            .map(|p| (p.x * width as f32, p.y * height as f32))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub probability: f32,
    pub timestamp: Timestamp,
}

impl Prediction {
    pub fn new(label: impl Into<String>, probability: f32, timestamp: Timestamp) -> Self {
        Self {
            label: label.into(),
            probability: probability.clamp(0.0, 1.0),
            timestamp,
        }
    }

    pub fn display_text(&self) -> String {
        format!("{} ({:.0}%)", self.label, self.probability * 100.0)
    }
}
