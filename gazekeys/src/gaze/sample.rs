//! Normalized gaze samples and their wire form.
//!
//! The tracker reports where the gaze lands on the marker-bounded surface
//! as fractions of its width and height, origin bottom-left.  On the wire
//! each sample is a JSON object `{"x": 0.42, "y": 0.77}`; any extra
//! fields (timestamps, confidence) are ignored.

use serde::Deserialize;

use crate::{Error, Result};

/// Gaze sample in tracker coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Decode one JSON-lines record.
    pub fn from_json(line: &str) -> Result<Self> {
        let wire: WireSample = serde_json::from_str(line.trim())?;
        Ok(Self::new(wire.x, wire.y))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn in_unit_square(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

#[derive(Debug, Deserialize)]
struct WireSample {
    x: f64,
    y: f64,
}

/// Acceptance rules applied at the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleValidation {
    /// Reject coordinates outside `[0, 1]` instead of letting them map
    /// off-screen.
    pub reject_out_of_range: bool,
}

impl Default for SampleValidation {
    fn default() -> Self {
        Self {
            reject_out_of_range: true,
        }
    }
}

impl SampleValidation {
    /// Check a sample.  Non-finite coordinates are always rejected so NaN
    /// never reaches the geometry code.
    pub fn check(&self, point: NormalizedPoint) -> Result<NormalizedPoint> {
        if !point.is_finite() {
            return Err(Error::Sample(format!(
                "non-finite coordinate ({}, {})",
                point.x, point.y
            )));
        }
        if self.reject_out_of_range && !point.in_unit_square() {
            return Err(Error::Sample(format!(
                "coordinate ({:.3}, {:.3}) outside [0, 1]",
                point.x, point.y
            )));
        }
        Ok(point)
    }
}
