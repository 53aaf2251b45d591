//! Offline replay of recorded gaze traces on a virtual clock.
//!
//! A trace is JSON lines, one sample per line:
//!
//! ```text
//! # comment
//! {"t_ms": 0,   "x": 0.15, "y": 0.81}
//! {"t_ms": 100, "x": 0.15, "y": 0.81}
//! ```
//!
//! Samples go through the same keyboard as the daemon, with
//! [`ManualTicks`] standing in for calloop timers.  Ticks due at or before
//! a sample's timestamp run before that sample is applied.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::gaze::{CoordinateMapper, NormalizedPoint, SampleValidation, SurfaceInset, Viewport};
use crate::keyboard::{DwellConfig, DwellKeyboard, KeyId, KeyValue, KeyboardEvent, LayoutPreset, ManualTicks};
use crate::{Error, Result};

/// One trace record.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TraceSample {
    pub t_ms: u64,
    pub x: f64,
    pub y: f64,
}

/// Replay settings.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub viewport: Viewport,
    pub inset: SurfaceInset,
    pub dwell: DwellConfig,
    pub validation: SampleValidation,
    pub layout: LayoutPreset,
    /// Keep running ticks this long after the last sample.
    pub tail: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            inset: SurfaceInset::default(),
            dwell: DwellConfig::default(),
            validation: SampleValidation::default(),
            layout: LayoutPreset::Grid,
            tail: Duration::ZERO,
        }
    }
}

/// A key activation observed during replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Activation {
    pub at: Duration,
    pub key: KeyId,
    pub value: KeyValue,
}

/// Replay outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub text: String,
    pub activations: Vec<Activation>,
    pub samples: usize,
    pub rejected: u64,
}

/// Parse a trace.  Timestamps must not go backwards.
pub fn parse_trace(src: &str) -> Result<Vec<TraceSample>> {
    let mut out: Vec<TraceSample> = Vec::new();
    for (line_no, line) in src.lines().enumerate() {
        let line_no = line_no + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let sample: TraceSample = serde_json::from_str(trimmed)
            .map_err(|e| Error::Sample(format!("trace line {}: {}", line_no, e)))?;
        if let Some(prev) = out.last() {
            if sample.t_ms < prev.t_ms {
                return Err(Error::Sample(format!(
                    "trace line {}: timestamp {} goes backwards (previous {})",
                    line_no, sample.t_ms, prev.t_ms
                )));
            }
        }
        out.push(sample);
    }
    Ok(out)
}

pub fn load_trace(path: &Path) -> Result<Vec<TraceSample>> {
    let src = std::fs::read_to_string(path)?;
    parse_trace(&src)
}

fn collect(at: Duration, events: Vec<KeyboardEvent>, report: &mut ReplayReport) {
    for event in events {
        if let KeyboardEvent::KeyActivated { key, value } = event {
            report.activations.push(Activation { at, key, value });
        }
    }
}

fn run_ticks(kb: &mut DwellKeyboard<ManualTicks>, until: Duration, report: &mut ReplayReport) {
    while let Some(key) = kb.ticks_mut().next_due(until) {
        let at = kb.ticks().now();
        let outcome = kb.on_tick(key);
        collect(at, outcome.events, report);
    }
    kb.ticks_mut().advance_to(until);
}

/// Replay `samples` through a fresh keyboard.
pub fn replay(samples: &[TraceSample], options: &ReplayOptions) -> Result<ReplayReport> {
    options.dwell.validate()?;
    let mut kb = DwellKeyboard::new(
        ManualTicks::new(),
        options.dwell,
        options.validation,
        CoordinateMapper::new(options.viewport, options.inset),
    );
    kb.load_preset(options.layout);

    let base = Instant::now();
    let mut report = ReplayReport::default();
    for sample in samples {
        let t = Duration::from_millis(sample.t_ms);
        run_ticks(&mut kb, t, &mut report);
        let events = kb.offer_sample(NormalizedPoint::new(sample.x, sample.y), base + t);
        collect(t, events, &mut report);
        report.samples += 1;
    }
    if let Some(last) = samples.last() {
        run_ticks(&mut kb, Duration::from_millis(last.t_ms) + options.tail, &mut report);
    }

    report.text = kb.text().to_string();
    report.rejected = kb.source().health.rejected;
    kb.shutdown();
    Ok(report)
}
