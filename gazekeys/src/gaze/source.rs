//! Position source adapter: holds exactly one sample, newest wins.
//!
//! Producers (the WebSocket feed, IPC injection, replay) offer samples;
//! the keyboard reads [`SampleSlot::latest`].  Nothing is
//! queued: a burst of samples collapses to its newest valid member, and
//! a rejected sample leaves the previous one in place.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::sample::{NormalizedPoint, SampleValidation};
use crate::Result;

// ── Health ─────────────────────────────────────────────────

/// Feed health counters.
#[derive(Debug, Clone, Default)]
pub struct SourceHealth {
    /// Samples accepted into the slot.
    pub accepted: u64,
    /// Samples rejected at validation or decode.
    pub rejected: u64,
    /// Valid samples dropped because a newer one arrived in the same batch.
    pub superseded: u64,
    /// Whether the tracker connection is up.
    pub connected: bool,
    /// Accepted samples per second over the last full window.
    pub rate_hz: f32,
    last_accepted: Option<Instant>,
    window_start: Option<Instant>,
    window_count: u32,
}

impl SourceHealth {
    pub fn record_accepted(&mut self, now: Instant) {
        self.accepted += 1;
        self.last_accepted = Some(now);

        let start = *self.window_start.get_or_insert(now);
        self.window_count += 1;
        let elapsed = now.duration_since(start);
        if elapsed >= Duration::from_secs(1) {
            self.rate_hz = self.window_count as f32 / elapsed.as_secs_f32();
            self.window_start = Some(now);
            self.window_count = 0;
        }
    }

    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    /// Seconds since the last accepted sample.
    pub fn since_last(&self, now: Instant) -> Option<f64> {
        self.last_accepted
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
    }

    /// True when no sample has been accepted within `after`.
    pub fn is_stale(&self, now: Instant, after: Duration) -> bool {
        match self.last_accepted {
            Some(t) => now.saturating_duration_since(t) > after,
            None => true,
        }
    }

    /// IPC status s-expression.
    pub fn status_sexp(&self, now: Instant) -> String {
        let since = self
            .since_last(now)
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "nil".to_string());
        format!(
            "(:accepted {} :rejected {} :superseded {} :connected {} :rate-hz {:.1} :since-last-s {})",
            self.accepted,
            self.rejected,
            self.superseded,
            if self.connected { "t" } else { "nil" },
            self.rate_hz,
            since,
        )
    }
}

// ── Slot ───────────────────────────────────────────────────

/// Single-sample store with validation at the boundary.
#[derive(Debug, Clone, Default)]
pub struct SampleSlot {
    current: Option<NormalizedPoint>,
    validation: SampleValidation,
    pub health: SourceHealth,
}

impl SampleSlot {
    pub fn new(validation: SampleValidation) -> Self {
        Self {
            current: None,
            validation,
            health: SourceHealth::default(),
        }
    }

    /// Latest accepted sample, or the `(0, 0)` default if none arrived yet.
    pub fn latest(&self) -> NormalizedPoint {
        self.current.unwrap_or_default()
    }

    /// Whether any sample has ever been accepted.
    pub fn has_sample(&self) -> bool {
        self.current.is_some()
    }

    pub fn validation(&self) -> SampleValidation {
        self.validation
    }

    pub fn set_validation(&mut self, validation: SampleValidation) {
        self.validation = validation;
    }

    /// Offer one sample.  On rejection the previous sample is kept.
    pub fn offer(&mut self, point: NormalizedPoint, now: Instant) -> Result<NormalizedPoint> {
        match self.validation.check(point) {
            Ok(p) => {
                self.current = Some(p);
                self.health.record_accepted(now);
                Ok(p)
            }
            Err(e) => {
                self.health.record_rejected();
                debug!("gaze sample rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Offer a burst of decoded samples in arrival order.  Only the newest
    /// valid one is stored.  Returns it, or `None` if the burst held no
    /// valid sample.
    pub fn offer_batch<I>(&mut self, batch: I, now: Instant) -> Option<NormalizedPoint>
    where
        I: IntoIterator<Item = Result<NormalizedPoint>>,
    {
        let mut newest = None;
        let mut valid = 0u64;
        for decoded in batch {
            match decoded.and_then(|p| self.validation.check(p)) {
                Ok(p) => {
                    newest = Some(p);
                    valid += 1;
                }
                Err(e) => {
                    self.health.record_rejected();
                    warn!("dropping malformed gaze sample: {}", e);
                }
            }
        }

        let point = newest?;
        self.health.superseded += valid - 1;
        self.current = Some(point);
        self.health.record_accepted(now);
        Some(point)
    }
}
