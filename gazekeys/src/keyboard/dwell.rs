//! Per-key dwell state machine.
//!
//! Two inputs drive it: a containment signal (gaze broadcast or pointer
//! enter/leave, both equivalent) and a periodic tick that only exists
//! while the key is hovered.  Progress is counted in whole ticks so the
//! threshold is reached on an exact tick rather than after float drift;
//! the reported activation is `ticks * step`, capped at 1.
//!
//! ```text
//!            Containment(true)               Tick (ticks+1 < N)
//!   Idle ─────────────────────▶ Hovering ◀──────────────┐
//!    ▲                            │  │                   │
//!    └──── Containment(false) ────┘  └── Tick (ticks+1 == N) ──▶ Activated
//!                                          Repeat:      Hovering { 0 }
//!                                          RequireExit: Latched
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What happens after a key fires while the cursor stays on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefirePolicy {
    /// Start a fresh dwell immediately; staring keeps typing the key.
    Repeat,
    /// Fire once, then wait for the cursor to leave.
    RequireExit,
}

impl RefirePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repeat => "repeat",
            Self::RequireExit => "require-exit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "repeat" => Some(Self::Repeat),
            "require-exit" => Some(Self::RequireExit),
            _ => None,
        }
    }
}

/// Dwell timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    /// Tick period in milliseconds.
    pub tick_ms: u64,
    /// Activation added per tick.
    pub step: f64,
    /// Behaviour after firing.
    pub refire: RefirePolicy,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            step: 0.1,
            refire: RefirePolicy::Repeat,
        }
    }
}

impl DwellConfig {
    pub fn validate(&self) -> Result<()> {
        if !(10..=10_000).contains(&self.tick_ms) {
            return Err(Error::Config(format!(
                "dwell tick_ms must be in [10, 10000], got {}",
                self.tick_ms
            )));
        }
        if !(self.step > 0.0 && self.step <= 1.0) {
            return Err(Error::Config(format!(
                "dwell step must be in (0, 1], got {}",
                self.step
            )));
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Number of ticks a continuous hover needs before firing.
    pub fn ticks_to_fire(&self) -> u32 {
        ((1.0 / self.step) - 1e-9).ceil().max(1.0) as u32
    }

    /// Total hover time before the first activation.
    pub fn dwell_duration(&self) -> Duration {
        self.tick_period() * self.ticks_to_fire()
    }

    /// Accumulated activation after `ticks` ticks: `step` per tick,
    /// capped at 1.  Firing is decided on the tick count, not on this.
    pub fn activation(&self, ticks: u32) -> f64 {
        (ticks as f64 * self.step).min(1.0)
    }
}

/// Per-key dwell state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DwellState {
    #[default]
    Idle,
    /// Cursor inside the region, `ticks` elapsed since entry or last fire.
    Hovering { ticks: u32 },
    /// Fired under `RequireExit`; cursor still inside, no timer running.
    Latched,
}

impl DwellState {
    pub fn is_hovered(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn ticks(&self) -> u32 {
        match self {
            Self::Hovering { ticks } => *ticks,
            _ => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Hovering { .. } => "hovering",
            Self::Latched => "latched",
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellInput {
    Containment(bool),
    Tick,
}

/// Signals emitted by a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DwellSignal {
    /// Hover began: arm the tick timer.
    HoverStarted,
    /// Hover ended: cancel the tick timer.  `activation` is the progress
    /// that was discarded.
    HoverEnded { activation: f64 },
    /// Tick advanced without firing.
    Progress { activation: f64 },
    /// Threshold reached.  `rearm` is false when the timer must stop.
    Activated { rearm: bool },
}

/// Pure transition function.
pub fn step(config: &DwellConfig, state: DwellState, input: DwellInput) -> (DwellState, Option<DwellSignal>) {
    match (state, input) {
        (DwellState::Idle, DwellInput::Containment(true)) => {
            (DwellState::Hovering { ticks: 0 }, Some(DwellSignal::HoverStarted))
        }
        (DwellState::Hovering { ticks }, DwellInput::Containment(false)) => (
            DwellState::Idle,
            Some(DwellSignal::HoverEnded {
                activation: config.activation(ticks),
            }),
        ),
        (DwellState::Latched, DwellInput::Containment(false)) => (
            DwellState::Idle,
            Some(DwellSignal::HoverEnded { activation: 0.0 }),
        ),
        (DwellState::Hovering { ticks }, DwellInput::Tick) => {
            let ticks = ticks + 1;
            if ticks >= config.ticks_to_fire() {
                match config.refire {
                    RefirePolicy::Repeat => (
                        DwellState::Hovering { ticks: 0 },
                        Some(DwellSignal::Activated { rearm: true }),
                    ),
                    RefirePolicy::RequireExit => {
                        (DwellState::Latched, Some(DwellSignal::Activated { rearm: false }))
                    }
                }
            } else {
                (
                    DwellState::Hovering { ticks },
                    Some(DwellSignal::Progress {
                        activation: config.activation(ticks),
                    }),
                )
            }
        }
        // Containment unchanged, or a stale tick after hover ended.
        (s, _) => (s, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(config: &DwellConfig, mut state: DwellState, inputs: &[DwellInput]) -> (DwellState, Vec<DwellSignal>) {
        let mut signals = Vec::new();
        for input in inputs {
            let (next, signal) = step(config, state, *input);
            state = next;
            signals.extend(signal);
        }
        (state, signals)
    }

    fn count_activations(signals: &[DwellSignal]) -> usize {
        signals
            .iter()
            .filter(|s| matches!(s, DwellSignal::Activated { .. }))
            .count()
    }

    #[test]
    fn test_ticks_to_fire() {
        assert_eq!(DwellConfig::default().ticks_to_fire(), 10);
        let c = DwellConfig {
            step: 0.3,
            ..Default::default()
        };
        assert_eq!(c.ticks_to_fire(), 4);
        let c = DwellConfig {
            step: 1.0,
            ..Default::default()
        };
        assert_eq!(c.ticks_to_fire(), 1);
        let c = DwellConfig {
            step: 0.25,
            ..Default::default()
        };
        assert_eq!(c.ticks_to_fire(), 4);
    }

    #[test]
    fn test_dwell_duration_default_one_second() {
        assert_eq!(DwellConfig::default().dwell_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_enter_starts_hover() {
        let c = DwellConfig::default();
        let (s, sig) = step(&c, DwellState::Idle, DwellInput::Containment(true));
        assert_eq!(s, DwellState::Hovering { ticks: 0 });
        assert_eq!(sig, Some(DwellSignal::HoverStarted));
    }

    #[test]
    fn test_fires_exactly_on_tenth_tick() {
        let c = DwellConfig::default();
        let (mut s, _) = step(&c, DwellState::Idle, DwellInput::Containment(true));
        for i in 1..10 {
            let (next, sig) = step(&c, s, DwellInput::Tick);
            s = next;
            assert!(
                matches!(sig, Some(DwellSignal::Progress { .. })),
                "tick {} should only progress, got {:?}",
                i,
                sig
            );
        }
        let (s, sig) = step(&c, s, DwellInput::Tick);
        assert_eq!(sig, Some(DwellSignal::Activated { rearm: true }));
        assert_eq!(s, DwellState::Hovering { ticks: 0 });
    }

    #[test]
    fn test_progress_values() {
        let c = DwellConfig::default();
        let (s, _) = step(&c, DwellState::Idle, DwellInput::Containment(true));
        let (s, sig) = step(&c, s, DwellInput::Tick);
        assert_eq!(sig, Some(DwellSignal::Progress { activation: 0.1 }));
        let (_, sig) = step(&c, s, DwellInput::Tick);
        assert_eq!(sig, Some(DwellSignal::Progress { activation: 0.2 }));
    }

    #[test]
    fn test_leave_before_threshold_never_fires() {
        let c = DwellConfig::default();
        let mut inputs = vec![DwellInput::Containment(true)];
        inputs.extend(std::iter::repeat(DwellInput::Tick).take(5));
        inputs.push(DwellInput::Containment(false));
        let (s, signals) = run(&c, DwellState::Idle, &inputs);

        assert_eq!(s, DwellState::Idle);
        assert_eq!(count_activations(&signals), 0);
        assert_eq!(
            signals.last(),
            Some(&DwellSignal::HoverEnded { activation: 0.5 })
        );
    }

    #[test]
    fn test_reentry_restarts_from_zero() {
        let c = DwellConfig::default();
        let mut inputs = vec![DwellInput::Containment(true)];
        inputs.extend(std::iter::repeat(DwellInput::Tick).take(9));
        inputs.push(DwellInput::Containment(false));
        inputs.push(DwellInput::Containment(true));
        inputs.extend(std::iter::repeat(DwellInput::Tick).take(9));
        let (s, signals) = run(&c, DwellState::Idle, &inputs);

        assert_eq!(count_activations(&signals), 0);
        assert_eq!(s, DwellState::Hovering { ticks: 9 });
    }

    #[test]
    fn test_stale_tick_ignored_when_idle() {
        let c = DwellConfig::default();
        let (s, sig) = step(&c, DwellState::Idle, DwellInput::Tick);
        assert_eq!(s, DwellState::Idle);
        assert_eq!(sig, None);
    }

    #[test]
    fn test_repeated_containment_is_noop() {
        let c = DwellConfig::default();
        let (s, sig) = step(&c, DwellState::Hovering { ticks: 3 }, DwellInput::Containment(true));
        assert_eq!(s, DwellState::Hovering { ticks: 3 });
        assert_eq!(sig, None);
        let (s, sig) = step(&c, DwellState::Idle, DwellInput::Containment(false));
        assert_eq!(s, DwellState::Idle);
        assert_eq!(sig, None);
    }

    #[test]
    fn test_repeat_policy_fires_again_after_another_dwell() {
        let c = DwellConfig::default();
        let mut inputs = vec![DwellInput::Containment(true)];
        inputs.extend(std::iter::repeat(DwellInput::Tick).take(25));
        let (_, signals) = run(&c, DwellState::Idle, &inputs);
        assert_eq!(count_activations(&signals), 2);
    }

    #[test]
    fn test_require_exit_policy_latches() {
        let c = DwellConfig {
            refire: RefirePolicy::RequireExit,
            ..Default::default()
        };
        let mut inputs = vec![DwellInput::Containment(true)];
        inputs.extend(std::iter::repeat(DwellInput::Tick).take(25));
        let (s, signals) = run(&c, DwellState::Idle, &inputs);
        assert_eq!(s, DwellState::Latched);
        assert_eq!(count_activations(&signals), 1);
        assert!(signals.contains(&DwellSignal::Activated { rearm: false }));

        // Leaving and coming back arms it again.
        let mut inputs = vec![DwellInput::Containment(false), DwellInput::Containment(true)];
        inputs.extend(std::iter::repeat(DwellInput::Tick).take(10));
        let (_, signals) = run(&c, s, &inputs);
        assert_eq!(count_activations(&signals), 1);
    }

    #[test]
    fn test_progress_accumulates_step() {
        let c = DwellConfig {
            step: 0.3,
            ..Default::default()
        };
        assert_eq!(c.ticks_to_fire(), 4);
        let (s, _) = step(&c, DwellState::Idle, DwellInput::Containment(true));
        let (s, sig) = step(&c, s, DwellInput::Tick);
        assert_eq!(sig, Some(DwellSignal::Progress { activation: 0.3 }));
        let (s, _) = step(&c, s, DwellInput::Tick);
        let (s, sig) = step(&c, s, DwellInput::Tick);
        let Some(DwellSignal::Progress { activation }) = sig else {
            panic!("expected progress, got {:?}", sig);
        };
        assert!((activation - 0.9).abs() < 1e-9);
        let (_, sig) = step(&c, s, DwellInput::Tick);
        assert_eq!(sig, Some(DwellSignal::Activated { rearm: true }));
        assert_eq!(c.activation(10), 1.0);
    }

    #[test]
    fn test_activation_bounded() {
        let c = DwellConfig::default();
        for ticks in 0..=20 {
            let a = c.activation(ticks);
            assert!((0.0..=1.0).contains(&a));
        }
    }

    #[test]
    fn test_config_validate() {
        assert!(DwellConfig::default().validate().is_ok());
        let bad_tick = DwellConfig {
            tick_ms: 0,
            ..Default::default()
        };
        assert!(bad_tick.validate().is_err());
        let bad_step = DwellConfig {
            step: 0.0,
            ..Default::default()
        };
        assert!(bad_step.validate().is_err());
        let nan_step = DwellConfig {
            step: f64::NAN,
            ..Default::default()
        };
        assert!(nan_step.validate().is_err());
    }

    #[test]
    fn test_refire_policy_roundtrip() {
        for p in [RefirePolicy::Repeat, RefirePolicy::RequireExit] {
            assert_eq!(RefirePolicy::from_str(p.as_str()), Some(p));
        }
        assert_eq!(RefirePolicy::from_str("sometimes"), None);
    }
}
