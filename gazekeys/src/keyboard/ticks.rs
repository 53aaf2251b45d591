//! Dwell tick scheduling.
//!
//! Each hovering key gets its own periodic timer, armed on hover start and
//! cancelled the instant hover ends.  The keyboard only talks to the
//! [`TickScheduler`] trait so the same dwell logic runs on a calloop event
//! loop or on a virtual clock.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};
use tracing::debug;

use super::key::KeyId;
use crate::{Error, Result};

/// Per-key periodic timers.
pub trait TickScheduler {
    /// Arm a periodic timer for `key`.  Re-arming replaces the old timer.
    fn start(&mut self, key: KeyId, period: Duration) -> Result<()>;
    /// Cancel the timer for `key`, if any.
    fn cancel(&mut self, key: KeyId);
    /// The timer for `key` fired and will not be re-armed.  Forget it
    /// without removing anything.
    fn expired(&mut self, key: KeyId);
    fn is_running(&self, key: KeyId) -> bool;
}

/// Receiver of calloop dwell ticks.
pub trait DwellTickTarget {
    /// Handle one tick for `key`.  Returns the delay until the next tick,
    /// or `None` to stop the timer.
    fn on_dwell_tick(&mut self, key: KeyId) -> Option<Duration>;
}

/// One calloop [`Timer`] source per hovering key.
pub struct CalloopTicks<D: 'static> {
    handle: LoopHandle<'static, D>,
    tokens: HashMap<KeyId, RegistrationToken>,
}

impl<D: DwellTickTarget + 'static> CalloopTicks<D> {
    pub fn new(handle: LoopHandle<'static, D>) -> Self {
        Self {
            handle,
            tokens: HashMap::new(),
        }
    }

    pub fn running_count(&self) -> usize {
        self.tokens.len()
    }
}

impl<D: DwellTickTarget + 'static> TickScheduler for CalloopTicks<D> {
    fn start(&mut self, key: KeyId, period: Duration) -> Result<()> {
        self.cancel(key);
        let token = self
            .handle
            .insert_source(Timer::from_duration(period), move |_, _, state: &mut D| {
                match state.on_dwell_tick(key) {
                    Some(next) => TimeoutAction::ToDuration(next),
                    None => TimeoutAction::Drop,
                }
            })
            .map_err(|e| Error::EventLoop(e.error))?;
        debug!(%key, ?period, "dwell timer armed");
        self.tokens.insert(key, token);
        Ok(())
    }

    fn cancel(&mut self, key: KeyId) {
        if let Some(token) = self.tokens.remove(&key) {
            self.handle.remove(token);
            debug!(%key, "dwell timer cancelled");
        }
    }

    fn expired(&mut self, key: KeyId) {
        self.tokens.remove(&key);
    }

    fn is_running(&self, key: KeyId) -> bool {
        self.tokens.contains_key(&key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ManualTimer {
    due: Duration,
    period: Duration,
}

/// Virtual-clock scheduler for replay and tests.
///
/// Time only moves through [`ManualTicks::next_due`] and
/// [`ManualTicks::advance_to`]; nothing fires on its own.
#[derive(Debug, Clone, Default)]
pub struct ManualTicks {
    now: Duration,
    timers: BTreeMap<KeyId, ManualTimer>,
}

impl ManualTicks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time since the scheduler was created.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Move the clock forward without firing anything.  Never moves back.
    pub fn advance_to(&mut self, t: Duration) {
        if t > self.now {
            self.now = t;
        }
    }

    /// Pop the earliest timer due at or before `until`, advance the clock
    /// to its deadline and re-arm it for the next period.  Ties go to the
    /// lower key id.
    pub fn next_due(&mut self, until: Duration) -> Option<KeyId> {
        let (key, timer) = self
            .timers
            .iter()
            .filter(|(_, t)| t.due <= until)
            .min_by_key(|(id, t)| (t.due, **id))
            .map(|(id, t)| (*id, *t))?;
        self.advance_to(timer.due);
        self.timers.insert(
            key,
            ManualTimer {
                due: timer.due + timer.period,
                period: timer.period,
            },
        );
        Some(key)
    }

    pub fn running_count(&self) -> usize {
        self.timers.len()
    }
}

impl TickScheduler for ManualTicks {
    fn start(&mut self, key: KeyId, period: Duration) -> Result<()> {
        self.timers.insert(
            key,
            ManualTimer {
                due: self.now + period,
                period,
            },
        );
        Ok(())
    }

    fn cancel(&mut self, key: KeyId) {
        self.timers.remove(&key);
    }

    fn expired(&mut self, key: KeyId) {
        self.timers.remove(&key);
    }

    fn is_running(&self, key: KeyId) -> bool {
        self.timers.contains_key(&key)
    }
}
