//! Keyed collection of independent dwell detectors.
//!
//! Every key owns its value, its live region, and its own
//! [`DwellState`]; nothing is shared between keys.  The board only runs
//! transitions and reports signals; arming and cancelling timers is the
//! caller's job.

use std::collections::BTreeMap;

use super::dwell::{self, DwellConfig, DwellInput, DwellSignal, DwellState};
use super::key::{KeyId, KeyRegion, KeyValue};
use crate::gaze::ScreenPoint;

/// One key on the board.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEntry {
    pub value: KeyValue,
    /// `None` until the shell has laid the key out.
    pub region: Option<KeyRegion>,
    pub dwell: DwellState,
}

impl KeyEntry {
    pub fn new(value: KeyValue, region: Option<KeyRegion>) -> Self {
        Self {
            value,
            region,
            dwell: DwellState::Idle,
        }
    }

    /// A key without layout is never contained.
    pub fn contains(&self, p: ScreenPoint) -> bool {
        self.region.is_some_and(|r| r.contains(p))
    }
}

/// Dwell detectors indexed by key.
#[derive(Debug, Clone, Default)]
pub struct DwellBoard {
    keys: BTreeMap<KeyId, KeyEntry>,
    config: DwellConfig,
}

impl DwellBoard {
    pub fn new(config: DwellConfig) -> Self {
        Self {
            keys: BTreeMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &DwellConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: DwellConfig) {
        self.config = config;
    }

    /// Insert a fresh key.  A key previously under `id` is returned with
    /// its state; the caller must cancel its timer.
    pub fn insert(&mut self, id: KeyId, value: KeyValue, region: Option<KeyRegion>) -> Option<KeyEntry> {
        self.keys.insert(id, KeyEntry::new(value, region))
    }

    /// Replace a key's region, keeping its dwell state.  Returns false if
    /// the key does not exist.
    pub fn set_region(&mut self, id: KeyId, region: Option<KeyRegion>) -> bool {
        match self.keys.get_mut(&id) {
            Some(entry) => {
                entry.region = region;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: KeyId) -> Option<KeyEntry> {
        self.keys.remove(&id)
    }

    /// Remove every key, returning what was removed.
    pub fn clear(&mut self) -> Vec<(KeyId, KeyEntry)> {
        std::mem::take(&mut self.keys).into_iter().collect()
    }

    pub fn get(&self, id: KeyId) -> Option<&KeyEntry> {
        self.keys.get(&id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, &KeyEntry)> {
        self.keys.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn ids(&self) -> Vec<KeyId> {
        self.keys.keys().copied().collect()
    }

    /// Keys whose state says the cursor is on them.
    pub fn hovered(&self) -> Vec<KeyId> {
        self.iter()
            .filter(|(_, e)| e.dwell.is_hovered())
            .map(|(id, _)| id)
            .collect()
    }

    /// Current activation of a key, in `[0, 1]`.
    pub fn activation(&self, id: KeyId) -> Option<f64> {
        self.get(id).map(|e| self.config.activation(e.dwell.ticks()))
    }

    /// First key whose region contains `p`.
    pub fn key_at(&self, p: ScreenPoint) -> Option<KeyId> {
        self.iter().find(|(_, e)| e.contains(p)).map(|(id, _)| id)
    }

    /// Pairs of keys whose regions overlap.  A well-formed layout has none.
    pub fn overlapping_pairs(&self) -> Vec<(KeyId, KeyId)> {
        let laid_out: Vec<(KeyId, KeyRegion)> = self
            .iter()
            .filter_map(|(id, e)| e.region.map(|r| (id, r)))
            .collect();
        let mut pairs = Vec::new();
        for (i, (a, ra)) in laid_out.iter().enumerate() {
            for (b, rb) in &laid_out[i + 1..] {
                if ra.overlaps(rb) {
                    pairs.push((*a, *b));
                }
            }
        }
        pairs
    }

    fn feed(&mut self, id: KeyId, input: DwellInput) -> Option<DwellSignal> {
        let entry = self.keys.get_mut(&id)?;
        let (next, signal) = dwell::step(&self.config, entry.dwell, input);
        entry.dwell = next;
        signal
    }

    /// Broadcast a cursor position to every key.
    pub fn apply_cursor(&mut self, p: ScreenPoint) -> Vec<(KeyId, DwellSignal)> {
        let mut signals = Vec::new();
        for id in self.ids() {
            let inside = self.keys.get(&id).is_some_and(|e| e.contains(p));
            if let Some(signal) = self.feed(id, DwellInput::Containment(inside)) {
                signals.push((id, signal));
            }
        }
        signals
    }

    /// Pointer enter/leave path; same machine as the gaze broadcast.
    pub fn set_containment(&mut self, id: KeyId, inside: bool) -> Option<DwellSignal> {
        self.feed(id, DwellInput::Containment(inside))
    }

    pub fn tick(&mut self, id: KeyId) -> Option<DwellSignal> {
        self.feed(id, DwellInput::Tick)
    }
}
