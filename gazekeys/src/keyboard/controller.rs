//! Dwell keyboard: source, mapper, board, timers and text in one place.
//!
//! Every operation returns the [`KeyboardEvent`]s it produced so the
//! caller can forward them (IPC broadcast, replay output, tests).  All
//! mutation happens on the caller's thread; timers only ever call back
//! through [`DwellKeyboard::on_tick`].

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::board::DwellBoard;
use super::dwell::{DwellConfig, DwellSignal, DwellState};
use super::key::{KeyId, KeyRegion, KeyValue};
use super::layout::{generate_layout, LayoutPreset};
use super::text::TextBuffer;
use super::ticks::TickScheduler;
use crate::gaze::{
    CoordinateMapper, NormalizedPoint, SampleSlot, SampleValidation, ScreenPoint,
    SurfaceInset, Viewport,
};
use crate::ipc::dispatch::{escape_string, format_event};
use crate::{Error, Result};

// ── Events ─────────────────────────────────────────────────

/// Events emitted by the keyboard.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyboardEvent {
    /// The screen-space cursor was recomputed.
    CursorMoved { x: f64, y: f64 },
    /// A key gained or lost the cursor.
    HoverChanged { key: KeyId, hovered: bool },
    /// A hovered key advanced one tick.
    DwellProgress { key: KeyId, activation: f64 },
    /// A key completed its dwell.
    KeyActivated { key: KeyId, value: KeyValue },
    /// The text buffer changed.
    TextChanged { text: String },
}

impl KeyboardEvent {
    /// Format as an IPC event s-expression.
    pub fn to_sexp(&self) -> String {
        match self {
            Self::CursorMoved { x, y } => {
                let (x, y) = (format!("{:.0}", x), format!("{:.0}", y));
                format_event("cursor", &[("x", x.as_str()), ("y", y.as_str())])
            }
            Self::HoverChanged { key, hovered } => {
                let key = key.to_string();
                let hovered = if *hovered { "t" } else { "nil" };
                format_event("hover", &[("key", key.as_str()), ("hovered", hovered)])
            }
            Self::DwellProgress { key, activation } => {
                let key = key.to_string();
                let activation = format!("{:.2}", activation);
                format_event(
                    "dwell-progress",
                    &[("key", key.as_str()), ("activation", activation.as_str())],
                )
            }
            Self::KeyActivated { key, value } => {
                let key = key.to_string();
                let value = format!("\"{}\"", escape_string(&value.label()));
                format_event("key-activated", &[("key", key.as_str()), ("value", value.as_str())])
            }
            Self::TextChanged { text } => {
                let text = format!("\"{}\"", escape_string(text));
                format_event("text-changed", &[("text", text.as_str())])
            }
        }
    }

    /// Cursor events are high-rate; callers may want to filter them.
    pub fn is_cursor(&self) -> bool {
        matches!(self, Self::CursorMoved { .. })
    }
}

/// Result of one dwell tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickOutcome {
    pub events: Vec<KeyboardEvent>,
    /// Delay until the next tick, or `None` when the timer must stop.
    pub rearm: Option<Duration>,
}

// ── Keyboard ───────────────────────────────────────────────

/// The dwell keyboard.
pub struct DwellKeyboard<T: TickScheduler> {
    source: SampleSlot,
    mapper: CoordinateMapper,
    cursor: ScreenPoint,
    board: DwellBoard,
    ticks: T,
    text: TextBuffer,
    /// Preset the current layout came from; `None` once a shell edits it.
    preset: Option<LayoutPreset>,
    shut_down: bool,
}

impl<T: TickScheduler> DwellKeyboard<T> {
    pub fn new(
        ticks: T,
        dwell: DwellConfig,
        validation: SampleValidation,
        mapper: CoordinateMapper,
    ) -> Self {
        let cursor = mapper.map(NormalizedPoint::default());
        Self {
            source: SampleSlot::new(validation),
            mapper,
            cursor,
            board: DwellBoard::new(dwell),
            ticks,
            text: TextBuffer::new(),
            preset: None,
            shut_down: false,
        }
    }

    // ── Accessors ──

    pub fn source(&self) -> &SampleSlot {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut SampleSlot {
        &mut self.source
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    pub fn cursor(&self) -> ScreenPoint {
        self.cursor
    }

    pub fn board(&self) -> &DwellBoard {
        &self.board
    }

    pub fn ticks(&self) -> &T {
        &self.ticks
    }

    pub fn ticks_mut(&mut self) -> &mut T {
        &mut self.ticks
    }

    /// Read-only view of the composed text.
    pub fn text(&self) -> &str {
        self.text.as_str()
    }

    pub fn preset(&self) -> Option<LayoutPreset> {
        self.preset
    }

    pub fn dwell_config(&self) -> &DwellConfig {
        self.board.config()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // ── Gaze input ──

    /// Offer one gaze sample.  A rejected sample changes nothing.
    pub fn offer_sample(&mut self, point: NormalizedPoint, now: Instant) -> Vec<KeyboardEvent> {
        if self.shut_down {
            return Vec::new();
        }
        match self.source.offer(point, now) {
            Ok(_) => self.refresh_cursor(),
            Err(_) => Vec::new(),
        }
    }

    /// Offer a burst of decoded samples; only the newest valid one counts.
    pub fn offer_batch<I>(&mut self, batch: I, now: Instant) -> Vec<KeyboardEvent>
    where
        I: IntoIterator<Item = Result<NormalizedPoint>>,
    {
        if self.shut_down {
            return Vec::new();
        }
        match self.source.offer_batch(batch, now) {
            Some(_) => self.refresh_cursor(),
            None => Vec::new(),
        }
    }

    /// Recompute the cursor from the latest sample and broadcast
    /// containment.  Before the first sample the cursor is parked at the
    /// mapped default and no key is hovered by gaze.
    fn refresh_cursor(&mut self) -> Vec<KeyboardEvent> {
        self.cursor = self.mapper.map(self.source.latest());
        let mut events = vec![KeyboardEvent::CursorMoved {
            x: self.cursor.x,
            y: self.cursor.y,
        }];
        if self.source.has_sample() {
            for (key, signal) in self.board.apply_cursor(self.cursor) {
                self.handle_signal(key, signal, &mut events);
            }
        }
        events
    }

    // ── Pointer input ──

    pub fn pointer_enter(&mut self, key: KeyId) -> Result<Vec<KeyboardEvent>> {
        self.pointer(key, true)
    }

    pub fn pointer_leave(&mut self, key: KeyId) -> Result<Vec<KeyboardEvent>> {
        self.pointer(key, false)
    }

    fn pointer(&mut self, key: KeyId, inside: bool) -> Result<Vec<KeyboardEvent>> {
        if self.board.get(key).is_none() {
            return Err(Error::Layout(format!("unknown key {}", key)));
        }
        let mut events = Vec::new();
        if let Some(signal) = self.board.set_containment(key, inside) {
            self.handle_signal(key, signal, &mut events);
        }
        Ok(events)
    }

    // ── Ticks ──

    /// Advance `key` by one dwell tick.
    pub fn on_tick(&mut self, key: KeyId) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.shut_down {
            self.ticks.expired(key);
            return outcome;
        }
        let period = self.board.config().tick_period();
        match self.board.tick(key) {
            Some(DwellSignal::Progress { activation }) => {
                outcome
                    .events
                    .push(KeyboardEvent::DwellProgress { key, activation });
                outcome.rearm = Some(period);
            }
            Some(DwellSignal::Activated { rearm }) => {
                self.fire(key, &mut outcome.events);
                if rearm {
                    outcome.rearm = Some(period);
                } else {
                    self.ticks.expired(key);
                }
            }
            _ => {
                // Stale tick: key gone or no longer hovering.
                debug!(%key, "stale dwell tick");
                self.ticks.expired(key);
            }
        }
        outcome
    }

    fn fire(&mut self, key: KeyId, events: &mut Vec<KeyboardEvent>) {
        let Some(value) = self.board.get(key).map(|e| e.value) else {
            return;
        };
        info!(%key, value = %value.label(), "key activated");
        self.text.apply(&value);
        events.push(KeyboardEvent::KeyActivated { key, value });
        events.push(KeyboardEvent::TextChanged {
            text: self.text.as_str().to_string(),
        });
    }

    fn handle_signal(&mut self, key: KeyId, signal: DwellSignal, events: &mut Vec<KeyboardEvent>) {
        match signal {
            DwellSignal::HoverStarted => {
                if let Err(e) = self.ticks.start(key, self.board.config().tick_period()) {
                    warn!(%key, "failed to arm dwell timer: {}", e);
                }
                events.push(KeyboardEvent::HoverChanged { key, hovered: true });
            }
            DwellSignal::HoverEnded { activation } => {
                self.ticks.cancel(key);
                if activation > 0.0 {
                    debug!(%key, activation, "dwell abandoned");
                }
                events.push(KeyboardEvent::HoverChanged {
                    key,
                    hovered: false,
                });
            }
            DwellSignal::Progress { activation } => {
                events.push(KeyboardEvent::DwellProgress { key, activation });
            }
            DwellSignal::Activated { .. } => self.fire(key, events),
        }
    }

    // ── Geometry ──

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<Vec<KeyboardEvent>> {
        if !viewport.has_area() {
            return Err(Error::Layout(format!(
                "viewport must be positive, got {}x{}",
                viewport.width, viewport.height
            )));
        }
        if !self.mapper.inset.fits(viewport) {
            return Err(Error::Layout(
                "current inset leaves no surface inside the viewport".into(),
            ));
        }
        self.mapper.viewport = viewport;
        self.relayout_preset();
        Ok(self.refresh_cursor())
    }

    pub fn set_inset(&mut self, inset: SurfaceInset) -> Result<Vec<KeyboardEvent>> {
        if !inset.is_valid() {
            return Err(Error::Layout("inset values must be finite and non-negative".into()));
        }
        if !inset.fits(self.mapper.viewport) {
            return Err(Error::Layout("inset leaves no surface inside the viewport".into()));
        }
        self.mapper.inset = inset;
        self.relayout_preset();
        Ok(self.refresh_cursor())
    }

    /// Preset layouts follow the viewport; shell layouts are re-sent by
    /// the shell itself.
    fn relayout_preset(&mut self) {
        let Some(preset) = self.preset else {
            return;
        };
        for placed in generate_layout(preset, self.mapper.viewport, self.mapper.inset) {
            self.board.set_region(placed.id, Some(placed.region));
        }
    }

    // ── Layout ──

    /// Add or update a key.  The same value with a new region keeps the
    /// dwell state; a new value disposes the old key first.
    pub fn set_key(&mut self, key: KeyId, value: KeyValue, region: Option<KeyRegion>) -> Vec<KeyboardEvent> {
        let mut events = Vec::new();
        match self.board.get(key).map(|e| e.value) {
            Some(existing) if existing == value => {
                self.board.set_region(key, region);
            }
            _ => {
                self.ticks.cancel(key);
                if let Some(old) = self.board.insert(key, value, region) {
                    if old.dwell.is_hovered() {
                        events.push(KeyboardEvent::HoverChanged {
                            key,
                            hovered: false,
                        });
                    }
                }
            }
        }
        self.preset = None;

        if let Some(r) = region {
            for (a, b) in self.board.overlapping_pairs() {
                if a == key || b == key {
                    warn!(%a, %b, "key regions overlap");
                }
            }
            if !r.has_area() {
                debug!(%key, "key region has no area");
            }
        }
        events.extend(self.recheck_containment());
        events
    }

    pub fn remove_key(&mut self, key: KeyId) -> Result<Vec<KeyboardEvent>> {
        self.ticks.cancel(key);
        let entry = self
            .board
            .remove(key)
            .ok_or_else(|| Error::Layout(format!("unknown key {}", key)))?;
        self.preset = None;
        let mut events = Vec::new();
        if entry.dwell.is_hovered() {
            events.push(KeyboardEvent::HoverChanged {
                key,
                hovered: false,
            });
        }
        Ok(events)
    }

    /// Dispose of every key.
    pub fn clear_layout(&mut self) -> Vec<KeyboardEvent> {
        let mut events = Vec::new();
        for (key, entry) in self.board.clear() {
            self.ticks.cancel(key);
            if entry.dwell.is_hovered() {
                events.push(KeyboardEvent::HoverChanged {
                    key,
                    hovered: false,
                });
            }
        }
        self.preset = None;
        events
    }

    /// Replace the layout with a preset laid out over the current viewport.
    pub fn load_preset(&mut self, preset: LayoutPreset) -> Vec<KeyboardEvent> {
        let mut events = self.clear_layout();
        for placed in generate_layout(preset, self.mapper.viewport, self.mapper.inset) {
            self.board.insert(placed.id, placed.value, Some(placed.region));
        }
        self.preset = Some(preset);
        info!(layout = preset.as_str(), keys = self.board.len(), "layout loaded");
        events.extend(self.recheck_containment());
        events
    }

    /// Re-run containment against the current cursor after a layout edit.
    fn recheck_containment(&mut self) -> Vec<KeyboardEvent> {
        let mut events = Vec::new();
        if self.source.has_sample() {
            for (key, signal) in self.board.apply_cursor(self.cursor) {
                self.handle_signal(key, signal, &mut events);
            }
        }
        events
    }

    // ── Configuration ──

    /// Swap dwell timing.  Running timers are re-armed at the new period;
    /// tick counts carry over.
    pub fn set_dwell_config(&mut self, config: DwellConfig) -> Result<()> {
        config.validate()?;
        self.board.set_config(config);
        let period = config.tick_period();
        let running: Vec<KeyId> = self
            .board
            .iter()
            .filter(|(_, e)| matches!(e.dwell, DwellState::Hovering { .. }))
            .map(|(id, _)| id)
            .collect();
        for key in running {
            if let Err(e) = self.ticks.start(key, period) {
                warn!(%key, "failed to re-arm dwell timer: {}", e);
            }
        }
        debug!(tick_ms = config.tick_ms, step = config.step, "dwell config updated");
        Ok(())
    }

    pub fn set_validation(&mut self, validation: SampleValidation) {
        self.source.set_validation(validation);
    }

    // ── Text ──

    pub fn reset_text(&mut self) -> Vec<KeyboardEvent> {
        self.text.reset();
        vec![KeyboardEvent::TextChanged {
            text: String::new(),
        }]
    }

    // ── Lifecycle ──

    /// Cancel every timer and drop all key state.  Later samples and
    /// ticks are ignored.
    pub fn shutdown(&mut self) {
        for (key, _) in self.board.clear() {
            self.ticks.cancel(key);
        }
        self.shut_down = true;
        info!("keyboard shut down");
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        let hovered = self.board.hovered();
        let hovered = if hovered.is_empty() {
            "nil".to_string()
        } else {
            format!(
                "({})",
                hovered
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            )
        };
        let config = self.board.config();
        format!(
            "(:keys {} :hovered {} :layout {} :viewport ({:.0} {:.0}) :cursor ({:.0} {:.0}) :text-len {} :tick-ms {} :step {} :refire {} :has-sample {})",
            self.board.len(),
            hovered,
            self.preset.map(|p| p.as_str()).unwrap_or("custom"),
            self.mapper.viewport.width,
            self.mapper.viewport.height,
            self.cursor.x,
            self.cursor.y,
            self.text.len(),
            config.tick_ms,
            config.step,
            config.refire.as_str(),
            if self.source.has_sample() { "t" } else { "nil" },
        )
    }
}
