//! Dwell keyboard core.
//!
//! Keys are independent dwell detectors driven by the shared cursor.
//! [`dwell::step`] is the pure per-key transition; [`DwellBoard`] holds the
//! keyed collection; [`DwellKeyboard`] wires in the sample source, the
//! mapper, per-key timers and the text buffer.

pub mod board;
pub mod controller;
pub mod dwell;
pub mod key;
pub mod layout;
pub mod text;
pub mod ticks;

pub use board::{DwellBoard, KeyEntry};
pub use controller::{DwellKeyboard, KeyboardEvent, TickOutcome};
pub use dwell::{DwellConfig, DwellSignal, DwellState, RefirePolicy};
pub use key::{KeyId, KeyRegion, KeyValue};
pub use layout::{generate_layout, LayoutPreset, PlacedKey};
pub use text::TextBuffer;
pub use ticks::{CalloopTicks, DwellTickTarget, ManualTicks, TickScheduler};
