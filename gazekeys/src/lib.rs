//! gazekeys: dwell-activated on-screen keyboard.
//!
//! An external tracker streams normalized gaze samples; the daemon maps
//! them into screen space and every key runs its own dwell timer.  A key
//! that holds the cursor for the full dwell duration fires once and its
//! value is appended to the shared text buffer.
//!
//! Data flow:
//!
//! ```text
//! gaze feed ─▶ SampleSlot ─▶ CoordinateMapper ─▶ DwellBoard (N keys) ─▶ TextBuffer
//!                                                  ▲
//!                    presentation shell (IPC) ─────┘ layout, viewport, pointer
//! ```
//!
//! - [`gaze`]: sample adapter, health, and the coordinate mapper
//! - [`keyboard`]: key regions, dwell state machine, tick scheduling, text
//! - [`feed`]: WebSocket subscription to the tracker's sample stream
//! - [`ipc`]: s-expression socket for the presentation shell
//! - [`state`] / [`backend`]: calloop event loop wiring
//! - [`replay`]: offline trace replay on a virtual clock

pub mod backend;
pub mod config;
pub mod feed;
pub mod gaze;
pub mod ipc;
pub mod keyboard;
pub mod replay;
pub mod state;

pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the keyboard core and its configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rejected gaze sample: {0}")]
    Sample(String),

    #[error("Layout error: {0}")]
    Layout(String),

    #[error("Gaze feed error: {0}")]
    Feed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Event loop error: {0}")]
    EventLoop(#[from] calloop::Error),
}
