//! Daemon state: the single struct the calloop loop hands to every
//! callback.

use std::time::{Duration, Instant};

use calloop::LoopHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::feed::GazeFeed;
use crate::gaze::CoordinateMapper;
use crate::ipc::IpcServer;
use crate::keyboard::{CalloopTicks, DwellKeyboard, DwellTickTarget, KeyId, KeyboardEvent};

/// Keyboard driven by calloop timers.
pub type LoopKeyboard = DwellKeyboard<CalloopTicks<GazekeysState>>;

/// Central daemon state.
pub struct GazekeysState {
    pub loop_handle: LoopHandle<'static, Self>,
    pub config: Config,

    // Core
    pub keyboard: LoopKeyboard,

    // Transports
    pub feed: GazeFeed,
    pub ipc_server: IpcServer,

    pub start_time: Instant,
    /// Shutdown flag
    pub running: bool,
}

impl GazekeysState {
    /// Build the state and load the configured startup layout.  Nothing is
    /// bound yet; the backend binds the feed and IPC sockets.
    pub fn new(config: Config, loop_handle: LoopHandle<'static, Self>) -> Self {
        let mut keyboard = DwellKeyboard::new(
            CalloopTicks::new(loop_handle.clone()),
            config.dwell,
            config.feed.validation(),
            CoordinateMapper::new(config.viewport, config.inset),
        );
        keyboard.load_preset(config.layout.preset);

        let socket_path = config
            .ipc
            .socket
            .clone()
            .unwrap_or_else(IpcServer::default_socket_path);
        let mut ipc_server = IpcServer::new(socket_path);
        ipc_server.ipc_trace = config.ipc.trace;
        ipc_server.rate_limit = config.ipc.rate_limit;

        let feed = GazeFeed::new(
            config.feed.url.clone(),
            config.feed.max_message_bytes,
            config.feed.connect_timeout(),
        );

        info!(
            keys = keyboard.board().len(),
            layout = config.layout.preset.as_str(),
            "GazekeysState initialized"
        );

        Self {
            loop_handle,
            config,
            keyboard,
            feed,
            ipc_server,
            start_time: Instant::now(),
            running: true,
        }
    }

    /// Forward keyboard events to IPC clients.
    pub fn emit(&mut self, events: Vec<KeyboardEvent>) {
        for event in events {
            if event.is_cursor() && !self.config.ipc.broadcast_cursor {
                continue;
            }
            debug!(?event, "keyboard event");
            self.ipc_server.broadcast(&event.to_sexp());
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Whether the feed has gone quiet for longer than the configured limit.
    pub fn feed_is_stale(&self, now: Instant) -> bool {
        self.keyboard
            .source()
            .health
            .is_stale(now, Duration::from_millis(self.config.feed.stale_after_ms))
    }

    /// Tear down in dependency order: the feed stops first so no sample
    /// reaches a disposed key, then the keyboard cancels its timers, then
    /// the IPC socket goes away.
    pub fn shutdown(&mut self) {
        let handle = self.loop_handle.clone();
        self.feed.shutdown();
        self.keyboard.shutdown();
        self.ipc_server.shutdown(&handle);
        self.running = false;
    }
}

impl DwellTickTarget for GazekeysState {
    fn on_dwell_tick(&mut self, key: KeyId) -> Option<Duration> {
        let outcome = self.keyboard.on_tick(key);
        self.emit(outcome.events);
        outcome.rearm
    }
}
