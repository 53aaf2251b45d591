//! Event loop backend.
//!
//! One calloop loop drives everything: the IPC listener is a
//! level-triggered source, dwell ticks are per-key timers, and the gaze
//! feed and IPC clients are polled once per iteration.  SIGTERM/SIGINT request a
//! graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use calloop::EventLoop;
use tracing::info;

use crate::config::Config;
use crate::feed::GazeFeed;
use crate::ipc::IpcServer;
use crate::state::GazekeysState;

/// Global flag set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Install signal handlers for graceful shutdown (SIGTERM, SIGINT).
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Create the loop and state, connect to the tracker and bind the IPC
/// socket.  An unreachable tracker is not fatal.
pub fn setup(config: Config) -> anyhow::Result<(EventLoop<'static, GazekeysState>, GazekeysState)> {
    config.validate()?;
    let event_loop = EventLoop::<GazekeysState>::try_new()?;
    let handle = event_loop.handle();
    let mut state = GazekeysState::new(config, handle.clone());

    GazeFeed::start(&mut state);

    let ipc_path = state.ipc_server.socket_path.clone();
    let token = IpcServer::bind(&ipc_path, &handle)?;
    state.ipc_server.set_token(token);

    Ok((event_loop, state))
}

/// One loop iteration: read the feed and clients, then dispatch timers
/// and the listener for at most `poll_interval`.
pub fn iterate(
    event_loop: &mut EventLoop<'static, GazekeysState>,
    state: &mut GazekeysState,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    GazeFeed::poll(state);
    IpcServer::poll_clients(state);
    event_loop.dispatch(Some(poll_interval), state)?;
    Ok(())
}

/// Run the daemon until a signal arrives or `exit_after` seconds pass.
pub fn run(config: Config, exit_after: Option<u64>) -> anyhow::Result<()> {
    let (mut event_loop, mut state) = setup(config)?;

    install_signal_handlers();

    let start_time = Instant::now();
    let exit_duration = exit_after.map(Duration::from_secs);
    let mut last_status_log = Instant::now();
    let status_interval = match state.config.runtime.status_interval_s {
        0 => None,
        s => Some(Duration::from_secs(s)),
    };

    let poll_interval = Duration::from_millis(state.config.runtime.poll_interval_ms);
    info!(
        "gazekeys running (poll interval: {}ms), entering event loop",
        state.config.runtime.poll_interval_ms
    );

    while state.running {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            info!("Shutdown signal received, exiting");
            break;
        }

        if let Some(dur) = exit_duration {
            if start_time.elapsed() >= dur {
                info!("Exit timer fired after {}s", dur.as_secs());
                break;
            }
        }

        if let Some(interval) = status_interval {
            if last_status_log.elapsed() >= interval {
                log_status(&state);
                last_status_log = Instant::now();
            }
        }

        iterate(&mut event_loop, &mut state, poll_interval)?;
    }

    state.shutdown();
    info!(
        text_len = state.keyboard.text().chars().count(),
        "gazekeys shut down"
    );
    Ok(())
}

fn log_status(state: &GazekeysState) {
    let hovered = state.keyboard.board().hovered();
    let health = &state.keyboard.source().health;
    info!(
        keys = state.keyboard.board().len(),
        hovered = ?hovered,
        text_len = state.keyboard.text().chars().count(),
        feed_connected = state.feed.is_connected(),
        ipc_clients = state.ipc_server.clients.len(),
        rate_hz = health.rate_hz,
        stale = state.feed_is_stale(Instant::now()),
        "status"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::os::unix::net::UnixStream;
    use std::thread::{self, JoinHandle};

    use tungstenite::Message;

    use crate::gaze::{NormalizedPoint, ScreenPoint, Viewport};
    use crate::keyboard::LayoutPreset;

    /// Tracker stand-in: serves one client, pushes `samples`, optionally
    /// closes, then waits for the client to go away.
    fn tracker(samples: &[&str], close: bool) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let samples: Vec<String> = samples.iter().map(|s| s.to_string()).collect();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let Ok(mut ws) = tungstenite::accept(stream) else {
                panic!("server handshake failed");
            };
            for s in samples {
                ws.send(Message::text(s)).unwrap();
            }
            if close {
                ws.close(None).ok();
            }
            while ws.read().is_ok() {}
        });
        (url, handle)
    }

    fn test_config(dir: &std::path::Path, feed_url: &str) -> Config {
        let mut config = Config::default();
        config.viewport = Viewport::new(800.0, 400.0);
        config.layout.preset = LayoutPreset::Grid;
        config.feed.url = feed_url.to_string();
        config.ipc.socket = Some(dir.join("gazekeys.sock"));
        config
    }

    fn read_frame(stream: &mut UnixStream) -> String {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut payload).unwrap();
        String::from_utf8(payload).unwrap()
    }

    #[test]
    fn test_feed_and_ipc_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        // 'A' is the grid cell centred at (50, 50) on 800x400.
        let (url, server) = tracker(&["{\"x\": 0.0625, \"y\": 0.875}"], false);
        let (mut event_loop, mut state) = setup(test_config(dir.path(), &url)).unwrap();
        assert!(state.feed.is_connected());
        let poll = Duration::from_millis(5);

        // Shell handshake.
        let mut shell = UnixStream::connect(dir.path().join("gazekeys.sock")).unwrap();
        shell
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let hello = "(:type :hello :id 1 :version 1 :client \"test\")";
        shell.write_all(&(hello.len() as u32).to_be_bytes()).unwrap();
        shell.write_all(hello.as_bytes()).unwrap();
        for _ in 0..10 {
            iterate(&mut event_loop, &mut state, poll).unwrap();
        }
        assert_eq!(state.ipc_server.authenticated_count(), 1);
        let reply = read_frame(&mut shell);
        assert!(reply.contains(":type :hello"), "{reply}");
        assert!(reply.contains(":layout grid"), "{reply}");

        let deadline = Instant::now() + Duration::from_secs(5);
        while state.keyboard.text().is_empty() && Instant::now() < deadline {
            iterate(&mut event_loop, &mut state, poll).unwrap();
        }
        assert!(state.keyboard.text().starts_with('A'));
        assert!(state.keyboard.source().health.connected);
        assert_eq!(state.keyboard.source().health.accepted, 1);

        state.shutdown();
        assert!(!state.running);
        assert!(!state.feed.is_connected());
        assert!(!dir.path().join("gazekeys.sock").exists());
        server.join().unwrap();
    }

    #[test]
    fn test_tracker_disconnect_keeps_last_sample() {
        let dir = tempfile::tempdir().unwrap();
        let (url, server) = tracker(&["{\"x\": 0.25, \"y\": 0.5}"], true);
        let (mut event_loop, mut state) = setup(test_config(dir.path(), &url)).unwrap();
        let poll = Duration::from_millis(5);

        let deadline = Instant::now() + Duration::from_secs(5);
        while state.feed.is_connected() && Instant::now() < deadline {
            iterate(&mut event_loop, &mut state, poll).unwrap();
        }
        assert!(!state.feed.is_connected());

        // A few more iterations with no feed: nothing fails, nothing moves.
        for _ in 0..5 {
            iterate(&mut event_loop, &mut state, poll).unwrap();
        }
        let health = &state.keyboard.source().health;
        assert!(!health.connected);
        assert_eq!(health.accepted, 1);
        assert_eq!(state.keyboard.source().latest(), NormalizedPoint::new(0.25, 0.5));
        assert_eq!(state.keyboard.cursor(), ScreenPoint::new(200.0, 200.0));

        state.shutdown();
        server.join().unwrap();
    }

    #[test]
    fn test_unreachable_tracker_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let (mut event_loop, mut state) = setup(test_config(dir.path(), &url)).unwrap();
        assert!(!state.feed.is_connected());
        iterate(&mut event_loop, &mut state, Duration::from_millis(1)).unwrap();
        assert_eq!(state.keyboard.source().latest(), NormalizedPoint::default());
        assert!(state.feed_is_stale(Instant::now()));
        state.shutdown();
    }

    #[test]
    fn test_setup_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), "ws://127.0.0.1:1");
        config.dwell.step = 0.0;
        assert!(setup(config).is_err());
    }
}
