//! Gaze feed: WebSocket subscription to the tracker.
//!
//! The tracker runs a WebSocket server (default `ws://localhost:8001`) and
//! pushes one `{"x": .., "y": ..}` text message per sample, roughly ten
//! times a second.  The daemon connects once at startup; after the
//! handshake the socket is non-blocking and read once per loop iteration.
//! Everything read in one poll collapses to its newest valid sample before
//! it reaches the keyboard.  If the tracker is unreachable or goes away the
//! last sample stays in place.  There is no reconnection.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use tungstenite::http::Uri;
use tungstenite::{Message, WebSocket};

use crate::gaze::NormalizedPoint;
use crate::state::GazekeysState;
use crate::{Error, Result};

/// Split a `ws://` URL into the request URI, host and port.
pub fn parse_url(url: &str) -> Result<(Uri, String, u16)> {
    let uri: Uri = url
        .parse()
        .map_err(|e| Error::Config(format!("feed url {:?}: {}", url, e)))?;
    match uri.scheme_str() {
        Some("ws") => {}
        Some(other) => {
            return Err(Error::Config(format!(
                "feed url {:?}: unsupported scheme {:?}, expected ws",
                url, other
            )))
        }
        None => return Err(Error::Config(format!("feed url {:?}: missing ws:// scheme", url))),
    }
    let host = uri
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or_else(|| Error::Config(format!("feed url {:?}: missing host", url)))?;
    let port = uri.port_u16().unwrap_or(80);
    Ok((uri, host, port))
}

/// What one poll of the socket produced.
#[derive(Debug, Default)]
pub struct FeedRead {
    /// Text payloads in arrival order.
    pub messages: Vec<String>,
    /// False once the tracker closed the connection or it failed.
    pub open: bool,
}

/// Client side of the tracker's sample stream.
pub struct GazeFeed {
    url: String,
    max_message_bytes: usize,
    connect_timeout: Duration,
    socket: Option<WebSocket<TcpStream>>,
    peer: Option<SocketAddr>,
    /// Messages handed on for decoding.
    pub received: u64,
    /// Messages dropped for exceeding `max_message_bytes`.
    pub oversized: u64,
}

impl GazeFeed {
    pub fn new(url: impl Into<String>, max_message_bytes: usize, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            max_message_bytes,
            connect_timeout,
            socket: None,
            peer: None,
            received: 0,
            oversized: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Address of the tracker, once a connection was made.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Connect and complete the WebSocket handshake.  Blocks for at most
    /// the connect timeout per address, then switches to non-blocking.
    pub fn connect(&mut self) -> Result<SocketAddr> {
        let (uri, host, port) = parse_url(&self.url)?;
        let mut last_err = None;
        let mut stream = None;
        for addr in (host.as_str(), port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = stream.ok_or_else(|| {
            let reason = last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no address".to_string());
            Error::Feed(format!("connect to {}: {}", self.url, reason))
        })?;

        stream.set_read_timeout(Some(self.connect_timeout))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;
        stream.set_nodelay(true).ok();
        let peer = stream.peer_addr()?;

        let (socket, response) = tungstenite::client(uri, stream)
            .map_err(|e| Error::Feed(format!("handshake with {}: {}", self.url, e)))?;
        socket.get_ref().set_read_timeout(None)?;
        socket.get_ref().set_write_timeout(None)?;
        socket.get_ref().set_nonblocking(true)?;
        debug!(%peer, status = %response.status(), "gaze feed handshake complete");

        self.socket = Some(socket);
        self.peer = Some(peer);
        Ok(peer)
    }

    /// Read every message currently available without blocking.
    pub fn read_available(&mut self) -> FeedRead {
        let Some(socket) = self.socket.as_mut() else {
            return FeedRead::default();
        };

        let mut messages = Vec::new();
        let mut open = true;
        loop {
            let payload = match socket.read() {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("gaze feed sent non-UTF-8 binary message, dropping");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    info!(?frame, "tracker closed the gaze feed");
                    let _ = socket.flush();
                    open = false;
                    break;
                }
                // Ping/pong are answered by tungstenite on the next read.
                Ok(_) => continue,
                Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    open = false;
                    break;
                }
                Err(e) => {
                    warn!("gaze feed read error: {}", e);
                    open = false;
                    break;
                }
            };

            if payload.len() > self.max_message_bytes {
                self.oversized += 1;
                warn!(
                    len = payload.len(),
                    max = self.max_message_bytes,
                    "gaze feed message too long, discarding"
                );
                continue;
            }
            let trimmed = payload.trim();
            if !trimmed.is_empty() {
                self.received += 1;
                messages.push(trimmed.to_string());
            }
        }

        if !open {
            self.socket = None;
        }
        FeedRead { messages, open }
    }

    /// Connect at startup.  An unreachable tracker is logged and the daemon
    /// runs on with the default sample.
    pub fn start(state: &mut GazekeysState) -> bool {
        match state.feed.connect() {
            Ok(peer) => {
                info!(url = state.feed.url(), %peer, "gaze feed connected");
                state.keyboard.source_mut().health.connected = true;
                true
            }
            Err(e) => {
                warn!("gaze feed unavailable, keeping default sample: {}", e);
                state.keyboard.source_mut().health.connected = false;
                false
            }
        }
    }

    /// Drain the socket and hand the newest valid sample of the burst to
    /// the keyboard.  Called once per event loop iteration.
    pub fn poll(state: &mut GazekeysState) {
        if !state.feed.is_connected() {
            return;
        }
        let read = state.feed.read_available();

        if !read.messages.is_empty() {
            let batch: Vec<Result<NormalizedPoint>> = read
                .messages
                .iter()
                .map(|m| NormalizedPoint::from_json(m))
                .collect();
            let events = state.keyboard.offer_batch(batch, Instant::now());
            state.emit(events);
        }

        if !read.open {
            info!(peer = ?state.feed.peer, "gaze feed disconnected, keeping last sample");
            state.keyboard.source_mut().health.connected = false;
        }
    }

    /// Close the connection.
    pub fn shutdown(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None);
            let _ = socket.flush();
        }
        info!(received = self.received, "gaze feed stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Minimal tracker: accepts one client, pushes `messages`, optionally
    /// closes, then waits for the client to go away.
    fn tracker(messages: Vec<String>, close: bool) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            let Ok(mut ws) = tungstenite::accept(stream) else {
                panic!("server handshake failed");
            };
            for m in messages {
                ws.send(Message::text(m)).unwrap();
            }
            if close {
                ws.close(None).ok();
            }
            while ws.read().is_ok() {}
        });
        (url, handle)
    }

    fn feed(url: &str, max: usize) -> GazeFeed {
        GazeFeed::new(url, max, Duration::from_secs(2))
    }

    /// Poll until `want` messages arrived or the connection closed.
    fn collect(feed: &mut GazeFeed, want: usize) -> (Vec<String>, bool) {
        let mut messages = Vec::new();
        for _ in 0..400 {
            let read = feed.read_available();
            messages.extend(read.messages);
            if !read.open {
                return (messages, false);
            }
            if messages.len() >= want {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        (messages, true)
    }

    #[test]
    fn test_parse_url() {
        let (_, host, port) = parse_url("ws://localhost:8001").unwrap();
        assert_eq!((host.as_str(), port), ("localhost", 8001));
        let (_, host, port) = parse_url("ws://127.0.0.1").unwrap();
        assert_eq!((host.as_str(), port), ("127.0.0.1", 80));
        let (_, host, _) = parse_url("ws://[::1]:9000").unwrap();
        assert_eq!(host, "::1");

        assert!(parse_url("http://localhost:8001").is_err());
        assert!(parse_url("wss://localhost:8001").is_err());
        assert!(parse_url("localhost:8001").is_err());
    }

    #[test]
    fn test_reads_pushed_samples_in_order() {
        let sent = vec![
            "{\"x\": 0.1, \"y\": 0.2}".to_string(),
            "{\"x\": 0.3, \"y\": 0.4}".to_string(),
            "{\"x\": 0.5, \"y\": 0.6}".to_string(),
        ];
        let (url, server) = tracker(sent.clone(), false);
        let mut feed = feed(&url, 4096);
        feed.connect().unwrap();
        assert!(feed.is_connected());

        let (messages, open) = collect(&mut feed, 3);
        assert!(open);
        assert_eq!(messages, sent);
        assert_eq!(feed.received, 3);

        feed.shutdown();
        assert!(!feed.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_oversized_message_discarded() {
        let long = format!("{{\"x\": 0.5, \"y\": 0.5, \"pad\": \"{}\"}}", "x".repeat(64));
        let short = "{\"x\": 0.5, \"y\": 0.5}".to_string();
        let (url, server) = tracker(vec![long, short.clone()], false);
        let mut feed = feed(&url, 32);
        feed.connect().unwrap();

        let (messages, _) = collect(&mut feed, 1);
        assert_eq!(messages, vec![short]);
        assert_eq!(feed.oversized, 1);

        feed.shutdown();
        server.join().unwrap();
    }

    #[test]
    fn test_close_reports_disconnect() {
        let (url, server) = tracker(vec!["{\"x\": 0.25, \"y\": 0.5}".to_string()], true);
        let mut feed = feed(&url, 4096);
        feed.connect().unwrap();

        let (messages, open) = collect(&mut feed, usize::MAX);
        assert!(!open);
        assert_eq!(messages, vec!["{\"x\": 0.25, \"y\": 0.5}"]);
        assert!(!feed.is_connected());
        assert!(feed.read_available().messages.is_empty());
        server.join().unwrap();
    }

    #[test]
    fn test_unreachable_tracker_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut feed = feed(&url, 4096);
        assert!(matches!(feed.connect(), Err(Error::Feed(_))));
        assert!(!feed.is_connected());
        assert!(!feed.read_available().open);
    }
}
