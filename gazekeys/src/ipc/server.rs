//! Control socket for gazekeys clients.
//!
//! Every frame is a 4-byte big-endian length followed by one s-expression.
//! The listener is a calloop source; accepted clients are non-blocking and
//! get drained once per loop iteration by [`IpcServer::poll_clients`].

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction, RegistrationToken};
use tracing::{debug, error, info, warn};

use super::dispatch;
use crate::state::GazekeysState;

const MAX_FRAME_BYTES: u32 = 1 << 20;

/// Queued output above which broadcast events are shed for a slow client.
const MAX_QUEUED_BYTES: usize = 64 * 1024;

/// Reads per client per iteration.
const MAX_READS_PER_POLL: usize = 16;

pub const DEFAULT_RATE_LIMIT: u32 = 200;

const BUDGET_WINDOW: Duration = Duration::from_secs(1);

/// Fixed-window request budget for one client.
#[derive(Debug)]
pub struct RequestBudget {
    window_start: Instant,
    used: u32,
    limit: u32,
}

impl RequestBudget {
    pub fn new(limit: u32, now: Instant) -> Self {
        Self {
            window_start: now,
            used: 0,
            limit,
        }
    }

    /// Count one request at `now`; false once the window's budget is spent.
    pub fn admit(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) >= BUDGET_WINDOW {
            self.window_start = now;
            self.used = 0;
        }
        self.used = self.used.saturating_add(1);
        self.used <= self.limit
    }
}

/// Identity of the process on the other end of a client socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCred {
    pub uid: u32,
    pub pid: i32,
}

impl PeerCred {
    #[cfg(target_os = "linux")]
    fn of(stream: &UnixStream) -> Option<Self> {
        use std::os::unix::io::AsRawFd;

        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                stream.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut libc::ucred as *mut libc::c_void,
                &mut len,
            )
        };
        (ret == 0).then_some(Self {
            uid: cred.uid,
            pid: cred.pid,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn of(_stream: &UnixStream) -> Option<Self> {
        None
    }
}

/// One connected client: socket, framing buffers, and session flags.
pub struct IpcClient {
    pub id: u64,
    stream: UnixStream,
    inbox: Vec<u8>,
    pub(crate) outbox: Vec<u8>,
    /// Set by a successful hello.
    pub authenticated: bool,
    pub peer: Option<PeerCred>,
    budget: RequestBudget,
}

impl IpcClient {
    pub(crate) fn new(stream: UnixStream, id: u64, rate_limit: u32) -> Self {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(client_id = id, "cannot make client socket non-blocking: {}", e);
        }
        let peer = PeerCred::of(&stream);
        match peer {
            Some(p) => debug!(client_id = id, uid = p.uid, pid = p.pid, "peer credentials"),
            None => debug!(client_id = id, "peer credentials unavailable"),
        }

        Self {
            id,
            stream,
            inbox: Vec::with_capacity(4096),
            outbox: Vec::new(),
            authenticated: false,
            peer,
            budget: RequestBudget::new(rate_limit, Instant::now()),
        }
    }

    /// Pull whatever the socket has into the inbox. EOF is an error.
    fn fill_inbox(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 4096];
        for _ in 0..MAX_READS_PER_POLL {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => self.inbox.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Split complete frames off the inbox, leaving any partial tail.
    /// A header announcing more than 1 MiB is a protocol violation.
    pub fn take_frames(&mut self) -> io::Result<Vec<String>> {
        let mut frames = Vec::new();
        let mut at = 0;
        while let Some(header) = self.inbox.get(at..at + 4) {
            let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            if len > MAX_FRAME_BYTES {
                self.inbox.clear();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame of {len} bytes exceeds limit"),
                ));
            }
            let end = at + 4 + len as usize;
            let Some(body) = self.inbox.get(at + 4..end) else {
                break;
            };
            frames.push(String::from_utf8_lossy(body).into_owned());
            at = end;
        }
        self.inbox.drain(..at);
        Ok(frames)
    }

    /// Write as much queued output as the socket accepts.
    pub fn drain_outbox(&mut self) -> io::Result<()> {
        while !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Queue one frame. Responses are never shed.
    pub fn send(&mut self, payload: &str) {
        let bytes = payload.as_bytes();
        self.outbox.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.outbox.extend_from_slice(bytes);
    }

    /// Queue a broadcast event unless the client is too far behind.
    pub fn send_event(&mut self, payload: &str) -> bool {
        if self.outbox.len() > MAX_QUEUED_BYTES {
            return false;
        }
        self.send(payload);
        true
    }
}

/// Listener registration plus every live client session.
pub struct IpcServer {
    pub socket_path: PathBuf,
    pub clients: HashMap<u64, IpcClient>,
    pub ipc_trace: bool,
    /// Requests per second allowed per client.
    pub rate_limit: u32,
    next_client_id: u64,
    token: Option<RegistrationToken>,
}

impl IpcServer {
    /// Create the server; `bind` registers the listener.
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            clients: HashMap::new(),
            ipc_trace: false,
            rate_limit: DEFAULT_RATE_LIMIT,
            next_client_id: 1,
            token: None,
        }
    }

    /// `$XDG_RUNTIME_DIR/gazekeys.sock`, or a per-uid directory under /tmp.
    pub fn default_socket_path() -> PathBuf {
        let dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("/tmp/gazekeys-{}", unsafe { libc::getuid() })));
        dir.join("gazekeys.sock")
    }

    pub(crate) fn add_client(&mut self, stream: UnixStream) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        self.clients.insert(id, IpcClient::new(stream, id, self.rate_limit));
        id
    }

    /// Bind the socket (owner-only) and register the accept source.
    pub fn bind(
        socket_path: &Path,
        loop_handle: &LoopHandle<'static, GazekeysState>,
    ) -> anyhow::Result<RegistrationToken> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(dir) = socket_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        // A previous daemon that crashed leaves its socket behind.
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        listener.set_nonblocking(true)?;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o700))?;
        info!(?socket_path, "IPC server listening");

        let source = Generic::new(listener, Interest::READ, Mode::Level);
        loop_handle
            .insert_source(source, |_, listener, state| {
                Self::accept_pending(listener, state);
                Ok(PostAction::Continue)
            })
            .map_err(|e| anyhow::anyhow!("failed to register IPC listener: {}", e.error))
    }

    fn accept_pending(listener: &UnixListener, state: &mut GazekeysState) {
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    let client_id = state.ipc_server.add_client(stream);
                    info!(client_id, "IPC client connected");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    error!("accept error: {}", e);
                    return;
                }
            }
        }
    }

    /// Remember the listener registration so shutdown can remove it.
    pub fn set_token(&mut self, token: RegistrationToken) {
        self.token = Some(token);
    }

    /// Read every client, answer complete requests, then flush all queues.
    /// Events raised while serving one client reach the others in the
    /// same iteration.
    pub fn poll_clients(state: &mut GazekeysState) {
        let ids: Vec<u64> = state.ipc_server.clients.keys().copied().collect();
        let mut closed = Vec::new();

        for id in ids {
            match state.ipc_server.receive(id) {
                Ok(frames) => {
                    for frame in frames {
                        Self::serve(state, id, &frame);
                    }
                }
                Err(e) => {
                    debug!(client_id = id, "closing client: {}", e);
                    closed.push(id);
                }
            }
        }

        for (id, client) in state.ipc_server.clients.iter_mut() {
            if let Err(e) = client.drain_outbox() {
                debug!(client_id = id, "write failed: {}", e);
                closed.push(*id);
            }
        }

        for id in closed {
            if state.ipc_server.clients.remove(&id).is_some() {
                info!(client_id = id, "IPC client disconnected");
            }
        }
    }

    fn receive(&mut self, id: u64) -> io::Result<Vec<String>> {
        match self.clients.get_mut(&id) {
            Some(client) => {
                client.fill_inbox()?;
                client.take_frames()
            }
            None => Ok(Vec::new()),
        }
    }

    /// Rate-check one request, dispatch it, and queue the reply.
    fn serve(state: &mut GazekeysState, id: u64, frame: &str) {
        let admitted = match state.ipc_server.clients.get_mut(&id) {
            Some(client) => client.budget.admit(Instant::now()),
            None => return,
        };
        if !admitted {
            warn!(client_id = id, "rate limit exceeded, dropping request");
            state
                .ipc_server
                .reply(id, "(:type :response :id 0 :status :error :reason \"rate limit exceeded\")");
            return;
        }

        if state.ipc_server.ipc_trace {
            info!(client_id = id, "<< {}", frame);
        }
        if let Some(response) = dispatch::handle_message(state, id, frame) {
            if state.ipc_server.ipc_trace {
                info!(client_id = id, ">> {}", response);
            }
            state.ipc_server.reply(id, &response);
        }
    }

    fn reply(&mut self, id: u64, payload: &str) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.send(payload);
        }
    }

    /// Queue an event for every client that completed hello.
    pub fn broadcast(&mut self, event: &str) {
        if self.ipc_trace {
            info!("broadcast >> {}", event);
        }
        for client in self.clients.values_mut().filter(|c| c.authenticated) {
            if !client.send_event(event) {
                warn!(client_id = client.id, "client not reading, event dropped");
            }
        }
    }

    pub fn authenticated_count(&self) -> usize {
        self.clients.values().filter(|c| c.authenticated).count()
    }

    /// Drop every client, unregister the listener, and remove the socket file.
    pub fn shutdown(&mut self, loop_handle: &LoopHandle<'static, GazekeysState>) {
        if let Some(token) = self.token.take() {
            loop_handle.remove(token);
        }
        self.clients.clear();
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(path = ?self.socket_path, "failed to remove IPC socket: {}", e);
            }
        }
        info!("IPC server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_pair() -> (IpcClient, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        (IpcClient::new(a, 1, DEFAULT_RATE_LIMIT), b)
    }

    fn frame(payload: &str) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload.as_bytes());
        out
    }

    #[test]
    fn test_take_frames_splits_back_to_back_requests() {
        let (mut client, _peer) = client_pair();
        client.inbox.extend(frame("(:type :ping :id 1)"));
        client.inbox.extend(frame("(:type :text-get :id 2)"));
        let frames = client.take_frames().unwrap();
        assert_eq!(frames, vec!["(:type :ping :id 1)", "(:type :text-get :id 2)"]);
        assert!(client.inbox.is_empty());
    }

    #[test]
    fn test_take_frames_keeps_partial_tail() {
        let (mut client, _peer) = client_pair();
        let full = frame("(:type :ping :id 1)");
        client.inbox.extend_from_slice(&full[..6]);
        assert!(client.take_frames().unwrap().is_empty());
        assert_eq!(client.inbox.len(), 6);
        client.inbox.extend_from_slice(&full[6..]);
        assert_eq!(client.take_frames().unwrap().len(), 1);
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let (mut client, _peer) = client_pair();
        client.inbox.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_be_bytes());
        let err = client.take_frames().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(client.inbox.is_empty());
    }

    #[test]
    fn test_fill_inbox_reads_socket_and_reports_eof() {
        let (mut client, mut peer) = client_pair();
        peer.write_all(&frame("(:type :status :id 3)")).unwrap();
        client.fill_inbox().unwrap();
        assert_eq!(client.take_frames().unwrap(), vec!["(:type :status :id 3)"]);

        // Nothing pending is not an error.
        client.fill_inbox().unwrap();

        drop(peer);
        let err = client.fill_inbox().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_send_and_drain() {
        let (mut client, mut peer) = client_pair();
        client.send("(:ok)");
        client.drain_outbox().unwrap();
        assert!(client.outbox.is_empty());
        let mut buf = [0u8; 9];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..4], &5u32.to_be_bytes());
        assert_eq!(&buf[4..], b"(:ok)");
    }

    #[test]
    fn test_events_shed_when_client_lags() {
        let (mut client, _peer) = client_pair();
        assert!(client.send_event(&"x".repeat(MAX_QUEUED_BYTES)));
        let queued = client.outbox.len();
        assert!(!client.send_event("(:type :event :event :cursor)"));
        assert_eq!(client.outbox.len(), queued);

        // Responses still go out.
        client.send("(:type :response :id 1 :status :ok)");
        assert!(client.outbox.len() > queued);
    }

    #[test]
    fn test_broadcast_skips_unauthenticated() {
        let mut server = IpcServer::new(PathBuf::from("/nonexistent.sock"));
        let (a, _pa) = UnixStream::pair().unwrap();
        let (b, _pb) = UnixStream::pair().unwrap();
        let a_id = server.add_client(a);
        let b_id = server.add_client(b);
        server.clients.get_mut(&a_id).unwrap().authenticated = true;

        server.broadcast("(:type :event :event :text-changed :text \"A\")");
        assert!(!server.clients[&a_id].outbox.is_empty());
        assert!(server.clients[&b_id].outbox.is_empty());
        assert_eq!(server.authenticated_count(), 1);
    }

    #[test]
    fn test_budget_refills_after_window() {
        let start = Instant::now();
        let mut budget = RequestBudget::new(3, start);
        assert!(budget.admit(start));
        assert!(budget.admit(start));
        assert!(budget.admit(start + Duration::from_millis(500)));
        assert!(!budget.admit(start + Duration::from_millis(999)));
        assert!(budget.admit(start + Duration::from_secs(1)));
    }

    #[test]
    fn test_clients_inherit_server_rate_limit() {
        let mut server = IpcServer::new(PathBuf::from("/nonexistent.sock"));
        server.rate_limit = 1;
        let (a, _pa) = UnixStream::pair().unwrap();
        let id = server.add_client(a);
        let now = Instant::now();
        let client = server.clients.get_mut(&id).unwrap();
        assert!(client.budget.admit(now));
        assert!(!client.budget.admit(now));
    }

    #[test]
    fn test_default_socket_path_name() {
        assert!(IpcServer::default_socket_path().ends_with("gazekeys.sock"));
    }
}
