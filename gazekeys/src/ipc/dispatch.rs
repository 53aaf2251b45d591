//! IPC message dispatch: parse s-expressions and route to handlers.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use lexpr::Value;
use tracing::{debug, warn};

use crate::gaze::{NormalizedPoint, SurfaceInset, Viewport};
use crate::keyboard::{DwellConfig, KeyId, KeyRegion, KeyValue, LayoutPreset, RefirePolicy};
use crate::state::GazekeysState;

/// Parse an s-expression message and dispatch to the appropriate handler.
/// Returns an optional response string (s-expression).
pub fn handle_message(state: &mut GazekeysState, client_id: u64, raw: &str) -> Option<String> {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(client_id, "malformed s-expression: {}", e);
            return Some(error_response(0, &format!("malformed s-expression: {e}")));
        }
    };

    let msg_type = get_keyword(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);

    // hello must be first message
    let is_authenticated = state
        .ipc_server
        .clients
        .get(&client_id)
        .map(|c| c.authenticated)
        .unwrap_or(false);

    match msg_type.as_deref() {
        Some("hello") => handle_hello(state, client_id, msg_id, &value),
        _ if !is_authenticated => Some(error_response(msg_id, "hello handshake required")),
        Some("ping") => handle_ping(msg_id, &value),
        Some("status") => handle_status(state, msg_id),
        // Geometry
        Some("viewport-set") => handle_viewport_set(state, msg_id, &value),
        Some("inset-set") => handle_inset_set(state, msg_id, &value),
        // Layout
        Some("key-set") => handle_key_set(state, msg_id, &value),
        Some("key-remove") => handle_key_remove(state, msg_id, &value),
        Some("layout-clear") => handle_layout_clear(state, msg_id),
        Some("layout-preset") => handle_layout_preset(state, msg_id, &value),
        // Input
        Some("pointer-enter") => handle_pointer(state, msg_id, &value, true),
        Some("pointer-leave") => handle_pointer(state, msg_id, &value, false),
        Some("gaze-inject") => handle_gaze_inject(state, msg_id, &value),
        // Text
        Some("text-get") => handle_text_get(state, msg_id),
        Some("text-reset") => handle_text_reset(state, msg_id),
        // Dwell
        Some("dwell-config") => handle_dwell_config(state, msg_id),
        Some("dwell-set") => handle_dwell_set(state, msg_id, &value),
        Some("source-health") => handle_source_health(state, msg_id),
        Some(other) => {
            debug!(client_id, msg_type = other, "unknown message type");
            Some(error_response(msg_id, &format!("unknown message type: {other}")))
        }
        None => Some(error_response(msg_id, "missing :type")),
    }
}

// ── Handlers ────────────────────────────────────────────────

fn handle_hello(
    state: &mut GazekeysState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let version = get_int(value, "version").unwrap_or(0);
    if version != 1 {
        return Some(error_response(
            msg_id,
            &format!("unsupported protocol version: {version}"),
        ));
    }

    // SO_PEERCRED: only the daemon's own user may drive it.
    let peer = state.ipc_server.clients.get(&client_id).and_then(|c| c.peer);
    if let Some(peer) = peer {
        let our_uid = unsafe { libc::getuid() };
        if peer.uid != our_uid {
            warn!(client_id, peer_uid = peer.uid, our_uid, "rejecting client: UID mismatch");
            return Some(error_response(msg_id, "authentication failed: UID mismatch"));
        }
    }

    let client_name = get_string(value, "client").unwrap_or_default();
    debug!(client_id, client_name, "hello handshake (authenticated)");

    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
        client.authenticated = true;
    }

    let pid_field = peer
        .map(|p| format!(" :peer-pid {}", p.pid))
        .unwrap_or_default();
    Some(format!(
        "(:type :hello :id {} :version 1 :server \"gazekeys\" :features (:layout {} :keys {}){})",
        msg_id,
        state
            .keyboard
            .preset()
            .map(|p| p.as_str())
            .unwrap_or("custom"),
        state.keyboard.board().len(),
        pid_field
    ))
}

fn handle_ping(msg_id: i64, value: &Value) -> Option<String> {
    let client_ts = get_int(value, "timestamp").unwrap_or(0);
    let server_ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    Some(format!(
        "(:type :response :id {} :status :ok :client-timestamp {} :server-timestamp {})",
        msg_id, client_ts, server_ts
    ))
}

fn handle_status(state: &mut GazekeysState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :keyboard {} :feed (:url \"{}\" :connected {} :stale {}) :ipc-clients {} :uptime-s {})",
        msg_id,
        state.keyboard.status_sexp(),
        escape_string(state.feed.url()),
        if state.feed.is_connected() { "t" } else { "nil" },
        if state.feed_is_stale(Instant::now()) { "t" } else { "nil" },
        state.ipc_server.authenticated_count(),
        state.uptime().as_secs(),
    ))
}

fn handle_viewport_set(state: &mut GazekeysState, msg_id: i64, value: &Value) -> Option<String> {
    let (Some(width), Some(height)) = (get_float(value, "width"), get_float(value, "height")) else {
        return Some(error_response(msg_id, "missing :width or :height"));
    };
    match state.keyboard.set_viewport(Viewport::new(width, height)) {
        Ok(events) => {
            state.emit(events);
            Some(ok_response(msg_id))
        }
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

fn handle_inset_set(state: &mut GazekeysState, msg_id: i64, value: &Value) -> Option<String> {
    let current = state.keyboard.mapper().inset;
    let inset = SurfaceInset {
        left: get_float(value, "left").unwrap_or(current.left),
        top: get_float(value, "top").unwrap_or(current.top),
        right: get_float(value, "right").unwrap_or(current.right),
        bottom: get_float(value, "bottom").unwrap_or(current.bottom),
    };
    match state.keyboard.set_inset(inset) {
        Ok(events) => {
            state.emit(events);
            Some(ok_response(msg_id))
        }
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

fn handle_key_set(state: &mut GazekeysState, msg_id: i64, value: &Value) -> Option<String> {
    let key = match get_key_id(value) {
        Ok(k) => k,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    let Some(raw_value) = get_string(value, "value") else {
        return Some(error_response(msg_id, "missing :value"));
    };
    let Some(key_value) = KeyValue::parse(&raw_value) else {
        return Some(error_response(msg_id, &format!("invalid key value: {raw_value}")));
    };

    let edges = [
        get_float(value, "left"),
        get_float(value, "top"),
        get_float(value, "right"),
        get_float(value, "bottom"),
    ];
    let region = match edges {
        [Some(left), Some(top), Some(right), Some(bottom)] => {
            Some(KeyRegion::new(left, top, right, bottom))
        }
        [None, None, None, None] => None,
        _ => {
            return Some(error_response(
                msg_id,
                "region needs all of :left :top :right :bottom",
            ))
        }
    };

    let events = state.keyboard.set_key(key, key_value, region);
    state.emit(events);
    Some(ok_response(msg_id))
}

fn handle_key_remove(state: &mut GazekeysState, msg_id: i64, value: &Value) -> Option<String> {
    let key = match get_key_id(value) {
        Ok(k) => k,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    match state.keyboard.remove_key(key) {
        Ok(events) => {
            state.emit(events);
            Some(ok_response(msg_id))
        }
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

fn handle_layout_clear(state: &mut GazekeysState, msg_id: i64) -> Option<String> {
    let events = state.keyboard.clear_layout();
    state.emit(events);
    Some(ok_response(msg_id))
}

fn handle_layout_preset(state: &mut GazekeysState, msg_id: i64, value: &Value) -> Option<String> {
    let name = get_keyword(value, "name").unwrap_or_default();
    let Some(preset) = LayoutPreset::from_str(&name) else {
        return Some(error_response(msg_id, &format!("unknown layout: {name}")));
    };
    let events = state.keyboard.load_preset(preset);
    state.emit(events);
    Some(format!(
        "(:type :response :id {} :status :ok :layout {} :keys {})",
        msg_id,
        preset.as_str(),
        state.keyboard.board().len()
    ))
}

fn handle_pointer(state: &mut GazekeysState, msg_id: i64, value: &Value, inside: bool) -> Option<String> {
    let key = match get_key_id(value) {
        Ok(k) => k,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    let result = if inside {
        state.keyboard.pointer_enter(key)
    } else {
        state.keyboard.pointer_leave(key)
    };
    match result {
        Ok(events) => {
            state.emit(events);
            Some(ok_response(msg_id))
        }
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

fn handle_gaze_inject(state: &mut GazekeysState, msg_id: i64, value: &Value) -> Option<String> {
    let (Some(x), Some(y)) = (get_float(value, "x"), get_float(value, "y")) else {
        return Some(error_response(msg_id, "missing :x or :y"));
    };
    let events = state
        .keyboard
        .offer_sample(NormalizedPoint::new(x, y), Instant::now());
    if events.is_empty() {
        return Some(error_response(msg_id, "sample rejected"));
    }
    let cursor = state.keyboard.cursor();
    let under = state
        .keyboard
        .board()
        .key_at(cursor)
        .map(|k| k.to_string())
        .unwrap_or_else(|| "nil".to_string());
    state.emit(events);
    Some(format!(
        "(:type :response :id {} :status :ok :cursor ({:.0} {:.0}) :key {})",
        msg_id, cursor.x, cursor.y, under
    ))
}

fn handle_text_get(state: &mut GazekeysState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :text \"{}\")",
        msg_id,
        escape_string(state.keyboard.text())
    ))
}

fn handle_text_reset(state: &mut GazekeysState, msg_id: i64) -> Option<String> {
    let events = state.keyboard.reset_text();
    state.emit(events);
    Some(ok_response(msg_id))
}

fn dwell_sexp(config: &DwellConfig) -> String {
    format!(
        "(:tick-ms {} :step {} :refire {} :ticks-to-fire {} :dwell-ms {})",
        config.tick_ms,
        config.step,
        config.refire.as_str(),
        config.ticks_to_fire(),
        config.dwell_duration().as_millis()
    )
}

fn handle_dwell_config(state: &mut GazekeysState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :dwell {})",
        msg_id,
        dwell_sexp(state.keyboard.dwell_config())
    ))
}

fn handle_dwell_set(state: &mut GazekeysState, msg_id: i64, value: &Value) -> Option<String> {
    let mut config = *state.keyboard.dwell_config();
    if let Some(tick_ms) = get_int(value, "tick-ms") {
        if tick_ms < 0 {
            return Some(error_response(msg_id, "tick-ms must be positive"));
        }
        config.tick_ms = tick_ms as u64;
    }
    if let Some(step) = get_float(value, "step") {
        config.step = step;
    }
    if let Some(refire) = get_keyword(value, "refire") {
        match RefirePolicy::from_str(&refire) {
            Some(p) => config.refire = p,
            None => return Some(error_response(msg_id, &format!("unknown refire policy: {refire}"))),
        }
    }
    match state.keyboard.set_dwell_config(config) {
        Ok(()) => {
            state.config.dwell = config;
            Some(format!(
                "(:type :response :id {} :status :ok :dwell {})",
                msg_id,
                dwell_sexp(&config)
            ))
        }
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

fn handle_source_health(state: &mut GazekeysState, msg_id: i64) -> Option<String> {
    let now = Instant::now();
    Some(format!(
        "(:type :response :id {} :status :ok :health {} :stale {})",
        msg_id,
        state.keyboard.source().health.status_sexp(now),
        if state.feed_is_stale(now) { "t" } else { "nil" },
    ))
}

// ── Helpers ─────────────────────────────────────────────────

fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}

/// Escape a string for s-expression output.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Extract a keyword value from an s-expression plist.
/// Walks cons pairs directly to find `:key` followed by its value.
/// Handles both `Value::Keyword("key")` (elisp parser) and
/// `Value::Symbol(":key")` (default parser) forms.
fn get_keyword(value: &Value, key: &str) -> Option<String> {
    let prefixed = format!(":{}", key);
    let mut current = value;
    while let Value::Cons(pair) = current {
        let car = pair.car();
        let is_key = match car {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if is_key {
            if let Value::Cons(next) = pair.cdr() {
                let val = next.car();
                return match val {
                    Value::Keyword(v) => Some(v.to_string()),
                    Value::Symbol(v) => {
                        let s = v.to_string();
                        Some(s.strip_prefix(':').unwrap_or(&s).to_string())
                    }
                    Value::String(v) => Some(v.to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(if *b { "t" } else { "nil" }.to_string()),
                    Value::Null => Some("nil".to_string()),
                    _ => Some(val.to_string()),
                };
            }
            return None;
        }
        current = pair.cdr();
    }
    None
}

/// Extract an integer value from an s-expression plist.
fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a string value from an s-expression plist.
fn get_string(value: &Value, key: &str) -> Option<String> {
    get_keyword(value, key)
}

/// Extract a floating-point value from an s-expression plist.
fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract `:key` as a [`KeyId`].
fn get_key_id(value: &Value) -> Result<KeyId, String> {
    let raw = get_int(value, "key").ok_or_else(|| "missing :key".to_string())?;
    u32::try_from(raw)
        .map(KeyId)
        .map_err(|_| format!("key id out of range: {raw}"))
}

/// Format an IPC event s-expression.
pub fn format_event(event_type: &str, fields: &[(&str, &str)]) -> String {
    let mut s = format!("(:type :event :event :{}", event_type);
    for (key, val) in fields {
        s.push_str(&format!(" :{} {}", key, val));
    }
    s.push(')');
    s
}
