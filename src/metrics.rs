//! Process-wide gateway counters.
//! Cheap atomics bumped from the transports and relay loops; read by `snapshot()`.
use std::sync::atomic::{AtomicU64, Ordering};

use crate::gateway::TransportKind;

static MODEM_SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static TELNET_SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static WEBSOCKET_SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_CLOSED: AtomicU64 = AtomicU64::new(0);
static BYTES_IN: AtomicU64 = AtomicU64::new(0);
static BYTES_OUT: AtomicU64 = AtomicU64::new(0);
static CALLS_ANSWERED: AtomicU64 = AtomicU64::new(0);
static CALLS_FAILED: AtomicU64 = AtomicU64::new(0);

fn opened_counter(kind: TransportKind) -> &'static AtomicU64 {
    match kind {
        TransportKind::Modem => &MODEM_SESSIONS_OPENED,
        TransportKind::Telnet => &TELNET_SESSIONS_OPENED,
        TransportKind::WebSocket => &WEBSOCKET_SESSIONS_OPENED,
    }
}

pub fn session_opened(kind: TransportKind) {
    opened_counter(kind).fetch_add(1, Ordering::Relaxed);
}

pub fn session_closed() {
    SESSIONS_CLOSED.fetch_add(1, Ordering::Relaxed);
}

/// Bytes forwarded from a transport into a pty.
pub fn add_bytes_in(n: usize) {
    BYTES_IN.fetch_add(n as u64, Ordering::Relaxed);
}

/// Bytes forwarded from a pty out to a transport.
pub fn add_bytes_out(n: usize) {
    BYTES_OUT.fetch_add(n as u64, Ordering::Relaxed);
}

pub fn inc_calls_answered() {
    CALLS_ANSWERED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_calls_failed() {
    CALLS_FAILED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub modem_sessions: u64,
    pub telnet_sessions: u64,
    pub websocket_sessions: u64,
    pub sessions_closed: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub calls_answered: u64,
    pub calls_failed: u64,
}

impl Snapshot {
    pub fn sessions_opened(&self) -> u64 {
        self.modem_sessions + self.telnet_sessions + self.websocket_sessions
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        modem_sessions: MODEM_SESSIONS_OPENED.load(Ordering::Relaxed),
        telnet_sessions: TELNET_SESSIONS_OPENED.load(Ordering::Relaxed),
        websocket_sessions: WEBSOCKET_SESSIONS_OPENED.load(Ordering::Relaxed),
        sessions_closed: SESSIONS_CLOSED.load(Ordering::Relaxed),
        bytes_in: BYTES_IN.load(Ordering::Relaxed),
        bytes_out: BYTES_OUT.load(Ordering::Relaxed),
        calls_answered: CALLS_ANSWERED.load(Ordering::Relaxed),
        calls_failed: CALLS_FAILED.load(Ordering::Relaxed),
    }
}
