//! # Session Process Adapter
//!
//! A [`Session`] owns one pseudo-terminal pair and the interactive subprocess attached
//! to its secondary end. The subprocess runs as its own session and process-group
//! leader, so terminal signals aimed at the gateway never reach it.
//!
//! The primary end is exposed to the relay as a [`PtyPort`]: a pair of channels
//! served by one blocking reader thread and one blocking writer thread. Closing the
//! session signals the child's whole process group, so nothing it forked keeps the
//! secondary end open, and the reader sees end-of-stream.
//!
//! ## Lifecycle
//!
//! 1. [`Session::open`] allocates the pty, spawns the command and drops the
//!    adapter's copy of the secondary descriptor ([`Session::spawn`] does the same
//!    from async code without holding a runtime worker)
//! 2. The relay takes the [`PtyPort`] and runs until either side ends
//! 3. [`Session::close`] runs exactly once, however many times it is called;
//!    `Drop` covers the paths that never called it, so every exit path releases the
//!    pty and the child

use std::future::Future;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use super::{GatewayError, TransportKind};
use crate::config::{Config, ENCODING_ENV};
use crate::logutil::escape_bytes;
use crate::metrics;

/// Chunk size for pty reads.
const READ_CHUNK: usize = 1024;
/// Chunks buffered per direction before the producer waits.
const PORT_DEPTH: usize = 64;

/// What to spawn for each connection.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

impl SpawnSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let (program, args) = config.session.command_line()?;
        let env = vec![
            ("TERM".to_string(), config.session.term.clone()),
            (
                ENCODING_ENV.to_string(),
                config.terminal.encoding().label().to_string(),
            ),
        ];
        Ok(Self {
            program,
            args,
            cwd: config.session.cwd.as_ref().map(PathBuf::from),
            env,
            cols: config.session.cols,
            rows: config.session.rows,
        })
    }
}

/// The relay's view of a pty primary: output chunks from the subprocess, and a
/// sender for input bytes to it. `output` yields `None` once the subprocess side
/// has hung up.
pub struct PtyPort {
    pub output: mpsc::Receiver<Vec<u8>>,
    pub input: mpsc::Sender<Vec<u8>>,
}

impl PtyPort {
    /// A port backed by plain channels, for driving the relay without a real pty.
    /// Returns the port plus the far ends: a sender feeding `output` and a receiver
    /// draining `input`.
    pub fn channel() -> (Self, mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        let (out_tx, out_rx) = mpsc::channel(PORT_DEPTH);
        let (in_tx, in_rx) = mpsc::channel(PORT_DEPTH);
        (
            Self {
                output: out_rx,
                input: in_tx,
            },
            out_tx,
            in_rx,
        )
    }
}

/// Something the relay can attach to: a pty port plus a one-shot teardown.
pub trait Terminal: Send {
    /// Hand the port to the relay. Subsequent calls return `None`.
    fn take_port(&mut self) -> Option<PtyPort>;

    /// Release the subprocess and descriptors. Must be idempotent.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

type ChildBox = Box<dyn Child + Send + Sync>;

pub struct Session {
    kind: TransportKind,
    label: String,
    master: Option<Box<dyn MasterPty + Send>>,
    child: Option<ChildBox>,
    port: Option<PtyPort>,
    closed: bool,
}

impl Session {
    /// Allocate a pty pair and spawn `spec` on its secondary end.
    ///
    /// Blocks while the pty is allocated and the child forked; async callers go
    /// through [`Session::spawn`].
    pub fn open(
        spec: &SpawnSpec,
        kind: TransportKind,
        label: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let label = label.into();
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| GatewayError::Pty(format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| GatewayError::Pty(format!("spawn {} failed: {e}", spec.program.display())))?;
        // Only the child keeps the secondary end open from here on.
        drop(pair.slave);

        let port = match attach_port(&*pair.master, &label) {
            Ok(port) => port,
            Err(e) => {
                terminate(&label, child);
                return Err(e);
            }
        };

        info!(
            "{} session {} started: {} (pid {:?})",
            kind,
            label,
            spec.program.display(),
            child.process_id()
        );
        metrics::session_opened(kind);

        Ok(Self {
            kind,
            label,
            master: Some(pair.master),
            child: Some(child),
            port: Some(port),
            closed: false,
        })
    }

    /// [`Session::open`] on the blocking pool.
    pub async fn spawn(
        spec: Arc<SpawnSpec>,
        kind: TransportKind,
        label: String,
    ) -> Result<Self, GatewayError> {
        tokio::task::spawn_blocking(move || Session::open(&spec, kind, label))
            .await
            .map_err(|e| GatewayError::Pty(format!("spawn task: {e}")))?
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|child| child.process_id())
    }

    pub fn is_alive(&mut self) -> bool {
        !self.closed
            && self
                .child
                .as_mut()
                .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Terminate the subprocess group if alive and close the primary descriptor.
    /// The kill and reap run on the blocking pool.
    pub async fn close(&mut self) {
        let Some(child) = self.release() else {
            return;
        };
        let (kind, label) = (self.kind, self.label.clone());
        if let Err(e) = tokio::task::spawn_blocking(move || reap(kind, &label, child)).await {
            warn!("session {} teardown task failed: {}", self.label, e);
        }
    }

    /// First call marks the session closed and hands back the child to reap.
    fn release(&mut self) -> Option<ChildBox> {
        if self.closed {
            return None;
        }
        self.closed = true;
        self.port = None;
        self.master = None;
        self.child.take()
    }
}

impl Terminal for Session {
    fn take_port(&mut self) -> Option<PtyPort> {
        self.port.take()
    }

    async fn close(&mut self) {
        Session::close(self).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(child) = self.release() else {
            return;
        };
        let (kind, label) = (self.kind, self.label.clone());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || reap(kind, &label, child));
            }
            Err(_) => reap(kind, &label, child),
        }
    }
}

fn reap(kind: TransportKind, label: &str, child: ChildBox) {
    terminate(label, child);
    metrics::session_closed();
    info!("{} session {} closed", kind, label);
}

/// Kill and wait for the child, then sweep its process group. Blocking.
fn terminate(label: &str, mut child: ChildBox) {
    let group = child.process_id();
    match child.try_wait() {
        Ok(Some(status)) => debug!("session {} child already exited: {:?}", label, status),
        _ => {
            signal_group(group, GroupSignal::Hangup);
            if let Err(e) = child.kill() {
                warn!("session {} kill failed: {}", label, e);
            }
            let _ = child.wait();
        }
    }
    // The child leads its own process group; anything it forked is still in there.
    signal_group(group, GroupSignal::Kill);
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Hangup,
    Kill,
}

#[cfg(unix)]
fn signal_group(group: Option<u32>, signal: GroupSignal) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = group.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    let signal = match signal {
        GroupSignal::Hangup => Signal::SIGHUP,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!("killpg {} {:?}: {}", pgid, signal, e),
    }
}

#[cfg(not(unix))]
fn signal_group(_group: Option<u32>, _signal: GroupSignal) {}

fn attach_port(master: &dyn MasterPty, label: &str) -> Result<PtyPort, GatewayError> {
    let reader = master
        .try_clone_reader()
        .map_err(|e| GatewayError::Pty(format!("pty reader: {e}")))?;
    let writer = master
        .take_writer()
        .map_err(|e| GatewayError::Pty(format!("pty writer: {e}")))?;
    spawn_port_threads(label, reader, writer)
}

fn spawn_port_threads(
    label: &str,
    mut reader: Box<dyn Read + Send>,
    mut writer: Box<dyn Write + Send>,
) -> Result<PtyPort, GatewayError> {
    let (port, out_tx, mut in_rx) = PtyPort::channel();

    let name = label.to_string();
    std::thread::Builder::new()
        .name(format!("pty-read-{label}"))
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        log::trace!("pty {} -> {}", name, escape_bytes(&buf[..n]));
                        if out_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    // EIO once the secondary end is gone
                    Err(_) => break,
                }
            }
            debug!("pty reader {} finished", name);
        })?;

    std::thread::Builder::new()
        .name(format!("pty-write-{label}"))
        .spawn(move || {
            while let Some(chunk) = in_rx.blocking_recv() {
                if writer.write_all(&chunk).and_then(|_| writer.flush()).is_err() {
                    break;
                }
            }
        })?;

    Ok(port)
}
