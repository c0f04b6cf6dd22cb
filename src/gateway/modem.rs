//! # Modem Handshake
//!
//! Drives a Hayes-compatible modem through one call at a time:
//!
//! ```text
//! Idle --RING--> RingDetected --ATA--> AwaitingConnect --CONNECT--> Connected
//!                                           |                          |
//!                                  timeout / NO CARRIER          relay ends
//!                                       (ATH) |                          |
//!                                             v                          v
//!                                           Idle <----- ATH ------ HangingUp (+++)
//! ```
//!
//! The serial device is read by a dedicated pump thread into a channel for the whole
//! life of the [`Modem`]; control responses and call data share that stream, so bytes
//! are split into lines before any token matching. Writes go through a shared handle
//! on the blocking pool.

use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use super::relay::{bridge, ChunkSink, LineSplitter, RelayEnd, RelayOptions};
use super::session::{Session, SpawnSpec, Terminal};
use super::{GatewayError, TransportKind};
use crate::config::ModemConfig;
use crate::logutil::escape_log;
use crate::metrics;

pub const RING: &str = "RING";
pub const CONNECT: &str = "CONNECT";
pub const NO_CARRIER: &str = "NO CARRIER";

/// Shared, blocking serial writer.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemState {
    Idle,
    RingDetected,
    AwaitingConnect,
    Connected,
    HangingUp,
}

async fn write_blocking(writer: &SharedWriter, bytes: Vec<u8>) -> io::Result<()> {
    let writer = writer.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "serial writer poisoned"))?;
        guard.write_all(&bytes)?;
        guard.flush()
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

/// Relay sink writing call data to the serial line.
pub struct SerialSink {
    writer: SharedWriter,
}

impl SerialSink {
    pub fn new(writer: SharedWriter) -> Self {
        Self { writer }
    }
}

impl ChunkSink for SerialSink {
    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        write_blocking(&self.writer, chunk.to_vec()).await
    }
}

pub struct Modem {
    config: ModemConfig,
    connect_timeout: Duration,
    rx: mpsc::Receiver<Vec<u8>>,
    writer: SharedWriter,
    lines: LineSplitter,
    pending: VecDeque<String>,
    state: ModemState,
}

impl Modem {
    /// Build a modem over an already-open byte stream: `rx` yields whatever the device
    /// sends, `writer` receives commands and call data.
    pub fn with_io(
        config: ModemConfig,
        rx: mpsc::Receiver<Vec<u8>>,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        let connect_timeout = config.connect_timeout();
        Self {
            config,
            connect_timeout,
            rx,
            writer: Arc::new(Mutex::new(writer)),
            lines: LineSplitter::new(),
            pending: VecDeque::new(),
            state: ModemState::Idle,
        }
    }

    /// Open the configured serial device and start its read pump.
    #[cfg(feature = "serial")]
    pub async fn open(config: &ModemConfig) -> Result<Self, GatewayError> {
        info!(
            "Opening modem on {} at {} baud",
            config.port, config.baud_rate
        );
        let mut builder =
            serialport::new(&config.port, config.baud_rate).timeout(Duration::from_millis(500));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| GatewayError::Serial(format!("failed to open {}: {}", config.port, e)))?;
        let _ = port.write_data_terminal_ready(true);
        let reader = port
            .try_clone()
            .map_err(|e| GatewayError::Serial(format!("failed to clone {}: {}", config.port, e)))?;

        let (tx, rx) = mpsc::channel(64);
        spawn_serial_pump(&config.port, reader, tx)?;
        Ok(Self::with_io(config.clone(), rx, Box::new(port)))
    }

    /// Override the CONNECT wait from configuration.
    pub fn set_connect_timeout(&mut self, limit: Duration) {
        self.connect_timeout = limit;
    }

    pub fn state(&self) -> ModemState {
        self.state
    }

    fn transition(&mut self, next: ModemState) {
        if self.state != next {
            debug!("modem {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<(), GatewayError> {
        write_blocking(&self.writer, bytes.to_vec())
            .await
            .map_err(|e| GatewayError::Serial(format!("write failed: {e}")))
    }

    /// Send one AT command terminated by CR.
    pub async fn command(&self, cmd: &str) -> Result<(), GatewayError> {
        debug!("modem <- {}", escape_log(cmd));
        let mut line = cmd.as_bytes().to_vec();
        line.push(b'\r');
        self.write_raw(&line).await
    }

    /// Next complete line from the device.
    async fn next_line(&mut self) -> Result<String, GatewayError> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                debug!("modem -> {}", escape_log(&line));
                return Ok(line);
            }
            match self.rx.recv().await {
                Some(chunk) => self.pending.extend(self.lines.push(&chunk)),
                None => return Err(GatewayError::Serial("serial device closed".to_string())),
            }
        }
    }

    fn forget_input(&mut self) {
        self.pending.clear();
        self.lines.clear();
    }

    /// Send the configured init string.
    pub async fn initialize(&mut self) -> Result<(), GatewayError> {
        for cmd in self.config.init_commands.clone() {
            self.command(&cmd).await?;
            sleep(Duration::from_millis(100)).await;
        }
        self.transition(ModemState::Idle);
        info!("Modem initialized, waiting for calls");
        Ok(())
    }

    /// Wait until a line containing `RING` arrives. Everything else is ignored.
    pub async fn wait_ring(&mut self) -> Result<(), GatewayError> {
        loop {
            let line = self.next_line().await?;
            if line.to_ascii_uppercase().contains(RING) {
                self.transition(ModemState::RingDetected);
                info!("Incoming call");
                return Ok(());
            }
        }
    }

    /// Answer a ringing line and wait for `CONNECT`.
    ///
    /// On timeout (or an early `NO CARRIER`) the hang-up command is written once and
    /// the modem returns to Idle.
    pub async fn answer(&mut self) -> Result<String, GatewayError> {
        self.command(&self.config.answer_command.clone()).await?;
        self.transition(ModemState::AwaitingConnect);

        let limit = self.connect_timeout;
        let outcome = timeout(limit, async {
            loop {
                let line = match self.next_line().await {
                    Ok(line) => line,
                    Err(e) => return Err(e),
                };
                let upper = line.to_ascii_uppercase();
                if upper.contains(NO_CARRIER) {
                    return Ok(None);
                }
                if upper.contains(CONNECT) {
                    return Ok(Some(line));
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(Some(line))) => {
                self.forget_input();
                self.transition(ModemState::Connected);
                metrics::inc_calls_answered();
                info!("Call connected: {}", escape_log(&line));
                Ok(line)
            }
            Ok(Err(e)) => {
                self.transition(ModemState::Idle);
                metrics::inc_calls_failed();
                Err(e)
            }
            Ok(Ok(None)) | Err(_) => {
                warn!("No CONNECT within {:?}, hanging up", limit);
                metrics::inc_calls_failed();
                self.command(&self.config.hangup_command.clone()).await?;
                self.forget_input();
                self.transition(ModemState::Idle);
                Err(GatewayError::HandshakeTimeout(limit))
            }
        }
    }

    /// Escape to command mode and hang up: silence, guard, silence, hang-up command.
    pub async fn hang_up(&mut self) -> Result<(), GatewayError> {
        self.transition(ModemState::HangingUp);
        sleep(Duration::from_millis(self.config.guard_before_ms)).await;
        self.write_raw(self.config.guard.as_bytes()).await?;
        sleep(Duration::from_millis(self.config.guard_after_ms)).await;
        self.command(&self.config.hangup_command.clone()).await?;
        sleep(Duration::from_millis(self.config.hangup_settle_ms)).await;
        self.forget_input();
        self.transition(ModemState::Idle);
        info!("Line hung up");
        Ok(())
    }

    /// Take one call from RING to hang-up. `open` creates the terminal once the
    /// line is connected.
    pub async fn serve_call<T, F, Fut>(&mut self, open: F) -> Result<RelayEnd, GatewayError>
    where
        T: Terminal,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.wait_ring().await?;
        self.answer().await?;

        let mut terminal = match open().await {
            Ok(terminal) => terminal,
            Err(e) => {
                self.hang_up().await?;
                return Err(e);
            }
        };
        let mut sink = SerialSink::new(self.writer.clone());
        let end = bridge(
            &mut self.rx,
            &mut sink,
            &mut terminal,
            RelayOptions::modem(NO_CARRIER),
        )
        .await;
        info!("Call ended: {:?}", end);
        self.hang_up().await?;
        Ok(end)
    }

    /// Serve calls until the serial device fails.
    pub async fn serve_forever(&mut self, spawn: Arc<SpawnSpec>) -> Result<(), GatewayError> {
        let mut call = 0u64;
        loop {
            call += 1;
            let label = format!("call-{call}");
            match self
                .serve_call(|| Session::spawn(spawn.clone(), TransportKind::Modem, label))
                .await
            {
                Ok(_) => {}
                Err(GatewayError::HandshakeTimeout(_)) => {}
                Err(e @ GatewayError::Serial(_)) => return Err(e),
                Err(e) => warn!("Call failed: {}", e),
            }
        }
    }
}

#[cfg(feature = "serial")]
fn spawn_serial_pump(
    name: &str,
    mut reader: Box<dyn serialport::SerialPort>,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), GatewayError> {
    use std::io::Read;
    let name = name.to_string();
    std::thread::Builder::new()
        .name("modem-read".to_string())
        .spawn(move || {
            let mut buf = [0u8; 1024];
            while !tx.is_closed() {
                match reader.read(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("serial read on {} failed: {}", name, e);
                        break;
                    }
                }
            }
            debug!("serial pump for {} finished", name);
        })?;
    Ok(())
}
