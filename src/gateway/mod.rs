//! # Transport Gateway
//!
//! Bridges remote users to one interactive subprocess per connection. Three transports
//! feed the same pipeline:
//!
//! - [`modem`] - AT command handshake on a serial line (RING, answer, CONNECT, hang-up)
//! - [`telnet`] - raw TCP, no option negotiation
//! - [`websocket`] - browser sessions keyed by a per-connection session id
//!
//! Every accepted connection gets a [`session::Session`] (a pty plus subprocess) and a
//! [`relay::bridge`] that copies bytes both ways until either side ends.
//!
//! A failing transport never takes the others down: each runs on its own task and its
//! startup or runtime error is logged and confined to it.

pub mod modem;
pub mod relay;
pub mod session;
pub mod telnet;
pub mod websocket;

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::metrics;
use session::SpawnSpec;

/// Which transport a session arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Modem,
    Telnet,
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Modem => "modem",
            TransportKind::Telnet => "telnet",
            TransportKind::WebSocket => "websocket",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("serial error: {0}")]
    Serial(String),

    #[error("no CONNECT within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("all {0} session slots are in use")]
    SessionLimit(usize),
}

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Await `accept` until it yields a connection. Failures (descriptor exhaustion,
/// a peer that reset before being accepted) are logged and retried, so they never
/// end the listener.
pub(crate) async fn accept_retrying<T, F, Fut>(kind: TransportKind, mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!("{} accept failed: {}; retrying", kind, e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Owns the configuration and runs every enabled transport until Ctrl-C.
pub struct Gateway {
    config: Config,
    spawn: Arc<SpawnSpec>,
}

impl Gateway {
    pub fn new(mut config: Config) -> anyhow::Result<Self> {
        config.terminal.resolve();
        let spawn = SpawnSpec::from_config(&config)?;
        Ok(Self {
            config,
            spawn: Arc::new(spawn),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn spawn_spec(&self) -> &SpawnSpec {
        &self.spawn
    }

    /// Turn a transport off regardless of its configuration.
    pub fn disable(&mut self, kind: TransportKind) {
        match kind {
            TransportKind::Modem => self.config.modem.enabled = false,
            TransportKind::Telnet => self.config.telnet.enabled = false,
            TransportKind::WebSocket => self.config.websocket.enabled = false,
        }
    }

    /// Override the configured serial device.
    pub fn set_modem_port(&mut self, port: impl Into<String>) {
        self.config.modem.port = port.into();
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let mut transports: JoinSet<(TransportKind, Result<(), GatewayError>)> = JoinSet::new();

        if self.config.modem.enabled {
            let modem = self.config.modem.clone();
            let spawn = self.spawn.clone();
            transports.spawn(async move { (TransportKind::Modem, run_modem(modem, spawn).await) });
        }
        if self.config.telnet.enabled {
            let bind = self.config.telnet.bind.clone();
            let spawn = self.spawn.clone();
            transports.spawn(async move {
                let result = match telnet::TelnetAcceptor::bind(&bind, spawn).await {
                    Ok(acceptor) => acceptor.serve().await,
                    Err(e) => Err(e),
                };
                (TransportKind::Telnet, result)
            });
        }
        if self.config.websocket.enabled {
            let ws = self.config.websocket.clone();
            let ctx = self.config.terminal.context();
            let spawn = self.spawn.clone();
            transports.spawn(async move {
                let result = match websocket::WebSocketRegistrar::bind(&ws, spawn, ctx).await {
                    Ok(registrar) => registrar.serve().await,
                    Err(e) => Err(e),
                };
                (TransportKind::WebSocket, result)
            });
        }

        if transports.is_empty() {
            warn!("No transports enabled; nothing to do");
            return Ok(());
        }
        info!(
            "Gateway running ({} transport{}), encoding {}",
            transports.len(),
            if transports.len() == 1 { "" } else { "s" },
            self.config.terminal.encoding().label()
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    transports.abort_all();
                    break;
                }
                joined = transports.join_next() => match joined {
                    Some(Ok((kind, Ok(())))) => info!("{} transport stopped", kind),
                    Some(Ok((kind, Err(e)))) => error!("{} transport failed: {}", kind, e),
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => error!("transport task panicked: {}", e),
                    None => {
                        warn!("All transports have stopped");
                        break;
                    }
                },
            }
        }

        let stats = metrics::snapshot();
        info!(
            "Sessions opened: {} (modem {}, telnet {}, websocket {}), closed: {}; bytes in {}, out {}; calls answered {}, failed {}",
            stats.sessions_opened(),
            stats.modem_sessions,
            stats.telnet_sessions,
            stats.websocket_sessions,
            stats.sessions_closed,
            stats.bytes_in,
            stats.bytes_out,
            stats.calls_answered,
            stats.calls_failed
        );
        Ok(())
    }
}

#[cfg(feature = "serial")]
async fn run_modem(
    config: crate::config::ModemConfig,
    spawn: Arc<SpawnSpec>,
) -> Result<(), GatewayError> {
    let mut modem = modem::Modem::open(&config).await?;
    modem.initialize().await?;
    modem.serve_forever(spawn).await
}

#[cfg(not(feature = "serial"))]
async fn run_modem(
    config: crate::config::ModemConfig,
    _spawn: Arc<SpawnSpec>,
) -> Result<(), GatewayError> {
    Err(GatewayError::Serial(format!(
        "cannot open {}: built without the 'serial' feature",
        config.port
    )))
}
