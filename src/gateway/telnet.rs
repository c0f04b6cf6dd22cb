//! Raw telnet acceptor.
//!
//! Bytes are relayed in both directions untouched: no option negotiation, so clients
//! should connect in raw/binary mode. Each connection runs on its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use super::relay::{bridge, IoSink, IoSource, RelayEnd, RelayOptions};
use super::session::{Session, SpawnSpec};
use super::{accept_retrying, GatewayError, TransportKind};

const UNAVAILABLE: &[u8] = b"\r\nService unavailable, please try again later.\r\n";

pub struct TelnetAcceptor {
    listener: TcpListener,
    spawn: Arc<SpawnSpec>,
}

impl TelnetAcceptor {
    pub async fn bind(addr: &str, spawn: Arc<SpawnSpec>) -> Result<Self, GatewayError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Telnet listening on {}", listener.local_addr()?);
        Ok(Self { listener, spawn })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, GatewayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped. A failed accept is logged and
    /// retried.
    pub async fn serve(self) -> Result<(), GatewayError> {
        loop {
            let (stream, peer) =
                accept_retrying(TransportKind::Telnet, || self.listener.accept()).await;
            let spawn = self.spawn.clone();
            tokio::spawn(async move {
                match serve_connection(stream, peer, spawn).await {
                    Ok(end) => info!("telnet {} finished: {:?}", peer, end),
                    Err(e) => warn!("telnet {} failed: {}", peer, e),
                }
            });
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    spawn: Arc<SpawnSpec>,
) -> Result<RelayEnd, GatewayError> {
    info!("Telnet connection from {}", peer);
    stream.set_nodelay(true)?;
    let mut session = match Session::spawn(spawn, TransportKind::Telnet, peer.to_string()).await {
        Ok(session) => session,
        Err(e) => {
            let _ = stream.write_all(UNAVAILABLE).await;
            return Err(e);
        }
    };
    let (reader, writer) = stream.into_split();
    let end = bridge(
        &mut IoSource(reader),
        &mut IoSink(writer),
        &mut session,
        RelayOptions::default(),
    )
    .await;
    Ok(end)
}
