//! # WebSocket Registrar
//!
//! Browser sessions over WebSocket with JSON text events:
//!
//! | direction | event |
//! |-----------|-------|
//! | server -> browser | `{"event":"session","sid":"<uuid>"}`, once per connection |
//! | server -> browser | `{"event":"output","data":"<text>"}`, per pty chunk |
//! | server -> browser | `{"event":"busy"}`, when every slot is taken |
//! | browser -> server | `{"event":"input","data":"<text>","sid":"<uuid>"}` (`sid` optional) |
//!
//! Input is routed by connection, never by a global slot, so each browser only ever
//! reaches its own subprocess. [`SessionRegistry`] caps how many run at once.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use super::relay::{bridge, ChunkSink, ChunkSource, RelayEnd, RelayOptions};
use super::session::{Session, SpawnSpec};
use super::{accept_retrying, GatewayError, TransportKind};
use crate::config::WebSocketConfig;
use crate::logutil::escape_log;
use crate::terminal::codec::{Decoder, EncodingContext};

type WsStream = WebSocketStream<TcpStream>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServerEvent {
    Session { sid: String },
    Output { data: String },
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientEvent {
    Input {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sid: Option<String>,
    },
}

impl ServerEvent {
    fn to_message(&self) -> Message {
        Message::Text(serde_json::to_string(self).unwrap_or_default())
    }
}

/// Live browser sessions, keyed by session id, bounded by a capacity.
#[derive(Clone)]
pub struct SessionRegistry {
    live: Arc<Mutex<HashSet<Uuid>>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            live: Arc::new(Mutex::new(HashSet::new())),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim a slot under a fresh session id. The slot is released when the
    /// returned [`Registration`] is dropped.
    pub fn register(&self) -> Result<Registration, GatewayError> {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if live.len() >= self.capacity {
            return Err(GatewayError::SessionLimit(self.capacity));
        }
        let sid = Uuid::new_v4();
        live.insert(sid);
        Ok(Registration {
            sid,
            registry: self.clone(),
        })
    }

    fn release(&self, sid: &Uuid) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.remove(sid);
    }
}

pub struct Registration {
    sid: Uuid,
    registry: SessionRegistry,
}

impl Registration {
    pub fn sid(&self) -> Uuid {
        self.sid
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.sid);
    }
}

/// Parse one browser frame into bytes for the pty, dropping anything not addressed
/// to `sid`.
pub fn input_bytes(text: &str, sid: &str, ctx: &EncodingContext) -> Option<Vec<u8>> {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::Input { data, sid: claimed }) => {
            if claimed.as_deref().is_some_and(|claimed| claimed != sid) {
                debug!("dropping input for foreign sid {:?}", claimed);
                return None;
            }
            Some(ctx.encode(&data))
        }
        Err(e) => {
            debug!("ignoring frame {}: {}", escape_log(text), e);
            None
        }
    }
}

pub struct WsSource {
    stream: SplitStream<WsStream>,
    sid: String,
    ctx: EncodingContext,
}

impl ChunkSource for WsSource {
    async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let message = match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::Other, e)),
            };
            match message {
                Message::Text(text) => {
                    if let Some(bytes) = input_bytes(&text, &self.sid, &self.ctx) {
                        if !bytes.is_empty() {
                            return Ok(Some(bytes));
                        }
                    }
                }
                Message::Binary(bytes) if !bytes.is_empty() => return Ok(Some(bytes)),
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
    }
}

pub struct WsSink {
    sink: SplitSink<WsStream, Message>,
    decoder: Decoder,
}

impl WsSink {
    /// Send whatever the decoder still holds, then close the socket.
    async fn close(&mut self) {
        let rest = self.decoder.finish();
        if !rest.is_empty() {
            let _ = self.sink.send(ServerEvent::Output { data: rest }.to_message()).await;
        }
        let _ = self.sink.close().await;
    }
}

impl ChunkSink for WsSink {
    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        let data = self.decoder.decode_chunk(chunk);
        if data.is_empty() {
            return Ok(());
        }
        self.sink
            .send(ServerEvent::Output { data }.to_message())
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
    }
}

pub struct WebSocketRegistrar {
    listener: TcpListener,
    spawn: Arc<SpawnSpec>,
    registry: SessionRegistry,
    ctx: EncodingContext,
}

impl WebSocketRegistrar {
    pub async fn bind(
        config: &WebSocketConfig,
        spawn: Arc<SpawnSpec>,
        ctx: EncodingContext,
    ) -> Result<Self, GatewayError> {
        let listener = TcpListener::bind(&config.bind).await?;
        info!(
            "WebSocket listening on {} ({} session slot{})",
            listener.local_addr()?,
            config.max_sessions,
            if config.max_sessions == 1 { "" } else { "s" }
        );
        Ok(Self {
            listener,
            spawn,
            registry: SessionRegistry::new(config.max_sessions),
            ctx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, GatewayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    pub async fn serve(self) -> Result<(), GatewayError> {
        loop {
            let (stream, peer) =
                accept_retrying(TransportKind::WebSocket, || self.listener.accept()).await;
            let spawn = self.spawn.clone();
            let registry = self.registry.clone();
            let ctx = self.ctx;
            tokio::spawn(async move {
                match serve_connection(stream, peer, spawn, &registry, ctx).await {
                    Ok(end) => info!("websocket {} finished: {:?}", peer, end),
                    Err(e) => warn!("websocket {} failed: {}", peer, e),
                }
            });
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    spawn: Arc<SpawnSpec>,
    registry: &SessionRegistry,
    ctx: EncodingContext,
) -> Result<RelayEnd, GatewayError> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| GatewayError::WebSocket(format!("handshake with {peer}: {e}")))?;
    let (mut sink, stream) = ws.split();

    let registration = match registry.register() {
        Ok(registration) => registration,
        Err(e) => {
            let _ = sink.send(ServerEvent::Busy.to_message()).await;
            let _ = sink.close().await;
            return Err(e);
        }
    };
    let sid = registration.sid().to_string();
    info!("WebSocket {} registered as {}", peer, sid);
    sink.send(ServerEvent::Session { sid: sid.clone() }.to_message())
        .await
        .map_err(|e| GatewayError::WebSocket(e.to_string()))?;

    let mut session = Session::spawn(spawn, TransportKind::WebSocket, sid.clone()).await?;
    let mut source = WsSource { stream, sid, ctx };
    let mut out = WsSink {
        sink,
        decoder: ctx.decoder(),
    };
    let end = bridge(&mut source, &mut out, &mut session, RelayOptions::default()).await;
    out.close().await;
    drop(registration);
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::codec::Encoding;

    #[test]
    fn server_events_serialize_with_event_tag() {
        let json = serde_json::to_string(&ServerEvent::Session { sid: "abc".into() }).unwrap();
        assert_eq!(json, r#"{"event":"session","sid":"abc"}"#);
        let json = serde_json::to_string(&ServerEvent::Busy).unwrap();
        assert_eq!(json, r#"{"event":"busy"}"#);
    }

    #[test]
    fn registry_enforces_capacity_and_releases_on_drop() {
        let registry = SessionRegistry::new(1);
        let first = registry.register().unwrap();
        assert!(matches!(registry.register(), Err(GatewayError::SessionLimit(1))));
        assert_eq!(registry.len(), 1);
        drop(first);
        assert!(registry.is_empty());
        let second = registry.register().unwrap();
        assert_eq!(registry.len(), 1);
        drop(second);
    }

    #[test]
    fn input_for_another_session_is_dropped() {
        let ctx = EncodingContext::default();
        let own = r#"{"event":"input","data":"ls\r","sid":"me"}"#;
        let foreign = r#"{"event":"input","data":"rm\r","sid":"them"}"#;
        let anonymous = r#"{"event":"input","data":"x"}"#;
        assert_eq!(input_bytes(own, "me", &ctx), Some(b"ls\r".to_vec()));
        assert_eq!(input_bytes(foreign, "me", &ctx), None);
        assert_eq!(input_bytes(anonymous, "me", &ctx), Some(b"x".to_vec()));
        assert_eq!(input_bytes("not json", "me", &ctx), None);
    }

    #[test]
    fn input_is_encoded_for_the_pty() {
        let ctx = EncodingContext::new(Encoding::EucKr);
        let frame = r#"{"event":"input","data":"안"}"#;
        assert_eq!(input_bytes(frame, "s", &ctx), Some(vec![0xBE, 0xC8]));
    }
}
