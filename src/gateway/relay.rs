//! # Bidirectional Relay
//!
//! Two loops per session, run concurrently on one task:
//!
//! - **inbound**: transport chunk -> pty input, verbatim. For the modem it also
//!   line-splits the stream looking for the carrier-loss token; bytes ahead of the
//!   token's line are still forwarded, the line itself and the rest of its chunk
//!   are not.
//! - **outbound**: pty output chunk -> transport, verbatim.
//!
//! Whichever loop first sees end-of-stream, an error or carrier loss raises the shared
//! stop signal; the other loop leaves at its next await point without waiting for
//! another read. After both have returned the terminal is closed exactly once.

use std::future::Future;
use std::io;

use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use super::session::{PtyPort, Terminal};
use crate::logutil::escape_log;
use crate::metrics;

const READ_CHUNK: usize = 1024;

/// Unterminated bytes a [`LineSplitter`] keeps before discarding the oldest.
pub const MAX_LINE: usize = 1024;

/// Transport -> gateway byte stream.
pub trait ChunkSource: Send {
    /// Next chunk of bytes; `Ok(None)` at end of stream.
    fn next_chunk(&mut self) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;
}

/// Gateway -> transport byte stream.
pub trait ChunkSink: Send {
    fn send_chunk(&mut self, chunk: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

/// Any tokio reader, e.g. the read half of a telnet socket.
pub struct IoSource<R>(pub R);

impl<R: AsyncRead + Unpin + Send> ChunkSource for IoSource<R> {
    async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = self.0.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

/// Any tokio writer, e.g. the write half of a telnet socket.
pub struct IoSink<W>(pub W);

impl<W: AsyncWrite + Unpin + Send> ChunkSink for IoSink<W> {
    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.0.write_all(chunk).await?;
        self.0.flush().await
    }
}

impl ChunkSource for mpsc::Receiver<Vec<u8>> {
    async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.recv().await)
    }
}

impl ChunkSink for mpsc::Sender<Vec<u8>> {
    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.send(chunk.to_vec())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped"))
    }
}

/// Splits an arbitrarily chunked byte stream into text lines on `\r` or `\n`.
///
/// Lines are decoded lossily and trimmed; blank lines are skipped. At most
/// [`MAX_LINE`] unterminated bytes are retained.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            if b == b'\r' || b == b'\n' {
                if !self.buf.is_empty() {
                    let line = String::from_utf8_lossy(&self.buf).trim().to_string();
                    self.buf.clear();
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
            } else {
                self.buf.push(b);
            }
        }
        if self.buf.len() > MAX_LINE {
            let excess = self.buf.len() - MAX_LINE;
            self.buf.drain(..excess);
        }
        lines
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Watches a transport stream for an in-band disconnect token such as `NO CARRIER`.
#[derive(Debug)]
pub struct CarrierWatch {
    token: String,
    lines: LineSplitter,
}

impl CarrierWatch {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_ascii_uppercase(),
            lines: LineSplitter::new(),
        }
    }

    /// Feed one chunk. Once a completed line contains the token (case-insensitive),
    /// returns the offset in `chunk` where that line starts; 0 when it began in an
    /// earlier chunk. Bytes before the offset are ordinary traffic.
    pub fn scan(&mut self, chunk: &[u8]) -> Option<usize> {
        let mut line_start = 0;
        for (i, &b) in chunk.iter().enumerate() {
            if b != b'\r' && b != b'\n' {
                continue;
            }
            let hit = self.lines.push(&chunk[line_start..=i]).iter().any(|line| {
                let hit = line.to_ascii_uppercase().contains(&self.token);
                if hit {
                    info!("Carrier lost: {}", escape_log(line));
                }
                hit
            });
            if hit {
                return Some(line_start);
            }
            line_start = i + 1;
        }
        self.lines.push(&chunk[line_start..]);
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelayOptions {
    /// In-band token that ends the session when seen on its own line.
    pub disconnect_token: Option<String>,
}

impl RelayOptions {
    pub fn modem(token: impl Into<String>) -> Self {
        Self {
            disconnect_token: Some(token.into()),
        }
    }
}

/// Why a relay stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    /// The remote side closed its stream.
    TransportClosed,
    /// The pty reached end-of-stream (subprocess exited or hung up).
    SubprocessExited,
    /// The disconnect token appeared in the transport stream.
    Carrier,
    /// A read or write failed.
    Error(String),
    /// The terminal had no port to relay.
    Detached,
}

/// Raise the stop signal; true only for the first caller.
fn raise(stop: &watch::Sender<bool>) -> bool {
    stop.send_if_modified(|stopped| {
        if *stopped {
            false
        } else {
            *stopped = true;
            true
        }
    })
}

async fn inbound<S: ChunkSource>(
    source: &mut S,
    input: &mpsc::Sender<Vec<u8>>,
    mut carrier: Option<CarrierWatch>,
    stop: &watch::Sender<bool>,
    mut stopped: watch::Receiver<bool>,
) -> Option<RelayEnd> {
    let end = loop {
        let next = tokio::select! {
            biased;
            _ = stopped.changed() => return None,
            next = source.next_chunk() => next,
        };
        match next {
            Ok(Some(mut chunk)) => {
                let lost_at = carrier.as_mut().and_then(|watch| watch.scan(&chunk));
                // The token line and whatever follows it belong to the modem.
                if let Some(at) = lost_at {
                    chunk.truncate(at);
                }
                if !chunk.is_empty() {
                    metrics::add_bytes_in(chunk.len());
                    let sent = tokio::select! {
                        biased;
                        _ = stopped.changed() => return None,
                        sent = input.send(chunk) => sent,
                    };
                    if sent.is_err() {
                        break RelayEnd::SubprocessExited;
                    }
                }
                if lost_at.is_some() {
                    break RelayEnd::Carrier;
                }
            }
            Ok(None) => break RelayEnd::TransportClosed,
            Err(e) => break RelayEnd::Error(format!("transport read: {e}")),
        }
    };
    raise(stop).then_some(end)
}

async fn outbound<K: ChunkSink>(
    output: &mut mpsc::Receiver<Vec<u8>>,
    sink: &mut K,
    stop: &watch::Sender<bool>,
    mut stopped: watch::Receiver<bool>,
) -> Option<RelayEnd> {
    let end = loop {
        let chunk = tokio::select! {
            biased;
            _ = stopped.changed() => return None,
            chunk = output.recv() => chunk,
        };
        let Some(chunk) = chunk else {
            break RelayEnd::SubprocessExited;
        };
        let written = tokio::select! {
            biased;
            _ = stopped.changed() => return None,
            written = sink.send_chunk(&chunk) => written,
        };
        match written {
            Ok(()) => metrics::add_bytes_out(chunk.len()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => break RelayEnd::TransportClosed,
            Err(e) => break RelayEnd::Error(format!("transport write: {e}")),
        }
    };
    raise(stop).then_some(end)
}

/// Relay between a transport and a terminal until either side ends, then close the
/// terminal. The terminal is closed exactly once on every path.
pub async fn bridge<S, K, T>(
    source: &mut S,
    sink: &mut K,
    terminal: &mut T,
    options: RelayOptions,
) -> RelayEnd
where
    S: ChunkSource,
    K: ChunkSink,
    T: Terminal,
{
    let Some(PtyPort { mut output, input }) = terminal.take_port() else {
        terminal.close().await;
        return RelayEnd::Detached;
    };
    let carrier = options.disconnect_token.as_deref().map(CarrierWatch::new);
    let (stop, stopped) = watch::channel(false);

    let (from_transport, from_pty) = tokio::join!(
        inbound(source, &input, carrier, &stop, stopped.clone()),
        outbound(&mut output, sink, &stop, stopped),
    );
    drop(input);
    drop(output);
    terminal.close().await;

    let end = from_transport
        .or(from_pty)
        .unwrap_or(RelayEnd::TransportClosed);
    debug!("relay finished: {:?}", end);
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitter_handles_arbitrary_chunking() {
        let mut lines = LineSplitter::new();
        assert!(lines.push(b"RI").is_empty());
        assert_eq!(lines.push(b"NG\r\n\r\nCONN"), vec!["RING"]);
        assert_eq!(lines.push(b"ECT 2400\r"), vec!["CONNECT 2400"]);
        assert_eq!(lines.pending(), 0);
    }

    #[test]
    fn splitter_bounds_unterminated_input() {
        let mut lines = LineSplitter::new();
        lines.push(&vec![b'x'; MAX_LINE * 3]);
        assert_eq!(lines.pending(), MAX_LINE);
    }

    #[test]
    fn carrier_token_split_across_chunks() {
        let mut watch = CarrierWatch::new("NO CARRIER");
        assert_eq!(watch.scan(b"hello\r\nNO CAR"), None);
        assert_eq!(watch.scan(b"RIER\r\n"), Some(0));
    }

    #[test]
    fn carrier_token_is_case_insensitive_but_needs_a_line_end() {
        let mut watch = CarrierWatch::new("NO CARRIER");
        assert_eq!(watch.scan(b"no carrier"), None);
        assert_eq!(watch.scan(b"\n"), Some(0));
    }

    #[test]
    fn carrier_offset_marks_where_the_token_line_starts() {
        let mut watch = CarrierWatch::new("NO CARRIER");
        assert_eq!(watch.scan(b"typed\r\r\nNO CARRIER\r\n"), Some(8));
        let mut watch = CarrierWatch::new("NO CARRIER");
        assert_eq!(watch.scan(b"\r\nNO CARRIER\r\nRING\r\n"), Some(2));
    }
}
