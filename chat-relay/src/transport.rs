//! TCP transport consumed by the reactor.
//!
//! The reactor never touches sockets directly. It sees a [`Listener`] that
//! hands out accepted streams, a stream of [`Inbound`] events produced by one
//! reader task per connection, and a [`Connection`] handle it can write to and
//! close. Reader tasks frame newline-terminated lines with a bounded length;
//! writer tasks drain a per-connection queue into the socket.

use std::{fmt, io, net::SocketAddr, time::Duration};

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    task::AbortHandle,
    time,
};
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

/// Pause between attempts when `accept` keeps failing (e.g. fd exhaustion).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Identifier assigned to each accepted connection, never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a reader task observed on its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// One line without its `\n`, bytes exactly as received.
    Line(Bytes),
    /// The peer hung up or the socket failed.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub connection: ConnectionId,
    pub event: ReadEvent,
}

pub struct Listener {
    inner: TcpListener,
}

/// Binds the relay's listening socket.
pub async fn listen(addr: SocketAddr) -> Result<Listener, TransportError> {
    let inner = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Listen { addr, source })?;
    Ok(Listener { inner })
}

impl Listener {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Waits for the next inbound connection.
    ///
    /// Failures are logged and retried; the caller only ever sees a usable
    /// stream. Cancel safe: dropping the future loses no connection.
    pub async fn accept(&self) -> (TcpStream, SocketAddr) {
        loop {
            match self.inner.accept().await {
                Ok(accepted) => return accepted,
                Err(err) => {
                    warn!(error = ?err, "accept failed; retrying");
                    time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Handle to one live connection, owned by the client registered for it.
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Bytes>,
    reader: Option<AbortHandle>,
}

impl Connection {
    /// Wraps an outbound queue that some other party drains.
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            id,
            outbound,
            reader: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues bytes for the writer task. Never blocks.
    pub fn write(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.outbound
            .send(bytes)
            .map_err(|_| TransportError::Closed(self.id))
    }

    /// Stops reading and lets the writer flush what is queued before shutting
    /// the socket down.
    pub fn close(self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
        trace!(connection = %self.id, "connection closed");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

/// Starts the reader and writer tasks for an accepted stream.
pub fn spawn_connection(
    stream: TcpStream,
    id: ConnectionId,
    events: mpsc::UnboundedSender<Inbound>,
    max_line_length: usize,
) -> Connection {
    let (reader, writer) = stream.into_split();
    let (outbound, queue) = mpsc::unbounded_channel();

    let reader = tokio::spawn(read_lines(id, reader, events, max_line_length));
    tokio::spawn(write_queue(id, writer, queue));

    Connection {
        id,
        outbound,
        reader: Some(reader.abort_handle()),
    }
}

/// Newline framing over raw bytes.
///
/// Lines come out without their `\n`; a `\r` before it is kept, as is any
/// byte that is not valid UTF-8. A line that reaches `max_length` bytes
/// without a newline is cut there and the remainder follows as the next
/// line, so nothing the peer sent is lost.
#[derive(Debug, Clone)]
pub struct LineChunkCodec {
    max_length: usize,
    /// Index of the next byte to check for a newline.
    next_index: usize,
}

impl LineChunkCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            next_index: 0,
        }
    }
}

impl Decoder for LineChunkCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Bytes>> {
        // A newline directly after a full chunk still terminates that chunk.
        let window = src.len().min(self.max_length + 1);
        let start = self.next_index.min(window);
        if let Some(offset) = src[start..window].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let mut line = src.split_to(end + 1);
            line.truncate(end);
            self.next_index = 0;
            return Ok(Some(line.freeze()));
        }

        if src.len() > self.max_length {
            self.next_index = 0;
            return Ok(Some(src.split_to(self.max_length).freeze()));
        }

        self.next_index = src.len();
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Bytes>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if src.is_empty() {
            Ok(None)
        } else {
            Ok(Some(src.split().freeze()))
        }
    }
}

async fn read_lines(
    id: ConnectionId,
    reader: OwnedReadHalf,
    events: mpsc::UnboundedSender<Inbound>,
    max_line_length: usize,
) {
    if let Err(err) = pump_lines(id, reader, &events, max_line_length).await {
        debug!(connection = %id, error = ?err, "read failed");
    }
    forward(&events, id, ReadEvent::Closed);
}

/// Forwards framed lines until EOF, a read error, or the reactor going away.
async fn pump_lines(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    events: &mpsc::UnboundedSender<Inbound>,
    max_line_length: usize,
) -> io::Result<()> {
    let mut codec = LineChunkCodec::new(max_line_length);
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);

    loop {
        while let Some(line) = codec.decode(&mut buffer)? {
            if !forward(events, id, ReadEvent::Line(line)) {
                return Ok(());
            }
        }
        if reader.read_buf(&mut buffer).await? == 0 {
            break;
        }
    }

    // A final line without a terminator still counts.
    while let Some(line) = codec.decode_eof(&mut buffer)? {
        if !forward(events, id, ReadEvent::Line(line)) {
            return Ok(());
        }
    }
    Ok(())
}

/// Returns false once the reactor has gone away.
fn forward(events: &mpsc::UnboundedSender<Inbound>, id: ConnectionId, event: ReadEvent) -> bool {
    events
        .send(Inbound {
            connection: id,
            event,
        })
        .is_ok()
}

async fn write_queue(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(bytes) = queue.recv().await {
        if let Err(err) = writer.write_all(&bytes).await {
            debug!(connection = %id, error = ?err, "write failed; dropping outbound queue");
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        trace!(connection = %id, error = ?err, "shutdown after close failed");
    }
}
