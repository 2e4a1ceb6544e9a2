//! The abstract connection handle the [`lifecycle`] operates on,
//! and its implementation over a [`TcpStream`].
//!
//! The lifecycle never touches sockets directly. It waits on [`ConnectionHandle::closed`]
//! and writes through [`ConnectionHandle::write_header`], [`ConnectionHandle::write`],
//! and [`ConnectionHandle::flush`].

use crate::prelude::{networking::*, *};
use tokio::io::BufWriter;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Why the remote peer or the transport ended a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection (read returned EOF).
    Closed,
    /// The connection was reset or aborted.
    Reset,
    /// Reading from the connection failed with another error.
    Io(io::ErrorKind),
    /// The transport cancelled the connection.
    Cancelled,
}
impl CloseReason {
    /// Classifies a read error.
    #[must_use]
    pub fn from_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::Reset,
            kind => Self::Io(kind),
        }
    }
}
impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("connection closed by peer"),
            Self::Reset => f.write_str("connection reset by peer"),
            Self::Io(kind) => write!(f, "read error: {kind}"),
            Self::Cancelled => f.write_str("context canceled"),
        }
    }
}

/// A connection as seen by the [`lifecycle`].
///
/// Implementors are owned by exactly one connection task.
#[allow(async_fn_in_trait)]
pub trait ConnectionHandle {
    /// Resolves when the connection is gone.
    ///
    /// Level-triggered: once this has resolved, every later call must resolve
    /// immediately with the same reason.
    /// Must be cancel-safe, as it's raced against timers.
    async fn closed(&mut self) -> CloseReason;
    /// Writes the response status line and headers.
    async fn write_header(&mut self, status: StatusCode) -> io::Result<()>;
    /// Writes body bytes, returning how many were accepted.
    async fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;
    /// Forces buffered bytes out to the transport.
    async fn flush(&mut self) -> io::Result<()>;
    /// If [`Self::flush`] is supported. Without it, keep-alive bytes and early
    /// headers would sit in a buffer, which defeats the purpose of the simulator.
    fn can_flush(&self) -> bool {
        true
    }
}

/// Formats the `date` header, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
fn http_date() -> String {
    let format = time::macros::format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    time::OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_default()
}

/// Writes a `HTTP/1.1` status line and the headers of a close-delimited response.
///
/// # Errors
///
/// Passes any errors emitted from `writer`.
pub async fn write_head(status: StatusCode, mut writer: impl AsyncWrite + Unpin) -> io::Result<()> {
    macro_rules! write_bytes {
        ($($bytes:expr $(,)?)+) => {
            $(
                writer.write_all($bytes).await?;
            )*
        };
    }
    let reason = status.canonical_reason().unwrap_or("");
    write_bytes!(
        b"HTTP/1.1 ",
        status.as_str().as_bytes(),
        b" ",
        reason.as_bytes(),
        b"\r\n",
        b"date: ",
        http_date().as_bytes(),
        b"\r\n",
        b"server: linger/",
        env!("CARGO_PKG_VERSION").as_bytes(),
        b"\r\n",
        b"connection: close\r\n",
    );
    if status != StatusCode::NO_CONTENT && status != StatusCode::NOT_MODIFIED {
        write_bytes!(b"content-type: text/plain; charset=utf-8\r\n");
    }
    write_bytes!(b"\r\n");
    Ok(())
}

/// A [`ConnectionHandle`] over a [`TcpStream`].
///
/// The read half is only used to notice the peer going away;
/// anything the client sends after the request head is discarded.
#[derive(Debug)]
pub struct TcpConnection {
    reader: OwnedReadHalf,
    writer: BufWriter<OwnedWriteHalf>,
    closed: Option<CloseReason>,
    header_written: bool,
}
impl TcpConnection {
    /// Wraps `stream`. The request head must already have been read.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer: BufWriter::with_capacity(1024 * 4, writer),
            closed: None,
            header_written: false,
        }
    }

    /// Ends the response.
    ///
    /// If nothing was written and the peer is still there, an empty response
    /// with `status` is sent first, the same as a HTTP server does when a handler
    /// returns without writing.
    ///
    /// # Errors
    ///
    /// Returns any errors from writing, flushing, or shutting down the write half.
    pub async fn finish(mut self, status: StatusCode) -> io::Result<()> {
        if self.closed.is_some() {
            return Ok(());
        }
        if !self.header_written {
            self.write_header(status).await?;
        }
        self.writer.flush().await?;
        self.writer.shutdown().await
    }
}
impl ConnectionHandle for TcpConnection {
    async fn closed(&mut self) -> CloseReason {
        if let Some(reason) = self.closed {
            return reason;
        }
        let mut buffer = [0; 512];
        let reason = loop {
            match self.reader.read(&mut buffer).await {
                Ok(0) => break CloseReason::Closed,
                Ok(read) => trace!("Discarding {read} bytes sent after the request head"),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => break CloseReason::from_error(&err),
            }
        };
        self.closed = Some(reason);
        reason
    }
    async fn write_header(&mut self, status: StatusCode) -> io::Result<()> {
        self.header_written = true;
        write_head(status, &mut self.writer).await
    }
    async fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.writer.write_all(bytes).await?;
        Ok(bytes.len())
    }
    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}
