//! Reading the head of a `HTTP/1` request.
//!
//! The simulator doesn't route, so only the request line and header fields are
//! parsed; they're used for the `New request` log line.
//! The body (if any) is left to the [`connection`], which discards it.

use crate::prelude::*;

/// Common characters expressed as a single byte each, according to UTF-8.
pub mod chars {
    /// Tab
    pub const TAB: u8 = 9;
    /// Line feed
    pub const LF: u8 = 10;
    /// Carrage return
    pub const CR: u8 = 13;
    /// ` `
    pub const SPACE: u8 = 32;
    /// `:`
    pub const COLON: u8 = 58;
}

/// Default limit of the request head.
pub const MAX_HEAD_LEN: usize = 16 * 1024;
/// Default time to wait for each read of the request head.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// An error while reading or parsing the request head.
#[derive(Debug)]
pub enum Error {
    /// Failed to create a [`http`] type.
    Http(http::Error),
    /// No path was parsed as part of the request line.
    NoPath,
    /// The stream ended (or timed out) before the head was complete.
    UnexpectedEnd,
    /// The head is longer than the limit.
    HeaderTooLong,
    /// The [`Method`] is invalid.
    InvalidMethod,
    /// The [`Version`] is invalid.
    InvalidVersion,
    /// A syntax error in the data.
    ///
    /// Often means the request isn't what we expect;
    /// maybe it's transmitted over HTTPS.
    Syntax,
}
impl Error {
    /// Gets a string representation of [`Error`].
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http(_) => "http library parsing error",
            Self::NoPath => "no path was supplied in the request",
            Self::UnexpectedEnd => "stream is exhausted",
            Self::HeaderTooLong => "header is too long",
            Self::InvalidMethod => "method is invalid",
            Self::InvalidVersion => "version is invalid",
            Self::Syntax => {
                "invalid syntax of data. The input might unexpectedly \
                be encrypted (HTTPS) or compressed (HTTP/2)"
            }
        }
    }
}
impl From<http::Error> for Error {
    #[inline]
    fn from(err: http::Error) -> Self {
        Self::Http(err)
    }
}
impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(err) => write!(f, "{}: {err}", self.as_str()),
            _ => f.write_str(self.as_str()),
        }
    }
}
impl std::error::Error for Error {}

/// Parses a `HTTP/1` version.
#[must_use]
pub fn version(bytes: &[u8]) -> Option<Version> {
    Some(match bytes {
        b"HTTP/0.9" => Version::HTTP_09,
        b"HTTP/1.0" => Version::HTTP_10,
        b"HTTP/1.1" => Version::HTTP_11,
        _ => return None,
    })
}

pub(crate) fn contains_two_newlines(bytes: &[u8]) -> bool {
    let mut in_row = 0_u8;
    for byte in bytes.iter().copied() {
        match byte {
            chars::LF if in_row == 0 => in_row += 1,
            chars::LF => return true,
            chars::CR => {}
            _ => in_row = 0,
        }
    }
    false
}

/// Reads more bytes into `buffer`. Returns the number of new bytes.
async fn read_more(
    buffer: &mut BytesMut,
    mut reader: impl AsyncRead + Unpin,
    max_len: usize,
    timeout: Duration,
) -> Result<usize, Error> {
    if buffer.len() >= max_len {
        return Err(Error::HeaderTooLong);
    }
    buffer.reserve(512.min(max_len - buffer.len()));
    tokio::time::timeout(timeout, reader.read_buf(buffer))
        .await
        .ok()
        .ok_or(Error::UnexpectedEnd)?
        .ok()
        .ok_or(Error::UnexpectedEnd)
}

/// Reads until the empty line ending the head. The returned bytes may contain
/// the start of the body.
async fn read_head(
    mut reader: impl AsyncRead + Unpin,
    max_len: usize,
    timeout: Duration,
) -> Result<Bytes, Error> {
    let mut buffer = BytesMut::with_capacity(512);
    loop {
        if read_more(&mut buffer, &mut reader, max_len, timeout).await? == 0 {
            return Err(Error::UnexpectedEnd);
        }
        if contains_two_newlines(&buffer) {
            break;
        }
    }
    Ok(buffer.freeze())
}

/// Splits `bytes` at the first `LF`, removing the `CR LF` (or bare `LF`).
fn split_line(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let end = bytes.iter().position(|byte| *byte == chars::LF)?;
    let line = &bytes[..end];
    let line = line.strip_suffix(&[chars::CR]).unwrap_or(line);
    Some((line, &bytes[end + 1..]))
}
fn trim(mut bytes: &[u8]) -> &[u8] {
    while let [chars::SPACE | chars::TAB, rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., chars::SPACE | chars::TAB] = bytes {
        bytes = rest;
    }
    bytes
}

/// Parses the request line and header fields of `head`.
/// Returns the request and the offset where the body starts.
///
/// # Errors
///
/// See [`Error`] for the variants.
pub fn parse_head(head: &[u8]) -> Result<(Request<()>, usize), Error> {
    let (request_line, mut rest) = split_line(head).ok_or(Error::Syntax)?;
    let mut parts = request_line.split(|byte| *byte == chars::SPACE);
    let method = parts.next().ok_or(Error::InvalidMethod)?;
    let method = Method::from_bytes(method).map_err(|_| Error::InvalidMethod)?;
    let path = parts.next().filter(|p| !p.is_empty()).ok_or(Error::NoPath)?;
    let uri = Uri::try_from(path).map_err(|_| Error::Syntax)?;
    let version = parts
        .next()
        .and_then(version)
        .ok_or(Error::InvalidVersion)?;
    if parts.next().is_some() {
        return Err(Error::Syntax);
    }

    let mut builder = Request::builder().method(method).uri(uri).version(version);
    loop {
        let (line, after) = split_line(rest).ok_or(Error::Syntax)?;
        rest = after;
        if line.is_empty() {
            break;
        }
        let colon = line
            .iter()
            .position(|byte| *byte == chars::COLON)
            .ok_or(Error::Syntax)?;
        let name = header::HeaderName::from_bytes(&line[..colon]).map_err(|_| Error::Syntax)?;
        let value = HeaderValue::from_bytes(trim(&line[colon + 1..])).map_err(|_| Error::Syntax)?;
        builder = builder.header(name, value);
    }
    let request = builder.body(())?;
    Ok((request, head.len() - rest.len()))
}

/// Try to read and parse a request head from `stream`.
///
/// Returns the request and any bytes read past the head.
///
/// # Errors
///
/// Will return error if the stream ends or times out before the head is complete,
/// if the head is longer than `max_len`, or if parsing fails.
/// See [`Error`] for all variants.
pub async fn request(
    stream: impl AsyncRead + Unpin,
    max_len: usize,
    timeout: Duration,
) -> Result<(Request<()>, Bytes), Error> {
    let head = read_head(stream, max_len, timeout).await?;
    let (request, body_start) = parse_head(&head)?;
    Ok((request, head.slice(body_start..)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_get() {
        let (request, end) =
            parse_head(b"GET /hold?ms=10 HTTP/1.1\r\nHost: localhost\r\nAccept:  */* \r\n\r\nbody")
                .unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.uri().path(), "/hold");
        assert_eq!(request.uri().query(), Some("ms=10"));
        assert_eq!(request.version(), Version::HTTP_11);
        assert_eq!(request.headers()["host"], "localhost");
        assert_eq!(request.headers()["accept"], "*/*");
        assert_eq!(end, 60);
    }

    #[test]
    fn bare_line_feeds() {
        let (request, _) = parse_head(b"POST / HTTP/1.0\nhost: x\n\n").unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.version(), Version::HTTP_10);
    }

    #[test]
    fn invalid_heads() {
        assert!(matches!(
            parse_head(b"GET  HTTP/1.1\r\n\r\n"),
            Err(Error::NoPath)
        ));
        assert!(matches!(
            parse_head(b"GET / HTTP/9\r\n\r\n"),
            Err(Error::InvalidVersion)
        ));
        assert!(matches!(
            parse_head(b"G(T / HTTP/1.1\r\n\r\n"),
            Err(Error::InvalidMethod)
        ));
        assert!(matches!(
            parse_head(b"GET / HTTP/1.1\r\nno-colon\r\n\r\n"),
            Err(Error::Syntax)
        ));
    }

    #[test]
    fn newlines() {
        assert!(contains_two_newlines(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(contains_two_newlines(b"GET / HTTP/1.1\n\n"));
        assert!(!contains_two_newlines(b"GET / HTTP/1.1\r\nhost: x\r\n"));
    }

    #[tokio::test]
    async fn read_split_request() {
        let (mut client, server) = tokio::io::duplex(64);
        let reader = tokio::spawn(async move {
            let mut server = server;
            request(&mut server, MAX_HEAD_LEN, READ_TIMEOUT).await
        });
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        client.write_all(b"host: x\r\n\r\nextra").await.unwrap();
        let (request, rest) = reader.await.unwrap().unwrap();
        assert_eq!(request.uri().path(), "/");
        assert_eq!(rest, Bytes::from_static(b"extra"));
    }

    #[tokio::test]
    async fn too_long() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(&[b'a'; 2048]).await.unwrap();
        let result = request(&mut server, 1024, READ_TIMEOUT).await;
        assert!(matches!(result, Err(Error::HeaderTooLong)));
    }

    #[tokio::test]
    async fn early_end() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        drop(client);
        let result = request(&mut server, MAX_HEAD_LEN, READ_TIMEOUT).await;
        assert!(matches!(result, Err(Error::UnexpectedEnd)));
    }
}
