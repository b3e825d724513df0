use std::{fmt::Write as _, io};

use bytes::{Bytes, BytesMut};
use log::trace;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::{
    HttpVersion,
    header::{ConnectionOptions, HeaderMap, HeaderName, HeaderValueTrait},
    request::Request,
    response::{HijackCallback, Response, ResponseBody},
};

/// Interim response sent before reading the body of an `Expect: 100-continue` request
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Written when a client takes too long to send a request. Only the status line is sent.
pub const REQUEST_TIMEOUT: &[u8] = b"HTTP/1.1 408 Request Timeout\r\n";

/// Payloads at least this large are written straight to the socket instead of being copied into
/// the write buffer
const DIRECT_WRITE: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The client closed or reset the connection, nothing more can be sent
    #[error("peer went away: {0}")]
    PeerGone(#[source] io::Error),
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        if is_peer_gone(&err) {
            Self::PeerGone(err)
        } else {
            Self::Io(err)
        }
    }
}

/// Errors that mean the other end of the connection is no longer there
pub fn is_peer_gone(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

/// The facts about a request that decide how its response is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseContext {
    /// Version written on the status line
    pub version: HttpVersion,
    pub is_head: bool,
    /// The request allows the connection to be reused
    pub keep_alive_requested: bool,
    /// The server is shutting down and wants the connection closed
    pub closing: bool,
}

impl ResponseContext {
    pub fn for_request(request: &Request) -> Self {
        Self {
            version: request.version.response_version(),
            is_head: request.method.is_head(),
            keep_alive_requested: request.wants_keep_alive(),
            closing: false,
        }
    }
}

/// How the body follows the head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body may be sent (HEAD, 1xx, 204, 304)
    Bodiless,
    /// Exactly this many bytes
    Length(u64),
    /// Chunked transfer coding applied by the server
    Chunked,
    /// The application set its own Transfer-Encoding, the body is written as is
    Raw,
    /// The body runs until the connection is closed
    CloseDelimited,
    /// The application writes the body itself
    Hijack,
}

#[derive(Debug)]
pub struct ResponseHead {
    pub bytes: BytesMut,
    pub framing: Framing,
    pub keep_alive: bool,
}

/// What the session should do once a response has been written
pub enum WriteOutcome {
    KeepAlive,
    Close,
    /// The head was written, the socket goes to the callback
    Hijack(HijackCallback),
}

impl std::fmt::Debug for WriteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::KeepAlive => "KeepAlive",
            Self::Close => "Close",
            Self::Hijack(_) => "Hijack",
        })
    }
}

/// The body length the server can announce without buffering the body
fn computed_length(version: HttpVersion, chunks: &[Bytes], keep_alive: bool) -> Option<u64> {
    match chunks {
        [] => keep_alive.then_some(0),
        [single] => Some(single.len() as u64),
        chunks => {
            let total: u64 = chunks.iter().map(|chunk| chunk.len() as u64).sum();
            if !version.is_persistent_by_default() && keep_alive {
                // HTTP/1.0 has no chunked coding to fall back on
                Some(total)
            } else if total == 0 && keep_alive {
                Some(0)
            } else {
                None
            }
        }
    }
}

fn write_header_lines(buf: &mut BytesMut, name: &HeaderName, value: &[u8]) {
    // A value spanning several lines is sent as one header line per line
    let value = value.trim_ascii_end();
    let mut lines = value.split(|b| *b == b'\n').peekable();
    while let Some(line) = lines.next() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() && lines.peek().is_some() {
            continue;
        }
        buf.extend_from_slice(name.as_str().as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(line);
        buf.extend_from_slice(b"\r\n");
    }
}

/// Serializes the status line and headers of `response` and decides its framing.
///
/// The application's `Connection` header is replaced by the server's own. Its `Content-Length`
/// is moved after all other headers and written as given.
pub fn render_head(ctx: &ResponseContext, response: &Response) -> ResponseHead {
    let mut buf = BytesMut::with_capacity(256);
    // Formatting into a BytesMut cannot fail
    let _ = write!(
        buf,
        "{} {} {}\r\n",
        ctx.version,
        response.status,
        response.status.reason()
    );

    let mut app_length = None;
    let mut response_close = false;
    let mut app_framed = false;
    for (name, value) in &response.headers {
        if name == &HeaderName::CONTENT_LENGTH {
            app_length = Some(value);
            continue;
        }
        if name == &HeaderName::CONNECTION {
            response_close |= ConnectionOptions::from_header_value(value).is_ok_and(|o| o.close);
            continue;
        }
        if name == &HeaderName::TRANSFER_ENCODING {
            app_framed = true;
        }
        for single in value.iter() {
            write_header_lines(&mut buf, name, single);
        }
    }

    let persistent_version = ctx.version.is_persistent_by_default();
    let keep_alive = ctx.keep_alive_requested && !ctx.closing && !response_close;
    // RFC 9112 - 9.3. Persistence
    if keep_alive && !persistent_version {
        buf.extend_from_slice(b"Connection: Keep-Alive\r\n");
    } else if !keep_alive && persistent_version {
        buf.extend_from_slice(b"Connection: close\r\n");
    }

    let known_length = match app_length {
        Some(value) => u64::from_header_value(value).ok(),
        None => match &response.body {
            ResponseBody::Chunks(chunks) => computed_length(ctx.version, chunks, keep_alive),
            ResponseBody::Hijack(_) | ResponseBody::Absent => None,
        },
    };

    let framing = if matches!(response.body, ResponseBody::Hijack(_)) {
        Framing::Hijack
    } else if ctx.is_head || response.status.is_bodiless() {
        Framing::Bodiless
    } else if let Some(len) = known_length {
        Framing::Length(len)
    } else if app_framed {
        Framing::Raw
    } else if persistent_version && keep_alive && app_length.is_none() {
        Framing::Chunked
    } else {
        // Also reached when the application's Content-Length is not a number
        Framing::CloseDelimited
    };

    if let Some(value) = app_length {
        // Passed on as given, even where no body follows
        for single in value.iter() {
            write_header_lines(&mut buf, &HeaderName::CONTENT_LENGTH, single);
        }
    } else {
        let announced = match framing {
            // HEAD gets the length of the body a GET would have had
            Framing::Bodiless if !response.status.is_bodiless() => known_length,
            Framing::Length(len) => Some(len),
            Framing::Chunked => {
                buf.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
                None
            }
            _ => None,
        };
        if let Some(len) = announced {
            let _ = write!(buf, "Content-Length: {}\r\n", len);
        }
    }
    buf.extend_from_slice(b"\r\n");

    // Without a length or chunking the end of the body is the end of the connection
    let keep_alive = keep_alive && framing != Framing::CloseDelimited;
    ResponseHead {
        bytes: buf,
        framing,
        keep_alive,
    }
}

/// Buffered writer for responses and interim responses
pub struct Sender<WRITER: AsyncWrite + Unpin> {
    writer: WRITER,
    buf: BytesMut,
}

impl<WRITER> Sender<WRITER>
where
    WRITER: AsyncWrite + Unpin,
{
    pub fn new(writer: WRITER) -> Self {
        Self {
            writer,
            buf: BytesMut::with_capacity(8192),
        }
    }

    pub fn into_inner(self) -> WRITER {
        self.writer
    }

    async fn put(&mut self, data: &[u8]) -> io::Result<()> {
        if data.len() >= DIRECT_WRITE {
            self.flush_buf().await?;
            return self.writer.write_all(data).await;
        }
        if self.buf.len() + data.len() > DIRECT_WRITE {
            self.flush_buf().await?;
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn flush_buf(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.writer.write_all(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.flush_buf().await?;
        self.writer.flush().await
    }

    /// Writes raw bytes, such as [`CONTINUE`], and flushes them
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        self.buf.extend_from_slice(bytes);
        self.flush().await?;
        Ok(())
    }

    /// Writes a `103 Early Hints` interim response
    /// RFC 8297 - 2. 103 Early Hints
    pub async fn send_early_hints(&mut self, hints: &HeaderMap) -> Result<(), WriteError> {
        self.buf.extend_from_slice(b"HTTP/1.1 103 Early Hints\r\n");
        for (name, value) in hints {
            for single in value.iter() {
                write_header_lines(&mut self.buf, name, single);
            }
        }
        self.buf.extend_from_slice(b"\r\n");
        self.flush().await?;
        Ok(())
    }

    pub async fn send_response(
        &mut self,
        ctx: &ResponseContext,
        response: Response,
    ) -> Result<WriteOutcome, WriteError> {
        let head = render_head(ctx, &response);
        trace!(
            "writing {} response, {:?}, keep-alive: {}",
            response.status, head.framing, head.keep_alive
        );
        self.buf.extend_from_slice(&head.bytes);

        let chunks = match response.body {
            ResponseBody::Hijack(callback) => {
                self.flush().await?;
                return Ok(WriteOutcome::Hijack(callback));
            }
            ResponseBody::Chunks(chunks) => chunks,
            ResponseBody::Absent => Vec::new(),
        };

        let mut keep_alive = head.keep_alive;
        match head.framing {
            Framing::Bodiless => {}
            Framing::Length(len) => {
                let mut remaining = len;
                for chunk in &chunks {
                    let take = remaining.min(chunk.len() as u64) as usize;
                    self.put(&chunk[..take]).await?;
                    remaining -= take as u64;
                }
                if remaining > 0 {
                    // The body was shorter than announced, the client cannot find the end
                    keep_alive = false;
                }
            }
            Framing::Chunked => {
                // RFC 9112 - 7.1. Chunked Transfer Coding
                for chunk in chunks.iter().filter(|chunk| !chunk.is_empty()) {
                    let mut size = BytesMut::with_capacity(18);
                    let _ = write!(size, "{:x}\r\n", chunk.len());
                    self.put(&size).await?;
                    self.put(chunk).await?;
                    self.put(b"\r\n").await?;
                }
                self.put(b"0\r\n\r\n").await?;
            }
            Framing::Raw | Framing::CloseDelimited => {
                for chunk in &chunks {
                    self.put(chunk).await?;
                }
            }
            Framing::Hijack => {}
        }
        self.flush().await?;

        Ok(if keep_alive {
            WriteOutcome::KeepAlive
        } else {
            WriteOutcome::Close
        })
    }
}

#[cfg(test)]
mod tests {
    use uhsapi::http::StatusCode;

    use super::*;

    fn ctx(version: HttpVersion, keep_alive_requested: bool) -> ResponseContext {
        ResponseContext {
            version,
            is_head: false,
            keep_alive_requested,
            closing: false,
        }
    }

    fn head(ctx: ResponseContext) -> ResponseContext {
        ResponseContext {
            is_head: true,
            ..ctx
        }
    }

    async fn write(ctx: ResponseContext, response: Response) -> (String, bool) {
        let mut sender = Sender::new(Vec::new());
        let outcome = sender.send_response(&ctx, response).await.unwrap();
        let keep_alive = matches!(outcome, WriteOutcome::KeepAlive);
        (String::from_utf8(sender.into_inner()).unwrap(), keep_alive)
    }

    fn ok(chunks: &[&'static str]) -> Response {
        let mut response = Response::new(StatusCode::OK);
        response.body = ResponseBody::Chunks(
            chunks
                .iter()
                .map(|chunk| Bytes::from_static(chunk.as_bytes()))
                .collect(),
        );
        response
    }

    #[tokio::test]
    async fn head_keeps_content_length() {
        let response = Response::builder(StatusCode::OK)
            .header("Foo", "Bar")
            .body("hello")
            .build();
        let (out, _) = write(head(ctx(HttpVersion::HTTP_1_0, false)), response).await;
        assert_eq!(out, "HTTP/1.0 200 OK\r\nFoo: Bar\r\nContent-Length: 5\r\n\r\n");

        let (out, _) = write(head(ctx(HttpVersion::HTTP_1_0, false)), ok(&[""])).await;
        assert_eq!(out, "HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n");

        let (out, _) = write(head(ctx(HttpVersion::HTTP_1_0, false)), ok(&[])).await;
        assert_eq!(out, "HTTP/1.0 200 OK\r\n\r\n");

        let response = Response::builder(StatusCode::OK)
            .header("Content-Type", "application/pdf")
            .header("Content-Length", "4242")
            .build();
        let (out, _) = write(head(ctx(HttpVersion::HTTP_1_0, false)), response).await;
        assert_eq!(
            out,
            "HTTP/1.0 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: 4242\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn connection_markers() {
        let response = || {
            Response::builder(StatusCode::OK)
                .header("Content-Type", "plain/text")
                .body("hello")
                .build()
        };

        let (out, keep_alive) = write(ctx(HttpVersion::HTTP_1_1, false), response()).await;
        assert_eq!(
            out,
            "HTTP/1.1 200 OK\r\nContent-Type: plain/text\r\nConnection: close\r\nContent-Length: 5\r\n\r\nhello"
        );
        assert!(!keep_alive);

        let (out, keep_alive) = write(ctx(HttpVersion::HTTP_1_1, true), response()).await;
        assert_eq!(
            out,
            "HTTP/1.1 200 OK\r\nContent-Type: plain/text\r\nContent-Length: 5\r\n\r\nhello"
        );
        assert!(keep_alive);

        let (out, keep_alive) = write(ctx(HttpVersion::HTTP_1_0, true), response()).await;
        assert_eq!(
            out,
            "HTTP/1.0 200 OK\r\nContent-Type: plain/text\r\nConnection: Keep-Alive\r\nContent-Length: 5\r\n\r\nhello"
        );
        assert!(keep_alive);

        let (out, keep_alive) = write(ctx(HttpVersion::HTTP_1_0, false), response()).await;
        assert_eq!(
            out,
            "HTTP/1.0 200 OK\r\nContent-Type: plain/text\r\nContent-Length: 5\r\n\r\nhello"
        );
        assert!(!keep_alive);
    }

    #[tokio::test]
    async fn no_content() {
        let no_content = || Response::new(StatusCode::NO_CONTENT);

        let (out, _) = write(ctx(HttpVersion::HTTP_1_1, true), no_content()).await;
        assert_eq!(out, "HTTP/1.1 204 No Content\r\n\r\n");

        let (out, _) = write(ctx(HttpVersion::HTTP_1_1, false), no_content()).await;
        assert_eq!(out, "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n");

        let (out, _) = write(ctx(HttpVersion::HTTP_1_0, true), no_content()).await;
        assert_eq!(out, "HTTP/1.0 204 No Content\r\nConnection: Keep-Alive\r\n\r\n");

        let (out, _) = write(ctx(HttpVersion::HTTP_1_0, false), no_content()).await;
        assert_eq!(out, "HTTP/1.0 204 No Content\r\n\r\n");
    }

    #[tokio::test]
    async fn bodiless_status_passes_app_content_length() {
        let response = Response::builder(StatusCode::NO_CONTENT)
            .header("Content-Length", "7")
            .build();
        let (out, keep_alive) = write(ctx(HttpVersion::HTTP_1_1, true), response).await;
        assert_eq!(out, "HTTP/1.1 204 No Content\r\nContent-Length: 7\r\n\r\n");
        assert!(keep_alive);

        let response = Response::builder(StatusCode::NOT_MODIFIED)
            .header("Content-Length", "12")
            .build();
        let (out, _) = write(ctx(HttpVersion::HTTP_1_1, true), response).await;
        assert_eq!(out, "HTTP/1.1 304 Not Modified\r\nContent-Length: 12\r\n\r\n");
    }

    #[tokio::test]
    async fn unparsable_content_length_is_sent_as_given() {
        let response = Response::builder(StatusCode::OK)
            .header("Content-Length", "five")
            .body("hello")
            .build();
        let (out, keep_alive) = write(ctx(HttpVersion::HTTP_1_1, true), response).await;
        assert_eq!(out, "HTTP/1.1 200 OK\r\nContent-Length: five\r\n\r\nhello");
        assert!(!keep_alive);
    }

    #[tokio::test]
    async fn custom_status() {
        let mut response = ok(&[""]);
        response.status = StatusCode::from_u16(449).unwrap();
        let (out, _) = write(ctx(HttpVersion::HTTP_1_1, false), response).await;
        assert_eq!(
            out,
            "HTTP/1.1 449 CUSTOM\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn chunked_when_length_unknown() {
        let (out, keep_alive) =
            write(ctx(HttpVersion::HTTP_1_1, true), ok(&["hello", "", " world"])).await;
        assert_eq!(
            out,
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"
        );
        assert!(keep_alive);

        let (out, _) = write(ctx(HttpVersion::HTTP_1_1, true), ok(&["", ""])).await;
        assert_eq!(out, "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    }

    #[tokio::test]
    async fn close_delimited_and_totals() {
        let (out, keep_alive) = write(ctx(HttpVersion::HTTP_1_1, false), ok(&["a", "b"])).await;
        assert_eq!(out, "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nab");
        assert!(!keep_alive);

        let (out, keep_alive) = write(ctx(HttpVersion::HTTP_1_0, true), ok(&["a", "b"])).await;
        assert_eq!(
            out,
            "HTTP/1.0 200 OK\r\nConnection: Keep-Alive\r\nContent-Length: 2\r\n\r\nab"
        );
        assert!(keep_alive);
    }

    #[tokio::test]
    async fn short_body_closes() {
        let mut response = ok(&["abc"]);
        response.headers.append("Content-Length", "10");
        let (out, keep_alive) = write(ctx(HttpVersion::HTTP_1_1, true), response).await;
        assert_eq!(out, "HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc");
        assert!(!keep_alive);

        let mut response = ok(&["abcdef"]);
        response.headers.append("Content-Length", "3");
        let (out, _) = write(ctx(HttpVersion::HTTP_1_1, true), response).await;
        assert_eq!(out, "HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc");
    }

    #[tokio::test]
    async fn response_connection_close_wins() {
        let mut response = ok(&["x"]);
        response.headers.append("Connection", "close");
        let (out, keep_alive) = write(ctx(HttpVersion::HTTP_1_1, true), response).await;
        assert_eq!(
            out,
            "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 1\r\n\r\nx"
        );
        assert!(!keep_alive);

        let closing = ResponseContext {
            closing: true,
            ..ctx(HttpVersion::HTTP_1_1, true)
        };
        let (_, keep_alive) = write(closing, ok(&["x"])).await;
        assert!(!keep_alive);
    }

    #[tokio::test]
    async fn header_values() {
        let response = Response::builder(StatusCode::OK)
            .header("X-Empty-Header", "")
            .header("Set-Cookie", "a=1\nb=2\r\n")
            .build();
        let (out, _) = write(head(ctx(HttpVersion::HTTP_1_0, false)), response).await;
        assert_eq!(
            out,
            "HTTP/1.0 200 OK\r\nX-Empty-Header: \r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn hijack_writes_head_only() {
        let response = Response::builder(StatusCode::OK)
            .content_length(5)
            .hijack(|_io| async {})
            .build();
        let mut sender = Sender::new(Vec::new());
        let outcome = sender
            .send_response(&ctx(HttpVersion::HTTP_1_0, false), response)
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Hijack(_)));
        assert_eq!(
            String::from_utf8(sender.into_inner()).unwrap(),
            "HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn early_hints_block() {
        let mut hints = HeaderMap::new();
        hints.append(
            "Link",
            "</style.css>; rel=preload; as=style\n</script.js>; rel=preload",
        );
        let mut sender = Sender::new(Vec::new());
        sender.send_early_hints(&hints).await.unwrap();
        assert_eq!(
            String::from_utf8(sender.into_inner()).unwrap(),
            "HTTP/1.1 103 Early Hints\r\nLink: </style.css>; rel=preload; as=style\r\nLink: </script.js>; rel=preload\r\n\r\n"
        );
    }

    #[test]
    fn classifies_errors() {
        let err = WriteError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(err, WriteError::PeerGone(_)));
        let err = WriteError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, WriteError::Io(_)));
    }
}
