use std::{ops::Range, time::Instant};

use crate::http::{
    header::{
        ContentLength, EncodingKind, Expect, ExpectKind, HeaderMap, HeaderName, TransferEncoding,
    },
    method::Method,
    request::{Request, RequestTarget},
};

mod body;
mod chunked;
mod error;
mod line;
pub use body::BodyDecoder;
use bytes::{Buf, Bytes, BytesMut};
pub use chunked::ChunkedDecoder;
pub use error::*;
pub use line::RequestLine;
use log::trace;
use memchr::{memchr, memchr2};
use smallvec::SmallVec;
use tokio::io::{AsyncRead, AsyncReadExt};

pub type HttpParseResult<T> = Result<T, HttpParseError>;

/// Size limits applied while reading a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Request line plus all header lines
    pub max_header_bytes: usize,
    pub max_target: usize,
    pub max_header_count: usize,
    /// Longest accepted chunk size line, extensions included
    pub max_chunk_line: usize,
    pub max_trailer_bytes: usize,
    /// Bodies are read into memory before dispatch. `None`, the default, means unbounded: a
    /// client can make the server buffer as much as it declares, so set this when clients are
    /// not trusted. Larger bodies are answered with 413.
    pub max_body_bytes: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: 112 * 1024,
            max_target: 12 * 1024,
            max_header_count: 128,
            max_chunk_line: 4096,
            max_trailer_bytes: 16 * 1024,
            max_body_bytes: None,
        }
    }
}

/// A single line of a buffered request head, without its line terminator
pub struct ReaderLine<'a> {
    buf: &'a [u8],
    line_start: usize,
    line_end: usize,
}

impl<'a> ReaderLine<'a> {
    pub fn new(buf: &'a [u8], line_start: usize, line_end: usize) -> Self {
        Self {
            buf,
            line_start,
            line_end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Returns the range of the next word (everything before the next space, or the end of the
    /// line), and advances the start of the line
    pub fn next_word(&mut self) -> Option<Range<usize>> {
        if self.line_start >= self.line_end {
            return None;
        }

        let start = self.line_start;
        if let Some(sp) = memchr2(b' ', b'\t', self.as_slice()) {
            self.line_start += sp + 1;
            Some(start..start + sp)
        } else {
            let end = self.line_end;
            self.line_start = end;
            Some(start..end)
        }
    }

    pub fn as_slice(&self) -> &'a [u8] {
        &self.buf[self.range()]
    }

    pub fn range(&self) -> Range<usize> {
        self.line_start..self.line_end
    }

    pub fn next(&mut self, byte: u8) -> Option<Range<usize>> {
        if self.line_start >= self.line_end {
            return None;
        }
        let start = self.line_start;
        let split = memchr(byte, self.as_slice())? + start;
        self.line_start = split + 1;
        Some(start..split)
    }

    pub fn trim(&self) -> Range<usize> {
        const WHITESPACE: &[u8] = b" \t";
        let mut start = self.line_start;
        let mut end = self.line_end;
        while start < end && WHITESPACE.contains(&self.buf[start]) {
            start += 1;
        }

        while end > start && WHITESPACE.contains(&self.buf[end - 1]) {
            end -= 1;
        }

        start..end
    }
}

/// Splits a complete request head into lines
struct HeadLines<'a> {
    buf: &'a [u8],
    cursor: usize,
    count: usize,
}

impl<'a> HeadLines<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            cursor: 0,
            count: 0,
        }
    }

    fn next_line(&mut self) -> Option<ReaderLine<'a>> {
        let line_start = self.cursor;
        let nl = memchr(b'\n', &self.buf[line_start..])? + line_start;
        self.cursor = nl + 1;
        self.count += 1;
        let line_end = if nl > line_start && self.buf[nl - 1] == b'\r' {
            nl - 1
        } else {
            nl
        };
        Some(ReaderLine::new(self.buf, line_start, line_end))
    }
}

/// An incremental HTTP/1.x request parser.
///
/// The parser owns the connection's read buffer but not the connection: callers [`fill`] it from
/// whatever stream they hold and call [`parse_request`] until a request head is complete. Bytes
/// past the head stay buffered for the body decoder and pipelined requests.
///
/// [`fill`]: Parser::fill
/// [`parse_request`]: Parser::parse_request
pub struct Parser {
    buf: BytesMut,
    /// Scan position, the buffer before it holds complete non-empty lines of the current head
    cursor: usize,
    started: Option<Instant>,
    limits: Limits,
}

impl Parser {
    const BUF_SIZE: usize = 8192;

    pub fn new(limits: Limits) -> Self {
        Self {
            buf: BytesMut::with_capacity(Self::BUF_SIZE),
            cursor: 0,
            started: None,
            limits,
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Performs a single read into the buffer, returning the number of bytes read (0 on EOF)
    pub async fn fill<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> std::io::Result<usize> {
        self.buf.reserve(Self::BUF_SIZE);
        let n = reader.read_buf(&mut self.buf).await?;
        if n > 0 {
            self.started.get_or_insert_with(Instant::now);
        }
        Ok(n)
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Removes and returns everything currently buffered
    pub fn take_buffered(&mut self) -> Bytes {
        self.cursor = 0;
        self.started = None;
        self.buf.split().freeze()
    }

    /// Feeds buffered bytes to `decoder`, dropping the bytes it consumed
    pub fn decode_body(
        &mut self,
        decoder: &mut BodyDecoder,
        body: &mut BytesMut,
    ) -> HttpParseResult<()> {
        let n = decoder.decode(&self.buf, body)?;
        self.buf.advance(n);
        if decoder.is_done() {
            // The next request is timed from its own first byte
            self.started = None;
        }
        Ok(())
    }

    /// Parses a request head out of the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed.
    pub fn parse_request(&mut self) -> HttpParseResult<Option<Request>> {
        // RFC 9112 - 2.2. Message Parsing
        // A server SHOULD ignore at least one empty line received prior to the request-line
        if self.cursor == 0 {
            let blank = self
                .buf
                .iter()
                .take_while(|b| matches!(b, b'\r' | b'\n'))
                .count();
            self.buf.advance(blank);
        }
        if self.buf.is_empty() {
            return Ok(None);
        }
        self.started.get_or_insert_with(Instant::now);

        let Some(head_len) = self.find_head_end()? else {
            return Ok(None);
        };
        let head = self.buf.split_to(head_len).freeze();
        self.cursor = 0;
        let started = self.started.take().unwrap_or_else(Instant::now);
        self.parse_head(head, started).map(Some)
    }

    /// Scans for the empty line ending the head, resuming where the previous call stopped
    fn find_head_end(&mut self) -> HttpParseResult<Option<usize>> {
        let max = self.limits.max_header_bytes;
        loop {
            let Some(nl) = memchr(b'\n', &self.buf[self.cursor..]) else {
                if self.buf.len() > max {
                    return Err(HttpParseError::too_large(
                        LimitKind::HeaderBytesTotal,
                        max,
                        self.buf.len(),
                        Location::Headers,
                    ));
                }
                return Ok(None);
            };
            let line_start = self.cursor;
            self.cursor += nl + 1;
            if self.cursor > max {
                return Err(HttpParseError::too_large(
                    LimitKind::HeaderBytesTotal,
                    max,
                    self.cursor,
                    Location::Headers,
                ));
            }
            let line = &self.buf[line_start..line_start + nl];
            if line_start > 0 && matches!(line, b"" | b"\r") {
                return Ok(Some(self.cursor));
            }
        }
    }

    fn parse_head(&self, head: Bytes, started: Instant) -> HttpParseResult<Request> {
        // RFC 9112 - 2.1. Message Format
        // ABNF:
        //  HTTP-message = start-line CRLF *( field-line CRLF ) CRLF [ message-body ]
        let mut lines = HeadLines::new(&head);
        let request_line = match lines.next_line() {
            Some(line) => RequestLine::parse(line)?,
            None => {
                return Err(HttpParseError::new(
                    ParseErrorKind::MalformedRequestLine,
                    Location::StartLine,
                    0,
                ));
            }
        };

        let mut fields = SmallVec::<[(HeaderName, Bytes); 32]>::new();
        while let Some(mut line) = lines.next_line() {
            if line.is_empty() {
                break;
            }
            let make_err = |kind: ParseErrorKind, offset: usize| {
                HttpParseError::new(kind, Location::Headers, offset).with_line(lines.count)
            };

            if memchr2(b' ', b'\t', line.as_slice()) == Some(0) {
                // RFC 9112 - 5.2. Obsolete Line Folding
                // The continuation replaces the line break with a single space
                let Some((_, value)) = fields.last_mut() else {
                    return Err(make_err(ParseErrorKind::MalformedHeaderLine, line.line_start));
                };
                let continuation = &head[line.trim()];
                let mut joined = BytesMut::with_capacity(value.len() + continuation.len() + 1);
                joined.extend_from_slice(value);
                if !value.is_empty() && !continuation.is_empty() {
                    joined.extend_from_slice(b" ");
                }
                joined.extend_from_slice(continuation);
                *value = joined.freeze();
                continue;
            }

            if fields.len() >= self.limits.max_header_count {
                return Err(HttpParseError::too_large(
                    LimitKind::HeaderCount,
                    self.limits.max_header_count,
                    fields.len() + 1,
                    Location::Headers,
                ));
            }

            // RFC 9112 - 5. Field Syntax
            // ABNF: field-line = field-name ":" OWS field-value OWS
            let name = line
                .next(b':')
                .ok_or_else(|| make_err(ParseErrorKind::MalformedHeaderLine, line.line_start))?;
            let name_start = name.start;
            let name = HeaderName::try_from(&head[name])
                .map_err(|_| make_err(ParseErrorKind::InvalidHeaderName, name_start))?;
            let value = line.trim();
            if let Some(bad) = head[value.clone()]
                .iter()
                .position(|b| matches!(b, b'\r' | b'\0'))
            {
                return Err(make_err(
                    ParseErrorKind::InvalidHeaderValue,
                    value.start + bad,
                ));
            }
            fields.push((name, head.slice(value)));
        }

        let mut headers = HeaderMap::with_capacity(fields.len());
        for (name, value) in fields {
            headers.append(name, value);
        }

        let method = Method::try_from(head.slice(request_line.method.clone())).map_err(|_| {
            HttpParseError::new(
                ParseErrorKind::InvalidMethod,
                Location::StartLine,
                request_line.method.start,
            )
        })?;

        let raw_target = head.slice(request_line.target.clone());
        if raw_target.len() > self.limits.max_target {
            return Err(HttpParseError::too_large(
                LimitKind::PathBytes,
                self.limits.max_target,
                raw_target.len(),
                Location::StartLine,
            ));
        }
        let target = RequestTarget::try_from(&raw_target).map_err(|_| {
            HttpParseError::new(
                ParseErrorKind::InvalidTarget,
                Location::StartLine,
                request_line.target.start,
            )
        })?;

        let body = body_decoder(&headers, &self.limits);
        let expects_continue = matches!(headers.get_header::<Expect>(), Ok(Some(ExpectKind::Continue)));
        trace!(
            "parsed {} {} {} ({} headers, {:?} body)",
            method,
            target,
            request_line.version,
            headers.len(),
            body
        );

        Ok(Request {
            method,
            target,
            version: request_line.version,
            headers,
            body,
            expects_continue,
            started,
        })
    }
}

/// Selects the body framing
/// RFC 9112 - 6.3. Message Body Length
fn body_decoder(headers: &HeaderMap, limits: &Limits) -> BodyDecoder {
    // Chunked wins over any Content-Length
    if let Ok(Some(EncodingKind::Chunked)) = headers.get_header::<TransferEncoding>() {
        return BodyDecoder::Chunked(ChunkedDecoder::new(
            limits.max_chunk_line,
            limits.max_trailer_bytes,
        ));
    }
    match headers.get_header::<ContentLength>() {
        Ok(Some(len)) => BodyDecoder::length(len),
        // An unusable Content-Length is treated as no body
        _ => BodyDecoder::Empty,
    }
}

#[cfg(test)]
mod tests {
    mod reader {
        use crate::http::parser::ReaderLine;

        fn line(content: &'static str) -> ReaderLine<'static> {
            let end = content.as_bytes().iter().position(|b| *b == b'\n').unwrap();
            ReaderLine::new(content.as_bytes(), 0, end)
        }

        #[test]
        fn line_next_word() {
            let mut line = line("this is a test a\n");
            assert_eq!(line.next_word(), Some(0..4));
            assert_eq!(line.next_word(), Some(5..7));
            assert_eq!(line.next_word(), Some(8..9));
            assert_eq!(line.next_word(), Some(10..14));
            assert_eq!(line.next_word(), Some(15..16));
            assert_eq!(line.next_word(), None);
        }

        #[test]
        fn line_next() {
            let mut line = line("name: value: a\n");
            assert_eq!(line.next(b':'), Some(0..4));
            assert_eq!(line.as_slice(), b" value: a");
        }

        #[test]
        fn line_trim() {
            let line = line(" \t\tvalue with spaces\t \t\n");
            assert_eq!(line.trim(), 3..20);
        }
    }

    mod parser {
        use std::time::Duration;

        use bytes::{Bytes, BytesMut};
        use tokio::sync::mpsc;

        use crate::{
            http::{
                HttpVersion,
                method::Method,
                parser::{
                    BodyDecoder, HttpParseResult, LimitKind, Limits, ParseErrorKind, Parser,
                },
                request::Request,
            },
            sync::ChannelReader,
        };

        fn parse_all(data: &[u8]) -> HttpParseResult<Option<Request>> {
            let mut parser = Parser::new(Limits::default());
            parser.buf.extend_from_slice(data);
            parser.parse_request()
        }

        #[test]
        fn simple_get() {
            let request = parse_all(b"GET /hello?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n")
                .unwrap()
                .unwrap();
            assert_eq!(request.method, Method::GET);
            assert_eq!(request.target.path(), "/hello");
            assert_eq!(request.target.query(), Some("x=1"));
            assert_eq!(request.version, HttpVersion::HTTP_1_1);
            assert_eq!(request.headers.get_str("host").as_deref(), Some("example.com"));
            assert!(matches!(request.body, BodyDecoder::Empty));
            assert!(!request.expects_continue);
        }

        #[test]
        fn incomplete_head() {
            assert!(parse_all(b"GET / HTTP/1.1\r\nHost: exa").unwrap().is_none());
            assert!(parse_all(b"").unwrap().is_none());
            assert!(parse_all(b"\r\n\r\n").unwrap().is_none());
        }

        #[test]
        fn skips_leading_empty_lines() {
            let request = parse_all(b"\r\n\r\nGET / HTTP/1.0\r\n\r\n").unwrap().unwrap();
            assert_eq!(request.version, HttpVersion::HTTP_1_0);
        }

        #[test]
        fn bare_lf_line_endings() {
            let request = parse_all(b"GET / HTTP/1.1\nX-A: 1\n\n").unwrap().unwrap();
            assert_eq!(request.headers.get_str("x-a").as_deref(), Some("1"));
        }

        #[test]
        fn duplicate_and_empty_headers() {
            let request = parse_all(
                b"GET / HTTP/1.1\r\nX-Forwarded-For: 1.1.1.1\r\nx-forwarded-for: 2.2.2.2\r\nX-Empty:\r\n\r\n",
            )
            .unwrap()
            .unwrap();
            assert_eq!(
                request.headers.get_str("X-Forwarded-For").as_deref(),
                Some("1.1.1.1, 2.2.2.2")
            );
            assert_eq!(request.headers.get_str("X-Empty").as_deref(), Some(""));
        }

        #[test]
        fn obsolete_line_folding() {
            let request = parse_all(b"GET / HTTP/1.1\r\nX-Long: first\r\n  second\r\n\tthird\r\n\r\n")
                .unwrap()
                .unwrap();
            assert_eq!(
                request.headers.get_str("x-long").as_deref(),
                Some("first second third")
            );

            let err = parse_all(b"GET / HTTP/1.1\r\n folded\r\n\r\n").unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::MalformedHeaderLine);
        }

        #[test]
        fn header_errors() {
            let err = parse_all(b"GET / HTTP/1.1\r\nNoColon\r\n\r\n").unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::MalformedHeaderLine);
            assert_eq!(err.line, Some(2));

            let err = parse_all(b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n").unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::InvalidHeaderName);

            let err = parse_all(b"GET / HTTP/1.1\r\nX: a\rb\r\n\r\n").unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::InvalidHeaderValue);
        }

        #[test]
        fn start_line_errors() {
            let err = parse_all(b"GET\r\n\r\n").unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::MalformedRequestLine);

            let err = parse_all(b"G(T / HTTP/1.1\r\n\r\n").unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::InvalidMethod);

            let err = parse_all(b"GET nope HTTP/1.1\r\n\r\n").unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::InvalidTarget);

            let err = parse_all(b"GET / HTTP/3.0\r\n\r\n").unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::VersionNotSupported);
        }

        #[test]
        fn limits() {
            let limits = Limits {
                max_header_bytes: 64,
                max_target: 8,
                max_header_count: 2,
                ..Limits::default()
            };

            let mut parser = Parser::new(limits);
            parser.buf.extend_from_slice(b"GET /0123456789 HTTP/1.1\r\n\r\n");
            let err = parser.parse_request().unwrap_err();
            assert!(matches!(
                err.kind,
                ParseErrorKind::TooLarge {
                    what: LimitKind::PathBytes,
                    ..
                }
            ));

            let mut parser = Parser::new(limits);
            parser
                .buf
                .extend_from_slice(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n");
            let err = parser.parse_request().unwrap_err();
            assert!(matches!(
                err.kind,
                ParseErrorKind::TooLarge {
                    what: LimitKind::HeaderCount,
                    ..
                }
            ));

            // Without a line break the head can never complete
            let mut parser = Parser::new(limits);
            parser.buf.extend_from_slice(&[b'a'; 65]);
            let err = parser.parse_request().unwrap_err();
            assert!(matches!(
                err.kind,
                ParseErrorKind::TooLarge {
                    what: LimitKind::HeaderBytesTotal,
                    ..
                }
            ));
        }

        #[test]
        fn body_strategy() {
            let request = parse_all(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n")
                .unwrap()
                .unwrap();
            assert!(matches!(request.body, BodyDecoder::Length { remaining: 5 }));

            let request = parse_all(
                b"POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding:  Chunked \r\n\r\n",
            )
            .unwrap()
            .unwrap();
            assert!(request.body.is_chunked());

            let request = parse_all(b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n")
                .unwrap()
                .unwrap();
            assert!(matches!(request.body, BodyDecoder::Empty));

            let request = parse_all(b"POST / HTTP/1.1\r\nExpect: 100-Continue\r\n\r\n")
                .unwrap()
                .unwrap();
            assert!(request.expects_continue);
        }

        #[test]
        fn pipelined_requests() {
            let mut parser = Parser::new(Limits::default());
            parser.buf.extend_from_slice(
                b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /b HTTP/1.1\r\n\r\n",
            );
            let mut first = parser.parse_request().unwrap().unwrap();
            let mut body = BytesMut::new();
            parser.decode_body(&mut first.body, &mut body).unwrap();
            assert!(first.body.is_done());
            assert_eq!(&body[..], b"abc");

            let second = parser.parse_request().unwrap().unwrap();
            assert_eq!(second.target.path(), "/b");
            assert!(parser.is_empty());
        }

        #[tokio::test]
        async fn fragmented_reads() {
            const REQUEST: &[u8] =
                b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
            let (tx, rx) = mpsc::channel::<Bytes>(REQUEST.len());
            tokio::spawn(async move {
                for piece in REQUEST.chunks(3) {
                    tx.send(Bytes::from_static(piece)).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            });
            let mut reader = ChannelReader::new(rx);
            let mut parser = Parser::new(Limits::default());

            let mut request = loop {
                if let Some(request) = parser.parse_request().unwrap() {
                    break request;
                }
                assert_ne!(parser.fill(&mut reader).await.unwrap(), 0);
            };
            assert_eq!(request.target.path(), "/upload");

            let mut body = BytesMut::new();
            loop {
                parser.decode_body(&mut request.body, &mut body).unwrap();
                if request.body.is_done() {
                    break;
                }
                assert_ne!(parser.fill(&mut reader).await.unwrap(), 0);
            }
            assert_eq!(&body[..], b"hello");
            assert_eq!(parser.fill(&mut reader).await.unwrap(), 0);
        }
    }
}
