use std::{
    fmt,
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use log::debug;
use tokio::io::{AsyncRead, ReadBuf};

use crate::{
    config::{RemoteAddress, ServerConfig},
    http::{
        HttpVersion,
        header::{HeaderMap, HeaderName, HeaderValue, Host},
        method::Method,
        request::Request,
        response::Sender,
    },
    io::{ConnectionInfo, Hijacked, SocketSlot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlScheme {
    Http,
    Https,
}

impl UrlScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for UrlScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request body, fully received before the application is called
#[derive(Debug, Clone, Default)]
pub struct RequestBody {
    data: Bytes,
    pos: usize,
}

impl RequestBody {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Copies the next bytes into `buf`, returning how many were copied (0 at the end)
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let rest = &self.data[self.pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        n
    }

    /// Everything not read yet
    pub fn read_to_end(&mut self) -> Bytes {
        let rest = self.data.slice(self.pos..);
        self.pos = self.data.len();
        rest
    }

    /// Total length of the body, independent of how much was read
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }
}

impl AsyncRead for RequestBody {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let n = self.get_mut().read(buf.initialize_unfilled());
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

/// Writes `103 Early Hints` responses ahead of the final response
#[derive(Clone)]
pub struct EarlyHints {
    slot: SocketSlot,
}

impl fmt::Debug for EarlyHints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EarlyHints").finish_non_exhaustive()
    }
}

impl EarlyHints {
    /// Sends `hints` right away. Does nothing if the client is gone or the socket was taken.
    /// RFC 8297 - 2. 103 Early Hints
    pub async fn send(&self, hints: &HeaderMap) {
        let mut guard = self.slot.lock().await;
        let Some(io) = guard.as_mut() else {
            debug!("early hints dropped, the socket was hijacked");
            return;
        };
        if let Err(err) = Sender::new(io).send_early_hints(hints).await {
            debug!("early hints dropped: {err}");
        }
    }
}

/// Lets the application take the raw socket of a request
#[derive(Clone)]
pub struct Hijack {
    slot: SocketSlot,
    read_buf: Bytes,
}

impl fmt::Debug for Hijack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hijack")
            .field("read_buf", &self.read_buf)
            .finish_non_exhaustive()
    }
}

impl Hijack {
    /// Takes the socket. The server will not write a response for this request and will not
    /// touch the connection again. Returns `None` if it was already taken.
    pub async fn take(&self) -> Option<Hijacked> {
        let io = self.slot.take().await?;
        Some(Hijacked {
            io,
            read_buf: self.read_buf.clone(),
        })
    }
}

/// The request as seen by the application
#[derive(Debug, Clone)]
pub struct Env {
    pub method: Method,
    /// The request target exactly as received
    pub request_uri: String,
    pub path: String,
    /// The query string without the `?`, empty when there is none
    pub query: String,
    pub version: HttpVersion,
    pub headers: HeaderMap,
    pub input: RequestBody,
    pub url_scheme: UrlScheme,
    pub server_name: String,
    pub server_port: u16,
    pub remote_addr: String,
    pub peer_addr: SocketAddr,
    /// Time from the first byte of the request until its body was complete
    pub request_body_wait: Duration,
    early_hints: Option<EarlyHints>,
    hijack: Hijack,
}

fn value_is(value: Option<&HeaderValue>, expected: &str) -> bool {
    value.is_some_and(|value| {
        value
            .combined()
            .trim_ascii()
            .eq_ignore_ascii_case(expected.as_bytes())
    })
}

fn starts_with_ignore_case(value: &[u8], prefix: &[u8]) -> bool {
    value.len() >= prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Whether a proxy in front of the server says the client connected over https
pub fn forwarded_https(headers: &HeaderMap) -> bool {
    if value_is(headers.get(HeaderName::X_FORWARDED_SSL), "on")
        || value_is(headers.get(HeaderName::X_FORWARDED_SCHEME), "https")
    {
        return true;
    }

    if let Some(proto) = headers.get(HeaderName::X_FORWARDED_PROTO)
        && proto
            .elements()
            .next()
            .is_some_and(|first| starts_with_ignore_case(first, b"https"))
    {
        return true;
    }

    // RFC 7239 - 4. Forwarded HTTP Header Field
    headers
        .get(HeaderName::FORWARDED)
        .and_then(|forwarded| forwarded.elements().next())
        .is_some_and(|first| {
            first.split(|b| *b == b';').any(|pair| {
                let Some(eq) = memchr::memchr(b'=', pair) else {
                    return false;
                };
                let (key, value) = (pair[..eq].trim_ascii(), pair[eq + 1..].trim_ascii());
                let value = value
                    .strip_prefix(b"\"")
                    .and_then(|v| v.strip_suffix(b"\""))
                    .unwrap_or(value);
                key.eq_ignore_ascii_case(b"proto") && value.eq_ignore_ascii_case(b"https")
            })
        })
}

/// The port clients reach the server on when the Host header does not name one
pub fn default_server_port(headers: &HeaderMap, tls: bool) -> u16 {
    if tls || forwarded_https(headers) {
        443
    } else {
        80
    }
}

fn remote_addr(policy: &RemoteAddress, headers: &HeaderMap, peer: SocketAddr) -> String {
    match policy {
        RemoteAddress::Socket => peer.ip().to_string(),
        RemoteAddress::Header(name) => headers
            .get_str(name)
            .unwrap_or_else(|| peer.ip().to_string()),
        RemoteAddress::Value(value) => value.clone(),
    }
}

impl Env {
    pub(crate) fn build(
        request: Request,
        input: Bytes,
        conn: &ConnectionInfo,
        config: &ServerConfig,
        request_body_wait: Duration,
        slot: &SocketSlot,
        read_buf: Bytes,
    ) -> Self {
        let headers = request.headers;
        let https = forwarded_https(&headers);

        let (server_name, server_port) = match headers.get_header::<Host>() {
            Ok(Some(host)) => (
                host.host.to_string(),
                host.port
                    .unwrap_or_else(|| default_server_port(&headers, conn.tls)),
            ),
            // Unparsable Host: keep what was sent as the name
            Err(_) => (
                headers.get_str(HeaderName::HOST).unwrap_or_default(),
                default_server_port(&headers, conn.tls),
            ),
            Ok(None) => (
                "localhost".to_string(),
                if https { 443 } else { conn.local.port() },
            ),
        };

        Self {
            method: request.method,
            request_uri: request.target.as_str().to_string(),
            path: request.target.path().to_string(),
            query: request.target.query().unwrap_or_default().to_string(),
            version: request.version,
            input: RequestBody::new(input),
            url_scheme: if https || conn.tls {
                UrlScheme::Https
            } else {
                UrlScheme::Http
            },
            server_name,
            server_port,
            remote_addr: remote_addr(&config.remote_address, &headers, conn.peer),
            peer_addr: conn.peer,
            request_body_wait,
            early_hints: config.early_hints.then(|| EarlyHints { slot: slot.clone() }),
            hijack: Hijack {
                slot: slot.clone(),
                read_buf,
            },
            headers,
        }
    }

    /// `None` unless early hints are enabled in the server config
    pub fn early_hints(&self) -> Option<&EarlyHints> {
        self.early_hints.as_ref()
    }

    pub fn hijack(&self) -> &Hijack {
        &self.hijack
    }
}
