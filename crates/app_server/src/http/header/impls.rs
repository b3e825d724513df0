use std::num::ParseIntError;

use crate::http::{
    header::HeaderName,
    uri::{MalformedUriError, UriHost, UriPort},
};
use bytes::Bytes;
use uhsapi::ascii::InvalidAsciiError;

use super::HeaderValue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderParseError {
    #[error(transparent)]
    InvalidUri(#[from] MalformedUriError),
    #[error(transparent)]
    InvalidInt(#[from] ParseIntError),
    #[error(transparent)]
    InvalidAscii(#[from] InvalidAsciiError),
    #[error("conflicting values")]
    Conflicting,
    #[error("empty value")]
    Empty,
}

pub trait HeaderField {
    const NAME: HeaderName;
    type Output: HeaderValueTrait;

    fn parse(value: &HeaderValue) -> Result<Self::Output, HeaderParseError> {
        Self::Output::from_header_value(value)
    }
}

pub trait HeaderValueTrait: Sized {
    fn from_header_value(value: &HeaderValue) -> Result<Self, HeaderParseError>;
}

macro_rules! header_struct {
    ($name: ident, $constant: ident, $ty: ty) => {
        pub struct $name;

        impl HeaderField for $name {
            const NAME: HeaderName = HeaderName::$constant;
            type Output = $ty;
        }
    };
}

fn single(value: &HeaderValue) -> Result<&Bytes, HeaderParseError> {
    match &value[..] {
        [] => Err(HeaderParseError::Empty),
        [single] => Ok(single),
        [first, rest @ ..] => {
            // Repeated identical values are harmless, anything else is ambiguous
            if rest.iter().all(|other| other == first) {
                Ok(first)
            } else {
                Err(HeaderParseError::Conflicting)
            }
        }
    }
}

/// A Host With Port, for the Host header
/// RFC 9110 - 7.2. Host and :authority
/// ABNF: Host = uri-host [ ":" port ]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostWithPort {
    /// The Host
    /// See [`UriHost`]
    pub host: UriHost,
    /// The Port
    /// See [`UriPort`]
    pub port: Option<UriPort>,
}

impl HeaderValueTrait for HostWithPort {
    fn from_header_value(value: &HeaderValue) -> Result<Self, HeaderParseError> {
        let s = std::str::from_utf8(single(value)?).map_err(|_| InvalidAsciiError)?;
        let s = s.trim();
        if s.is_empty() {
            return Err(HeaderParseError::Empty);
        }

        if let Some((host, port)) = s.rsplit_once(':') {
            // An IPv6 literal without port contains colons but ends with the bracket
            if !port.contains(']') {
                let port = if port.is_empty() {
                    None
                } else {
                    Some(port.parse()?)
                };
                return Ok(Self {
                    host: host.parse()?,
                    port,
                });
            }
        }
        Ok(Self {
            host: s.parse()?,
            port: None,
        })
    }
}

impl HeaderValueTrait for u64 {
    fn from_header_value(value: &HeaderValue) -> Result<Self, HeaderParseError> {
        let raw = single(value)?.trim_ascii();
        // u64::from_str accepts a leading '+', which Content-Length does not
        if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
            return Err(HeaderParseError::InvalidAscii(InvalidAsciiError));
        }
        // SAFETY: all bytes are ascii digits
        let s = unsafe { std::str::from_utf8_unchecked(raw) };
        Ok(s.parse()?)
    }
}

/// The transfer coding applied to a request body
/// RFC 9112 - 6.1. Transfer-Encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingKind {
    Chunked,
    Other(Bytes),
}

impl HeaderValueTrait for EncodingKind {
    fn from_header_value(value: &HeaderValue) -> Result<Self, HeaderParseError> {
        let combined = value.combined();
        if combined.trim_ascii().eq_ignore_ascii_case(b"chunked") {
            Ok(Self::Chunked)
        } else {
            Ok(Self::Other(combined))
        }
    }
}

/// The connection options of a message
/// RFC 9110 - 7.6.1. Connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub close: bool,
    pub keep_alive: bool,
    pub upgrade: bool,
}

impl HeaderValueTrait for ConnectionOptions {
    fn from_header_value(value: &HeaderValue) -> Result<Self, HeaderParseError> {
        let mut options = Self::default();
        for token in value.elements() {
            if token.eq_ignore_ascii_case(b"close") {
                options.close = true;
            } else if token.eq_ignore_ascii_case(b"keep-alive") {
                options.keep_alive = true;
            } else if token.eq_ignore_ascii_case(b"upgrade") {
                options.upgrade = true;
            }
        }
        Ok(options)
    }
}

/// RFC 9110 - 10.1.1. Expect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectKind {
    Continue,
    Other(Bytes),
}

impl HeaderValueTrait for ExpectKind {
    fn from_header_value(value: &HeaderValue) -> Result<Self, HeaderParseError> {
        let combined = value.combined();
        if combined.trim_ascii().eq_ignore_ascii_case(b"100-continue") {
            Ok(Self::Continue)
        } else {
            Ok(Self::Other(combined))
        }
    }
}

header_struct!(Host, HOST, HostWithPort);
header_struct!(ContentLength, CONTENT_LENGTH, u64);
header_struct!(TransferEncoding, TRANSFER_ENCODING, EncodingKind);
header_struct!(Connection, CONNECTION, ConnectionOptions);
header_struct!(Expect, EXPECT, ExpectKind);
