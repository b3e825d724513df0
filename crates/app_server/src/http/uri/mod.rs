use std::{
    fmt,
    net::{AddrParseError, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use uhsapi::ascii::{AsAsciiStr, AsciiString, InvalidAsciiError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedUriError {
    #[error("invalid IPv6 address")]
    InvalidAddress(#[from] AddrParseError),
    #[error(transparent)]
    InvalidAscii(#[from] InvalidAsciiError),
    #[error("empty host")]
    EmptyHost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpLiteral {
    Ipv6(Ipv6Addr),
    IpvFuture(AsciiString),
}

impl IpLiteral {
    fn from_str(s: &str) -> Result<Option<Self>, MalformedUriError> {
        let Some(inner) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) else {
            return Ok(None);
        };
        Ok(Some(if inner.starts_with('v') || inner.starts_with('V') {
            Self::IpvFuture(inner.as_ascii_str()?.to_ascii_string())
        } else {
            Self::Ipv6(inner.parse()?)
        }))
    }
}

/// RFC 3986 - 3.2.2. Host
/// ABNF: host = IP-literal / IPv4address / reg-name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriHost {
    IpLiteral(IpLiteral),
    Ipv4(Ipv4Addr),
    RegName(AsciiString),
}

impl FromStr for UriHost {
    type Err = MalformedUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(MalformedUriError::EmptyHost);
        }
        if let Some(addr) = IpLiteral::from_str(s)? {
            return Ok(Self::IpLiteral(addr));
        }

        if let Ok(ipv4) = Ipv4Addr::from_str(s) {
            Ok(Self::Ipv4(ipv4))
        } else {
            if s.contains(['[', ']', ':', '/', '@', ' ']) {
                return Err(MalformedUriError::InvalidAscii(InvalidAsciiError));
            }
            Ok(Self::RegName(s.as_ascii_str()?.to_ascii_string()))
        }
    }
}

impl fmt::Display for UriHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IpLiteral(IpLiteral::Ipv6(addr)) => write!(f, "[{addr}]"),
            Self::IpLiteral(IpLiteral::IpvFuture(future)) => write!(f, "[{future}]"),
            Self::Ipv4(addr) => fmt::Display::fmt(addr, f),
            Self::RegName(name) => fmt::Display::fmt(name, f),
        }
    }
}

pub type UriPort = u16;
