use std::fmt::{Debug, Display};

use bytes::Bytes;
use uhsapi::ascii::{AsciiStr, InvalidAsciiError};

use crate::http::is_tchar;

/// An HTTP Method
/// RFC 9112 - 3.1. Method
/// ABNF: method = token
///
/// Methods the server has no special knowledge of are carried through untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct Method(Repr);

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl TryFrom<Bytes> for Method {
    type Error = InvalidAsciiError;

    fn try_from(value: Bytes) -> Result<Self, Self::Error> {
        if value.is_empty() || !value.iter().copied().all(is_tchar) {
            return Err(InvalidAsciiError);
        }
        let ascii_str = AsciiStr::from_ascii(&value)?;
        Ok(match Builtin::try_from(ascii_str) {
            Ok(builtin) => Method(Repr::Builtin(builtin)),
            Err(_) => Method(Repr::Custom(value)),
        })
    }
}

impl TryFrom<&str> for Method {
    type Error = InvalidAsciiError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl Method {
    pub const GET: Self = Self(Repr::Builtin(Builtin::GET));
    pub const POST: Self = Self(Repr::Builtin(Builtin::POST));
    pub const PUT: Self = Self(Repr::Builtin(Builtin::PUT));
    pub const DELETE: Self = Self(Repr::Builtin(Builtin::DELETE));
    pub const PATCH: Self = Self(Repr::Builtin(Builtin::PATCH));
    pub const OPTIONS: Self = Self(Repr::Builtin(Builtin::OPTIONS));
    pub const CONNECT: Self = Self(Repr::Builtin(Builtin::CONNECT));
    pub const TRACE: Self = Self(Repr::Builtin(Builtin::TRACE));
    pub const HEAD: Self = Self(Repr::Builtin(Builtin::HEAD));

    pub fn as_str(&self) -> &str {
        match &self.0 {
            Repr::Builtin(builtin) => builtin.as_str(),
            // SAFETY: custom methods are validated as tokens, which are ASCII
            Repr::Custom(custom) => unsafe { std::str::from_utf8_unchecked(custom) },
        }
    }

    /// Responses to HEAD never carry a body
    pub fn is_head(&self) -> bool {
        matches!(self.0, Repr::Builtin(Builtin::HEAD))
    }

    /// Safe Methods are methods which can be cached by
    /// RFC 9110 - 9.2.1. Safe Methods
    pub fn is_safe(&self) -> bool {
        match &self.0 {
            Repr::Builtin(builtin) => builtin.is_safe(),
            Repr::Custom(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Repr {
    Builtin(Builtin),
    Custom(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    OPTIONS,
    CONNECT,
    TRACE,
    HEAD,
}

impl Builtin {
    fn is_safe(&self) -> bool {
        matches!(self, Self::GET | Self::HEAD | Self::OPTIONS | Self::TRACE)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::GET => "GET",
            Self::POST => "POST",
            Self::PUT => "PUT",
            Self::DELETE => "DELETE",
            Self::PATCH => "PATCH",
            Self::OPTIONS => "OPTIONS",
            Self::CONNECT => "CONNECT",
            Self::TRACE => "TRACE",
            Self::HEAD => "HEAD",
        }
    }
}

impl TryFrom<&AsciiStr> for Builtin {
    type Error = ();

    fn try_from(value: &AsciiStr) -> Result<Self, Self::Error> {
        // Methods are case-sensitive
        Ok(match value.as_str() {
            "GET" => Self::GET,
            "POST" => Self::POST,
            "PUT" => Self::PUT,
            "DELETE" => Self::DELETE,
            "PATCH" => Self::PATCH,
            "OPTIONS" => Self::OPTIONS,
            "CONNECT" => Self::CONNECT,
            "TRACE" => Self::TRACE,
            "HEAD" => Self::HEAD,
            _ => return Err(()),
        })
    }
}
