mod impls;
mod map;

use std::{borrow::Cow, fmt, ops::Deref};

use bytes::{Bytes, BytesMut};
pub use impls::*;
pub use map::*;
use smallvec::SmallVec;
use unicase::UniCase;
use uhsapi::ascii::InvalidAsciiError;

use crate::http::is_tchar;

/// A header field name, compared case-insensitively and written back with the case it was
/// created with.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HeaderName(UniCase<Cow<'static, str>>);

impl HeaderName {
    pub const HOST: Self = Self::from_static("Host");
    pub const CONTENT_LENGTH: Self = Self::from_static("Content-Length");
    pub const CONTENT_TYPE: Self = Self::from_static("Content-Type");
    pub const TRANSFER_ENCODING: Self = Self::from_static("Transfer-Encoding");
    pub const CONNECTION: Self = Self::from_static("Connection");
    pub const EXPECT: Self = Self::from_static("Expect");
    pub const FORWARDED: Self = Self::from_static("Forwarded");
    pub const X_FORWARDED_FOR: Self = Self::from_static("X-Forwarded-For");
    pub const X_FORWARDED_PROTO: Self = Self::from_static("X-Forwarded-Proto");
    pub const X_FORWARDED_SCHEME: Self = Self::from_static("X-Forwarded-Scheme");
    pub const X_FORWARDED_SSL: Self = Self::from_static("X-Forwarded-Ssl");
    pub const LINK: Self = Self::from_static("Link");

    /// Creates a header name from a static string.
    ///
    /// # Panics
    /// If `name` is not a valid token (RFC 9110 - 5.1. Field Names).
    pub const fn from_static(name: &'static str) -> Self {
        let bytes = name.as_bytes();
        assert!(!bytes.is_empty(), "header name cannot be empty");
        let mut i = 0;
        while i < bytes.len() {
            assert!(is_tchar(bytes[i]), "invalid header name");
            i += 1;
        }
        Self(UniCase::ascii(Cow::Borrowed(name)))
    }

    pub fn as_str(&self) -> &str {
        let name: &Cow<'static, str> = &self.0;
        name
    }
}

impl TryFrom<&[u8]> for HeaderName {
    type Error = InvalidAsciiError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.is_empty() || !value.iter().copied().all(is_tchar) {
            return Err(InvalidAsciiError);
        }
        // SAFETY: tchar is a subset of ASCII
        let name = unsafe { std::str::from_utf8_unchecked(value) };
        Ok(Self(UniCase::ascii(Cow::Owned(name.to_owned()))))
    }
}

impl TryFrom<&Bytes> for HeaderName {
    type Error = InvalidAsciiError;

    fn try_from(value: &Bytes) -> Result<Self, Self::Error> {
        Self::try_from(value.as_ref())
    }
}

impl TryFrom<String> for HeaderName {
    type Error = InvalidAsciiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() || !value.bytes().all(is_tchar) {
            return Err(InvalidAsciiError);
        }
        Ok(Self(UniCase::ascii(Cow::Owned(value))))
    }
}

impl From<&'static str> for HeaderName {
    /// # Panics
    /// See [`HeaderName::from_static`]
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

impl AsRef<str> for HeaderName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// All values received (or to be sent) for a single header name, in order.
///
/// An empty value is a value: `X-Empty:` is stored as one empty `Bytes`, not as no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderValue {
    values: SmallVec<[Bytes; 1]>,
}

impl Default for HeaderValue {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderValue {
    pub fn new() -> Self {
        Self {
            values: SmallVec::new(),
        }
    }

    pub fn push(&mut self, bytes: Bytes) {
        self.values.push(bytes);
    }

    /// The values joined the way HTTP allows repeated fields to be combined
    /// RFC 9110 - 5.3. Field Order
    pub fn combined(&self) -> Bytes {
        match self.values.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            values => {
                let mut buf = BytesMut::new();
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        buf.extend_from_slice(b", ");
                    }
                    buf.extend_from_slice(value);
                }
                buf.freeze()
            }
        }
    }

    /// The combined value as a string, if it is valid UTF-8
    pub fn to_str(&self) -> Option<String> {
        String::from_utf8(self.combined().to_vec()).ok()
    }

    /// Iterates over the comma separated elements of every value, trimmed
    pub fn elements(&self) -> impl Iterator<Item = &[u8]> {
        self.values
            .iter()
            .flat_map(|value| value.split(|b| *b == b','))
            .map(<[u8]>::trim_ascii)
            .filter(|element| !element.is_empty())
    }
}

impl Deref for HeaderValue {
    type Target = [Bytes];

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_compare_case_insensitively() {
        let parsed = HeaderName::try_from(&b"content-LENGTH"[..]).unwrap();
        assert_eq!(parsed, HeaderName::CONTENT_LENGTH);
        assert_eq!(parsed.as_str(), "content-LENGTH");
        assert_eq!(HeaderName::CONTENT_LENGTH.to_string(), "Content-Length");
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(HeaderName::try_from(&b""[..]).is_err());
        assert!(HeaderName::try_from(&b"Bad Name"[..]).is_err());
        assert!(HeaderName::try_from(String::from("X:Y")).is_err());
    }

    #[test]
    fn values_combine_and_split() {
        let mut value = HeaderValue::new();
        value.push(Bytes::from_static(b"a"));
        value.push(Bytes::from_static(b" b , c"));
        assert_eq!(value.combined(), Bytes::from_static(b"a,  b , c"));
        let elements: Vec<&[u8]> = value.elements().collect();
        assert_eq!(elements, vec![&b"a"[..], b"b", b"c"]);
    }

    #[test]
    fn empty_value_is_kept() {
        let mut value = HeaderValue::new();
        value.push(Bytes::new());
        assert_eq!(value.len(), 1);
        assert_eq!(value.to_str().as_deref(), Some(""));
    }
}
