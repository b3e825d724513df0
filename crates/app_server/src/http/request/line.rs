use std::num::NonZeroUsize;

use bytes::Bytes;
use memchr::memchr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid request target")]
pub struct RequestTargetParseError;

/// A Target for a HTTP Request
/// RFC 9112 - 3.2. Request Target
/// ABNF: request-target = origin-form / absolute-form / authority-form / asterisk-form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// An Origin request as an URI
    Origin(OriginForm),
    /// An absolute URI, as sent to proxies
    Absolute(AbsoluteForm),
    /// An Authority form using URI-host:port format
    Authority(AuthorityForm),
    /// Asterisk Form of a Request Target
    /// RFC 9112 - 3.2.4. asterisk-form
    /// ABNF: asterisk-form = "*"
    Asterisk,
}

impl RequestTarget {
    /// The target exactly as received
    pub fn as_str(&self) -> &str {
        match self {
            Self::Asterisk => "*",
            Self::Origin(origin) => origin.as_str(),
            Self::Absolute(absolute) => absolute.as_str(),
            Self::Authority(authority) => authority.as_str(),
        }
    }

    /// The path component, not decoded
    pub fn path(&self) -> &str {
        match self {
            Self::Asterisk => "*",
            Self::Origin(origin) => origin.path(),
            Self::Absolute(absolute) => absolute.path(),
            Self::Authority(_) => "",
        }
    }

    /// The query component without the question mark, not decoded
    pub fn query(&self) -> Option<&str> {
        match self {
            Self::Origin(origin) => origin.query(),
            Self::Absolute(absolute) => absolute.query(),
            Self::Asterisk | Self::Authority(_) => None,
        }
    }
}

/// Targets are restricted to visible ASCII, so every accessor can hand out `&str`
fn as_str(data: &[u8]) -> &str {
    // SAFETY: validated by `validate` on construction
    unsafe { std::str::from_utf8_unchecked(data) }
}

fn validate(bytes: &[u8]) -> Result<(), RequestTargetParseError> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_graphic) {
        return Err(RequestTargetParseError);
    }
    Ok(())
}

/// Origin Form for a Request Target
/// RFC 9112 - 3.2.1. origin-form
/// ABNF: origin-form = absolute-path [ "?" query ]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginForm {
    data: Bytes,
    /// The index of the question mark starting the query. It can never be at index 0 because
    /// the target starts with a slash.
    query: Option<NonZeroUsize>,
}

impl OriginForm {
    pub fn from_bytes(bytes: &Bytes) -> Result<Self, RequestTargetParseError> {
        validate(bytes)?;
        if bytes[0] != b'/' {
            return Err(RequestTargetParseError);
        }
        let query = memchr(b'?', bytes).and_then(NonZeroUsize::new);
        Ok(Self {
            data: bytes.clone(),
            query,
        })
    }

    pub fn path(&self) -> &str {
        match self.query {
            Some(query) => as_str(&self.data[..query.get()]),
            None => as_str(&self.data),
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.query.map(|query| as_str(&self.data[query.get() + 1..]))
    }

    /// Converts to a string, this function does not decode the string
    pub fn as_str(&self) -> &str {
        as_str(&self.data)
    }
}

/// Absolute Form of a Request Target
/// RFC 9112 - 3.2.2. absolute-form
/// ABNF: absolute-form = absolute-URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsoluteForm {
    data: Bytes,
    /// Start of the authority, just past `://`
    authority: usize,
    /// Start of the path, equal to the end of the authority
    path: usize,
    query: Option<usize>,
}

impl AbsoluteForm {
    pub fn from_bytes(bytes: &Bytes) -> Result<Self, RequestTargetParseError> {
        validate(bytes)?;
        let scheme_end = memchr(b':', bytes).ok_or(RequestTargetParseError)?;
        let scheme = &bytes[..scheme_end];
        // RFC 3986 - 3.1. Scheme
        // ABNF: scheme = ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )
        let valid_scheme = scheme.first().is_some_and(u8::is_ascii_alphabetic)
            && scheme
                .iter()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'));
        if !valid_scheme || !bytes[scheme_end..].starts_with(b"://") {
            return Err(RequestTargetParseError);
        }

        let authority = scheme_end + 3;
        let query = memchr(b'?', &bytes[authority..]).map(|idx| idx + authority);
        let authority_end = query.unwrap_or(bytes.len());
        let path = memchr(b'/', &bytes[authority..authority_end])
            .map(|idx| idx + authority)
            .unwrap_or(authority_end);
        Ok(Self {
            data: bytes.clone(),
            authority,
            path,
            query,
        })
    }

    pub fn authority(&self) -> &str {
        as_str(&self.data[self.authority..self.path])
    }

    /// The path, `/` when the URI has an empty path
    pub fn path(&self) -> &str {
        let end = self.query.unwrap_or(self.data.len());
        match &self.data[self.path..end] {
            [] => "/",
            path => as_str(path),
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.query.map(|query| as_str(&self.data[query + 1..]))
    }

    pub fn as_str(&self) -> &str {
        as_str(&self.data)
    }
}

/// Authority Form of a Request Target
/// RFC 9112 - 3.2.3. authority-form
/// ABNF: authority-form = uri-host ":" port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityForm {
    data: Bytes,
}

impl AuthorityForm {
    pub fn from_bytes(bytes: &Bytes) -> Result<Self, RequestTargetParseError> {
        validate(bytes)?;
        if memchr(b'/', bytes).is_some() || memchr(b':', bytes).is_none() {
            return Err(RequestTargetParseError);
        }
        Ok(Self { data: bytes.clone() })
    }

    pub fn as_str(&self) -> &str {
        as_str(&self.data)
    }
}

impl TryFrom<&Bytes> for RequestTarget {
    type Error = RequestTargetParseError;

    fn try_from(s: &Bytes) -> Result<Self, Self::Error> {
        match s.first().copied() {
            None => Err(RequestTargetParseError),
            Some(b'*') if s.len() == 1 => Ok(Self::Asterisk),
            Some(b'/') => OriginForm::from_bytes(s).map(Self::Origin),
            Some(_) if memchr::memmem::find(s, b"://").is_some() => {
                AbsoluteForm::from_bytes(s).map(Self::Absolute)
            }
            Some(_) => AuthorityForm::from_bytes(s).map(Self::Authority),
        }
    }
}

impl std::fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &'static str) -> Result<RequestTarget, RequestTargetParseError> {
        RequestTarget::try_from(&Bytes::from_static(s.as_bytes()))
    }

    #[test]
    fn origin_form() {
        let target = parse("/search?q=rust&page=2").unwrap();
        assert_eq!(target.path(), "/search");
        assert_eq!(target.query(), Some("q=rust&page=2"));
        assert_eq!(target.as_str(), "/search?q=rust&page=2");

        let target = parse("/").unwrap();
        assert_eq!(target.path(), "/");
        assert_eq!(target.query(), None);

        let target = parse("/empty?").unwrap();
        assert_eq!(target.query(), Some(""));
    }

    #[test]
    fn absolute_form() {
        let target = parse("http://example.com:8080/a/b?c=d").unwrap();
        assert!(matches!(target, RequestTarget::Absolute(_)));
        assert_eq!(target.path(), "/a/b");
        assert_eq!(target.query(), Some("c=d"));
        if let RequestTarget::Absolute(absolute) = &target {
            assert_eq!(absolute.authority(), "example.com:8080");
        }

        let target = parse("https://example.com").unwrap();
        assert_eq!(target.path(), "/");
        assert_eq!(target.query(), None);

        let target = parse("http://example.com?x").unwrap();
        assert_eq!(target.path(), "/");
        assert_eq!(target.query(), Some("x"));
    }

    #[test]
    fn authority_and_asterisk() {
        let target = parse("example.com:443").unwrap();
        assert!(matches!(target, RequestTarget::Authority(_)));
        assert_eq!(target.path(), "");
        assert_eq!(parse("*").unwrap(), RequestTarget::Asterisk);
    }

    #[test]
    fn invalid_targets() {
        assert!(parse("").is_err());
        assert!(parse("**").is_err());
        assert!(parse("example.com").is_err());
        assert!(parse("1http://x").is_err());
        assert!(parse("/caf\u{e9}").is_err());
    }
}
