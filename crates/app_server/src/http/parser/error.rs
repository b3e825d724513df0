use std::fmt::Display;

use uhsapi::http::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    StartLine,
    Headers,
    Body,
    Trailers,
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::StartLine => "start line",
            Self::Headers => "headers",
            Self::Body => "body",
            Self::Trailers => "trailers",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    HeaderBytesTotal,
    HeaderCount,
    PathBytes,
    BodyBytes,
    ChunkSizeBytes,
    TrailerBytesTotal,
}

impl Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::HeaderBytesTotal => "header bytes",
            Self::HeaderCount => "header count",
            Self::PathBytes => "request target bytes",
            Self::BodyBytes => "body bytes",
            Self::ChunkSizeBytes => "chunk size line bytes",
            Self::TrailerBytesTotal => "trailer bytes",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseErrorKind {
    // Syntax/tokenization
    InvalidMethod,
    InvalidTarget,
    InvalidVersion,
    MalformedRequestLine,
    MalformedHeaderLine, // no colon / fold before any header
    InvalidHeaderName,   // non-tchar
    InvalidHeaderValue,  // illegal bytes (bare CR, NUL)

    // Framing
    ChunkSizeInvalid,
    ChunkCrlfMissing,

    // Limits
    TooLarge {
        what: LimitKind,
        limit: usize,
        actual: usize,
    },

    // Version/feature policy
    VersionNotSupported,
}

impl Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMethod => f.write_str("invalid method"),
            Self::InvalidTarget => f.write_str("invalid target"),
            Self::InvalidVersion => f.write_str("invalid version"),
            Self::MalformedRequestLine => f.write_str("malformed request line"),
            Self::MalformedHeaderLine => f.write_str("malformed header"),
            Self::InvalidHeaderName => f.write_str("invalid header name"),
            Self::InvalidHeaderValue => f.write_str("invalid header value"),
            Self::ChunkSizeInvalid => f.write_str("chunk size invalid"),
            Self::ChunkCrlfMissing => f.write_str("chunk crlf missing"),
            Self::TooLarge {
                what,
                limit,
                actual,
            } => write!(
                f,
                "limit on {} exceeded (limit: {}, actual: {})",
                what, limit, actual
            ),
            Self::VersionNotSupported => f.write_str("version not supported"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpParseError {
    pub kind: ParseErrorKind,
    pub location: Location,
    /// Byte offset where the error was noticed. For the start line and headers this is an
    /// offset into the request head, for bodies an offset into the bytes fed to the decoder.
    pub offset: usize,
    /// Optional line index to help debugging/logs
    pub line: Option<usize>,
}

impl Display for HttpParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "http parse error: {} while parsing {} at offset {}",
            self.kind, self.location, self.offset
        )?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpParseError {}

impl HttpParseError {
    pub fn new(kind: ParseErrorKind, location: Location, offset: usize) -> Self {
        Self {
            kind,
            location,
            offset,
            line: None,
        }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn too_large(what: LimitKind, limit: usize, actual: usize, location: Location) -> Self {
        Self::new(
            ParseErrorKind::TooLarge {
                what,
                limit,
                actual,
            },
            location,
            actual,
        )
    }

    /// The status the client is told about before the connection is closed
    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            ParseErrorKind::TooLarge {
                what: LimitKind::PathBytes,
                ..
            } => StatusCode::URI_TOO_LONG,
            ParseErrorKind::TooLarge {
                what: LimitKind::HeaderBytesTotal | LimitKind::HeaderCount,
                ..
            } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            ParseErrorKind::TooLarge {
                what: LimitKind::BodyBytes,
                ..
            } => StatusCode::PAYLOAD_TOO_LARGE,
            ParseErrorKind::VersionNotSupported => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
