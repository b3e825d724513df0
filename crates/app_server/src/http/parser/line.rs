use std::ops::Range;

use uhsapi::ascii::AsciiStr;

use crate::http::{
    HttpVersion,
    parser::{HttpParseError, HttpParseResult, Location, ParseErrorKind, ReaderLine},
};

#[derive(Debug, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Range<usize>,
    pub target: Range<usize>,
    pub version: HttpVersion,
}

impl RequestLine {
    pub fn parse(mut line: ReaderLine) -> HttpParseResult<Self> {
        // RFC 9112 - 3. Request Line
        // ABNF: request-line = method SP request-target SP HTTP-version
        #[inline]
        fn make_err(kind: ParseErrorKind, offset: usize) -> HttpParseError {
            HttpParseError::new(kind, Location::StartLine, offset).with_line(1)
        }

        let mut word = || {
            let start = line.line_start;
            match line.next_word() {
                Some(word) if !word.is_empty() => Ok(word),
                _ => Err(make_err(ParseErrorKind::MalformedRequestLine, start)),
            }
        };
        let method = word()?;
        let target = word()?;
        let version_range = word()?;

        if !line.is_empty() {
            return Err(make_err(
                ParseErrorKind::MalformedRequestLine,
                line.line_start,
            ));
        }

        let version = AsciiStr::from_ascii(&line.buf[version_range.clone()])
            .ok()
            .and_then(|version| version.as_str().parse::<HttpVersion>().ok())
            .ok_or_else(|| make_err(ParseErrorKind::InvalidVersion, version_range.start))?;
        // RFC 9112 - 2.3. HTTP Version
        if version.major != 1 {
            return Err(make_err(
                ParseErrorKind::VersionNotSupported,
                version_range.start,
            ));
        }

        Ok(Self {
            method,
            target,
            version,
        })
    }
}
