use bytes::BytesMut;
use memchr::memchr;
use smallvec::SmallVec;

use crate::http::parser::{HttpParseError, HttpParseResult, LimitKind, Location, ParseErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Reading `chunk-size [ chunk-ext ] CRLF`
    Size,
    Data {
        remaining: u64,
    },
    /// The CRLF after chunk data, `seen_cr` once the CR has been consumed
    DataCrlf {
        seen_cr: bool,
    },
    /// Trailer fields until the terminating empty line
    Trailer,
    Done,
}

/// A restartable decoder for the chunked transfer coding
/// RFC 9112 - 7.1. Chunked Transfer Coding
/// ABNF:
///  chunked-body = *chunk last-chunk trailer-section CRLF
///  chunk = chunk-size [ chunk-ext ] CRLF chunk-data CRLF
///  last-chunk = 1*("0") [ chunk-ext ] CRLF
///
/// Input can be fed in pieces split at any byte, the decoder keeps partial size and trailer lines
/// to itself. Bytes following the end of the chunked body are never consumed.
#[derive(Debug, Clone)]
pub struct ChunkedDecoder {
    state: State,
    line: SmallVec<[u8; 32]>,
    max_line: usize,
    max_trailer: usize,
    trailer_bytes: usize,
    /// Input bytes consumed over the lifetime of the decoder
    position: usize,
    /// Decoded body bytes produced
    consumed: u64,
}

impl ChunkedDecoder {
    pub fn new(max_line: usize, max_trailer: usize) -> Self {
        Self {
            state: State::Size,
            line: SmallVec::new(),
            max_line,
            max_trailer,
            trailer_bytes: 0,
            position: 0,
            consumed: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// The number of decoded body bytes produced so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Decodes as much of `input` as possible, appending chunk data to `body`.
    ///
    /// Returns the number of bytes of `input` that were consumed.
    pub fn decode(&mut self, input: &[u8], body: &mut BytesMut) -> HttpParseResult<usize> {
        let mut pos = 0;
        while pos < input.len() {
            match self.state {
                State::Size => {
                    let (used, complete) = self.take_line(&input[pos..], self.max_line)?;
                    pos += used;
                    if !complete {
                        break;
                    }
                    let size = parse_chunk_size(&self.line)
                        .ok_or_else(|| self.error(ParseErrorKind::ChunkSizeInvalid, pos))?;
                    self.line.clear();
                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::Data { remaining: size }
                    };
                }
                State::Data { remaining } => {
                    let available = (input.len() - pos) as u64;
                    let take = remaining.min(available) as usize;
                    body.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    self.consumed += take as u64;
                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        State::DataCrlf { seen_cr: false }
                    } else {
                        State::Data { remaining }
                    };
                }
                State::DataCrlf { seen_cr } => {
                    match (seen_cr, input[pos]) {
                        (false, b'\r') => self.state = State::DataCrlf { seen_cr: true },
                        // A bare LF is tolerated
                        (_, b'\n') => self.state = State::Size,
                        _ => return Err(self.error(ParseErrorKind::ChunkCrlfMissing, pos)),
                    }
                    pos += 1;
                }
                State::Trailer => {
                    let budget = self.max_trailer.saturating_sub(self.trailer_bytes);
                    let (used, complete) = self.take_line(&input[pos..], budget)?;
                    pos += used;
                    if !complete {
                        break;
                    }
                    if self.line.is_empty() {
                        self.state = State::Done;
                        break;
                    }
                    // Trailer fields are accepted and discarded
                    self.trailer_bytes += self.line.len() + 2;
                    self.line.clear();
                }
                State::Done => break,
            }
        }
        self.position += pos;
        Ok(pos)
    }

    /// Moves bytes up to and including the next LF into the line buffer. The stored line excludes
    /// the line terminator.
    fn take_line(&mut self, input: &[u8], limit: usize) -> HttpParseResult<(usize, bool)> {
        let (piece, used, complete) = match memchr(b'\n', input) {
            Some(nl) => (&input[..nl], nl + 1, true),
            None => (input, input.len(), false),
        };
        let actual = self.line.len() + piece.len();
        if actual > limit {
            let (what, location) = match self.state {
                State::Trailer => (LimitKind::TrailerBytesTotal, Location::Trailers),
                _ => (LimitKind::ChunkSizeBytes, Location::Body),
            };
            return Err(HttpParseError::too_large(what, limit, actual, location));
        }
        self.line.extend_from_slice(piece);
        if complete && self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        Ok((used, complete))
    }

    fn error(&self, kind: ParseErrorKind, pos: usize) -> HttpParseError {
        let location = match self.state {
            State::Trailer | State::Done => Location::Trailers,
            _ => Location::Body,
        };
        HttpParseError::new(kind, location, self.position + pos)
    }
}

/// Parses `chunk-size [ chunk-ext ]`, ignoring any extensions
fn parse_chunk_size(line: &[u8]) -> Option<u64> {
    let size = match memchr(b';', line) {
        Some(ext) => &line[..ext],
        None => line,
    }
    .trim_ascii();

    if size.is_empty() {
        return None;
    }
    size.iter().try_fold(0u64, |acc, b| {
        let digit = (*b as char).to_digit(16)?;
        acc.checked_mul(16)?.checked_add(digit as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_LINE: usize = 4096;
    const MAX_TRAILER: usize = 16 * 1024;

    fn decoder() -> ChunkedDecoder {
        ChunkedDecoder::new(MAX_LINE, MAX_TRAILER)
    }

    /// Feeds every piece in turn, returning the decoded body and the total bytes consumed
    fn feed(pieces: &[&[u8]]) -> HttpParseResult<(ChunkedDecoder, BytesMut, usize)> {
        let mut decoder = decoder();
        let mut body = BytesMut::new();
        let mut total = 0;
        for piece in pieces {
            total += decoder.decode(piece, &mut body)?;
        }
        Ok((decoder, body, total))
    }

    #[test]
    fn decodes_whole_input() {
        let input: &[u8] = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let (decoder, body, used) = feed(&[input]).unwrap();
        assert!(decoder.is_done());
        assert_eq!(&body[..], b"hello world");
        assert_eq!(decoder.consumed(), 11);
        assert_eq!(used, input.len());
    }

    #[test]
    fn resumes_at_every_split_point() {
        let input: &[u8] = b"4;name=value\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\nExpires: never\r\n\r\n";
        for split in 0..=input.len() {
            let (decoder, body, used) = feed(&[&input[..split], &input[split..]]).unwrap();
            assert!(decoder.is_done(), "split at {split}");
            assert_eq!(&body[..], b"Wikipedia in\r\n\r\nchunks.", "split at {split}");
            assert_eq!(used, input.len(), "split at {split}");
        }
    }

    #[test]
    fn resumes_at_every_pair_of_split_points() {
        let input: &[u8] = b"3\r\nabc\r\n1A\r\nabcdefghijklmnopqrstuvwxyz\r\n0\r\n\r\n";
        for first in 0..=input.len() {
            for second in first..=input.len() {
                let (decoder, body, _) =
                    feed(&[&input[..first], &input[first..second], &input[second..]]).unwrap();
                assert!(decoder.is_done(), "splits at {first}, {second}");
                assert_eq!(&body[..], b"abcabcdefghijklmnopqrstuvwxyz");
            }
        }
    }

    #[test]
    fn byte_at_a_time() {
        let input: &[u8] = b"a\r\n0123456789\r\n0\r\n\r\n";
        let pieces: Vec<&[u8]> = input.chunks(1).collect();
        let (decoder, body, used) = feed(&pieces).unwrap();
        assert!(decoder.is_done());
        assert_eq!(&body[..], b"0123456789");
        assert_eq!(used, input.len());
    }

    #[test]
    fn leaves_pipelined_bytes() {
        let input: &[u8] = b"2\r\nhi\r\n0\r\n\r\nGET / HTTP/1.1\r\n\r\n";
        let (decoder, body, used) = feed(&[input]).unwrap();
        assert!(decoder.is_done());
        assert_eq!(&body[..], b"hi");
        assert_eq!(&input[used..], b"GET / HTTP/1.1\r\n\r\n");

        // Nothing more is consumed once done
        let mut decoder = decoder;
        let mut body = BytesMut::new();
        assert_eq!(decoder.decode(b"more", &mut body).unwrap(), 0);
        assert!(body.is_empty());
    }

    #[test]
    fn tolerates_bare_lf_and_whitespace() {
        let (decoder, body, _) = feed(&[&b"3 \nabc\n0\n\n"[..]]).unwrap();
        assert!(decoder.is_done());
        assert_eq!(&body[..], b"abc");
    }

    #[test]
    fn discards_trailers() {
        let (decoder, body, _) =
            feed(&[&b"1\r\nx\r\n0\r\nX-Checksum: abc\r\nX-Other: def\r\n\r\n"[..]]).unwrap();
        assert!(decoder.is_done());
        assert_eq!(&body[..], b"x");
    }

    #[test]
    fn rejects_invalid_sizes() {
        for input in [
            &b"zz\r\n"[..],
            b"\r\n",
            b";ext\r\n",
            b"-1\r\n",
            b"0x10\r\n",
            b"10000000000000000\r\n",
        ] {
            let err = feed(&[input]).map(|_| ()).unwrap_err();
            assert_eq!(err.kind, ParseErrorKind::ChunkSizeInvalid, "{input:?}");
        }
    }

    #[test]
    fn rejects_missing_crlf_after_data() {
        let err = feed(&[&b"3\r\nabcX\r\n"[..]]).map(|_| ()).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ChunkCrlfMissing);
        assert_eq!(err.offset, 6);

        let err = feed(&[&b"3\r\nabc\r"[..], &b"X"[..]]).map(|_| ()).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ChunkCrlfMissing);
    }

    #[test]
    fn limits_size_line_and_trailers() {
        let mut decoder = ChunkedDecoder::new(8, 16);
        let mut body = BytesMut::new();
        let err = decoder
            .decode(b"1;aaaaaaaaaaaaa\r\n", &mut body)
            .unwrap_err();
        assert!(matches!(
            err.kind,
            ParseErrorKind::TooLarge {
                what: LimitKind::ChunkSizeBytes,
                ..
            }
        ));

        let mut decoder = ChunkedDecoder::new(8, 16);
        let err = decoder
            .decode(b"0\r\nX-A: 1\r\nX-Long-Trailer: 2\r\n\r\n", &mut body)
            .unwrap_err();
        assert!(matches!(
            err.kind,
            ParseErrorKind::TooLarge {
                what: LimitKind::TrailerBytesTotal,
                ..
            }
        ));
    }
}
