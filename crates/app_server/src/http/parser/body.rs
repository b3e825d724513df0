use bytes::BytesMut;

use crate::http::parser::{ChunkedDecoder, HttpParseResult};

/// How the body of a request is delimited
/// RFC 9112 - 6.3. Message Body Length
#[derive(Debug, Clone)]
pub enum BodyDecoder {
    /// No body, everything after the head belongs to the next request
    Empty,
    /// A body of exactly `remaining` more bytes
    Length { remaining: u64 },
    Chunked(ChunkedDecoder),
}

impl BodyDecoder {
    pub fn length(len: u64) -> Self {
        if len == 0 {
            Self::Empty
        } else {
            Self::Length { remaining: len }
        }
    }

    pub fn is_done(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Length { remaining } => *remaining == 0,
            Self::Chunked(chunked) => chunked.is_done(),
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunked(_))
    }

    /// The number of body bytes still expected, if known up front
    pub fn remaining(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Length { remaining } => Some(*remaining),
            Self::Chunked(_) => None,
        }
    }

    /// Decodes body bytes out of `input` into `body`, returning how many bytes of `input` were
    /// consumed. Bytes past the end of the body are left alone.
    pub fn decode(&mut self, input: &[u8], body: &mut BytesMut) -> HttpParseResult<usize> {
        match self {
            Self::Empty => Ok(0),
            Self::Length { remaining } => {
                let take = (*remaining).min(input.len() as u64) as usize;
                body.extend_from_slice(&input[..take]);
                *remaining -= take as u64;
                Ok(take)
            }
            Self::Chunked(chunked) => chunked.decode(input, body),
        }
    }
}
