use std::{fmt, pin::Pin};

use bytes::Bytes;
use uhsapi::http::StatusCode;

mod builder;
mod writer;
pub use builder::ResponseBuilder;
pub use writer::*;

use crate::{
    http::header::{HeaderMap, HeaderName},
    io::Hijacked,
};

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Called with the socket once the response head has been written
pub type HijackCallback = Box<dyn FnOnce(Hijacked) -> BoxFuture + Send>;

/// Where the bytes of a response body come from
pub enum ResponseBody {
    /// Body pieces, written in order
    Chunks(Vec<Bytes>),
    /// The application writes the body itself after the head (partial hijack)
    Hijack(HijackCallback),
    /// Nothing to write, as for a response that was handled by a full hijack
    Absent,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self::Chunks(Vec::new())
    }

    pub fn hijack<F, Fut>(callback: F) -> Self
    where
        F: FnOnce(Hijacked) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Hijack(Box::new(move |io| Box::pin(callback(io))))
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunks(chunks) => f.debug_tuple("Chunks").field(chunks).finish(),
            Self::Hijack(_) => f.write_str("Hijack"),
            Self::Absent => f.write_str("Absent"),
        }
    }
}

/// What an application returns for a request: a status, headers in the order they should be
/// written, and a body.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::empty(),
        }
    }

    pub fn builder(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    /// The response for a request whose socket the application has taken over
    pub fn hijacked() -> Self {
        Self {
            status: StatusCode::HIJACKED,
            headers: HeaderMap::new(),
            body: ResponseBody::Absent,
        }
    }

    /// A plain text response with a single body chunk
    pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::builder(status)
            .header(HeaderName::CONTENT_TYPE, "text/plain")
            .body(body)
            .build()
    }
}
