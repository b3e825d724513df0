use bytes::Bytes;
use uhsapi::http::StatusCode;

use crate::{
    http::{
        header::{HeaderMap, HeaderName},
        response::{Response, ResponseBody},
    },
    io::Hijacked,
};

pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::empty(),
        }
    }

    pub fn build(self) -> Response {
        let ResponseBuilder {
            status,
            headers,
            body,
        } = self;

        Response {
            status,
            headers,
            body,
        }
    }

    /// Appends a header value. Values containing line breaks are written as one header line
    /// per line.
    pub fn header(mut self, name: impl Into<HeaderName>, val: impl Into<Bytes>) -> Self {
        self.headers.append(name, val);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn content_length(self, len: u64) -> Self {
        self.header(HeaderName::CONTENT_LENGTH, len.to_string())
    }

    /// Replaces the body with a single chunk
    pub fn body(mut self, bytes: impl Into<Bytes>) -> Self {
        self.body = ResponseBody::Chunks(vec![bytes.into()]);
        self
    }

    /// Adds a chunk to the end of the body
    pub fn chunk(mut self, bytes: impl Into<Bytes>) -> Self {
        match &mut self.body {
            ResponseBody::Chunks(chunks) => chunks.push(bytes.into()),
            body => *body = ResponseBody::Chunks(vec![bytes.into()]),
        }
        self
    }

    pub fn hijack<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce(Hijacked) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.body = ResponseBody::hijack(callback);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_in_order() {
        let response = ResponseBuilder::new(StatusCode::OK)
            .header("X-B", "2")
            .header("X-A", "1")
            .chunk("a")
            .chunk("b")
            .build();
        let names: Vec<&str> = response.headers.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["X-B", "X-A"]);
        assert!(matches!(&response.body, ResponseBody::Chunks(chunks) if chunks.len() == 2));
    }

    #[test]
    fn body_replaces_chunks() {
        let response = ResponseBuilder::new(StatusCode::OK)
            .chunk("a")
            .body("only")
            .content_length(4)
            .build();
        match response.body {
            ResponseBody::Chunks(chunks) => assert_eq!(chunks, vec![Bytes::from_static(b"only")]),
            body => panic!("unexpected body {body:?}"),
        }
        assert_eq!(response.headers.get_str("content-length").as_deref(), Some("4"));
    }
}
