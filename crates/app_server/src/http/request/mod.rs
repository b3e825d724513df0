use std::time::Instant;

mod line;
pub use line::*;

use crate::http::{
    HttpVersion,
    header::{Connection, HeaderMap},
    method::Method,
    parser::BodyDecoder,
};

/// A parsed request head, together with the strategy for reading its body
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub target: RequestTarget,
    pub version: HttpVersion,
    pub headers: HeaderMap,
    pub body: BodyDecoder,
    /// The client sent `Expect: 100-continue`
    pub expects_continue: bool,
    /// When the first byte of this request was received
    pub started: Instant,
}

impl Request {
    /// Whether the client asked for the connection to stay open after this request
    /// RFC 9112 - 9.3. Persistence
    pub fn wants_keep_alive(&self) -> bool {
        let options = self
            .headers
            .get_header::<Connection>()
            .ok()
            .flatten()
            .unwrap_or_default();
        if self.version.is_persistent_by_default() {
            !options.close
        } else {
            options.keep_alive && !options.close
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn request(version: HttpVersion, connection: Option<&'static str>) -> Request {
        let mut headers = HeaderMap::new();
        if let Some(value) = connection {
            headers.append("Connection", value);
        }
        Request {
            method: Method::GET,
            target: RequestTarget::try_from(&Bytes::from_static(b"/")).unwrap(),
            version,
            headers,
            body: BodyDecoder::Empty,
            expects_continue: false,
            started: Instant::now(),
        }
    }

    #[test]
    fn keep_alive_by_version() {
        assert!(request(HttpVersion::HTTP_1_1, None).wants_keep_alive());
        assert!(!request(HttpVersion::HTTP_1_1, Some("close")).wants_keep_alive());
        assert!(!request(HttpVersion::HTTP_1_0, None).wants_keep_alive());
        assert!(request(HttpVersion::HTTP_1_0, Some("Keep-Alive")).wants_keep_alive());
    }
}
