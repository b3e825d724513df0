//! A raw TCP client for exercising the server byte by byte.
//!
//! Unlike a real HTTP client it writes exactly what it is given, pauses where it is told to, and
//! hands back the response as the bytes that came off the wire.

use std::{io, net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time,
};

/// A response read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// Status line and header lines, including the blank line ending them
    pub head: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// The first value of header `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct TestClient {
    stream: TcpStream,
    /// Received but not yet consumed
    buf: Vec<u8>,
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buf: Vec::new(),
        })
    }

    pub async fn send(&mut self, data: impl AsRef<[u8]>) -> io::Result<()> {
        self.stream.write_all(data.as_ref()).await?;
        self.stream.flush().await
    }

    /// Sends each part separately, sleeping `pause` before every part but the first
    pub async fn send_parts<P: AsRef<[u8]>>(
        &mut self,
        parts: &[P],
        pause: Duration,
    ) -> io::Result<()> {
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                time::sleep(pause).await;
            }
            self.send(part).await?;
        }
        Ok(())
    }

    /// Closes the sending side, the server sees EOF
    pub async fn shutdown_write(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    /// Reads more data, returns false on EOF
    async fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0; 8192];
        let n = self.stream.read(&mut chunk).await?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n > 0)
    }

    fn take(&mut self, n: usize) -> Vec<u8> {
        self.buf.drain(..n).collect()
    }

    /// Reads exactly `n` bytes
    pub async fn read_exact(&mut self, n: usize) -> io::Result<Vec<u8>> {
        while self.buf.len() < n {
            if !self.fill().await? {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
        Ok(self.take(n))
    }

    /// Reads one line, including its line ending
    pub async fn read_line(&mut self) -> io::Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line = self.take(pos + 1);
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            if !self.fill().await? {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
    }

    /// Reads a status line and headers up to and including the blank line
    pub async fn read_head(&mut self) -> io::Result<String> {
        loop {
            if let Some(pos) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = self.take(pos + 4);
                return Ok(String::from_utf8_lossy(&head).into_owned());
            }
            if !self.fill().await? {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
    }

    /// Reads a complete response, using its Content-Length or chunked coding to find the end of
    /// the body. A response with neither is read until the connection closes, unless
    /// `bodiless` is set (HEAD requests, 204, 304).
    pub async fn read_response(&mut self, bodiless: bool) -> io::Result<RawResponse> {
        let head = self.read_head().await?;
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let status = status_line
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| invalid("bad status line"))?;
        let headers: Vec<(String, String)> = lines
            .filter(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.to_string(), value.trim().to_string()))
            .collect();

        let mut response = RawResponse {
            head,
            status,
            headers,
            body: Vec::new(),
        };
        if bodiless {
            return Ok(response);
        }

        if let Some(len) = response.header("Content-Length") {
            let len = len.parse().map_err(|_| invalid("bad Content-Length"))?;
            response.body = self.read_exact(len).await?;
        } else if response
            .header("Transfer-Encoding")
            .is_some_and(|te| te.eq_ignore_ascii_case("chunked"))
        {
            loop {
                let line = self.read_line().await?;
                let size = usize::from_str_radix(line.trim(), 16)
                    .map_err(|_| invalid("bad chunk size"))?;
                if size == 0 {
                    self.read_line().await?;
                    break;
                }
                let chunk = self.read_exact(size + 2).await?;
                response.body.extend_from_slice(&chunk[..size]);
            }
        } else {
            response.body = self.read_to_end().await?;
        }
        Ok(response)
    }

    /// Everything until the server closes the connection
    pub async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        while self.fill().await? {}
        Ok(std::mem::take(&mut self.buf))
    }

    pub async fn read_to_string(&mut self) -> io::Result<String> {
        let bytes = self.read_to_end().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Whether the server closes the connection within `limit`, without sending anything more
    pub async fn closed_within(&mut self, limit: Duration) -> bool {
        match time::timeout(limit, self.fill()).await {
            Ok(Ok(false)) => self.buf.is_empty(),
            // A reset counts as closed
            Ok(Err(_)) => true,
            _ => false,
        }
    }
}
