use bytes::{Buf, Bytes};
use tokio::{io::AsyncRead, sync::mpsc};

/// An [`AsyncRead`] fed by a channel, each message arriving as a separate read.
///
/// Used to reproduce the way a socket delivers a request in arbitrary fragments.
pub struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
}

impl ChannelReader {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
        }
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::task::Poll;
        while self.pending.is_empty() {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(piece)) => self.pending = piece,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = self.pending.len().min(buf.remaining());
        buf.put_slice(&self.pending[..n]);
        self.pending.advance(n);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{io::AsyncReadExt, time::sleep};

    use super::*;

    #[tokio::test]
    async fn test_channel_reader() {
        const LINE: &[u8] = b"GET / HTTP/1.1\r\nHost: test\r\n\r\n";
        fn setup_reader() -> ChannelReader {
            let (tx, rx) = mpsc::channel::<Bytes>(LINE.len());

            tokio::spawn(async move {
                sleep(Duration::from_millis(10)).await;
                for piece in LINE.chunks(4) {
                    tx.send(Bytes::from_static(piece)).await.unwrap();
                    sleep(Duration::from_millis(10)).await;
                }
            });
            ChannelReader::new(rx)
        }

        {
            // Test with read_exact
            let mut reader = setup_reader();
            let mut buf = [0u8; LINE.len()];

            let n = reader.read_exact(&mut buf).await.unwrap();
            assert_ne!(n, 0);
            assert_eq!(&buf, LINE);
        }

        {
            // Each read returns at most one piece
            let mut reader = setup_reader();
            let mut buf = [0u8; LINE.len()];
            let mut bytes_read = 0;

            while bytes_read < LINE.len() {
                let n = reader.read(&mut buf[bytes_read..]).await.unwrap();
                assert!(n > 0 && n <= 4);
                bytes_read += n;
            }
            assert_eq!(&buf[..], LINE);
            assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        }
    }
}
