//! Shared helpers for the server's unit tests.

use frelay_core::{decode_payload, ChatResult, Command, Envelope, FrameEvent, Reassembler};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

pub fn peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

/// A transport whose every write fails.
pub struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Client-side frame reader with a bounded wait per frame.
pub struct FrameReader<R> {
    inner: R,
    reassembler: Reassembler,
    queue: VecDeque<Envelope>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            reassembler: Reassembler::default(),
            queue: VecDeque::new(),
        }
    }

    /// Next envelope, or `None` at end of stream. Panics after 5 seconds.
    pub async fn next(&mut self) -> Option<Envelope> {
        tokio::time::timeout(Duration::from_secs(5), self.next_inner())
            .await
            .expect("timed out waiting for a frame")
    }

    async fn next_inner(&mut self) -> Option<Envelope> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(env) = self.queue.pop_front() {
                return Some(env);
            }
            let n = self.inner.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            for event in self.reassembler.feed(&buf[..n]) {
                match event {
                    FrameEvent::Frame(env) => self.queue.push_back(env),
                    FrameEvent::Malformed { reason } => panic!("malformed frame from server: {reason}"),
                }
            }
        }
    }

    /// Text of the next `Result` frame.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            let env = self.next().await?;
            if env.command_id == i32::from(Command::Result) {
                let result: ChatResult = decode_payload(&env.payload).ok()?;
                return Some(result.text);
            }
        }
    }

    /// Skip `Result` texts until one equals `want`.
    pub async fn wait_for_text(&mut self, want: &str) -> bool {
        while let Some(text) = self.next_text().await {
            if text == want {
                return true;
            }
        }
        false
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}
