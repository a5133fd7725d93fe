//! Interactive relay client: connect, print pushed results, send chat lines.

use anyhow::{bail, Context, Result};
use frelay_core::{
    decode_payload, encode_payload, ChatRequest, ChatResult, Command, FrameCodec, FrameEvent,
    Reassembler,
};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

/// Connect to `server`, retrying every `interval` until it answers.
///
/// `retries == 0` keeps trying forever.
pub async fn connect_with_retry(server: &str, interval: Duration, retries: u32) -> Result<TcpStream> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(server).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "set_nodelay failed");
                }
                info!(server = %server, attempt, "connected");
                return Ok(stream);
            }
            Err(e) if retries == 0 || attempt < retries => {
                warn!(server = %server, attempt, error = %e, "connect failed, retrying");
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("could not connect to {server} after {attempt} attempts")
                });
            }
        }
    }
}

/// Read frames until the server hangs up, handing every `Result` text to
/// `on_text`. Unknown command ids are skipped; a malformed frame ends the loop
/// with an error.
pub async fn read_loop<R, F>(mut reader: R, codec: FrameCodec, mut on_text: F) -> Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reassembler = Reassembler::new(codec);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buf).await.context("read from server failed")?;
        if n == 0 {
            debug!("server closed the connection");
            return Ok(());
        }

        for event in reassembler.feed(&buf[..n]) {
            let envelope = match event {
                FrameEvent::Frame(envelope) => envelope,
                FrameEvent::Malformed { reason } => bail!("malformed frame from server: {reason}"),
            };
            match Command::try_from(envelope.command_id) {
                Ok(Command::Result) => {
                    let result: ChatResult = decode_payload(&envelope.payload)
                        .context("undecodable result payload")?;
                    on_text(result.text);
                }
                Ok(other) => debug!(command = ?other, "ignoring command from server"),
                Err(_) => warn!(command_id = envelope.command_id, "skipping unknown command"),
            }
        }
    }
}

/// Parse a `<target_id> <text>` input line. Blank lines yield `None`.
pub fn parse_chat_line(line: &str) -> Result<Option<ChatRequest>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (target, text) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let target_id: u64 = target
        .parse()
        .with_context(|| format!("invalid target id {target:?}, expected `<id> <text>`"))?;

    Ok(Some(ChatRequest {
        target_id,
        text: text.trim_start().to_string(),
    }))
}

/// Send a `Chat` frame for every input line until EOF or `interrupt`
/// resolves, then send `None` so the server ends the session.
pub async fn write_loop<L, W, S>(
    mut lines: L,
    mut writer: W,
    codec: FrameCodec,
    interrupt: S,
) -> Result<()>
where
    L: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = &mut interrupt => break,
            read = lines.read_line(&mut line) => read.context("failed to read input")?,
        };
        if read == 0 {
            break;
        }

        let request = match parse_chat_line(&line) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("frelay: {e:#}");
                continue;
            }
        };
        let frame = codec.encode(Command::Chat.into(), &encode_payload(&request)?)?;
        writer
            .write_all(&frame)
            .await
            .context("failed to send chat")?;
    }

    let bye = codec.encode(Command::None.into(), &[])?;
    writer
        .write_all(&bye)
        .await
        .context("failed to send terminate")?;
    writer.flush().await?;
    debug!("sent terminate");
    Ok(())
}
