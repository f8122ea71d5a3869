//! SSE consumption: raw byte streams into [`StreamFrame`]s.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use sessionwire_protocol::{ErrorEnvelope, StreamFrame};
use tokio::sync::mpsc;

use crate::error_map;

pub type FrameResult = Result<StreamFrame, ErrorEnvelope>;

/// Frames received from the server, in arrival order.
///
/// Ends when the connection closes. A transport failure is delivered as a
/// single `Err` item before the end.
pub struct EventStream {
    rx: mpsc::Receiver<FrameResult>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<FrameResult>) -> Self {
        Self { rx }
    }
}

impl Stream for EventStream {
    type Item = FrameResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Forwards decoded frames from `body` into `tx` until the body ends, a
/// transport error occurs, or the receiver is dropped.
pub(crate) async fn pump(
    mut body: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
    tx: mpsc::Sender<FrameResult>,
) {
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = tx.send(Err(error_map::from_transport(&err))).await;
                return;
            }
        };
        buffer.extend_from_slice(&chunk);
        if buffer.contains(&b'\r') {
            normalize_newlines(&mut buffer);
        }

        while let Some(block) = take_block(&mut buffer) {
            let Some(frame) = StreamFrame::decode(&block) else {
                continue;
            };
            if tx.send(Ok(frame)).await.is_err() {
                return;
            }
        }
    }
}

/// Rewrites `\r\n` as `\n` in place. A trailing lone `\r` is kept until the
/// next chunk shows whether a `\n` follows it.
fn normalize_newlines(buffer: &mut Vec<u8>) {
    let mut out = Vec::with_capacity(buffer.len());
    let mut bytes = buffer.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        if byte == b'\r' && bytes.peek() == Some(&b'\n') {
            continue;
        }
        out.push(byte);
    }
    *buffer = out;
}

/// Removes and returns the next complete block (text before a blank line).
///
/// Blocks are only decoded once complete, so a multi-byte character split
/// across chunks is never cut in half.
fn take_block(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.windows(2).position(|pair| pair == b"\n\n")?;
    let block = String::from_utf8_lossy(&buffer[..pos]).into_owned();
    buffer.drain(..pos + 2);
    Some(block)
}
