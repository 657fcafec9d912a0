//! Body plumbing on both sides of the bridge.
//!
//! The application writes response bytes into a [`BodyWriter`]; frames
//! travel over a bounded channel into a [`StreamedBody`], the
//! `http_body::Body` the listener hands to the native engine. The first
//! write is what commits the response — see [`crate::reply`]. Teardown is
//! in-band: an abort sentinel in the channel surfaces as a body error, which
//! makes the engine drop the connection instead of finishing the message.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::Frame;
use http_body_util::BodyExt;
use tokio::sync::{mpsc, watch};

use crate::error::Error;
use crate::reply::Reply;
use crate::transfer::TransferMode;

/// One message on the exchange's body channel.
#[derive(Debug)]
pub(crate) enum Signal {
    Data(Bytes),
    /// Clean end of body; the stream finishes and the connection may be
    /// kept alive.
    End,
    /// Tear the connection down; the error reaches the engine as a body
    /// failure.
    Abort(Error),
}

// ── BodyWriter ────────────────────────────────────────────────────────────────

/// The application's response body stream.
///
/// The first `write` call (or completion without one) commits the response:
/// pending commit callbacks fire, the head freezes and goes to the wire.
/// Under a declared content-length every write is counted; a write past the
/// declared budget fails and aborts the connection rather than corrupting
/// the framing.
#[derive(Clone)]
pub struct BodyWriter {
    reply: Reply,
}

impl BodyWriter {
    pub(crate) fn new(reply: Reply) -> Self {
        Self { reply }
    }

    /// Writes one chunk of body bytes.
    ///
    /// Commits the response if this is the first write. Zero-length writes
    /// still commit but put nothing on the wire. Writes after the exchange
    /// closed — completion, abort, or a dead connection — fail with
    /// [`Error::Aborted`].
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), Error> {
        let data: Bytes = data.into();
        let mode = self.reply.commit()?;
        if self.reply.is_closed() {
            return Err(Error::Aborted);
        }
        if data.is_empty() {
            return Ok(());
        }

        match mode {
            TransferMode::Suppressed => Ok(()),
            TransferMode::Chunked => {
                self.reply
                    .shared
                    .written
                    .fetch_add(data.len() as u64, std::sync::atomic::Ordering::SeqCst);
                self.send(data).await
            }
            TransferMode::Fixed { declared } => {
                let len = data.len() as u64;
                let prior = self
                    .reply
                    .shared
                    .written
                    .fetch_add(len, std::sync::atomic::Ordering::SeqCst);
                if prior + len > declared {
                    let overrun = Error::BodyOverrun {
                        declared,
                        written: prior + len,
                    };
                    self.reply.abort(overrun.fault_copy()).await;
                    return Err(overrun);
                }
                self.send(data).await
            }
        }
    }

    async fn send(&self, data: Bytes) -> Result<(), Error> {
        self.reply
            .shared
            .body_tx
            .send(Signal::Data(data))
            .await
            .map_err(|_| Error::Aborted)
    }
}

// ── StreamedBody ──────────────────────────────────────────────────────────────

/// The listener-side body: frames out of the exchange channel, handed to the
/// native engine.
///
/// Dropping it — the engine finished the response or the connection died —
/// flips the exchange's cancellation signal.
pub struct StreamedBody {
    rx: mpsc::Receiver<Signal>,
    cancel: Option<watch::Sender<bool>>,
    done: bool,
}

impl StreamedBody {
    pub(crate) fn new(rx: mpsc::Receiver<Signal>, cancel: watch::Sender<bool>) -> Self {
        Self {
            rx,
            cancel: Some(cancel),
            done: false,
        }
    }
}

impl http_body::Body for StreamedBody {
    type Data = Bytes;
    type Error = Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Signal::Data(data))) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Poll::Ready(Some(Signal::End)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Signal::Abort(error))) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            // Every producer vanished without a close sentinel; treat it as
            // an abort so the client never waits on a dangling exchange.
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(Some(Err(Error::Aborted)))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

impl Drop for StreamedBody {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(true);
        }
    }
}

// ── BodyReader ────────────────────────────────────────────────────────────────

/// The application's view of the request body.
enum Source {
    Incoming(hyper::body::Incoming),
    Full(Bytes),
    Empty,
}

pub struct BodyReader {
    source: Source,
}

impl BodyReader {
    pub fn empty() -> Self {
        Self { source: Source::Empty }
    }

    /// A body served from memory — for tests and non-native listeners.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            source: Source::Full(data.into()),
        }
    }

    pub(crate) fn from_incoming(body: hyper::body::Incoming) -> Self {
        Self {
            source: Source::Incoming(body),
        }
    }

    /// Next chunk of body data, or `None` at end of stream.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match &mut self.source {
            Source::Incoming(body) => loop {
                match body.frame().await {
                    None => return Ok(None),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(frame)) => {
                        // Trailer frames are not data; keep reading.
                        if let Ok(data) = frame.into_data() {
                            return Ok(Some(data));
                        }
                    }
                }
            },
            Source::Full(data) => {
                if data.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(std::mem::take(data)))
                }
            }
            Source::Empty => Ok(None),
        }
    }

    /// Reads the whole body into one buffer.
    pub async fn bytes(self) -> Result<Bytes, Error> {
        match self.source {
            Source::Incoming(body) => Ok(body.collect().await?.to_bytes()),
            Source::Full(data) => Ok(data),
            Source::Empty => Ok(Bytes::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn exchange_parts() -> (BodyWriter, StreamedBody, oneshot::Receiver<Result<crate::reply::Head, Error>>) {
        let (body_tx, body_rx) = mpsc::channel(8);
        let (head_tx, head_rx) = oneshot::channel();
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        let reply = Reply::new(body_tx, head_tx);
        (
            BodyWriter::new(reply),
            StreamedBody::new(body_rx, cancel_tx),
            head_rx,
        )
    }

    #[tokio::test]
    async fn first_write_commits_and_streams() {
        let (writer, mut body, mut head_rx) = exchange_parts();
        writer.write(&b"hello"[..]).await.unwrap();

        let head = head_rx.try_recv().unwrap().unwrap();
        assert_eq!(head.mode, TransferMode::Chunked);

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn overrun_fails_the_write_and_aborts_the_stream() {
        let (writer, mut body, _head_rx) = exchange_parts();
        writer
            .reply
            .with_headers(|h| h.set("content-length", vec!["3".into()]))
            .unwrap();

        let err = writer.write(&b"too long"[..]).await.unwrap_err();
        assert!(matches!(err, Error::BodyOverrun { declared: 3, .. }));
        assert!(matches!(body.frame().await, Some(Err(Error::BodyOverrun { .. }))));
    }

    #[tokio::test]
    async fn suppressed_mode_discards_writes() {
        let (writer, _body, mut head_rx) = exchange_parts();
        writer.reply.set_status(crate::env::Value::Int(101));
        writer
            .reply
            .with_headers(|h| h.set("content-length", vec!["10".into()]))
            .unwrap();

        writer.write(vec![0u8; 10]).await.unwrap();
        let head = head_rx.try_recv().unwrap().unwrap();
        assert_eq!(head.mode, TransferMode::Suppressed);
        assert!(head.headers.get("content-length").is_none());
    }

    #[tokio::test]
    async fn writes_after_close_are_rejected() {
        let (writer, _body, _head_rx) = exchange_parts();
        writer.reply.finish(Ok(())).await;
        assert!(matches!(writer.write(&b"late"[..]).await, Err(Error::Aborted)));
    }

    #[tokio::test]
    async fn dropping_the_streamed_body_cancels_the_exchange() {
        let (body_tx, body_rx) = mpsc::channel(8);
        let (_head_tx, _head_rx) = oneshot::channel::<Result<crate::reply::Head, Error>>();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let body = StreamedBody::new(body_rx, cancel_tx);
        let _keep = body_tx;

        assert!(!*cancel_rx.borrow());
        drop(body);
        assert!(*cancel_rx.borrow());
    }

    #[tokio::test]
    async fn memory_reader_round_trips() {
        let mut reader = BodyReader::from_bytes("payload");
        assert_eq!(reader.chunk().await.unwrap().unwrap(), "payload");
        assert!(reader.chunk().await.unwrap().is_none());

        let reader = BodyReader::from_bytes("payload");
        assert_eq!(reader.bytes().await.unwrap(), "payload");
    }
}
