//! Moves chunks between the blocking store and async request bodies.
//!
//! Both directions use a bounded channel, so a slow client slows down the
//! engine scan and a slow engine slows down reading the request.

use std::io;
use std::time::Duration;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use kvb_store::ChunkStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ServerError, ServerResult};

/// Chunks buffered between the two sides.
pub const CHANNEL_DEPTH: usize = 4;

/// Response body that pulls `chunks` on the blocking pool.
///
/// A stream error ends the body with an error, which aborts the response
/// instead of ending it cleanly.
pub fn stream_body(chunks: ChunkStream) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        for chunk in chunks {
            let failed = chunk.is_err();
            if tx.blocking_send(chunk.map_err(io::Error::other)).is_err() {
                debug!("client stopped reading");
                return;
            }
            if failed {
                return;
            }
        }
    });
    Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

#[derive(Debug)]
pub enum UploadFrame {
    Data(Bytes),
    End,
}

/// Blocking iterator over an upload, fed by [`forward_body`].
///
/// The upload only counts as complete when the `End` frame arrives; a
/// channel closed before that yields an error so a cut-off body is never
/// stored as a finished revision.
#[derive(Debug)]
pub struct UploadChunks {
    rx: mpsc::Receiver<UploadFrame>,
    ended: bool,
}

impl UploadChunks {
    pub fn new(rx: mpsc::Receiver<UploadFrame>) -> Self {
        Self { rx, ended: false }
    }
}

impl Iterator for UploadChunks {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ended {
            return None;
        }
        match self.rx.blocking_recv() {
            Some(UploadFrame::Data(chunk)) => Some(Ok(chunk)),
            Some(UploadFrame::End) => {
                self.ended = true;
                None
            }
            None => {
                self.ended = true;
                Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "request body ended before completion",
                )))
            }
        }
    }
}

/// Read `body`, cut it into `chunk_size` pieces and send them to `tx`,
/// followed by `End`.
///
/// With `idle` set, a client that sends nothing for that long fails the
/// upload with [`ServerError::Timeout`]; `End` is then never sent.
/// Returns early without error if the receiving writer has gone away; the
/// writer's own result explains why.
pub async fn forward_body(
    body: Body,
    chunk_size: usize,
    idle: Option<Duration>,
    tx: mpsc::Sender<UploadFrame>,
) -> ServerResult<()> {
    let chunk_size = chunk_size.max(1);
    let mut frames = body.into_data_stream();
    let mut pending = BytesMut::new();
    loop {
        let next = match idle {
            Some(limit) => tokio::time::timeout(limit, frames.next())
                .await
                .map_err(|_| ServerError::Timeout("read request body"))?,
            None => frames.next().await,
        };
        let Some(frame) = next else { break };
        let frame = frame.map_err(|e| ServerError::BadRequest(format!("reading request body: {e}")))?;
        pending.extend_from_slice(&frame);
        while pending.len() >= chunk_size {
            let chunk = pending.split_to(chunk_size).freeze();
            if tx.send(UploadFrame::Data(chunk)).await.is_err() {
                return Ok(());
            }
        }
    }
    if !pending.is_empty() && tx.send(UploadFrame::Data(pending.freeze())).await.is_err() {
        return Ok(());
    }
    let _ = tx.send(UploadFrame::End).await;
    Ok(())
}
