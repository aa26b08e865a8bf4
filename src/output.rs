//! Replayable, multi-reader output distribution.
//!
//! Each job owns one [`OutputBuffer`]: an append-only log of output chunks
//! written by the job's supervisor and read by any number of independent
//! [`OutputReader`]s. A reader replays everything from sequence 0 no matter
//! when it attaches, then follows live appends, and sees end-of-stream once
//! the buffer is closed.
//!
//! Readers coordinate with the single producer through a mutex over the
//! chunk log plus a [`Notify`] signalled on every append and on close. The
//! lock is never held across a suspension point: a blocked reader registers
//! for notification, releases the lock, and re-checks after waking.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_stream::wrappers::ReceiverStream;

/// One immutable piece of a job's combined output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Strictly increasing from 0, no gaps.
    pub seq: u64,
    pub data: Bytes,
}

#[derive(Debug, Default)]
struct BufferState {
    chunks: Vec<Bytes>,
    closed: bool,
}

/// Append-only record of a single producer's output, retained for the
/// worker's lifetime so late readers can replay it in full.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    state: Mutex<BufferState>,
    readable: Notify,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and wake blocked readers. Producer-only: called by the
    /// supervisor's capture tasks. Appends after close violate the producer
    /// contract and are dropped.
    pub async fn append(&self, data: Bytes) {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                tracing::warn!(len = data.len(), "Output chunk dropped: buffer already closed");
                return;
            }
            state.chunks.push(data);
        }
        self.readable.notify_waiters();
    }

    /// Mark end-of-stream and wake all blocked readers. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.readable.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Number of chunks appended so far.
    pub async fn len(&self) -> u64 {
        self.state.lock().await.chunks.len() as u64
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.chunks.is_empty()
    }

    /// New independent reader starting at sequence 0.
    pub fn reader(self: &Arc<Self>) -> OutputReader {
        self.reader_from(0)
    }

    /// New independent reader starting at `seq`.
    pub fn reader_from(self: &Arc<Self>, seq: u64) -> OutputReader {
        OutputReader {
            buffer: Arc::clone(self),
            cursor: seq,
        }
    }
}

/// One reader's cursor into an [`OutputBuffer`].
///
/// Readers do not interfere with each other or with the producer; dropping
/// one mid-stream releases only its own cursor.
#[derive(Debug)]
pub struct OutputReader {
    buffer: Arc<OutputBuffer>,
    cursor: u64,
}

impl OutputReader {
    /// Next chunk at or past the cursor, in append order.
    ///
    /// Suspends while the buffer has no chunk past the cursor and is still
    /// open. Returns `None` exactly once, when the buffer is closed and the
    /// cursor has caught up.
    pub async fn next_chunk(&mut self) -> Option<OutputChunk> {
        loop {
            // Register for wakeup before checking, so an append between the
            // check and the await is not missed.
            let notified = self.buffer.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.buffer.state.lock().await;
                if let Some(data) = state.chunks.get(self.cursor as usize) {
                    let chunk = OutputChunk {
                        seq: self.cursor,
                        data: data.clone(),
                    };
                    self.cursor += 1;
                    return Some(chunk);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Sequence number the next chunk will carry.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Adapt the reader into a `Stream` of chunks via a forwarding task.
    ///
    /// Dropping the stream abandons the reader: the forwarding task notices
    /// the closed channel and exits without touching other readers.
    pub fn into_stream(mut self) -> ReceiverStream<OutputChunk> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            while let Some(chunk) = self.next_chunk().await {
                if tx.send(chunk).await.is_err() {
                    // Receiver dropped, stop forwarding.
                    break;
                }
            }
        });
        ReceiverStream::new(rx)
    }
}
