//! # Stream Reader
//!
//! Bridges a chunked byte transport to the NAL demultiplexer.
//!
//! ```text
//! producer ──ChunkSender──► [Data, Data, ..., End] ──ChunkStream──► StreamReader ──► NalSink
//! ```
//!
//! The transport side pushes [`StreamEvent::Data`] chunks and exactly one
//! [`StreamEvent::End`]. Dropping the [`ChunkSender`] without ending the
//! stream, or closing the [`ChunkStream`], cancels it.

use crate::error::{PipelineError, Result};
use crate::nal::{NalBuffer, NalUnit};
use bytes::Bytes;
use tokio::sync::mpsc;

// ============================================================================
// Channel
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(Bytes),
    End,
}

/// Creates a bounded chunk channel.
pub fn stream_channel(capacity: usize) -> (ChunkSender, ChunkStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChunkSender { tx }, ChunkStream { rx })
}

/// Producer half, held by the transport.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChunkSender {
    pub async fn send(&self, chunk: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(StreamEvent::Data(chunk.into()))
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    /// Signals end of stream.
    pub async fn end(self) -> Result<()> {
        self.tx
            .send(StreamEvent::End)
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, held by the playback session.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl ChunkStream {
    /// Next event, or `None` once every sender is gone and the queue is empty.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Stops accepting chunks. Events already queued can still be read.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Receives what the reader extracts.
pub trait NalSink {
    fn on_nal(&mut self, nal: NalUnit);

    /// Called exactly once, after the last unit.
    fn on_end(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Open,
    Ended,
}

#[derive(Debug)]
pub struct StreamReader {
    buffer: NalBuffer,
    state: ReaderState,
    chunks: u64,
    units: u64,
}

impl Default for StreamReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReader {
    pub fn new() -> Self {
        Self {
            buffer: NalBuffer::new(),
            state: ReaderState::Open,
            chunks: 0,
            units: 0,
        }
    }

    /// Appends a chunk and forwards every unit it completes, in order.
    /// Returns how many units were forwarded.
    pub fn on_data<S: NalSink + ?Sized>(&mut self, chunk: Bytes, sink: &mut S) -> usize {
        if self.state == ReaderState::Ended {
            tracing::debug!("Ignoring {} byte chunk after end of stream", chunk.len());
            return 0;
        }

        self.chunks += 1;
        self.buffer.append(chunk);
        self.drain(sink)
    }

    /// Flushes the final unit, then ends the sink.
    pub fn on_end<S: NalSink + ?Sized>(&mut self, sink: &mut S) {
        if self.state == ReaderState::Ended {
            return;
        }

        self.buffer.finish();
        self.drain(sink);
        self.close(sink);
    }

    /// Ends the sink without flushing. The unit in progress may be truncated
    /// and is dropped.
    pub fn on_abort<S: NalSink + ?Sized>(&mut self, sink: &mut S) {
        if self.state == ReaderState::Ended {
            return;
        }

        tracing::debug!(
            "Stream aborted with {} bytes buffered",
            self.buffer.buffered_bytes()
        );
        self.close(sink);
    }

    pub fn handle<S: NalSink + ?Sized>(&mut self, event: StreamEvent, sink: &mut S) {
        match event {
            StreamEvent::Data(chunk) => {
                self.on_data(chunk, sink);
            }
            StreamEvent::End => self.on_end(sink),
        }
    }

    /// Pulls events until the stream ends or its channel closes.
    pub async fn run<S: NalSink + ?Sized>(&mut self, stream: &mut ChunkStream, sink: &mut S) {
        while self.state == ReaderState::Open {
            match stream.next_event().await {
                Some(event) => self.handle(event, sink),
                None => self.on_abort(sink),
            }
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state == ReaderState::Ended
    }

    pub fn buffer(&self) -> &NalBuffer {
        &self.buffer
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    fn drain<S: NalSink + ?Sized>(&mut self, sink: &mut S) -> usize {
        let mut forwarded = 0;
        while let Some(nal) = self.buffer.remove_next() {
            sink.on_nal(nal);
            forwarded += 1;
        }
        self.units += forwarded as u64;
        forwarded
    }

    fn close<S: NalSink + ?Sized>(&mut self, sink: &mut S) {
        self.state = ReaderState::Ended;
        sink.on_end();
    }
}
