//! # Playback Session
//!
//! One stream, one decoding engine, one display region.
//!
//! ```text
//! ChunkStream ─► StreamReader ─► PlaybackDriver ─► engine ─► PresentationBinder ─► region
//! ```
//!
//! Sessions come from [`CapabilityRegistry::get_instance`](crate::registry::CapabilityRegistry::get_instance).
//! Drive one either by awaiting [`run`](PlaybackSession::run) or by pushing
//! events through [`handle`](PlaybackSession::handle).

use crate::binder::{DisplayRegion, PresentationBinder, Scale};
use crate::driver::{DriverStats, PlaybackDriver, VideoPlayer};
use crate::engine::DecodedFrame;
use crate::nal::NalUnit;
use crate::reader::{ChunkStream, NalSink, StreamEvent, StreamReader};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Playing,
    /// Stream ended normally.
    Completed,
    /// Stream channel closed without an end marker.
    Aborted,
    /// `stop()` was called.
    Stopped,
}

/// Summary of a session, suitable for logging or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub backend: String,
    pub state: SessionState,
    pub chunks: u64,
    pub units: u64,
    pub bytes_appended: u64,
    pub bytes_discarded: u64,
    pub bytes_buffered: usize,
    pub frames_presented: u64,
    pub scale: Option<Scale>,
    pub attached: bool,
    pub driver: DriverStats,
}

/// Decode and present side of a session; the reader's sink.
struct Playback<R: DisplayRegion> {
    driver: PlaybackDriver,
    binder: PresentationBinder,
    region: R,
    last_frame: Option<DecodedFrame>,
}

impl<R: DisplayRegion> Playback<R> {
    fn shutdown(&mut self) {
        if self.last_frame.is_none() {
            self.last_frame = self
                .driver
                .engine()
                .and_then(|engine| engine.last_frame())
                .cloned();
        }
        self.driver.release();
        self.binder.detach(&mut self.region);
    }
}

impl<R: DisplayRegion> NalSink for Playback<R> {
    fn on_nal(&mut self, nal: NalUnit) {
        for frame in self.driver.feed(&nal) {
            self.binder.on_frame_ready(&mut self.region, &frame);
        }
    }

    fn on_end(&mut self) {
        for frame in self.driver.finish() {
            self.binder.on_frame_ready(&mut self.region, &frame);
        }
        self.shutdown();
    }
}

pub struct PlaybackSession<R: DisplayRegion> {
    stream: ChunkStream,
    reader: StreamReader,
    playback: Playback<R>,
    state: SessionState,
}

impl<R: DisplayRegion> PlaybackSession<R> {
    pub(crate) fn new(stream: ChunkStream, driver: PlaybackDriver, region: R) -> Self {
        tracing::info!(
            "Playback session on {} ({}x{} region)",
            driver.backend(),
            region.size().width,
            region.size().height
        );

        Self {
            stream,
            reader: StreamReader::new(),
            playback: Playback {
                binder: PresentationBinder::new(driver.surface()),
                driver,
                region,
                last_frame: None,
            },
            state: SessionState::Playing,
        }
    }

    /// Processes one event synchronously, bypassing the channel.
    pub fn handle(&mut self, event: StreamEvent) {
        if self.state != SessionState::Playing {
            tracing::debug!("Session {:?}, ignoring event", self.state);
            return;
        }

        self.reader.handle(event, &mut self.playback);
        if self.reader.is_ended() {
            self.state = SessionState::Completed;
            self.log_finished();
        }
    }

    /// Plays the stream to the end and returns the final report.
    pub async fn run(&mut self) -> SessionReport {
        while self.state == SessionState::Playing {
            match self.stream.next_event().await {
                Some(event) => self.handle(event),
                None => {
                    self.reader.on_abort(&mut self.playback);
                    self.state = SessionState::Aborted;
                    self.log_finished();
                }
            }
        }

        self.report()
    }

    /// Cancels playback: closes the stream, releases the engine and detaches
    /// the surface. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.state != SessionState::Playing {
            return;
        }

        self.stream.close();
        self.playback.shutdown();
        self.state = SessionState::Stopped;
        self.log_finished();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn region(&self) -> &R {
        &self.playback.region
    }

    /// Last decoded picture, kept after the engine is released.
    pub fn last_frame(&self) -> Option<&DecodedFrame> {
        self.playback.last_frame.as_ref().or_else(|| {
            self.playback
                .driver
                .engine()
                .and_then(|engine| engine.last_frame())
        })
    }

    pub fn report(&self) -> SessionReport {
        let buffer = self.reader.buffer();
        let binder = &self.playback.binder;

        SessionReport {
            backend: self.playback.driver.backend().to_string(),
            state: self.state,
            chunks: self.reader.chunks(),
            units: self.reader.units(),
            bytes_appended: buffer.appended_bytes(),
            bytes_discarded: buffer.discarded_bytes(),
            bytes_buffered: buffer.buffered_bytes(),
            frames_presented: binder.frames_presented(),
            scale: binder.scale(),
            attached: binder.is_attached(),
            driver: self.playback.driver.stats().clone(),
        }
    }

    fn log_finished(&self) {
        let stats = self.playback.driver.stats();
        tracing::info!(
            "Session {:?}: {} units, {} frames, {} decode errors",
            self.state,
            self.reader.units(),
            stats.frames,
            stats.decode_errors
        );
    }
}

impl<R: DisplayRegion> VideoPlayer for PlaybackSession<R> {
    fn sync(&mut self) {
        self.playback.driver.sync();
    }
}

impl<R: DisplayRegion> Drop for PlaybackSession<R> {
    fn drop(&mut self) {
        self.stop();
    }
}
