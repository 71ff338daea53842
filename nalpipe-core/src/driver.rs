//! # Playback Driver
//!
//! Feeds NAL units to a decoding engine in exactly the order they were
//! extracted. Any reordering (B-frames) is the engine's business.
//!
//! Decode errors are logged and counted; one bad unit does not end playback.

use crate::engine::{DecodingEngine, FrameReady, SurfaceHandle};
use crate::nal::{NalType, NalUnit};
use serde::Serialize;

/// Common player surface.
pub trait VideoPlayer {
    /// Marks everything delivered so far as "should be on screen now".
    /// Backends that track buffered-vs-rendered latency hook in here; the
    /// default does nothing.
    fn sync(&mut self) {}
}

/// Counters for one playback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    pub units_fed: u64,
    pub units_skipped: u64,
    pub bytes_fed: u64,
    pub decode_errors: u64,
    pub frames: u64,
    pub sps: u64,
    pub pps: u64,
    pub idr: u64,
    pub syncs: u64,
}

pub struct PlaybackDriver {
    engine: Option<Box<dyn DecodingEngine>>,
    surface: SurfaceHandle,
    backend: String,
    stats: DriverStats,
}

impl PlaybackDriver {
    pub fn new(engine: Box<dyn DecodingEngine>) -> Self {
        Self {
            surface: engine.surface(),
            backend: engine.name().to_string(),
            engine: Some(engine),
            stats: DriverStats::default(),
        }
    }

    /// Decodes one unit and returns the frames that became ready.
    pub fn feed(&mut self, nal: &NalUnit) -> Vec<FrameReady> {
        let Some(engine) = self.engine.as_mut() else {
            tracing::trace!("Engine released, dropping {:?}", nal);
            return Vec::new();
        };

        // Back-to-back start codes leave nothing to decode
        if !nal.has_payload() {
            self.stats.units_skipped += 1;
            return Vec::new();
        }

        match nal.nal_type() {
            Some(NalType::Sps) => self.stats.sps += 1,
            Some(NalType::Pps) => self.stats.pps += 1,
            Some(NalType::Idr) => self.stats.idr += 1,
            _ => {}
        }

        self.stats.units_fed += 1;
        self.stats.bytes_fed += nal.len() as u64;

        let frames = match engine.decode(nal) {
            Ok(frames) => {
                self.stats.frames += frames.len() as u64;
                frames
            }
            Err(e) => {
                self.stats.decode_errors += 1;
                tracing::warn!("{} failed on {:?}: {}", self.backend, nal, e);
                Vec::new()
            }
        };
        self.stats.decode_errors += engine.take_deferred_errors();
        frames
    }

    /// Drains frames still inside the engine.
    pub fn finish(&mut self) -> Vec<FrameReady> {
        let Some(engine) = self.engine.as_mut() else {
            return Vec::new();
        };

        let frames = match engine.flush() {
            Ok(frames) => {
                self.stats.frames += frames.len() as u64;
                frames
            }
            Err(e) => {
                self.stats.decode_errors += 1;
                tracing::warn!("{} flush failed: {}", self.backend, e);
                Vec::new()
            }
        };
        self.stats.decode_errors += engine.take_deferred_errors();
        frames
    }

    /// Drops the engine. Later feeds are ignored.
    pub fn release(&mut self) {
        if self.engine.take().is_some() {
            tracing::debug!("Released {} engine", self.backend);
        }
    }

    pub fn is_released(&self) -> bool {
        self.engine.is_none()
    }

    pub fn engine(&self) -> Option<&dyn DecodingEngine> {
        self.engine.as_deref()
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }
}

impl VideoPlayer for PlaybackDriver {
    fn sync(&mut self) {
        self.stats.syncs += 1;
        tracing::trace!("sync after {} units", self.stats.units_fed);
    }
}
