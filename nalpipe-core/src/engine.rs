//! # Decoding Engine Interface
//!
//! The pipeline does not decode H.264 itself. It hands NAL units to a
//! [`DecodingEngine`] and reacts to the frame-ready events the engine reports.
//!
//! ## Backends
//! - [`OpenH264`](crate::registry::BackendKind::OpenH264) - Cisco software decoder
//!   (requires the `openh264` feature)

use crate::error::Result;
use crate::nal::NalUnit;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Opaque identity of an engine's output surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SurfaceHandle(u64);

impl SurfaceHandle {
    /// Allocates a process-unique handle.
    pub fn next() -> Self {
        static NEXT_SURFACE: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_SURFACE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Settings an engine is constructed with.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Decode on a dedicated thread instead of the caller's.
    pub use_worker_thread: bool,
    /// Location of the decoder's resources.
    pub decoder_resource_path: PathBuf,
    /// Initial output size, taken from the display region.
    pub output_size: Size,
}

/// Reported by an engine each time a picture has been decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReady {
    pub surface: SurfaceHandle,
    pub width: u32,
    pub height: u32,
    /// Decode-order index, starting at zero.
    pub frame_number: u64,
}

/// A decoded picture in I420 (Y, then U, then V, no stride padding).
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub frame_number: u64,
}

/// Implemented by every decoder backend.
pub trait DecodingEngine {
    /// Decodes one Annex-B framed unit. Returns the frames that became ready,
    /// which may be none (parameter sets, reordering delay, worker latency).
    fn decode(&mut self, nal: &NalUnit) -> Result<Vec<FrameReady>>;

    /// Waits for everything submitted so far and returns the remaining frames.
    fn flush(&mut self) -> Result<Vec<FrameReady>>;

    /// The surface frames are rendered to.
    fn surface(&self) -> SurfaceHandle;

    /// Failures from units decoded off the calling thread, counted since the
    /// previous call. Backends that decode inline report errors from
    /// `decode` directly and keep the default.
    fn take_deferred_errors(&mut self) -> u64 {
        0
    }

    /// Most recently decoded picture, if the backend keeps one.
    fn last_frame(&self) -> Option<&DecodedFrame> {
        None
    }

    /// Backend name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_handles_are_unique() {
        let a = SurfaceHandle::next();
        let b = SurfaceHandle::next();
        assert_ne!(a, b);
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_empty_size() {
        assert!(Size::new(0, 720).is_empty());
        assert!(Size::new(1280, 0).is_empty());
        assert!(!Size::new(1280, 720).is_empty());
    }
}
