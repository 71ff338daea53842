//! # nalpipe Core
//!
//! Client-side ingestion of H.264 Annex-B video delivered as an arbitrarily
//! chunked byte stream: NAL unit reassembly, decoding, and presentation.
//!
//! ```text
//! transport ─► reader ─► nal ─► driver ─► engine ─► binder ─► display region
//!                                  ▲
//!                   registry ──────┘ (picks the backend once)
//! ```

// ============================================================================
// Stream Parsing
// ============================================================================
pub mod nal;
pub mod reader;

// ============================================================================
// Decoding
// ============================================================================
pub mod engine;
pub mod driver;
#[cfg(feature = "openh264")]
pub mod openh264_decode;

// ============================================================================
// Presentation
// ============================================================================
pub mod binder;

// ============================================================================
// Playback
// ============================================================================
pub mod registry;
pub mod session;

// ============================================================================
// Support
// ============================================================================
pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod testutil;

pub use binder::{DisplayRegion, HeadlessRegion, PresentationBinder, Scale};
pub use config::PipelineConfig;
pub use driver::{PlaybackDriver, VideoPlayer};
pub use engine::{DecodingEngine, EngineConfig, FrameReady, Size, SurfaceHandle};
pub use error::{PipelineError, Result};
pub use nal::{NalBuffer, NalType, NalUnit};
pub use reader::{stream_channel, ChunkSender, ChunkStream, StreamEvent, StreamReader};
pub use registry::{BackendKind, CapabilityProvider, CapabilityRegistry, H264_MEDIA_TYPE};
pub use session::{PlaybackSession, SessionReport, SessionState};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
