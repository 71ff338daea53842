//! # Capability Registry
//!
//! Decides whether a media type can be played and builds the session for it.
//! Nothing here fails loudly: an unsupported type or an unconfigured backend
//! simply yields `false`, an empty list or `None`.
//!
//! Backend availability comes from a [`CapabilityProvider`] handed in at
//! construction. [`RuntimeCapabilities`] is the provider used outside tests.

use crate::binder::DisplayRegion;
use crate::config::PipelineConfig;
use crate::driver::PlaybackDriver;
use crate::engine::{DecodingEngine, EngineConfig};
use crate::error::Result;
use crate::reader::ChunkStream;
use crate::session::PlaybackSession;
use serde::Serialize;
use std::path::Path;

/// The one media type the pipeline understands. Matched exactly; parameters
/// such as `; profile-level-id=...` are not parsed.
pub const H264_MEDIA_TYPE: &str = "video/h264";

// ============================================================================
// Backends
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackendKind {
    /// Cisco OpenH264 software decoder
    OpenH264,
}

impl BackendKind {
    pub const ALL: &'static [BackendKind] = &[BackendKind::OpenH264];

    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenH264 => "OpenH264",
        }
    }

    pub fn media_types(&self) -> &'static [&'static str] {
        match self {
            Self::OpenH264 => &[H264_MEDIA_TYPE],
        }
    }

    /// Compiled into this build.
    pub fn is_compiled(&self) -> bool {
        match self {
            Self::OpenH264 => cfg!(feature = "openh264"),
        }
    }
}

/// Source of truth for which backends exist and how to build them.
pub trait CapabilityProvider {
    /// Decoder resource location. `None` means not configured, in which case
    /// nothing is supported.
    fn resource_path(&self) -> Option<&Path>;

    /// Backends usable right now, in preference order.
    fn available_backends(&self) -> Vec<BackendKind>;

    fn use_worker_thread(&self) -> bool {
        false
    }

    fn create_engine(
        &self,
        backend: BackendKind,
        config: &EngineConfig,
    ) -> Result<Box<dyn DecodingEngine>>;
}

/// Capabilities of the running process, derived from [`PipelineConfig`].
///
/// A backend is available when it is compiled in and the configured resource
/// path exists.
#[derive(Debug, Clone)]
pub struct RuntimeCapabilities {
    config: PipelineConfig,
}

impl RuntimeCapabilities {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl CapabilityProvider for RuntimeCapabilities {
    fn resource_path(&self) -> Option<&Path> {
        self.config.decoder_resource_path.as_deref()
    }

    fn available_backends(&self) -> Vec<BackendKind> {
        let Some(path) = self.resource_path() else {
            return Vec::new();
        };
        if !path.exists() {
            tracing::debug!("Decoder resource path {} not found", path.display());
            return Vec::new();
        }

        BackendKind::ALL
            .iter()
            .copied()
            .filter(BackendKind::is_compiled)
            .collect()
    }

    fn use_worker_thread(&self) -> bool {
        self.config.use_worker_thread
    }

    fn create_engine(
        &self,
        backend: BackendKind,
        config: &EngineConfig,
    ) -> Result<Box<dyn DecodingEngine>> {
        match backend {
            BackendKind::OpenH264 => create_openh264(config),
        }
    }
}

#[cfg(feature = "openh264")]
fn create_openh264(config: &EngineConfig) -> Result<Box<dyn DecodingEngine>> {
    Ok(Box::new(crate::openh264_decode::OpenH264Engine::new(config)?))
}

#[cfg(not(feature = "openh264"))]
fn create_openh264(_config: &EngineConfig) -> Result<Box<dyn DecodingEngine>> {
    Err(crate::error::PipelineError::EngineInit {
        backend: BackendKind::OpenH264.name().into(),
        reason: "built without the openh264 feature".into(),
    })
}

// ============================================================================
// Registry
// ============================================================================

pub struct CapabilityRegistry<P: CapabilityProvider = RuntimeCapabilities> {
    provider: P,
}

impl CapabilityRegistry<RuntimeCapabilities> {
    pub fn from_config(config: PipelineConfig) -> Self {
        Self::new(RuntimeCapabilities::new(config))
    }
}

impl<P: CapabilityProvider> CapabilityRegistry<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// First available backend that handles `media_type`.
    pub fn backend_for(&self, media_type: &str) -> Option<BackendKind> {
        self.provider.resource_path()?;
        self.provider
            .available_backends()
            .into_iter()
            .find(|backend| backend.media_types().contains(&media_type))
    }

    pub fn is_supported_type(&self, media_type: &str) -> bool {
        self.backend_for(media_type).is_some()
    }

    /// Every media type some available backend can play. Empty when no
    /// resource path is configured.
    pub fn supported_types(&self) -> Vec<&'static str> {
        if self.provider.resource_path().is_none() {
            return Vec::new();
        }

        let mut types: Vec<&'static str> = Vec::new();
        for backend in self.provider.available_backends() {
            for &media_type in backend.media_types() {
                if !types.contains(&media_type) {
                    types.push(media_type);
                }
            }
        }
        types
    }

    /// Builds a session playing `stream` into `region`, or `None` if
    /// `media_type` is unsupported or its engine cannot be created.
    pub fn get_instance<R: DisplayRegion>(
        &self,
        stream: ChunkStream,
        region: R,
        media_type: &str,
    ) -> Option<PlaybackSession<R>> {
        let backend = self.backend_for(media_type)?;
        let resource_path = self.provider.resource_path()?;

        let config = EngineConfig {
            use_worker_thread: self.provider.use_worker_thread(),
            decoder_resource_path: resource_path.to_path_buf(),
            output_size: region.size(),
        };

        match self.provider.create_engine(backend, &config) {
            Ok(engine) => Some(PlaybackSession::new(
                stream,
                PlaybackDriver::new(engine),
                region,
            )),
            Err(e) => {
                tracing::warn!("Cannot play {} with {}: {}", media_type, backend.name(), e);
                None
            }
        }
    }
}
