//! Test doubles for the decoding engine and capability provider.

use crate::engine::{DecodedFrame, DecodingEngine, EngineConfig, FrameReady, Size, SurfaceHandle};
use crate::error::{PipelineError, Result};
use crate::nal::NalUnit;
use crate::registry::{BackendKind, CapabilityProvider};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Frames each payload with a 4-byte start code.
pub(crate) fn annexb(payloads: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for payload in payloads {
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(payload);
    }
    out
}

/// Engine that records every payload it is given and reports one frame per
/// VCL unit.
pub(crate) struct ScriptedEngine {
    surface: SurfaceHandle,
    size: Size,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_on: Option<u8>,
    delay: bool,
    pending: Vec<FrameReady>,
    pending_errors: u64,
    deferred_errors: u64,
    frame_count: u64,
    last_frame: Option<DecodedFrame>,
}

impl ScriptedEngine {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            surface: SurfaceHandle::next(),
            size: Size::new(width, height),
            log: Arc::default(),
            fail_on: None,
            delay: false,
            pending: Vec::new(),
            pending_errors: 0,
            deferred_errors: 0,
            frame_count: 0,
            last_frame: None,
        }
    }

    /// Payloads seen so far, shared with the engine.
    pub(crate) fn log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.log.clone()
    }

    /// Fail units whose header byte is `header`.
    pub(crate) fn fail_on(&mut self, header: u8) {
        self.fail_on = Some(header);
    }

    /// Hold frames until `flush`. Failures are then reported as deferred
    /// errors on `flush`, like a worker thread would.
    pub(crate) fn delay_frames(&mut self, delay: bool) {
        self.delay = delay;
    }
}

impl DecodingEngine for ScriptedEngine {
    fn decode(&mut self, nal: &NalUnit) -> Result<Vec<FrameReady>> {
        self.log.lock().push(nal.payload().to_vec());

        if self.fail_on.is_some() && nal.header() == self.fail_on {
            if self.delay {
                self.pending_errors += 1;
                return Ok(Vec::new());
            }
            return Err(PipelineError::Decode("scripted failure".into()));
        }

        if !nal.nal_type().is_some_and(|t| t.is_vcl()) {
            return Ok(Vec::new());
        }

        let frame = FrameReady {
            surface: self.surface,
            width: self.size.width,
            height: self.size.height,
            frame_number: self.frame_count,
        };
        self.frame_count += 1;
        self.last_frame = Some(DecodedFrame {
            data: vec![0x80; 6],
            width: frame.width,
            height: frame.height,
            frame_number: frame.frame_number,
        });

        if self.delay {
            self.pending.push(frame);
            Ok(Vec::new())
        } else {
            Ok(vec![frame])
        }
    }

    fn flush(&mut self) -> Result<Vec<FrameReady>> {
        self.deferred_errors += std::mem::take(&mut self.pending_errors);
        Ok(std::mem::take(&mut self.pending))
    }

    fn take_deferred_errors(&mut self) -> u64 {
        std::mem::take(&mut self.deferred_errors)
    }

    fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    fn last_frame(&self) -> Option<&DecodedFrame> {
        self.last_frame.as_ref()
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

/// Provider with one fake backend, configured or not.
pub(crate) struct ScriptedProvider {
    configured: bool,
    pub(crate) fail_create: bool,
    /// Output sizes engines were created with.
    pub(crate) created: Mutex<Vec<Size>>,
}

impl ScriptedProvider {
    pub(crate) fn configured() -> Self {
        Self {
            configured: true,
            fail_create: false,
            created: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::configured()
        }
    }
}

impl CapabilityProvider for ScriptedProvider {
    fn resource_path(&self) -> Option<&Path> {
        self.configured.then(|| Path::new("/opt/scripted-decoder"))
    }

    fn available_backends(&self) -> Vec<BackendKind> {
        vec![BackendKind::OpenH264]
    }

    fn create_engine(
        &self,
        backend: BackendKind,
        config: &EngineConfig,
    ) -> Result<Box<dyn DecodingEngine>> {
        self.created.lock().push(config.output_size);

        if self.fail_create {
            return Err(PipelineError::EngineInit {
                backend: backend.name().into(),
                reason: "scripted failure".into(),
            });
        }
        Ok(Box::new(ScriptedEngine::new(320, 240)))
    }
}
