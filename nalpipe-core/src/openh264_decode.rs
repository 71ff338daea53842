//! OpenH264 software decoding engine
//!
//! Wraps the `openh264` crate behind [`DecodingEngine`]. Decoding runs either
//! inline on the caller's thread or on a dedicated worker thread. In worker
//! mode units go over a bounded queue, frames and errors come back over a
//! channel and are reported from `decode` and `flush` in decode order, so
//! callers never see events from another thread.

use crate::engine::{DecodedFrame, DecodingEngine, EngineConfig, FrameReady, SurfaceHandle};
use crate::error::{PipelineError, Result};
use crate::nal::NalUnit;
use bytes::Bytes;
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

const BACKEND: &str = "OpenH264";

/// Units queued for the worker before `decode` blocks.
const WORKER_QUEUE_DEPTH: usize = 16;

// ============================================================================
// Engine
// ============================================================================

pub struct OpenH264Engine {
    surface: SurfaceHandle,
    mode: Mode,
    last_frame: Option<DecodedFrame>,
    frame_count: u64,
}

enum Mode {
    Inline(Decoder),
    Worker(Worker),
}

impl OpenH264Engine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        if !config.decoder_resource_path.exists() {
            return Err(PipelineError::EngineInit {
                backend: BACKEND.into(),
                reason: format!(
                    "resource path {} does not exist",
                    config.decoder_resource_path.display()
                ),
            });
        }

        let mode = if config.use_worker_thread {
            Mode::Worker(Worker::spawn(WORKER_QUEUE_DEPTH, || {
                let mut decoder = create_decoder()?;
                Ok(move |data: &[u8]| decode_picture(&mut decoder, data))
            })?)
        } else {
            Mode::Inline(create_decoder()?)
        };

        tracing::debug!(
            "OpenH264 engine ready ({}x{}, worker: {})",
            config.output_size.width,
            config.output_size.height,
            config.use_worker_thread
        );

        Ok(Self {
            surface: SurfaceHandle::next(),
            mode,
            last_frame: None,
            frame_count: 0,
        })
    }

    fn publish(&mut self, picture: Picture) -> FrameReady {
        let frame_number = self.frame_count;
        self.frame_count += 1;

        let ready = FrameReady {
            surface: self.surface,
            width: picture.width,
            height: picture.height,
            frame_number,
        };

        self.last_frame = Some(DecodedFrame {
            data: picture.data,
            width: picture.width,
            height: picture.height,
            frame_number,
        });

        ready
    }

    fn publish_all(&mut self, pictures: Vec<Picture>) -> Vec<FrameReady> {
        pictures.into_iter().map(|p| self.publish(p)).collect()
    }
}

impl DecodingEngine for OpenH264Engine {
    fn decode(&mut self, nal: &NalUnit) -> Result<Vec<FrameReady>> {
        let pictures = match &mut self.mode {
            Mode::Inline(decoder) => decode_picture(decoder, nal.as_bytes())
                .map_err(|e| PipelineError::Decode(format!("OpenH264 decode error: {}", e)))?
                .into_iter()
                .collect::<Vec<_>>(),
            Mode::Worker(worker) => {
                worker.submit(nal.clone().into_bytes())?;
                worker.collect_ready()
            }
        };

        Ok(self.publish_all(pictures))
    }

    fn flush(&mut self) -> Result<Vec<FrameReady>> {
        let pictures = match &mut self.mode {
            Mode::Inline(_) => Vec::new(),
            Mode::Worker(worker) => worker.flush()?,
        };

        Ok(self.publish_all(pictures))
    }

    fn take_deferred_errors(&mut self) -> u64 {
        match &mut self.mode {
            Mode::Inline(_) => 0,
            Mode::Worker(worker) => std::mem::take(&mut worker.failed),
        }
    }

    fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    fn last_frame(&self) -> Option<&DecodedFrame> {
        self.last_frame.as_ref()
    }

    fn name(&self) -> &str {
        BACKEND
    }
}

fn create_decoder() -> Result<Decoder> {
    Decoder::new().map_err(|e| PipelineError::EngineInit {
        backend: BACKEND.into(),
        reason: format!("{:?}", e),
    })
}

fn decode_picture(decoder: &mut Decoder, data: &[u8]) -> std::result::Result<Option<Picture>, String> {
    match decoder.decode(data) {
        Ok(Some(yuv)) => Ok(Some(copy_i420(&yuv))),
        Ok(None) => Ok(None),
        Err(e) => Err(format!("{:?}", e)),
    }
}

// ============================================================================
// Picture Copy
// ============================================================================

struct Picture {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

/// Copies a decoded YUV picture into a tightly packed I420 buffer.
fn copy_i420(yuv: &impl YUVSource) -> Picture {
    let (width, height) = yuv.dimensions();
    let (y_stride, u_stride, v_stride) = yuv.strides();
    let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));

    let mut data = Vec::with_capacity(width * height + 2 * chroma_width * chroma_height);
    copy_plane(&mut data, yuv.y(), y_stride, width, height);
    copy_plane(&mut data, yuv.u(), u_stride, chroma_width, chroma_height);
    copy_plane(&mut data, yuv.v(), v_stride, chroma_width, chroma_height);

    Picture {
        data,
        width: width as u32,
        height: height as u32,
    }
}

fn copy_plane(out: &mut Vec<u8>, plane: &[u8], stride: usize, width: usize, rows: usize) {
    for row in 0..rows {
        let start = row * stride;
        let end = start + width;
        if end <= plane.len() {
            out.extend_from_slice(&plane[start..end]);
        }
    }
}

// ============================================================================
// Worker Thread
// ============================================================================

enum Command {
    Decode(Bytes),
    Flush,
}

enum Event {
    Picture(Picture),
    Error(String),
    Flushed,
}

/// Runs a decode function on its own thread behind a bounded queue.
struct Worker {
    commands: Option<mpsc::SyncSender<Command>>,
    events: mpsc::Receiver<Event>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    /// Errors received but not yet taken by the engine.
    failed: u64,
}

impl Worker {
    /// `init` runs on the worker thread, so the decoder it builds never
    /// leaves that thread.
    fn spawn<F, D>(depth: usize, init: F) -> Result<Self>
    where
        F: FnOnce() -> Result<D> + Send + 'static,
        D: FnMut(&[u8]) -> std::result::Result<Option<Picture>, String>,
    {
        let (command_tx, command_rx) = mpsc::sync_channel::<Command>(depth);
        let (event_tx, event_rx) = mpsc::channel::<Event>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = stop.clone();

        let handle = std::thread::Builder::new()
            .name("openh264-decode".into())
            .spawn(move || {
                let mut decode = match init() {
                    Ok(decode) => {
                        let _ = ready_tx.send(Ok(()));
                        decode
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                for command in command_rx {
                    if stopped.load(Ordering::Acquire) {
                        break;
                    }

                    let event = match command {
                        Command::Decode(data) => match decode(&data) {
                            Ok(Some(picture)) => Event::Picture(picture),
                            Ok(None) => continue,
                            Err(e) => Event::Error(e),
                        },
                        Command::Flush => Event::Flushed,
                    };

                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(PipelineError::EngineInit {
                    backend: BACKEND.into(),
                    reason: "decode worker exited during startup".into(),
                })
            }
        }

        Ok(Self {
            commands: Some(command_tx),
            events: event_rx,
            stop,
            handle: Some(handle),
            failed: 0,
        })
    }

    /// Queues a unit, blocking while the queue is full.
    fn submit(&self, data: Bytes) -> Result<()> {
        self.send(Command::Decode(data))
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .and_then(|tx| tx.send(command).ok())
            .ok_or_else(|| PipelineError::Decode("decode worker is gone".into()))
    }

    /// Pictures the worker has finished so far, without blocking.
    fn collect_ready(&mut self) -> Vec<Picture> {
        let mut pictures = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            self.accept(event, &mut pictures);
        }
        pictures
    }

    /// Blocks until every submitted unit has been decoded.
    fn flush(&mut self) -> Result<Vec<Picture>> {
        self.send(Command::Flush)?;

        let mut pictures = Vec::new();
        loop {
            match self.events.recv() {
                Ok(Event::Flushed) => return Ok(pictures),
                Ok(event) => self.accept(event, &mut pictures),
                Err(_) => return Err(PipelineError::Decode("decode worker is gone".into())),
            }
        }
    }

    fn accept(&mut self, event: Event, pictures: &mut Vec<Picture>) {
        match event {
            Event::Picture(picture) => pictures.push(picture),
            Event::Error(e) => {
                self.failed += 1;
                tracing::warn!("OpenH264 worker decode error: {}", e);
            }
            Event::Flushed => {}
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Queued units are abandoned; only a decode already running finishes
        self.stop.store(true, Ordering::Release);
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("OpenH264 decode worker panicked");
            }
        }
    }
}
