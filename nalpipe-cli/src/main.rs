//! # nalpipe CLI
//!
//! Streams H.264 Annex-B data through the ingestion pipeline.
//!
//! ## Usage
//! ```bash
//! # Play a file in 4 KiB chunks on a headless 1280x720 region
//! nalpipe play capture.h264 --decoder-path /opt/openh264
//!
//! # Stress the reassembler with irregular chunk sizes, JSON report
//! nalpipe play capture.h264 --chunk-size 7 --jitter --json
//!
//! # Read from stdin
//! cat capture.h264 | nalpipe play - --decoder-path /opt/openh264
//!
//! # List NAL units without decoding
//! nalpipe split capture.h264
//!
//! # With debug logging
//! RUST_LOG=debug nalpipe play capture.h264
//! ```

use anyhow::{bail, Context, Result};
use bytes::BytesMut;
use clap::{Args, Parser, Subcommand};
use nalpipe_core::{
    stream_channel, CapabilityRegistry, ChunkSender, HeadlessRegion, NalBuffer, PipelineConfig,
    SessionReport, Size, H264_MEDIA_TYPE,
};
use serde::Serialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

// ============================================================================
// Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "nalpipe", version, about = "H.264 Annex-B ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Streams a file through reader, decoder and a headless display region.
    Play(PlayArgs),
    /// Lists the NAL units in a file without decoding.
    Split(SplitArgs),
    /// Prints the media types the configured backends can play.
    Types(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Decoder resource directory; overrides the config file and environment.
    #[arg(long)]
    decoder_path: Option<PathBuf>,

    /// Decode on a worker thread (true/false).
    #[arg(long)]
    worker_thread: Option<bool>,
}

#[derive(Args, Debug)]
struct PlayArgs {
    /// Annex-B file, or `-` for stdin.
    input: String,

    #[command(flatten)]
    config: ConfigArgs,

    /// Media type to negotiate.
    #[arg(long, default_value = H264_MEDIA_TYPE)]
    media_type: String,

    /// Largest chunk handed to the pipeline.
    #[arg(long, default_value_t = 4096, value_parser = clap::value_parser!(u32).range(1..))]
    chunk_size: u32,

    /// Vary chunk sizes between 1 and --chunk-size.
    #[arg(long)]
    jitter: bool,

    /// Display region width.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Display region height.
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Write the last decoded picture (raw I420) here.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SplitArgs {
    /// Annex-B file, or `-` for stdin.
    input: String,

    /// Print units as JSON.
    #[arg(long)]
    json: bool,
}

// ============================================================================
// Configuration
// ============================================================================

fn load_config(args: &ConfigArgs) -> Result<PipelineConfig> {
    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    let mut config = config.with_env_overrides()?;

    if let Some(path) = &args.decoder_path {
        config.decoder_resource_path = Some(path.clone());
    }
    if let Some(worker) = args.worker_thread {
        config.use_worker_thread = worker;
    }

    debug!("Config: {:?}", config);
    Ok(config)
}

// ============================================================================
// Play
// ============================================================================

/// Chunk sizes for the producer: fixed, or xorshift-varied in 1..=max.
struct ChunkSizes {
    max: usize,
    state: Option<u64>,
}

impl ChunkSizes {
    fn new(max: usize, jitter: bool) -> Self {
        Self {
            max: max.max(1),
            state: jitter.then_some(0x9E37_79B9_7F4A_7C15),
        }
    }

    fn next_size(&mut self) -> usize {
        match &mut self.state {
            None => self.max,
            Some(state) => {
                *state ^= *state << 13;
                *state ^= *state >> 7;
                *state ^= *state << 17;
                1 + (*state % self.max as u64) as usize
            }
        }
    }
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open {}", input))?;
    Ok(Box::new(file))
}

/// Reads `input` and pushes it into the pipeline. Returns bytes sent.
async fn produce(
    mut input: Box<dyn AsyncRead + Unpin + Send>,
    tx: ChunkSender,
    mut sizes: ChunkSizes,
) -> Result<u64> {
    let mut total = 0u64;

    loop {
        let mut chunk = BytesMut::zeroed(sizes.next_size());
        let n = input.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        chunk.truncate(n);
        total += n as u64;
        tx.send(chunk.freeze()).await?;
    }

    tx.end().await?;
    Ok(total)
}

async fn play(args: PlayArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let capacity = config.channel_capacity;
    let registry = CapabilityRegistry::from_config(config);

    let region = HeadlessRegion::new(Size::new(args.width, args.height));
    let (tx, stream) = stream_channel(capacity);

    let Some(mut session) = registry.get_instance(stream, region.clone(), &args.media_type) else {
        bail!(
            "{} is not playable (supported: {:?}); set --decoder-path or {}",
            args.media_type,
            registry.supported_types(),
            nalpipe_core::config::ENV_DECODER_PATH
        );
    };

    let input = open_input(&args.input).await?;
    let sizes = ChunkSizes::new(args.chunk_size as usize, args.jitter);
    let producer = tokio::spawn(produce(input, tx, sizes));

    let finished = tokio::select! {
        report = session.run() => Some(report),
        _ = tokio::signal::ctrl_c() => None,
    };
    let report = match finished {
        Some(report) => report,
        None => {
            info!("Interrupted, stopping playback");
            session.stop();
            // A stdin read may never complete
            producer.abort();
            session.report()
        }
    };

    match producer.await {
        Ok(Ok(sent)) => debug!("Producer sent {} bytes", sent),
        Ok(Err(e)) => warn!("Producer stopped early: {:#}", e),
        Err(e) if e.is_cancelled() => debug!("Producer cancelled"),
        Err(e) => warn!("Producer task failed: {}", e),
    }

    if let Some(path) = &args.snapshot {
        write_snapshot(path, &session)?;
    }

    if args.json {
        #[derive(Serialize)]
        struct Output<'a> {
            report: &'a SessionReport,
            region: nalpipe_core::binder::RegionSnapshot,
        }
        let output = Output {
            report: &report,
            region: region.snapshot(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn write_snapshot(
    path: &Path,
    session: &nalpipe_core::PlaybackSession<HeadlessRegion>,
) -> Result<()> {
    let Some(frame) = session.last_frame() else {
        warn!("No frame decoded, snapshot not written");
        return Ok(());
    };

    std::fs::write(path, &frame.data)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(
        "Wrote frame {} ({}x{} I420) to {}",
        frame.frame_number,
        frame.width,
        frame.height,
        path.display()
    );
    Ok(())
}

fn print_report(report: &SessionReport) {
    println!("Backend:         {}", report.backend);
    println!("State:           {:?}", report.state);
    println!("Chunks:          {}", report.chunks);
    println!(
        "Bytes:           {} in, {} discarded, {} buffered",
        report.bytes_appended, report.bytes_discarded, report.bytes_buffered
    );
    println!(
        "NAL units:       {} ({} SPS, {} PPS, {} IDR, {} skipped)",
        report.units,
        report.driver.sps,
        report.driver.pps,
        report.driver.idr,
        report.driver.units_skipped
    );
    println!(
        "Frames:          {} decoded, {} presented",
        report.driver.frames, report.frames_presented
    );
    println!("Decode errors:   {}", report.driver.decode_errors);
    if let Some(scale) = report.scale {
        println!("Scale:           {:.4} x {:.4}", scale.x, scale.y);
    }
}

// ============================================================================
// Split
// ============================================================================

#[derive(Debug, Serialize)]
struct UnitEntry {
    index: usize,
    offset: u64,
    start_code: usize,
    length: usize,
    nal_type: String,
}

fn split(args: SplitArgs) -> Result<()> {
    let data = if args.input == "-" {
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data)?;
        data
    } else {
        std::fs::read(&args.input).with_context(|| format!("Failed to read {}", args.input))?
    };

    let mut buffer = NalBuffer::new();
    buffer.append(data.into());
    buffer.finish();

    let mut entries = Vec::new();
    let mut emitted = 0u64;
    while let Some(nal) = buffer.remove_next() {
        // Leading junk is only counted once the first unit is pulled
        let offset = buffer.discarded_bytes() + emitted;
        entries.push(UnitEntry {
            index: entries.len(),
            offset,
            start_code: nal.start_code_len(),
            length: nal.payload().len(),
            nal_type: nal
                .nal_type()
                .map(|t| format!("{:?}", t))
                .unwrap_or_else(|| "Empty".into()),
        });
        emitted += nal.len() as u64;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{:>6}  {:>10}  {:>2}  {:>8}  TYPE", "INDEX", "OFFSET", "SC", "LENGTH");
    for entry in &entries {
        println!(
            "{:>6}  {:>10}  {:>2}  {:>8}  {}",
            entry.index, entry.offset, entry.start_code, entry.length, entry.nal_type
        );
    }
    if buffer.discarded_bytes() > 0 {
        println!("({} leading bytes before first start code)", buffer.discarded_bytes());
    }
    Ok(())
}

// ============================================================================
// Types
// ============================================================================

fn types(args: ConfigArgs) -> Result<()> {
    let registry = CapabilityRegistry::from_config(load_config(&args)?);
    let supported = registry.supported_types();

    if supported.is_empty() {
        println!("No supported media types (is a decoder path configured?)");
    }
    for media_type in supported {
        println!("{}", media_type);
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

const DEFAULT_LOG_FILTER: &str = "nalpipe=info,nalpipe_core=info";

/// `RUST_LOG` when set, otherwise info for our own crates.
fn log_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(io::stderr)
        .init();

    debug!("nalpipe v{}", nalpipe_core::VERSION);

    match Cli::parse().command {
        Command::Play(args) => play(args).await,
        Command::Split(args) => split(args),
        Command::Types(args) => types(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_fixed_chunk_sizes() {
        let mut sizes = ChunkSizes::new(512, false);
        assert_eq!(sizes.next_size(), 512);
        assert_eq!(sizes.next_size(), 512);
    }

    #[test]
    fn test_jittered_chunk_sizes_in_range() {
        let mut sizes = ChunkSizes::new(7, true);
        for _ in 0..1000 {
            let size = sizes.next_size();
            assert!((1..=7).contains(&size));
        }
    }

    #[test]
    fn test_play_args() {
        let cli = Cli::try_parse_from([
            "nalpipe",
            "play",
            "in.h264",
            "--chunk-size",
            "7",
            "--jitter",
            "--decoder-path",
            "/opt/openh264",
            "--worker-thread",
            "false",
        ])
        .unwrap();

        let Command::Play(args) = cli.command else {
            panic!("expected play");
        };
        assert_eq!(args.chunk_size, 7);
        assert!(args.jitter);
        assert_eq!(args.media_type, "video/h264");
        assert_eq!(args.config.worker_thread, Some(false));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(Cli::try_parse_from(["nalpipe", "play", "in.h264", "--chunk-size", "0"]).is_err());
    }

    #[tokio::test]
    async fn test_produce_ends_stream() {
        let data: &'static [u8] = &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x00, 0x00, 0x01, 0x41];
        let (tx, mut stream) = stream_channel(64);

        let sent = produce(Box::new(data), tx, ChunkSizes::new(3, false))
            .await
            .unwrap();
        assert_eq!(sent, data.len() as u64);

        let mut chunks = 0;
        let mut ended = false;
        while let Some(event) = stream.next_event().await {
            match event {
                nalpipe_core::StreamEvent::Data(chunk) => {
                    assert!(chunk.len() <= 3);
                    chunks += 1;
                }
                nalpipe_core::StreamEvent::End => ended = true,
            }
        }
        assert_eq!(chunks, 4);
        assert!(ended);
    }

    #[tokio::test]
    async fn test_producer_abort_on_open_input() {
        // Writer half stays open, like an interactive stdin
        let (_writer, reader) = tokio::io::duplex(64);
        let (tx, mut stream) = stream_channel(4);

        let producer = tokio::spawn(produce(Box::new(reader), tx, ChunkSizes::new(16, false)));
        producer.abort();

        let err = producer.await.unwrap_err();
        assert!(err.is_cancelled());
        // The dropped sender closes the stream without an end marker
        assert!(stream.next_event().await.is_none());
    }

    #[test]
    fn test_default_log_filter_parses() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
