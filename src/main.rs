// src/main.rs

mod analysis;
mod config;
mod detection;
mod error;
mod manifest;
mod output;
mod pipeline;
mod preprocessing;
mod types;
mod video_processor;

use anyhow::{Context, Result};
use clap::Parser;
use error::PipelineError;
use manifest::RunManifest;
use output::RecordWriter;
use pipeline::{MetricsSummary, TrackEvent, VideoPipeline};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use types::Config;
use video_processor::{FrameMessage, StopSignal, VideoInput};

/// Progress line every this many frames.
const PROGRESS_EVERY: u64 = 500;

#[derive(Parser, Debug)]
#[command(
    name = "plankton-tracker",
    version,
    about = "Track plankton in microscopy video and label each track swimming or attached"
)]
struct Args {
    /// YAML configuration (calibration, tracking and behaviour thresholds)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Treat INPUT as a directory of videos / image-sequence directories
    #[arg(long)]
    batch: bool,

    /// Where CSV and manifest files go (default: `csv/` next to each input)
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Videos processed concurrently in batch mode
    #[arg(long, default_value_t = 1)]
    jobs: usize,

    /// Video file or image-sequence directory (a directory of inputs with --batch)
    input: PathBuf,
}

/// What the analysis thread hands back once the channel is drained.
struct Analysis<W> {
    metrics: MetricsSummary,
    stopped: bool,
    sink: W,
}

struct VideoReport {
    input: PathBuf,
    csv_path: PathBuf,
    stopped: bool,
    metrics: MetricsSummary,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("plankton_tracker={}", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = &args.output_dir {
        config.output.output_dir = Some(dir.clone());
    }
    init_logging(&config.logging.level);

    info!("🦠 Plankton tracker {} starting", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!("✓ Configuration loaded from {}", path.display()),
        None => info!("✓ Using built-in default configuration"),
    }
    info!(
        "Tracking: gate={:.1}px, max_lost_frames={}, window={} @ {:.1} FPS, speed_mode={}",
        config.association_gate_px(),
        config.tracking.max_lost_frames,
        config.motion.velocity_window,
        config.motion.fps,
        config.motion.speed_mode.as_str()
    );
    info!(
        "Behaviour: min_speed={:.2}px/s, min_displacement={:.2}px, threshold={} ({})",
        config.behavior.min_movement_speed_px_s,
        config.behavior.min_displacement_px,
        config.calibration.thresh,
        config.detection.thresh_method.as_str()
    );

    let config = Arc::new(config);
    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, stopping after the current frame");
                stop.stop();
            }
        });
    }

    if args.batch {
        run_batch(&args, config, stop).await
    } else {
        let input = video_processor::resolve_input(&args.input)?;
        let report = process_video(input, config, stop).await?;
        log_report(&report);
        Ok(())
    }
}

async fn run_batch(args: &Args, config: Arc<Config>, stop: StopSignal) -> Result<()> {
    let inputs = video_processor::find_inputs(&args.input, &config)?;
    if inputs.is_empty() {
        error!("No inputs found in {}", args.input.display());
        return Ok(());
    }

    let jobs = args.jobs.max(1);
    info!("Processing {} input(s), {} at a time", inputs.len(), jobs);
    let semaphore = Arc::new(Semaphore::new(jobs));

    let mut tasks = Vec::with_capacity(inputs.len());
    for input in inputs {
        let config = Arc::clone(&config);
        let semaphore = Arc::clone(&semaphore);
        let stop = stop.clone();

        tasks.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return Err(anyhow::Error::from(e)),
            };
            if stop.is_stopped() {
                return Ok(None);
            }
            process_video(input, config, stop).await.map(Some)
        }));
    }

    let total = tasks.len();
    let mut failed = 0usize;
    let mut skipped = 0usize;
    for task in tasks {
        match task.await? {
            Ok(Some(report)) => log_report(&report),
            Ok(None) => skipped += 1,
            Err(e) => {
                failed += 1;
                error!("Failed to process video: {:#}", e);
            }
        }
    }

    info!(
        "Batch complete: {} ok, {} failed, {} not started",
        total - failed - skipped,
        failed,
        skipped
    );
    if failed > 0 {
        anyhow::bail!("{} of {} inputs failed", failed, total);
    }
    Ok(())
}

/// One video end to end: reader thread → bounded channel → analysis thread.
async fn process_video(
    input: VideoInput,
    config: Arc<Config>,
    stop: StopSignal,
) -> Result<VideoReport> {
    info!("Processing {}", input.path().display());

    let source = {
        let input = input.clone();
        tokio::task::spawn_blocking(move || video_processor::open_source(&input)).await??
    };
    let (width, height) = source.dimensions();
    if let Some(n) = source.frame_count() {
        info!("  {}x{}, {} frames", width, height, n);
    }

    let pipeline = VideoPipeline::new(&config, width, height)?;

    let (csv_path, manifest_path) = input.output_paths(config.output.output_dir.as_deref());
    if let Some(dir) = csv_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output dir {}", dir.display()))?;
    }
    RunManifest::new(
        input.path(),
        pipeline.frame_size(),
        pipeline.roi_pixels(),
        &config,
        pipeline.rule_table(),
    )
    .write_json(&manifest_path)?;
    info!("💾 Manifest: {}", manifest_path.display());
    info!("💾 Tracks:   {}", csv_path.display());
    let writer = RecordWriter::create(&csv_path)?;

    let (tx, rx) = mpsc::channel::<FrameMessage>(config.output.reader_queue.max(1));
    let reader = {
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || video_processor::run_reader(source, tx, stop))
    };
    let label = input.stem();
    let analysis =
        tokio::task::spawn_blocking(move || analyze_frames(pipeline, rx, writer, stop, label));

    let outcome = analysis.await?;
    if let Err(e) = reader.await {
        warn!("Reader task ended abnormally: {}", e);
    }
    let Analysis {
        metrics, stopped, ..
    } = outcome?;

    Ok(VideoReport {
        input: input.path().to_path_buf(),
        csv_path,
        stopped,
        metrics,
    })
}

/// Consumer side. Rows written before a stop or a fatal error stay in the
/// sink.
fn analyze_frames<W: Write>(
    mut pipeline: VideoPipeline,
    mut rx: mpsc::Receiver<FrameMessage>,
    mut writer: RecordWriter<W>,
    stop: StopSignal,
    label: String,
) -> Result<Analysis<W>> {
    let result = consume(&mut pipeline, &mut rx, &mut writer, &stop, &label);
    writer.flush()?;
    let stopped = result?;
    Ok(Analysis {
        metrics: pipeline.metrics().summary(),
        stopped,
        sink: writer.into_inner()?,
    })
}

fn consume<W: Write>(
    pipeline: &mut VideoPipeline,
    rx: &mut mpsc::Receiver<FrameMessage>,
    writer: &mut RecordWriter<W>,
    stop: &StopSignal,
    label: &str,
) -> Result<bool> {
    let mut frames: u64 = 0;
    while let Some(message) = rx.blocking_recv() {
        if stop.is_stopped() {
            info!("[{}] Stopped after {} frames", label, frames);
            return Ok(true);
        }

        let ctx = match message {
            Ok(frame) => match pipeline.process_frame(&frame) {
                Ok(ctx) => ctx,
                Err(e) if e.is_recoverable() => {
                    warn!("[{}] {}; skipping", label, e);
                    pipeline.skip_frame(frame.index)?
                }
                Err(e) => {
                    error!("[{}] {}", label, e);
                    return Err(e.into());
                }
            },
            Err(PipelineError::FrameRead { frame_index, reason }) => {
                warn!("[{}] frame {} unreadable ({}); skipping", label, frame_index, reason);
                pipeline.skip_frame(frame_index)?
            }
            Err(e) => {
                error!("[{}] {}", label, e);
                return Err(e.into());
            }
        };

        writer.write_all(&ctx.records)?;
        for event in pipeline.drain_events() {
            log_event(label, &event);
        }

        frames += 1;
        if frames % PROGRESS_EVERY == 0 {
            info!(
                "[{}] Frame {}: {} detection(s), {} live track(s), {:.1} FPS",
                label,
                ctx.frame_index,
                ctx.detection_count,
                pipeline.store().len(),
                pipeline.metrics().fps()
            );
        }
    }
    Ok(stop.is_stopped())
}

fn log_event(label: &str, event: &TrackEvent) {
    match event {
        TrackEvent::Spawned {
            track_id,
            frame_index,
            x,
            y,
        } => debug!(
            "[{}] 🆕 Track {} spawned at frame {} ({:.1}, {:.1})",
            label, track_id, frame_index, x, y
        ),
        TrackEvent::Retired {
            track_id,
            frame_index,
            lifetime_frames,
            hits,
        } => debug!(
            "[{}] 🗑️  Track {} retired at frame {} (lived {} frames, {} hits)",
            label, track_id, frame_index, lifetime_frames, hits
        ),
        TrackEvent::BehaviorChanged {
            track_id,
            frame_index,
            from,
            to,
            rule,
        } => debug!(
            "[{}] Track {} {} → {} at frame {} [{}]",
            label,
            track_id,
            from.as_str(),
            to.as_str(),
            frame_index,
            rule
        ),
    }
}

fn log_report(report: &VideoReport) {
    let m = &report.metrics;
    if report.stopped {
        warn!("⚠️  {} stopped early, output is partial", report.input.display());
    } else {
        info!("✓ {} processed", report.input.display());
    }
    info!(
        "  Frames: {} ({} skipped), detections: {}",
        m.total_frames, m.skipped_frames, m.detections
    );
    info!(
        "  Tracks: {} spawned, {} retired, rows written: {}",
        m.tracks_spawned, m.tracks_retired, m.records
    );
    info!(
        "  Rows by label: swimming={}, attached={}, unknown={}",
        m.swimming_records, m.attached_records, m.unknown_records
    );
    info!(
        "  Processing speed: {:.1} FPS -> {}",
        m.fps,
        report.csv_path.display()
    );
}
