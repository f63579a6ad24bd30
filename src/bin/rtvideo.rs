//! rtvideo - run the real-time frame pipeline
//!
//! Source -> PixelFormatTransformer -> [FaceDetector] -> [FaceSwapper] -> [ObjectMarker] -> sink
//!
//! Detector and swapper stages are added only when a model path is configured.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use rtvideo::config::{PipelineConfig, SinkKind};
use rtvideo::pipeline::ExecutionMode;
use rtvideo::sink::NullSink;
use rtvideo::{
    FaceDetector, FaceSwapper, ObjectMarker, Pipeline, PixelFormat, PixelFormatTransformer,
    ScrfdBackend, Sink, Source, Stage, SyntheticSource,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "RTVIDEO_CONFIG")]
    config: Option<PathBuf>,
    /// Scheduler: inline or threaded.
    #[arg(long)]
    mode: Option<ExecutionMode>,
    /// Target frame rate.
    #[arg(long)]
    fps: Option<f64>,
    /// Stop after this many source frames.
    #[arg(long)]
    frames: Option<u64>,
    /// SCRFD detector engine file.
    #[arg(long, value_name = "PATH")]
    detector_model: Option<PathBuf>,
    /// Face swap engine file.
    #[arg(long, value_name = "PATH")]
    swapper_model: Option<PathBuf>,
    /// Write output frames as PNG into this directory.
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = resolve_config(&args)?;

    let source = build_source(&cfg)?;
    let stages = build_stages(&cfg);
    let sink = build_sink(&cfg)?;

    let pipeline = Pipeline::new(source, stages, sink, cfg.pipeline_options());
    let ctx = pipeline.context();
    if let Err(err) = ctrlc::set_handler(move || {
        log::info!("interrupt received, stopping pipeline");
        ctx.interrupt();
    }) {
        log::warn!("failed to install Ctrl-C handler: {}", err);
    }

    let report = pipeline.run().into_result()?;
    log::info!(
        "done: produced={} consumed={} dropped={}",
        report.frames_produced,
        report.frames_consumed,
        report.dropped_frames()
    );
    for mailbox in &report.mailboxes {
        log::debug!(
            "mailbox {}: delivered={} dropped={} peak={}/{}",
            mailbox.name,
            mailbox.delivered,
            mailbox.dropped,
            mailbox.peak,
            mailbox.capacity
        );
    }
    Ok(())
}

fn resolve_config(args: &Args) -> Result<PipelineConfig> {
    let mut cfg = PipelineConfig::load_from(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        cfg.mode = mode;
    }
    if let Some(fps) = args.fps {
        cfg.target_fps = fps;
    }
    if let Some(frames) = args.frames {
        cfg.source.frames = Some(frames);
    }
    if let Some(model) = &args.detector_model {
        cfg.detector.model = Some(model.clone());
    }
    if let Some(model) = &args.swapper_model {
        cfg.swapper.model = Some(model.clone());
    }
    if let Some(out) = &args.out {
        cfg.sink.kind = SinkKind::ImageDir;
        cfg.sink.path = Some(out.clone());
    }
    cfg.validate()?;
    Ok(cfg)
}

fn build_source(cfg: &PipelineConfig) -> Result<Box<dyn Source>> {
    let settings = &cfg.source;
    if settings.uri.starts_with("stub://") {
        let mut source = SyntheticSource::new(&settings.uri, settings.width, settings.height)?
            .with_fps(cfg.target_fps);
        if let Some(frames) = settings.frames {
            source = source.with_limit(frames);
        }
        return Ok(Box::new(source));
    }
    image_dir_source(cfg)
}

#[cfg(feature = "image-io")]
fn image_dir_source(cfg: &PipelineConfig) -> Result<Box<dyn Source>> {
    Ok(Box::new(rtvideo::ingest::ImageDirSource::new(&cfg.source.uri)))
}

#[cfg(not(feature = "image-io"))]
fn image_dir_source(cfg: &PipelineConfig) -> Result<Box<dyn Source>> {
    Err(anyhow!(
        "unsupported source {} (image directories need the image-io feature)",
        cfg.source.uri
    ))
}

fn build_stages(cfg: &PipelineConfig) -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> =
        vec![Box::new(PixelFormatTransformer::new(PixelFormat::RgbU8))];
    if let Some(model) = &cfg.detector.model {
        let backend = ScrfdBackend::from_path(model, cfg.scrfd_params());
        stages.push(Box::new(
            FaceDetector::new(Box::new(backend)).with_expand_scale(cfg.detector.expand_scale),
        ));
    } else {
        log::info!("no detector model configured; detection disabled");
    }
    if let Some(model) = &cfg.swapper.model {
        if cfg.detector.model.is_none() {
            log::warn!("swapper configured without a detector; frames pass through unchanged");
        }
        stages.push(Box::new(
            FaceSwapper::from_path(model).with_input_size(cfg.swapper.input_size),
        ));
    }
    if cfg.marker_enabled {
        stages.push(Box::new(ObjectMarker::new()));
    }
    stages
}

fn build_sink(cfg: &PipelineConfig) -> Result<Box<dyn Sink>> {
    match cfg.sink.kind {
        SinkKind::Null => Ok(Box::new(NullSink::new())),
        SinkKind::ImageDir => {
            let path = cfg
                .sink
                .path
                .clone()
                .ok_or_else(|| anyhow!("image-dir sink requires a path"))?;
            image_dir_sink(path)
        }
    }
}

#[cfg(feature = "image-io")]
fn image_dir_sink(path: PathBuf) -> Result<Box<dyn Sink>> {
    Ok(Box::new(rtvideo::sink::ImageDirSink::new(path)))
}

#[cfg(not(feature = "image-io"))]
fn image_dir_sink(path: PathBuf) -> Result<Box<dyn Sink>> {
    Err(anyhow!(
        "cannot write frames to {} without the image-io feature",
        path.display()
    ))
}
