use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::ScrfdParams;
use crate::pipeline::{ExecutionMode, PipelineOptions};

const DEFAULT_TARGET_FPS: f64 = 30.0;
const DEFAULT_STAGE_QUEUE_CAPACITY: usize = 1;
const DEFAULT_SINK_QUEUE_CAPACITY: usize = 5;
const DEFAULT_SOURCE_URI: &str = "stub://synthetic";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;
const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
const DEFAULT_EXPAND_SCALE: f32 = 1.5;
const DEFAULT_SWAP_INPUT_SIZE: u32 = 512;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    mode: Option<ExecutionMode>,
    target_fps: Option<f64>,
    stage_queue_capacity: Option<usize>,
    sink_queue_capacity: Option<usize>,
    max_consecutive_timeouts: Option<u32>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    swapper: Option<SwapperConfigFile>,
    marker: Option<MarkerConfigFile>,
    sink: Option<SinkConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    model: Option<PathBuf>,
    score_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    expand_scale: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SwapperConfigFile {
    model: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MarkerConfigFile {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    kind: Option<SinkKind>,
    path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkKind {
    Null,
    ImageDir,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: ExecutionMode,
    pub target_fps: f64,
    pub stage_queue_capacity: usize,
    pub sink_queue_capacity: usize,
    pub max_consecutive_timeouts: Option<u32>,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub swapper: SwapperSettings,
    pub marker_enabled: bool,
    pub sink: SinkSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    /// `None` streams until interrupted.
    pub frames: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub model: Option<PathBuf>,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub expand_scale: f32,
}

#[derive(Debug, Clone)]
pub struct SwapperSettings {
    pub model: Option<PathBuf>,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(PipelineConfigFile::default())
    }
}

impl PipelineConfig {
    /// Load from `RTVIDEO_CONFIG` (if set), then apply env overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RTVIDEO_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file, falling back to defaults when `path` is `None`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let swapper = file.swapper.unwrap_or_default();
        let sink = file.sink.unwrap_or_default();
        Self {
            mode: file.mode.unwrap_or(ExecutionMode::Threaded),
            target_fps: file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            stage_queue_capacity: file
                .stage_queue_capacity
                .unwrap_or(DEFAULT_STAGE_QUEUE_CAPACITY),
            sink_queue_capacity: file
                .sink_queue_capacity
                .unwrap_or(DEFAULT_SINK_QUEUE_CAPACITY),
            max_consecutive_timeouts: file.max_consecutive_timeouts,
            source: SourceSettings {
                uri: source.uri.unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                frames: source.frames,
            },
            detector: DetectorSettings {
                model: detector.model,
                score_threshold: detector.score_threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD),
                nms_threshold: detector.nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD),
                expand_scale: detector.expand_scale.unwrap_or(DEFAULT_EXPAND_SCALE),
            },
            swapper: SwapperSettings {
                model: swapper.model,
                input_size: swapper.input_size.unwrap_or(DEFAULT_SWAP_INPUT_SIZE),
            },
            marker_enabled: file.marker.and_then(|m| m.enabled).unwrap_or(true),
            sink: SinkSettings {
                kind: sink.kind.unwrap_or(SinkKind::Null),
                path: sink.path,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(mode) = env_value("RTVIDEO_MODE") {
            self.mode = mode.parse().context("RTVIDEO_MODE")?;
        }
        if let Some(fps) = env_value("RTVIDEO_TARGET_FPS") {
            self.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("RTVIDEO_TARGET_FPS must be a number"))?;
        }
        if let Some(uri) = env_value("RTVIDEO_SOURCE_URI") {
            self.source.uri = uri;
        }
        if let Some(frames) = env_value("RTVIDEO_SOURCE_FRAMES") {
            let frames: u64 = frames
                .parse()
                .map_err(|_| anyhow!("RTVIDEO_SOURCE_FRAMES must be an integer frame count"))?;
            self.source.frames = Some(frames);
        }
        if let Some(model) = env_value("RTVIDEO_DETECTOR_MODEL") {
            self.detector.model = Some(PathBuf::from(model));
        }
        if let Some(model) = env_value("RTVIDEO_SWAPPER_MODEL") {
            self.swapper.model = Some(PathBuf::from(model));
        }
        if let Some(path) = env_value("RTVIDEO_SINK_PATH") {
            self.sink.kind = SinkKind::ImageDir;
            self.sink.path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_fps >= 1.0) {
            return Err(anyhow!("target_fps must be at least 1, got {}", self.target_fps));
        }
        if self.stage_queue_capacity == 0 || self.sink_queue_capacity == 0 {
            return Err(anyhow!("queue capacities must be at least 1"));
        }
        if self.max_consecutive_timeouts == Some(0) {
            return Err(anyhow!("max_consecutive_timeouts must be at least 1 when set"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be non-zero"));
        }
        for (name, value) in [
            ("score_threshold", self.detector.score_threshold),
            ("nms_threshold", self.detector.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector.{} must be within [0, 1], got {}", name, value));
            }
        }
        if !(self.detector.expand_scale >= 1.0) {
            return Err(anyhow!(
                "detector.expand_scale must be at least 1, got {}",
                self.detector.expand_scale
            ));
        }
        if self.swapper.input_size == 0 {
            return Err(anyhow!("swapper.input_size must be non-zero"));
        }
        if self.sink.kind == SinkKind::ImageDir && self.sink.path.is_none() {
            return Err(anyhow!("sink.kind image-dir requires sink.path"));
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            mode: self.mode,
            target_fps: self.target_fps,
            stage_queue_capacity: self.stage_queue_capacity,
            sink_queue_capacity: self.sink_queue_capacity,
            max_consecutive_timeouts: self.max_consecutive_timeouts,
        }
    }

    pub fn scrfd_params(&self) -> ScrfdParams {
        ScrfdParams {
            score_threshold: self.detector.score_threshold,
            nms_threshold: self.detector.nms_threshold,
            ..ScrfdParams::default()
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
