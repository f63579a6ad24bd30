//! Stage contracts and the two schedulers.
//!
//! A `Pipeline` owns one `Source`, an ordered list of `Stage`s and one `Sink`.
//! `run` drives them either on the calling thread (`ExecutionMode::Inline`) or
//! with one thread per stage connected by bounded mailboxes
//! (`ExecutionMode::Threaded`). In both modes every component that opened is
//! closed exactly once, whatever the outcome.

mod context;
mod inline;
mod lifecycle;
mod mailbox;
mod threaded;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::timer::{SpanSummary, Timer};

pub use context::PipelineContext;
pub use lifecycle::StageState;
pub use mailbox::MailboxStats;

/// Lifecycle shared by sources, stages and sinks.
pub trait Lifecycle {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One processing step. `apply` consumes a frame and returns the next one.
pub trait Stage: Lifecycle + Send {
    fn apply(&mut self, frame: Frame) -> Result<Frame>;

    /// Called once before `open` with the pipeline's timer.
    fn bind_timer(&mut self, _timer: &Timer) {}
}

/// Pull-based frame producer. `Ok(None)` is end of stream.
pub trait Source: Lifecycle + Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    /// Graceful stop requested by the sink, e.g. a quit key.
    Stop,
}

pub trait Sink: Lifecycle + Send {
    fn consume(&mut self, frame: Frame) -> Result<SinkControl>;

    /// Run on the scheduler's calling thread (display and UI resources).
    fn requires_main_thread(&self) -> bool {
        false
    }
}

/// A fatal error attributed to one pipeline component.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: String,
    /// Sequence number of the frame being processed, if any.
    pub frame: Option<u64>,
    pub cause: anyhow::Error,
}

impl StageFailure {
    pub fn new(stage: impl Into<String>, frame: Option<u64>, cause: anyhow::Error) -> Self {
        Self {
            stage: stage.into(),
            frame,
            cause,
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame {
            Some(seq) => write!(f, "stage {} failed on frame {}: {:#}", self.stage, seq, self.cause),
            None => write!(f, "stage {} failed: {:#}", self.stage, self.cause),
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Interrupted,
    Failed(StageFailure),
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub frames_produced: u64,
    pub frames_consumed: u64,
    /// Per-mailbox counters, source side first. Empty in inline mode.
    pub mailboxes: Vec<MailboxStats>,
    pub timing: Vec<SpanSummary>,
}

impl RunReport {
    pub fn dropped_frames(&self) -> u64 {
        self.mailboxes.iter().map(|m| m.dropped).sum()
    }

    /// `Err` naming the stage and cause when the run failed.
    pub fn into_result(self) -> Result<RunReport> {
        match self.outcome {
            RunOutcome::Failed(failure) => Err(anyhow!("{}", failure)),
            _ => Ok(self),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Inline,
    Threaded,
}

impl FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(ExecutionMode::Inline),
            "threaded" => Ok(ExecutionMode::Threaded),
            other => Err(anyhow!("unknown execution mode {:?} (inline|threaded)", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub mode: ExecutionMode,
    pub target_fps: f64,
    pub stage_queue_capacity: usize,
    pub sink_queue_capacity: usize,
    /// Fail a stage after this many consecutive empty pulls. `None` never escalates.
    pub max_consecutive_timeouts: Option<u32>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Threaded,
            target_fps: 30.0,
            stage_queue_capacity: 1,
            sink_queue_capacity: 5,
            max_consecutive_timeouts: None,
        }
    }
}

impl PipelineOptions {
    pub fn inline() -> Self {
        Self {
            mode: ExecutionMode::Inline,
            ..Self::default()
        }
    }

    pub fn threaded(target_fps: f64) -> Self {
        Self {
            target_fps,
            ..Self::default()
        }
    }

    /// Mailbox deadline: one frame interval. Rates below 1 fps, and non-finite
    /// rates, fall back to one second.
    pub fn frame_interval(&self) -> Duration {
        let fps = if self.target_fps.is_finite() && self.target_fps >= 1.0 {
            self.target_fps
        } else {
            1.0
        };
        Duration::from_secs_f64(1.0 / fps)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_fps.is_finite() && self.target_fps >= 1.0) {
            return Err(anyhow!("target_fps must be a finite rate of at least 1, got {}", self.target_fps));
        }
        if self.stage_queue_capacity == 0 || self.sink_queue_capacity == 0 {
            return Err(anyhow!("queue capacities must be at least 1"));
        }
        if self.max_consecutive_timeouts == Some(0) {
            return Err(anyhow!("max_consecutive_timeouts must be at least 1 when set"));
        }
        Ok(())
    }
}

pub struct Pipeline {
    source: Box<dyn Source>,
    stages: Vec<Box<dyn Stage>>,
    sink: Box<dyn Sink>,
    options: PipelineOptions,
    context: Arc<PipelineContext>,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn Source>,
        stages: Vec<Box<dyn Stage>>,
        sink: Box<dyn Sink>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            stages,
            sink,
            options,
            context: Arc::new(PipelineContext::new()),
        }
    }

    /// Shared handle for external interrupts.
    pub fn context(&self) -> Arc<PipelineContext> {
        Arc::clone(&self.context)
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn run(self) -> RunReport {
        let Pipeline {
            source,
            mut stages,
            sink,
            options,
            context,
        } = self;
        for stage in stages.iter_mut() {
            stage.bind_timer(context.timer());
        }
        log::info!(
            "pipeline: {:?} mode, {} stages, target {} fps",
            options.mode,
            stages.len(),
            options.target_fps
        );

        let mailboxes = match (options.validate(), options.mode) {
            (Err(err), _) => {
                context.fail(StageFailure::new("pipeline", None, err));
                Vec::new()
            }
            (Ok(()), ExecutionMode::Inline) => {
                inline::run(source, stages, sink, &context);
                Vec::new()
            }
            (Ok(()), ExecutionMode::Threaded) => {
                threaded::run(source, stages, sink, &options, &context)
            }
        };

        let report = context.timer().report();
        if !report.is_empty() {
            log::info!("timing summary:\n{}", report.trim_end());
        }
        let outcome = context.take_outcome();
        match &outcome {
            RunOutcome::Completed => log::info!("pipeline: completed"),
            RunOutcome::Interrupted => log::info!("pipeline: interrupted"),
            RunOutcome::Failed(failure) => log::error!("pipeline: {}", failure),
        }
        RunReport {
            outcome,
            frames_produced: context.frames_produced(),
            frames_consumed: context.frames_consumed(),
            mailboxes,
            timing: context.timer().summary(),
        }
    }
}
