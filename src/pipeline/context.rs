use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::timer::Timer;

use super::{RunOutcome, StageFailure};

enum StopReason {
    Interrupted,
    Failed(StageFailure),
}

/// State shared by every thread of one pipeline run.
///
/// The exit flag is checked at every blocking boundary. The first failure is
/// kept; an interrupt never replaces a failure.
pub struct PipelineContext {
    exit: AtomicBool,
    reason: Mutex<Option<StopReason>>,
    timer: Timer,
    produced: AtomicU64,
    consumed: AtomicU64,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            exit: AtomicBool::new(false),
            reason: Mutex::new(None),
            timer: Timer::new(),
            produced: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
        }
    }

    fn reason(&self) -> MutexGuard<'_, Option<StopReason>> {
        self.reason.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Request a graceful stop.
    pub fn interrupt(&self) {
        {
            let mut reason = self.reason();
            if reason.is_none() {
                *reason = Some(StopReason::Interrupted);
            }
        }
        self.exit.store(true, Ordering::SeqCst);
    }

    /// Record a fatal failure and stop the pipeline.
    pub fn fail(&self, failure: StageFailure) {
        log::error!("{}", failure);
        {
            let mut reason = self.reason();
            match *reason {
                Some(StopReason::Failed(_)) => {}
                _ => *reason = Some(StopReason::Failed(failure)),
            }
        }
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn should_exit(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn frames_produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn frames_consumed(&self) -> u64 {
        self.consumed.load(Ordering::SeqCst)
    }

    pub(crate) fn note_produced(&self) {
        self.produced.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn note_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn take_outcome(&self) -> RunOutcome {
        match self.reason().take() {
            None => RunOutcome::Completed,
            Some(StopReason::Interrupted) => RunOutcome::Interrupted,
            Some(StopReason::Failed(failure)) => RunOutcome::Failed(failure),
        }
    }
}
