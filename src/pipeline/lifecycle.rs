use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;
use crate::timer::Timer;

use super::{Lifecycle, Sink, SinkControl, Source, Stage};

/// Per-component lifecycle: `Unopened -> Open -> Running -> Closing -> Closed`.
///
/// A failed `open` goes straight to `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageState {
    Unopened,
    Open,
    Running,
    Closing,
    Closed,
}

/// Owns one component and enforces its state machine.
///
/// Every call into the component is panic-isolated, and `close` is delivered
/// exactly once to anything that opened, on drop if nobody called it.
pub(crate) struct Guarded<T: Lifecycle + ?Sized> {
    inner: Box<T>,
    name: String,
    span: String,
    state: StageState,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn isolate<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(anyhow!("panicked: {}", panic_message(payload))))
}

impl<T: Lifecycle + ?Sized> Guarded<T> {
    pub(crate) fn new(inner: Box<T>) -> Self {
        let name = inner.name().to_string();
        let span = format!("{}(frame)", name);
        Self {
            inner,
            name,
            span,
            state: StageState::Unopened,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> StageState {
        self.state
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(self.state, StageState::Open | StageState::Running)
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        if self.state != StageState::Unopened {
            return Err(anyhow!("{} cannot open from {:?}", self.name, self.state));
        }
        let inner = &mut self.inner;
        match isolate(|| inner.open()) {
            Ok(()) => {
                self.state = StageState::Open;
                log::info!("{}: opened", self.name);
                Ok(())
            }
            Err(err) => {
                self.state = StageState::Closed;
                Err(err.context(format!("{}: open failed", self.name)))
            }
        }
    }

    pub(crate) fn mark_running(&mut self) {
        if self.state == StageState::Open {
            self.state = StageState::Running;
        }
    }

    /// Close if open. Later calls are no-ops.
    pub(crate) fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.state = StageState::Closing;
        let inner = &mut self.inner;
        let result = isolate(|| inner.close());
        self.state = StageState::Closed;
        log::info!("{}: closed", self.name);
        result.with_context(|| format!("{}: close failed", self.name))
    }

    /// Close and log instead of returning the error.
    pub(crate) fn close_logged(&mut self) {
        if let Err(err) = self.close() {
            log::error!("{:#}", err);
        }
    }
}

impl<T: Lifecycle + ?Sized> Drop for Guarded<T> {
    fn drop(&mut self) {
        self.close_logged();
    }
}

impl Guarded<dyn Stage> {
    pub(crate) fn apply(&mut self, frame: Frame, timer: &Timer) -> Result<Frame> {
        let _span = timer.span(self.span.as_str());
        let inner = &mut self.inner;
        isolate(|| inner.apply(frame))
    }
}

impl Guarded<dyn Source> {
    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let inner = &mut self.inner;
        isolate(|| inner.next_frame())
    }
}

impl Guarded<dyn Sink> {
    pub(crate) fn consume(&mut self, frame: Frame, timer: &Timer) -> Result<SinkControl> {
        let _span = timer.span(self.span.as_str());
        let inner = &mut self.inner;
        isolate(|| inner.consume(frame))
    }

    pub(crate) fn requires_main_thread(&self) -> bool {
        self.inner.requires_main_thread()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        fail_open: bool,
    }

    impl Lifecycle for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn open(&mut self) -> Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(anyhow!("no model"));
            }
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Stage for Counting {
        fn apply(&mut self, _frame: Frame) -> Result<Frame> {
            panic!("bad frame")
        }
    }

    fn counting(fail_open: bool) -> (Guarded<dyn Stage>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let stage: Box<dyn Stage> = Box::new(Counting {
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::clone(&closes),
            fail_open,
        });
        (Guarded::new(stage), closes)
    }

    #[test]
    fn close_is_delivered_once() {
        let (mut guarded, closes) = counting(false);
        guarded.open().unwrap();
        guarded.mark_running();
        assert_eq!(guarded.state(), StageState::Running);
        guarded.close().unwrap();
        guarded.close().unwrap();
        drop(guarded);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_closes_open_component() {
        let (mut guarded, closes) = counting(false);
        guarded.open().unwrap();
        drop(guarded);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_open_is_closed_without_close_call() {
        let (mut guarded, closes) = counting(true);
        let err = guarded.open().unwrap_err();
        assert!(format!("{:#}", err).contains("no model"));
        assert_eq!(guarded.state(), StageState::Closed);
        assert!(guarded.open().is_err());
        drop(guarded);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panics_in_apply_become_errors() {
        let (mut guarded, _closes) = counting(false);
        guarded.open().unwrap();
        let frame = Frame::filled(
            crate::frame::PixelFormat::RgbU8,
            crate::frame::PixelArrangement::Hwc,
            2,
            2,
            0,
        )
        .unwrap();
        let timer = Timer::new();
        let err = guarded.apply(frame, &timer).unwrap_err();
        assert!(err.to_string().contains("bad frame"));
        assert_eq!(timer.summary()[0].name, "counting(frame)");
    }
}
