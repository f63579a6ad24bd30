use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use rtvideo::{
    ExecutionMode, Frame, Lifecycle, Pipeline, PipelineOptions, PixelArrangement, PixelFormat,
    RunOutcome, RunReport, Sink, SinkControl, Source, Stage, SyntheticSource,
};

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    frames: AtomicUsize,
}

impl Counters {
    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    fn assert_balanced(&self, name: &str) {
        assert_eq!(self.opened(), self.closed(), "{name}: open/close mismatch");
        assert!(self.closed() <= 1, "{name}: closed more than once");
    }
}

#[derive(Clone, Copy, Default)]
enum Fault {
    #[default]
    None,
    Open,
    ErrorOn(u64),
    PanicOn(u64),
}

struct TrackerSource {
    counters: Arc<Counters>,
    remaining: Option<u64>,
    next: u64,
    fault: Fault,
}

impl Lifecycle for TrackerSource {
    fn name(&self) -> &str {
        "TrackerSource"
    }

    fn open(&mut self) -> Result<()> {
        if matches!(self.fault, Fault::Open) {
            return Err(anyhow!("camera unplugged"));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Source for TrackerSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }
        let sequence = self.next;
        self.next += 1;
        match self.fault {
            Fault::ErrorOn(n) if n == sequence => return Err(anyhow!("read timeout")),
            Fault::PanicOn(n) if n == sequence => panic!("decoder crashed"),
            _ => {}
        }
        self.counters.frames.fetch_add(1, Ordering::SeqCst);
        // Keep an unbounded source from outrunning the scheduler.
        thread::sleep(Duration::from_millis(1));
        let frame = Frame::filled(PixelFormat::RgbU8, PixelArrangement::Hwc, 4, 4, 0)?;
        Ok(Some(frame.with_sequence(sequence)))
    }
}

struct TrackerStage {
    name: &'static str,
    counters: Arc<Counters>,
    fault: Fault,
}

impl Lifecycle for TrackerStage {
    fn name(&self) -> &str {
        self.name
    }

    fn open(&mut self) -> Result<()> {
        if matches!(self.fault, Fault::Open) {
            return Err(anyhow!("model missing"));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Stage for TrackerStage {
    fn apply(&mut self, frame: Frame) -> Result<Frame> {
        match self.fault {
            Fault::ErrorOn(n) if n == frame.sequence => return Err(anyhow!("bad frame")),
            Fault::PanicOn(n) if n == frame.sequence => panic!("stage bug"),
            _ => {}
        }
        self.counters.frames.fetch_add(1, Ordering::SeqCst);
        Ok(frame)
    }
}

struct TrackerSink {
    counters: Arc<Counters>,
    stop_after: Option<usize>,
    main_thread: bool,
    fault: Fault,
}

impl Lifecycle for TrackerSink {
    fn name(&self) -> &str {
        "TrackerSink"
    }

    fn open(&mut self) -> Result<()> {
        if matches!(self.fault, Fault::Open) {
            return Err(anyhow!("display unavailable"));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Sink for TrackerSink {
    fn consume(&mut self, frame: Frame) -> Result<SinkControl> {
        match self.fault {
            Fault::ErrorOn(n) if n == frame.sequence => return Err(anyhow!("disk full")),
            Fault::PanicOn(n) if n == frame.sequence => panic!("sink bug"),
            _ => {}
        }
        let seen = self.counters.frames.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(match self.stop_after {
            Some(limit) if seen >= limit => SinkControl::Stop,
            _ => SinkControl::Continue,
        })
    }

    fn requires_main_thread(&self) -> bool {
        self.main_thread
    }
}

#[derive(Default)]
struct Scenario {
    frames: Option<u64>,
    source_fault: Fault,
    first_fault: Fault,
    second_fault: Fault,
    sink_fault: Fault,
    stop_after: Option<usize>,
    main_thread_sink: bool,
    interrupt_after: Option<Duration>,
}

struct Trackers {
    source: Arc<Counters>,
    first: Arc<Counters>,
    second: Arc<Counters>,
    sink: Arc<Counters>,
}

impl Trackers {
    fn assert_balanced(&self) {
        self.source.assert_balanced("source");
        self.first.assert_balanced("first");
        self.second.assert_balanced("second");
        self.sink.assert_balanced("sink");
    }
}

fn run(mode: ExecutionMode, scenario: Scenario) -> (RunReport, Trackers) {
    let trackers = Trackers {
        source: Arc::default(),
        first: Arc::default(),
        second: Arc::default(),
        sink: Arc::default(),
    };
    let source = TrackerSource {
        counters: Arc::clone(&trackers.source),
        remaining: scenario.frames,
        next: 0,
        fault: scenario.source_fault,
    };
    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(TrackerStage {
            name: "first",
            counters: Arc::clone(&trackers.first),
            fault: scenario.first_fault,
        }),
        Box::new(TrackerStage {
            name: "second",
            counters: Arc::clone(&trackers.second),
            fault: scenario.second_fault,
        }),
    ];
    let sink = TrackerSink {
        counters: Arc::clone(&trackers.sink),
        stop_after: scenario.stop_after,
        main_thread: scenario.main_thread_sink,
        fault: scenario.sink_fault,
    };
    let options = PipelineOptions {
        mode,
        target_fps: 20.0,
        ..PipelineOptions::default()
    };

    let pipeline = Pipeline::new(Box::new(source), stages, Box::new(sink), options);
    let interrupter = scenario.interrupt_after.map(|delay| {
        let ctx = pipeline.context();
        thread::spawn(move || {
            thread::sleep(delay);
            ctx.interrupt();
        })
    });
    let report = pipeline.run();
    if let Some(handle) = interrupter {
        handle.join().expect("interrupter thread");
    }
    (report, trackers)
}

fn failed_stage(report: &RunReport) -> Option<(&str, Option<u64>, String)> {
    match &report.outcome {
        RunOutcome::Failed(failure) => Some((
            failure.stage.as_str(),
            failure.frame,
            format!("{:#}", failure.cause),
        )),
        _ => None,
    }
}

const MODES: [ExecutionMode; 2] = [ExecutionMode::Inline, ExecutionMode::Threaded];

#[test]
fn completed_run_closes_everything_once() {
    for mode in MODES {
        let (report, trackers) = run(
            mode,
            Scenario {
                frames: Some(5),
                ..Scenario::default()
            },
        );
        assert!(matches!(report.outcome, RunOutcome::Completed), "{mode:?}");
        assert_eq!(trackers.source.opened(), 1);
        assert_eq!(trackers.sink.frames(), 5);
        trackers.assert_balanced();
    }
}

#[test]
fn stage_error_names_stage_and_frame() {
    for mode in MODES {
        let (report, trackers) = run(
            mode,
            Scenario {
                second_fault: Fault::ErrorOn(2),
                ..Scenario::default()
            },
        );
        let (stage, frame, cause) = failed_stage(&report).expect("run should fail");
        assert_eq!(stage, "second", "{mode:?}");
        assert_eq!(frame, Some(2));
        assert!(cause.contains("bad frame"), "{cause}");
        // Threaded sinks may exit before draining frames already in flight.
        match mode {
            ExecutionMode::Inline => assert_eq!(trackers.sink.frames(), 2),
            ExecutionMode::Threaded => assert!(trackers.sink.frames() <= 2),
        }
        trackers.assert_balanced();
        assert_eq!(trackers.second.closed(), 1);

        let err = report.into_result().expect_err("failure surfaces as Err");
        assert!(err.to_string().contains("second"), "{err}");
    }
}

#[test]
fn stage_panic_is_reported_as_failure() {
    for mode in MODES {
        let (report, trackers) = run(
            mode,
            Scenario {
                first_fault: Fault::PanicOn(1),
                ..Scenario::default()
            },
        );
        let (stage, frame, cause) = failed_stage(&report).expect("run should fail");
        assert_eq!(stage, "first", "{mode:?}");
        assert_eq!(frame, Some(1));
        assert!(cause.contains("stage bug"), "{cause}");
        trackers.assert_balanced();
        assert_eq!(trackers.first.closed(), 1);
    }
}

#[test]
fn source_and_sink_faults_are_contained() {
    for mode in MODES {
        let (report, trackers) = run(
            mode,
            Scenario {
                source_fault: Fault::ErrorOn(3),
                ..Scenario::default()
            },
        );
        let (stage, _, cause) = failed_stage(&report).expect("source failure");
        assert_eq!(stage, "TrackerSource", "{mode:?}");
        assert!(cause.contains("read timeout"));
        trackers.assert_balanced();

        let (report, trackers) = run(
            mode,
            Scenario {
                sink_fault: Fault::PanicOn(0),
                ..Scenario::default()
            },
        );
        let (stage, frame, cause) = failed_stage(&report).expect("sink failure");
        assert_eq!(stage, "TrackerSink", "{mode:?}");
        assert_eq!(frame, Some(0));
        assert!(cause.contains("sink bug"));
        trackers.assert_balanced();
    }
}

#[test]
fn open_failure_closes_what_opened() {
    for mode in MODES {
        let (report, trackers) = run(
            mode,
            Scenario {
                second_fault: Fault::Open,
                ..Scenario::default()
            },
        );
        let (stage, frame, cause) = failed_stage(&report).expect("open failure");
        assert_eq!(stage, "second", "{mode:?}");
        assert_eq!(frame, None);
        assert!(cause.contains("model missing"));
        assert_eq!(trackers.second.opened(), 0);
        assert_eq!(trackers.second.closed(), 0);
        assert_eq!(trackers.sink.frames(), 0);
        trackers.assert_balanced();
    }
}

#[test]
fn sink_stop_interrupts_run() {
    for mode in MODES {
        let (report, trackers) = run(
            mode,
            Scenario {
                stop_after: Some(3),
                ..Scenario::default()
            },
        );
        assert!(matches!(report.outcome, RunOutcome::Interrupted), "{mode:?}");
        assert_eq!(trackers.sink.frames(), 3);
        assert_eq!(report.frames_consumed, 3);
        trackers.assert_balanced();
        assert!(report.into_result().is_ok());
    }
}

#[test]
fn external_interrupt_stops_unbounded_source() {
    for mode in MODES {
        let (report, trackers) = run(
            mode,
            Scenario {
                interrupt_after: Some(Duration::from_millis(100)),
                ..Scenario::default()
            },
        );
        assert!(matches!(report.outcome, RunOutcome::Interrupted), "{mode:?}");
        assert!(trackers.source.frames() > 0);
        trackers.assert_balanced();
    }
}

#[test]
fn main_thread_sink_runs_on_caller() {
    let caller = thread::current().id();
    let seen_on = Arc::new(std::sync::Mutex::new(None));

    struct ThreadSink {
        seen_on: Arc<std::sync::Mutex<Option<thread::ThreadId>>>,
    }

    impl Lifecycle for ThreadSink {
        fn name(&self) -> &str {
            "ThreadSink"
        }
    }

    impl Sink for ThreadSink {
        fn consume(&mut self, _frame: Frame) -> Result<SinkControl> {
            *self.seen_on.lock().expect("lock") = Some(thread::current().id());
            Ok(SinkControl::Continue)
        }

        fn requires_main_thread(&self) -> bool {
            true
        }
    }

    let source = SyntheticSource::new("stub://main", 8, 8)
        .expect("synthetic source")
        .with_limit(3);
    let report = Pipeline::new(
        Box::new(source),
        Vec::new(),
        Box::new(ThreadSink {
            seen_on: Arc::clone(&seen_on),
        }),
        PipelineOptions::threaded(10.0),
    )
    .run();
    assert!(matches!(report.outcome, RunOutcome::Completed));
    assert_eq!(report.frames_consumed, 3);
    assert_eq!(*seen_on.lock().expect("lock"), Some(caller));

    let (report, trackers) = run(
        ExecutionMode::Threaded,
        Scenario {
            frames: Some(4),
            main_thread_sink: true,
            ..Scenario::default()
        },
    );
    assert!(matches!(report.outcome, RunOutcome::Completed));
    assert_eq!(trackers.sink.frames(), 4);
    trackers.assert_balanced();
}
