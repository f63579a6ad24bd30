use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::anyhow;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::timer::FpsMeter;

use super::lifecycle::Guarded;
use super::mailbox::{mailbox, MailboxReceiver, MailboxSender, PullOutcome, PushOutcome};
use super::{
    MailboxStats, PipelineContext, PipelineOptions, Sink, SinkControl, Source, Stage, StageFailure,
};

/// Start barrier: every thread reports in after `open`, then waits for release.
///
/// The coordinator releases by dropping the only `release` sender.
#[derive(Clone)]
struct StartGate {
    ready: Sender<()>,
    release: Receiver<()>,
}

impl StartGate {
    fn wait(self) {
        let StartGate { ready, release } = self;
        let _ = ready.send(());
        drop(ready);
        let _ = release.recv();
    }
}

struct Worker {
    ctx: Arc<PipelineContext>,
    deadline: Duration,
    max_idle: Option<u32>,
}

impl Worker {
    fn open<T: super::Lifecycle + ?Sized>(&self, component: &mut Guarded<T>) -> bool {
        match component.open() {
            Ok(()) => true,
            Err(err) => {
                self.ctx.fail(StageFailure::new(component.name(), None, err));
                false
            }
        }
    }

    /// Push downstream. Returns `false` once the receiver is gone.
    fn forward(&self, name: &str, tx: &MailboxSender, frame: crate::frame::Frame) -> bool {
        match tx.push(frame, self.deadline) {
            PushOutcome::Delivered => true,
            PushOutcome::Dropped(sequence) => {
                log::warn!("{}: output mailbox full, dropped frame {}", name, sequence);
                true
            }
            PushOutcome::Closed => {
                log::debug!("{}: downstream closed", name);
                false
            }
        }
    }

    /// Count an empty pull. Returns `false` when the idle limit is reached.
    fn idle(&self, name: &str, idle: &mut u32) -> bool {
        *idle += 1;
        log::debug!("{}: no input within {:?} ({} in a row)", name, self.deadline, idle);
        match self.max_idle {
            Some(limit) if *idle >= limit => {
                self.ctx.fail(StageFailure::new(
                    name,
                    None,
                    anyhow!("no input for {} consecutive frame intervals", idle),
                ));
                false
            }
            _ => true,
        }
    }

    fn source_loop(&self, source: &mut Guarded<dyn Source>, tx: &MailboxSender) {
        while !self.ctx.should_exit() {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    self.ctx.note_produced();
                    if !self.forward(source.name(), tx, frame) {
                        break;
                    }
                }
                Ok(None) => {
                    log::info!("{}: end of stream", source.name());
                    break;
                }
                Err(err) => {
                    self.ctx.fail(StageFailure::new(source.name(), None, err));
                    break;
                }
            }
        }
    }

    fn stage_loop(&self, stage: &mut Guarded<dyn Stage>, rx: &MailboxReceiver, tx: &MailboxSender) {
        let mut idle = 0;
        while !self.ctx.should_exit() {
            match rx.pull(self.deadline) {
                PullOutcome::Frame(frame) => {
                    idle = 0;
                    let sequence = frame.sequence;
                    log::debug!("{}: frame {}", stage.name(), sequence);
                    match stage.apply(frame, self.ctx.timer()) {
                        Ok(frame) => {
                            if !self.forward(stage.name(), tx, frame) {
                                break;
                            }
                        }
                        Err(err) => {
                            self.ctx
                                .fail(StageFailure::new(stage.name(), Some(sequence), err));
                            break;
                        }
                    }
                }
                PullOutcome::TimedOut => {
                    if !self.idle(stage.name(), &mut idle) {
                        break;
                    }
                }
                PullOutcome::Closed => {
                    log::info!("{}: input closed", stage.name());
                    break;
                }
            }
        }
    }

    fn sink_loop(&self, sink: &mut Guarded<dyn Sink>, rx: &MailboxReceiver) {
        let mut idle = 0;
        let mut fps = FpsMeter::new();
        while !self.ctx.should_exit() {
            match rx.pull(self.deadline) {
                PullOutcome::Frame(frame) => {
                    idle = 0;
                    let sequence = frame.sequence;
                    match sink.consume(frame, self.ctx.timer()) {
                        Ok(control) => {
                            self.ctx.note_consumed();
                            let (last_second, average) = fps.tick();
                            log::debug!(
                                "{}: frame {} fps {} (5s avg {:.1})",
                                sink.name(),
                                sequence,
                                last_second,
                                average
                            );
                            if control == SinkControl::Stop {
                                log::info!("{}: stop requested", sink.name());
                                self.ctx.interrupt();
                                break;
                            }
                        }
                        Err(err) => {
                            self.ctx
                                .fail(StageFailure::new(sink.name(), Some(sequence), err));
                            break;
                        }
                    }
                }
                PullOutcome::TimedOut => {
                    if !self.idle(sink.name(), &mut idle) {
                        break;
                    }
                }
                PullOutcome::Closed => {
                    log::info!("{}: input closed", sink.name());
                    break;
                }
            }
        }
    }

    fn run_sink(&self, mut sink: Guarded<dyn Sink>, rx: MailboxReceiver, gate: Option<StartGate>) {
        let opened = self.open(&mut sink);
        if let Some(gate) = gate {
            gate.wait();
        }
        if opened && !self.ctx.should_exit() {
            sink.mark_running();
            self.sink_loop(&mut sink, &rx);
        }
        drop(rx);
        sink.close_logged();
    }
}

/// One thread per component plus bounded mailboxes between neighbours.
pub(crate) fn run(
    source: Box<dyn Source>,
    stages: Vec<Box<dyn Stage>>,
    sink: Box<dyn Sink>,
    options: &PipelineOptions,
    ctx: &Arc<PipelineContext>,
) -> Vec<MailboxStats> {
    let worker = || Worker {
        ctx: Arc::clone(ctx),
        deadline: options.frame_interval(),
        max_idle: options.max_consecutive_timeouts,
    };
    let (ready_tx, ready_rx) = bounded::<()>(stages.len() + 2);
    let (release_tx, release_rx) = bounded::<()>(1);
    let gate = StartGate {
        ready: ready_tx,
        release: release_rx,
    };

    let source = Guarded::new(source);
    let stages: Vec<Guarded<dyn Stage>> = stages.into_iter().map(Guarded::new).collect();
    let sink = Guarded::new(sink);

    let mut names: Vec<String> = vec![source.name().to_string()];
    names.extend(stages.iter().map(|s| s.name().to_string()));
    names.push(sink.name().to_string());
    let hops = stages.len() + 1;
    let capacity = |hop: usize| {
        if hop + 1 == hops {
            options.sink_queue_capacity
        } else {
            options.stage_queue_capacity
        }
    };
    let label = |hop: usize| format!("{}->{}", names[hop], names[hop + 1]);

    let mut counters = Vec::with_capacity(hops);
    let mut handles: Vec<(String, JoinHandle<()>)> = Vec::new();

    let (tx, mut upstream, stats) = mailbox(label(0), capacity(0));
    counters.push(stats);
    {
        let worker = worker();
        let gate = gate.clone();
        let mut source = source;
        spawn(&names[0], ctx, &mut handles, move || {
            let opened = worker.open(&mut source);
            gate.wait();
            if opened && !worker.ctx.should_exit() {
                source.mark_running();
                worker.source_loop(&mut source, &tx);
            }
            drop(tx);
            source.close_logged();
        });
    }

    for (index, mut stage) in stages.into_iter().enumerate() {
        let hop = index + 1;
        let (tx, rx, stats) = mailbox(label(hop), capacity(hop));
        counters.push(stats);
        let input = std::mem::replace(&mut upstream, rx);
        let worker = worker();
        let gate = gate.clone();
        spawn(&names[hop], ctx, &mut handles, move || {
            let opened = worker.open(&mut stage);
            gate.wait();
            if opened && !worker.ctx.should_exit() {
                stage.mark_running();
                worker.stage_loop(&mut stage, &input, &tx);
            }
            drop(input);
            drop(tx);
            stage.close_logged();
        });
    }

    let sink_name = names[hops].clone();
    let main_sink = if sink.requires_main_thread() {
        Some((sink, upstream))
    } else {
        let worker = worker();
        let gate = gate.clone();
        spawn(&sink_name, ctx, &mut handles, move || {
            worker.run_sink(sink, upstream, Some(gate));
        });
        None
    };

    // Only worker threads hold gate handles from here on.
    let StartGate { ready, release } = gate;
    drop(ready);
    drop(release);

    match main_sink {
        Some((mut sink, rx)) => {
            let main = worker();
            let opened = main.open(&mut sink);
            release_after_ready(&ready_rx, handles.len(), release_tx);
            if opened && !ctx.should_exit() {
                sink.mark_running();
                main.sink_loop(&mut sink, &rx);
            }
            drop(rx);
            sink.close_logged();
        }
        None => release_after_ready(&ready_rx, handles.len(), release_tx),
    }

    for (name, handle) in handles {
        if handle.join().is_err() {
            ctx.fail(StageFailure::new(name, None, anyhow!("thread panicked")));
        }
    }

    counters.iter().map(|c| c.snapshot()).collect()
}

fn release_after_ready(ready: &Receiver<()>, expected: usize, release: Sender<()>) {
    for _ in 0..expected {
        if ready.recv().is_err() {
            break;
        }
    }
    log::debug!("pipeline: {} threads ready", expected);
    drop(release);
}

fn spawn(
    name: &str,
    ctx: &PipelineContext,
    handles: &mut Vec<(String, JoinHandle<()>)>,
    body: impl FnOnce() + Send + 'static,
) {
    match std::thread::Builder::new().name(name.to_string()).spawn(body) {
        Ok(handle) => handles.push((name.to_string(), handle)),
        Err(err) => ctx.fail(StageFailure::new(
            name,
            None,
            anyhow!(err).context("failed to spawn thread"),
        )),
    }
}
