use crate::timer::FpsMeter;

use super::lifecycle::Guarded;
use super::{PipelineContext, Sink, SinkControl, Source, Stage, StageFailure};

/// Drive every component on the calling thread.
pub(crate) fn run(
    source: Box<dyn Source>,
    stages: Vec<Box<dyn Stage>>,
    sink: Box<dyn Sink>,
    ctx: &PipelineContext,
) {
    let mut source = Guarded::new(source);
    let mut stages: Vec<Guarded<dyn Stage>> = stages.into_iter().map(Guarded::new).collect();
    let mut sink = Guarded::new(sink);

    if open_all(&mut source, &mut stages, &mut sink, ctx) {
        source.mark_running();
        for stage in stages.iter_mut() {
            stage.mark_running();
        }
        sink.mark_running();
        run_loop(&mut source, &mut stages, &mut sink, ctx);
    }

    sink.close_logged();
    for stage in stages.iter_mut().rev() {
        stage.close_logged();
    }
    source.close_logged();
}

fn open_all(
    source: &mut Guarded<dyn Source>,
    stages: &mut [Guarded<dyn Stage>],
    sink: &mut Guarded<dyn Sink>,
    ctx: &PipelineContext,
) -> bool {
    if let Err(err) = source.open() {
        ctx.fail(StageFailure::new(source.name(), None, err));
        return false;
    }
    for stage in stages.iter_mut() {
        if let Err(err) = stage.open() {
            ctx.fail(StageFailure::new(stage.name(), None, err));
            return false;
        }
    }
    if let Err(err) = sink.open() {
        ctx.fail(StageFailure::new(sink.name(), None, err));
        return false;
    }
    true
}

fn run_loop(
    source: &mut Guarded<dyn Source>,
    stages: &mut [Guarded<dyn Stage>],
    sink: &mut Guarded<dyn Sink>,
    ctx: &PipelineContext,
) {
    let mut fps = FpsMeter::new();
    'frames: while !ctx.should_exit() {
        let mut frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("{}: end of stream", source.name());
                break;
            }
            Err(err) => {
                ctx.fail(StageFailure::new(source.name(), None, err));
                break;
            }
        };
        ctx.note_produced();
        let sequence = frame.sequence;
        log::debug!("frame {}: start", sequence);

        for stage in stages.iter_mut() {
            frame = match stage.apply(frame, ctx.timer()) {
                Ok(frame) => frame,
                Err(err) => {
                    ctx.fail(StageFailure::new(stage.name(), Some(sequence), err));
                    break 'frames;
                }
            };
        }

        match sink.consume(frame, ctx.timer()) {
            Ok(SinkControl::Continue) => {
                ctx.note_consumed();
                let (last_second, average) = fps.tick();
                log::debug!("{}: fps {} (5s avg {:.1})", sink.name(), last_second, average);
            }
            Ok(SinkControl::Stop) => {
                ctx.note_consumed();
                log::info!("{}: stop requested", sink.name());
                ctx.interrupt();
            }
            Err(err) => ctx.fail(StageFailure::new(sink.name(), Some(sequence), err)),
        }
    }
}
