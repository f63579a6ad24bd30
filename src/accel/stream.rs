use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, unbounded, Sender};

type Job = Box<dyn FnOnce() -> Result<()> + Send>;

enum Command {
    Run(&'static str, Job),
    Fence(Sender<Result<()>>),
}

/// Ordered asynchronous work queue.
///
/// Jobs run on a dedicated worker thread in submission order. The first failure
/// is sticky: later jobs are skipped and the error is reported by the next
/// `synchronize`, after which the stream is usable again.
pub struct Stream {
    name: String,
    commands: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = unbounded::<Command>();
        let worker = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut failed: Option<anyhow::Error> = None;
                for command in rx {
                    match command {
                        Command::Run(label, job) => {
                            if failed.is_some() {
                                continue;
                            }
                            let result = panic::catch_unwind(AssertUnwindSafe(job))
                                .unwrap_or_else(|_| Err(anyhow!("panicked")));
                            if let Err(err) = result {
                                failed = Some(err.context(label));
                            }
                        }
                        Command::Fence(done) => {
                            let status = match failed.take() {
                                Some(err) => Err(err),
                                None => Ok(()),
                            };
                            let _ = done.send(status);
                        }
                    }
                }
            })
            .with_context(|| format!("failed to spawn stream worker {}", name))?;
        Ok(Self {
            name,
            commands: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `job` behind everything already submitted.
    pub fn enqueue(
        &self,
        label: &'static str,
        job: impl FnOnce() -> Result<()> + Send + 'static,
    ) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or_else(|| anyhow!("stream {} is shut down", self.name))?
            .send(Command::Run(label, Box::new(job)))
            .map_err(|_| anyhow!("stream {} worker exited", self.name))
    }

    /// Block until every queued job has completed.
    pub fn synchronize(&self) -> Result<()> {
        let (done_tx, done_rx) = bounded(1);
        self.commands
            .as_ref()
            .ok_or_else(|| anyhow!("stream {} is shut down", self.name))?
            .send(Command::Fence(done_tx))
            .map_err(|_| anyhow!("stream {} worker exited", self.name))?;
        done_rx
            .recv()
            .map_err(|_| anyhow!("stream {} worker exited before fence", self.name))?
            .with_context(|| format!("stream {}", self.name))
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("stream {} worker panicked", self.name);
            }
        }
    }
}
