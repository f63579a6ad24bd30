use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::frame::Frame;

/// Counters for one mailbox, read after the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxStats {
    pub name: String,
    pub capacity: usize,
    pub delivered: u64,
    pub dropped: u64,
    /// Highest occupancy observed right after a delivery.
    pub peak: usize,
}

#[derive(Debug)]
pub(crate) struct MailboxCounters {
    name: String,
    capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
    peak: AtomicUsize,
}

impl MailboxCounters {
    pub(crate) fn snapshot(&self) -> MailboxStats {
        MailboxStats {
            name: self.name.clone(),
            capacity: self.capacity,
            delivered: self.delivered.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Delivered,
    /// Deadline passed with the mailbox full; the frame was shed.
    Dropped(u64),
    /// Receiver is gone.
    Closed,
}

#[derive(Debug)]
pub(crate) enum PullOutcome {
    Frame(Frame),
    TimedOut,
    /// Sender is gone and the mailbox is drained.
    Closed,
}

pub(crate) struct MailboxSender {
    tx: Sender<Frame>,
    counters: Arc<MailboxCounters>,
}

pub(crate) struct MailboxReceiver {
    rx: Receiver<Frame>,
}

/// A bounded single-producer single-consumer frame mailbox.
pub(crate) fn mailbox(
    name: impl Into<String>,
    capacity: usize,
) -> (MailboxSender, MailboxReceiver, Arc<MailboxCounters>) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    let counters = Arc::new(MailboxCounters {
        name: name.into(),
        capacity,
        delivered: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
        peak: AtomicUsize::new(0),
    });
    (
        MailboxSender {
            tx,
            counters: Arc::clone(&counters),
        },
        MailboxReceiver { rx },
        counters,
    )
}

impl MailboxSender {
    pub(crate) fn push(&self, frame: Frame, deadline: Duration) -> PushOutcome {
        match self.tx.send_timeout(frame, deadline) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::SeqCst);
                self.counters.peak.fetch_max(self.tx.len(), Ordering::SeqCst);
                PushOutcome::Delivered
            }
            Err(SendTimeoutError::Timeout(frame)) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                PushOutcome::Dropped(frame.sequence)
            }
            Err(SendTimeoutError::Disconnected(_)) => PushOutcome::Closed,
        }
    }
}

impl MailboxReceiver {
    pub(crate) fn pull(&self, deadline: Duration) -> PullOutcome {
        match self.rx.recv_timeout(deadline) {
            Ok(frame) => PullOutcome::Frame(frame),
            Err(RecvTimeoutError::Timeout) => PullOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => PullOutcome::Closed,
        }
    }
}
