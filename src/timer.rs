//! Span timing shared by every stage.
//!
//! A `Timer` is a cheap cloneable handle over a bounded log of named spans.
//! Percentiles are computed on demand from the retained window.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Number of spans retained before the oldest are evicted.
pub const SPAN_CAPACITY: usize = 10_000;

#[derive(Clone, Debug)]
struct SpanRecord {
    name: String,
    elapsed: Duration,
}

#[derive(Clone, Default)]
pub struct Timer {
    spans: Arc<Mutex<VecDeque<SpanRecord>>>,
}

/// Latency percentiles for one span name.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanSummary {
    pub name: String,
    pub count: usize,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SpanRecord>> {
        // A panicking stage must not take telemetry down with it.
        self.spans.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, name: &str, elapsed: Duration) {
        let mut spans = self.lock();
        if spans.len() == SPAN_CAPACITY {
            spans.pop_front();
        }
        spans.push_back(SpanRecord {
            name: name.to_string(),
            elapsed,
        });
    }

    /// Start a span that is recorded when the guard drops.
    pub fn span(&self, name: impl Into<String>) -> SpanGuard {
        SpanGuard {
            timer: self.clone(),
            name: name.into(),
            started: Instant::now(),
            done: false,
        }
    }

    pub fn time<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = f();
        self.record(name, started.elapsed());
        out
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Per-name percentiles, sorted by p50 descending.
    pub fn summary(&self) -> Vec<SpanSummary> {
        let spans = self.lock();
        let mut names: Vec<&str> = Vec::new();
        for span in spans.iter() {
            if !names.contains(&span.name.as_str()) {
                names.push(&span.name);
            }
        }
        let mut out: Vec<SpanSummary> = names
            .into_iter()
            .map(|name| {
                let mut samples: Vec<Duration> = spans
                    .iter()
                    .filter(|s| s.name == name)
                    .map(|s| s.elapsed)
                    .collect();
                samples.sort();
                SpanSummary {
                    name: name.to_string(),
                    count: samples.len(),
                    p50: percentile(&samples, 0.50),
                    p95: percentile(&samples, 0.95),
                    p99: percentile(&samples, 0.99),
                }
            })
            .collect();
        out.sort_by(|a, b| b.p50.cmp(&a.p50));
        out
    }

    /// Human-readable summary, one block per span name.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for s in self.summary() {
            let _ = writeln!(
                out,
                "{}:\n\tp50={:.2}ms\tp95={:.2}ms\tp99={:.2}ms\tn={}",
                s.name,
                millis(s.p50),
                millis(s.p95),
                millis(s.p99),
                s.count
            );
        }
        out
    }
}

fn percentile(sorted: &[Duration], q: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
    sorted[idx]
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

pub struct SpanGuard {
    timer: Timer,
    name: String,
    started: Instant,
    done: bool,
}

impl SpanGuard {
    pub fn finish(mut self) -> Duration {
        self.done = true;
        let elapsed = self.started.elapsed();
        self.timer.record(&self.name, elapsed);
        elapsed
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.done {
            self.timer.record(&self.name, self.started.elapsed());
        }
    }
}

/// Frame rate over the last second and a five second average.
pub struct FpsMeter {
    ticks: VecDeque<Instant>,
}

const FPS_HISTORY: usize = 1000;

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsMeter {
    pub fn new() -> Self {
        Self {
            ticks: VecDeque::with_capacity(FPS_HISTORY),
        }
    }

    pub fn tick(&mut self) -> (usize, f32) {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> (usize, f32) {
        if self.ticks.len() == FPS_HISTORY {
            self.ticks.pop_front();
        }
        self.ticks.push_back(now);
        let within = |window: Duration| {
            self.ticks
                .iter()
                .filter(|t| now.duration_since(**t) <= window)
                .count()
        };
        let last_second = within(Duration::from_secs(1));
        let last_five = within(Duration::from_secs(5));
        (last_second, last_five as f32 / 5.0)
    }
}
