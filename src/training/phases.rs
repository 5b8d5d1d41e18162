//! Phase instrumentation for the training loop.
//!
//! The trainer calls a [`PhaseCollector`] at fixed phase boundaries; what
//! happens there (timing, counters, nothing) is up to the collector.

use std::time::{Duration, Instant};

/// Callbacks invoked by the trainer. All default to no-ops.
pub trait PhaseCollector {
    fn epoch_start(&mut self, _epoch: usize) {}
    fn batch_start(&mut self, _batch: usize) {}
    fn forward_done(&mut self) {}
    fn backward_done(&mut self) {}
    fn step_done(&mut self) {}
    fn epoch_done(&mut self, _epoch: usize) {}

    /// Timings of the epoch that just closed, for collectors that keep them.
    fn epoch_timings(&self) -> Option<PhaseTimings> {
        None
    }
}

/// Collector that records nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCollector;

impl PhaseCollector for NoopCollector {}

/// Wall-clock split of one epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhaseTimings {
    pub forward: Duration,
    pub backward: Duration,
    pub step: Duration,
    /// Time spent waiting for batches: epoch wall time minus compute time.
    pub load: Duration,
    pub wall: Duration,
}

impl PhaseTimings {
    /// Forward + backward + optimizer step.
    pub fn compute(&self) -> Duration {
        self.forward + self.backward + self.step
    }

    /// One-line breakdown for logs.
    pub fn breakdown(&self) -> String {
        format!(
            "wall={:.2}s load={:.2}s compute={:.2}s (fwd={:.2}s bwd={:.2}s step={:.2}s)",
            self.wall.as_secs_f64(),
            self.load.as_secs_f64(),
            self.compute().as_secs_f64(),
            self.forward.as_secs_f64(),
            self.backward.as_secs_f64(),
            self.step.as_secs_f64(),
        )
    }
}

/// Measures per-phase wall time; load time is what is left of the epoch.
#[derive(Debug, Default)]
pub struct TimingCollector {
    epoch_started: Option<Instant>,
    mark: Option<Instant>,
    current: PhaseTimings,
    last: Option<PhaseTimings>,
}

impl TimingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timings of the most recently closed epoch.
    pub fn last(&self) -> Option<PhaseTimings> {
        self.last
    }

    fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = self.mark.map(|m| now - m).unwrap_or_default();
        self.mark = Some(now);
        elapsed
    }
}

impl PhaseCollector for TimingCollector {
    fn epoch_start(&mut self, _epoch: usize) {
        self.epoch_started = Some(Instant::now());
        self.current = PhaseTimings::default();
    }

    fn batch_start(&mut self, _batch: usize) {
        self.mark = Some(Instant::now());
    }

    fn forward_done(&mut self) {
        let lap = self.lap();
        self.current.forward += lap;
    }

    fn backward_done(&mut self) {
        let lap = self.lap();
        self.current.backward += lap;
    }

    fn step_done(&mut self) {
        let lap = self.lap();
        self.current.step += lap;
        self.mark = None;
    }

    fn epoch_done(&mut self, _epoch: usize) {
        let wall = self.epoch_started.take().map(|s| s.elapsed()).unwrap_or_default();
        self.current.wall = wall;
        self.current.load = wall.saturating_sub(self.current.compute());
        self.last = Some(self.current);
    }

    fn epoch_timings(&self) -> Option<PhaseTimings> {
        self.last()
    }
}
