use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of host time in the same units as MIDI packet timestamps.
pub trait HostClock: Send + Sync {
    fn now(&self) -> u64;
}

/// Microseconds since the clock was created. Timestamp 0 is reserved for
/// "immediately", so readings start at 1.
pub struct SystemHostClock {
    origin: Instant,
}

impl SystemHostClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemHostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for SystemHostClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64 + 1
    }
}

/// A clock that only moves when told to. Clones share the same time, so a
/// test or offline renderer can hold one handle and give another to the
/// instrument.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ticks: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            ticks: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::Release);
    }

    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::AcqRel);
    }
}

impl HostClock for ManualClock {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}

/// Maps host timestamps to sample offsets within the block being rendered.
///
/// The mapping is re-anchored at each block boundary. When the host clock
/// has not moved since the previous block (a stopped or offline clock), the
/// anchor is extrapolated from the number of samples rendered instead, so
/// time still advances with the audio.
#[derive(Debug, Clone)]
pub struct ClockCorrelation {
    ticks_per_second: f64,
    sample_rate: f64,
    anchor_host: u64,
    anchor_sample: u64,
    last_observed: Option<u64>,
}

impl ClockCorrelation {
    pub fn new(ticks_per_second: u64, sample_rate: f32) -> Self {
        Self {
            ticks_per_second: ticks_per_second.max(1) as f64,
            sample_rate: sample_rate as f64,
            anchor_host: 0,
            anchor_sample: 0,
            last_observed: None,
        }
    }

    /// Anchors the start of the block beginning at `sample_position`.
    pub fn resync(&mut self, observed: Option<u64>, sample_position: u64) {
        let elapsed = sample_position.saturating_sub(self.anchor_sample);
        let extrapolated = self.anchor_host + self.samples_to_ticks(elapsed);
        self.anchor_host = match observed {
            Some(now) if Some(now) != self.last_observed => now,
            _ => extrapolated,
        };
        if observed.is_some() {
            self.last_observed = observed;
        }
        self.anchor_sample = sample_position;
    }

    /// Host time at the start of the current block.
    pub fn block_start(&self) -> u64 {
        self.anchor_host
    }

    /// Sample offset from the block start for `timestamp`. Immediate (0) and
    /// past timestamps map to 0.
    pub fn offset_for(&self, timestamp: u64) -> u64 {
        if timestamp == 0 || timestamp <= self.anchor_host {
            return 0;
        }
        let ticks = (timestamp - self.anchor_host) as f64;
        (ticks * self.sample_rate / self.ticks_per_second).round() as u64
    }

    pub fn samples_to_ticks(&self, samples: u64) -> u64 {
        (samples as f64 * self.ticks_per_second / self.sample_rate).round() as u64
    }
}
