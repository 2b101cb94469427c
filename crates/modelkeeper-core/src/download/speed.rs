//! Transfer speed and ETA.

use std::time::{Duration, Instant};

/// Trailing-delta speed estimate, sampled on every progress event.
///
/// `speed = (bytes - bytes_at_last_sample) / (now - last_sample_time)`.
/// Samples closer together than `min_interval` are folded into the next one
/// so that bursts of events do not produce absurd rates.
#[derive(Debug, Clone)]
pub struct SpeedSampler {
    last_bytes: u64,
    last_time: Instant,
    min_interval: Duration,
    speed: f64,
}

impl SpeedSampler {
    pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(200);

    pub fn new(now: Instant) -> Self {
        Self::with_min_interval(now, Self::DEFAULT_MIN_INTERVAL)
    }

    pub fn with_min_interval(now: Instant, min_interval: Duration) -> Self {
        Self {
            last_bytes: 0,
            last_time: now,
            min_interval,
            speed: 0.0,
        }
    }

    /// Record the cumulative byte count observed at `now`; returns bytes/sec.
    ///
    /// A count that went backwards (a new layer started, or the transport
    /// restarted) resets the baseline without producing a negative rate.
    pub fn sample_at(&mut self, bytes: u64, now: Instant) -> f64 {
        if bytes < self.last_bytes {
            self.last_bytes = bytes;
            self.last_time = now;
            return self.speed;
        }
        let elapsed = now.saturating_duration_since(self.last_time);
        if elapsed < self.min_interval {
            return self.speed;
        }
        self.speed = (bytes - self.last_bytes) as f64 / elapsed.as_secs_f64();
        self.last_bytes = bytes;
        self.last_time = now;
        self.speed
    }

    pub fn sample(&mut self, bytes: u64) -> f64 {
        self.sample_at(bytes, Instant::now())
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }
}

/// Seconds left at the current speed, `None` when the speed is unknown.
pub fn eta_seconds(current: u64, total: u64, bytes_per_sec: f64) -> Option<u64> {
    if bytes_per_sec <= 0.0 || !bytes_per_sec.is_finite() || total == 0 {
        return None;
    }
    let remaining = total.saturating_sub(current) as f64;
    Some((remaining / bytes_per_sec).ceil() as u64)
}
