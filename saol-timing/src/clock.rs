use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time source for the session tick loop.
///
/// Timestamps are seconds since the clock's origin. Everything in the
/// controller is expressed relative to two such timestamps (session start and
/// trial onset), so the origin itself never matters.
pub trait Clock: Clone + Send + Sync {
    fn now(&self) -> f64;
    fn elapsed(&self, since: f64) -> Duration {
        Duration::from_secs_f64((self.now() - since).max(0.0))
    }
    fn sleep(&self, d: Duration);
    fn record_frame(&mut self, d: Duration);
    fn tick_stats(&self) -> TickStats;
}

#[derive(Debug, Clone, Default)]
pub struct TickStats {
    pub average_frame_time_ns: f64,
    pub jitter_ns: f64,
    pub min_frame_time_ns: f64,
    pub max_frame_time_ns: f64,
    pub effective_fps: f64,
}

impl TickStats {
    fn from_frames(frames: &[Duration]) -> Self {
        if frames.is_empty() {
            return TickStats::default();
        }
        let times: Vec<f64> = frames.iter().map(|d| d.as_nanos() as f64).collect();
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / times.len() as f64;
        let min = times.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = times.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        TickStats {
            average_frame_time_ns: avg,
            jitter_ns: var.sqrt(),
            min_frame_time_ns: min,
            max_frame_time_ns: max,
            effective_fps: if avg > 0.0 { 1e9 / avg } else { 0.0 },
        }
    }
}

/// Wall-clock monotonic time with a rolling window of frame durations.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    pub start: Instant,
    pub frame_times: Vec<Duration>,
    pub max_samples: usize,
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
    fn sleep(&self, d: Duration) {
        self.high_precision_sleep(d)
    }
    fn record_frame(&mut self, d: Duration) {
        if self.frame_times.len() >= self.max_samples {
            self.frame_times.remove(0);
        }
        self.frame_times.push(d);
    }
    fn tick_stats(&self) -> TickStats {
        TickStats::from_frames(&self.frame_times)
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            frame_times: Vec::with_capacity(1000),
            max_samples: 1000,
        }
    }

    pub fn high_precision_sleep(&self, duration: Duration) {
        #[cfg(target_os = "linux")]
        self.linux_sleep(duration);
        #[cfg(not(target_os = "linux"))]
        std::thread::sleep(duration);
    }

    #[cfg(target_os = "linux")]
    fn linux_sleep(&self, duration: Duration) {
        use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC};

        let req = timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        };

        unsafe {
            clock_nanosleep(CLOCK_MONOTONIC, 0, &req, std::ptr::null_mut());
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Manually advanced clock. Clones share the same time, so a test can keep a
/// handle and step the controller's clock from outside.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
    frames: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(t: f64) -> Self {
        let clock = Self::new();
        clock.set(t);
        clock
    }

    pub fn set(&self, t: f64) {
        self.bits.store(t.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, dt: f64) {
        self.set(self.now() + dt);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
    fn sleep(&self, d: Duration) {
        self.advance(d.as_secs_f64());
    }
    fn record_frame(&mut self, d: Duration) {
        self.frames.push(d);
    }
    fn tick_stats(&self) -> TickStats {
        TickStats::from_frames(&self.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::starting_at(10.0);
        let handle = clock.clone();
        handle.advance(2.5);
        assert_eq!(clock.now(), 12.5);
        assert_eq!(clock.elapsed(10.0), Duration::from_millis(2500));
    }

    #[test]
    fn manual_sleep_advances() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_millis(500));
        assert!((clock.now() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn elapsed_never_negative() {
        let clock = ManualClock::starting_at(1.0);
        assert_eq!(clock.elapsed(5.0), Duration::ZERO);
    }

    #[test]
    fn tick_stats_from_frames() {
        let mut clock = ManualClock::new();
        clock.record_frame(Duration::from_millis(10));
        clock.record_frame(Duration::from_millis(30));
        let stats = clock.tick_stats();
        assert!((stats.average_frame_time_ns - 20e6).abs() < 1.0);
        assert!((stats.jitter_ns - 10e6).abs() < 1.0);
        assert!((stats.effective_fps - 50.0).abs() < 1e-6);
        assert_eq!(stats.min_frame_time_ns, 10e6);
        assert_eq!(stats.max_frame_time_ns, 30e6);
    }

    #[test]
    fn monotonic_window_is_bounded() {
        let mut clock = MonotonicClock::new();
        clock.max_samples = 3;
        for ms in 1..=5 {
            clock.record_frame(Duration::from_millis(ms));
        }
        assert_eq!(clock.frame_times.len(), 3);
        assert_eq!(clock.frame_times[0], Duration::from_millis(3));
    }
}
