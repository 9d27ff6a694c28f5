use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Capture is reported as stalled after this long without a frame.
pub const CAPTURE_STALL_THRESHOLD: Duration = Duration::from_secs(3);

/// Last time the capture worker produced a frame, in epoch milliseconds.
#[derive(Debug, Default)]
pub struct Heartbeat {
    last_ms: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Self {
        let heartbeat = Self::default();
        heartbeat.beat();
        heartbeat
    }

    pub fn beat(&self) {
        self.beat_at(current_millis());
    }

    pub fn beat_at(&self, now_ms: u64) {
        self.last_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn last_ms(&self) -> u64 {
        self.last_ms.load(Ordering::Relaxed)
    }
}

/// Reports a stalled capture worker once per stall; it never stops workers.
#[derive(Debug)]
pub struct CaptureWatchdog {
    threshold: Duration,
    warned: bool,
}

impl CaptureWatchdog {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            warned: false,
        }
    }

    /// Returns the stall age the first time it crosses the threshold.
    pub fn check(&mut self, heartbeat: &Heartbeat, now_ms: u64) -> Option<Duration> {
        let age = Duration::from_millis(now_ms.saturating_sub(heartbeat.last_ms()));
        if age <= self.threshold {
            self.warned = false;
            return None;
        }
        if self.warned {
            return None;
        }
        self.warned = true;
        Some(age)
    }

    pub fn reset(&mut self) {
        self.warned = false;
    }
}

pub fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stall_is_reported_once_until_frames_resume() {
        let heartbeat = Heartbeat::default();
        heartbeat.beat_at(10_000);
        let mut watchdog = CaptureWatchdog::new(CAPTURE_STALL_THRESHOLD);

        assert_eq!(watchdog.check(&heartbeat, 12_000), None);
        assert_eq!(
            watchdog.check(&heartbeat, 13_500),
            Some(Duration::from_millis(3_500))
        );
        assert_eq!(watchdog.check(&heartbeat, 20_000), None);

        heartbeat.beat_at(20_000);
        assert_eq!(watchdog.check(&heartbeat, 20_100), None);
        assert!(watchdog.check(&heartbeat, 24_000).is_some());
    }
}
