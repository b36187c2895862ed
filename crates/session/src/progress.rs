use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::state::{TransferState, TransferStatus};

/// A progress snapshot, emitted through a non-blocking channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub session_id: String,
    pub status: TransferStatus,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub error: Option<String>,
}

impl Progress {
    pub fn of(state: &TransferState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            status: state.status,
            total_bytes: state.metadata.size,
            transferred_bytes: state.bytes_transferred,
            error: state.last_error.as_ref().map(|(_, m)| m.clone()),
        }
    }

    /// Percent complete, 0–100.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window: Duration,
}

/// Sliding-window transfer speed and ETA.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

impl SpeedCalculator {
    /// `window`: time window for the average (default 5 s);
    /// `max_samples`: retained sample cap (default 100).
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window: window.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        let cutoff = now - inner.window;
        inner.samples.retain(|s| s.timestamp >= cutoff);

        if inner.samples.len() > inner.max_samples {
            let excess = inner.samples.len() - inner.max_samples;
            inner.samples.drain(..excess);
        }
    }

    /// Average bytes/second inside the window; 0.0 below 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.samples.len() < 2 {
            return 0.0;
        }
        let first = &inner.samples[0];
        let last = &inner.samples[inner.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = inner.samples.iter().map(|s| s.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining` bytes; `None` at zero speed.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }

    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backhaul_protocol::{DigestAlgorithm, FileMetadata};

    fn sample_state() -> TransferState {
        TransferState::new(FileMetadata {
            name: "backup.tar".into(),
            size: 1000,
            chunk_size: 100,
            chunk_count: 10,
            algorithm: DigestAlgorithm::Sha256,
            file_digest: None,
            encryption: None,
        })
    }

    #[test]
    fn progress_snapshot_tracks_state() {
        let mut state = sample_state();
        state.bytes_transferred = 250;
        let progress = Progress::of(&state);
        assert_eq!(progress.transferred_bytes, 250);
        assert!((progress.percentage() - 25.0).abs() < f64::EPSILON);
        assert!(progress.error.is_none());
    }

    #[test]
    fn progress_percentage_empty_file() {
        let mut state = sample_state();
        state.metadata.size = 0;
        assert_eq!(Progress::of(&state).percentage(), 0.0);
    }

    #[test]
    fn speed_needs_two_samples() {
        let calc = SpeedCalculator::new(None, None);
        assert_eq!(calc.bytes_per_second(), 0.0);
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn speed_positive_with_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.add_sample(500);
        std::thread::sleep(Duration::from_millis(30));
        calc.add_sample(500);
        assert!(calc.bytes_per_second() > 0.0);
        assert!(calc.eta(10_000).unwrap() > Duration::ZERO);
    }

    #[test]
    fn speed_reset_clears_window() {
        let calc = SpeedCalculator::new(None, None);
        calc.add_sample(100);
        calc.add_sample(100);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn sample_cap_enforced() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(4));
        for i in 0..20 {
            calc.add_sample(i);
        }
        assert!(calc.inner.lock().unwrap().samples.len() <= 4);
    }
}
