use std::time::Duration;

use backhaul_protocol::FailureKind;

/// Backoff schedule parameters.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Jitter as a fraction of the capped delay (0.0 disables).
    pub jitter: f64,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
            max_attempts: 5,
        }
    }
}

/// Outcome of a retry consultation.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Pure backoff decision function.
///
/// `next_delay(attempt, kind)` computes
/// `min(base * multiplier^attempt, cap) ± jitter` with no clock reads and
/// no state. Jitter is derived from the seed folded with the attempt number,
/// so a given policy instance always produces the same schedule; callers
/// that want desynchronized fleets seed differently per session.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    jitter_seed: u64,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            jitter_seed: 0,
        }
    }

    pub fn with_seed(config: RetryConfig, jitter_seed: u64) -> Self {
        Self {
            config,
            jitter_seed,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retrying `attempt` (0-based: attempt 0 is the first
    /// retry after the initial failure), or `GiveUp`.
    ///
    /// Fatal kinds and cancellation bypass backoff entirely; retrying a
    /// rejected credential changes nothing.
    pub fn next_delay(&self, attempt: u32, kind: &FailureKind) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::GiveUp;
        }
        if attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }

        let exp = attempt.min(63) as i32;
        let raw = self.config.base_delay.as_secs_f64() * self.config.multiplier.powi(exp);
        let capped = raw.min(self.config.max_delay.as_secs_f64());

        let jittered = if self.config.jitter > 0.0 {
            // splitmix64 over seed ^ attempt, mapped to [-1.0, 1.0).
            let offset = unit_offset(self.jitter_seed ^ attempt as u64);
            (capped + capped * self.config.jitter * offset).max(0.0)
        } else {
            capped
        };

        RetryDecision::RetryAfter(Duration::from_secs_f64(jittered))
    }
}

/// Deterministic hash of `x` mapped to [-1.0, 1.0).
fn unit_offset(x: u64) -> f64 {
    let mut z = x.wrapping_add(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^= z >> 31;
    (z as f64 / u64::MAX as f64) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
            max_attempts,
        })
    }

    #[test]
    fn schedule_matches_spec_scenario() {
        // base=1s, multiplier=2, cap=30s, maxAttempts=3 -> [1s, 2s, 4s].
        let policy = no_jitter(3);
        let kind = FailureKind::Connection;
        assert_eq!(
            policy.next_delay(0, &kind),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            policy.next_delay(1, &kind),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            policy.next_delay(2, &kind),
            RetryDecision::RetryAfter(Duration::from_secs(4))
        );
        assert_eq!(policy.next_delay(3, &kind), RetryDecision::GiveUp);
    }

    #[test]
    fn delays_are_monotonic_up_to_cap() {
        let policy = no_jitter(64);
        let kind = FailureKind::Connection;
        let mut last = Duration::ZERO;
        for attempt in 0..20 {
            match policy.next_delay(attempt, &kind) {
                RetryDecision::RetryAfter(d) => {
                    assert!(d >= last, "attempt {attempt}: {d:?} < {last:?}");
                    assert!(d <= Duration::from_secs(30));
                    last = d;
                }
                RetryDecision::GiveUp => panic!("gave up early at attempt {attempt}"),
            }
        }
        assert_eq!(last, Duration::from_secs(30));
    }

    #[test]
    fn fatal_kinds_bypass_backoff() {
        let policy = no_jitter(5);
        assert_eq!(
            policy.next_delay(0, &FailureKind::Authentication),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.next_delay(0, &FailureKind::PermissionDenied),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.next_delay(0, &FailureKind::Cancelled),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn all_retryable_kinds_get_a_delay() {
        let policy = no_jitter(5);
        let retryable = [
            FailureKind::Connection,
            FailureKind::ChunkIntegrity { index: 1 },
            FailureKind::Timeout {
                operation: "chunk 1 send".into(),
            },
            FailureKind::DiskIo,
            FailureKind::ResumeTokenInvalid,
            FailureKind::WholeFileIntegrity,
        ];
        for kind in retryable {
            assert!(
                matches!(policy.next_delay(0, &kind), RetryDecision::RetryAfter(_)),
                "{kind} should be retryable"
            );
        }
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = RetryPolicy::with_seed(
            RetryConfig {
                jitter: 0.25,
                ..Default::default()
            },
            42,
        );
        for attempt in 0..10 {
            if let RetryDecision::RetryAfter(d) =
                policy.next_delay(attempt, &FailureKind::Connection)
            {
                let base = (2.0f64.powi(attempt as i32)).min(30.0);
                let secs = d.as_secs_f64();
                assert!(
                    secs >= base * 0.75 && secs <= base * 1.25,
                    "attempt {attempt}: {secs:.3}s outside [{:.3}, {:.3}]",
                    base * 0.75,
                    base * 1.25
                );
            }
        }
    }

    #[test]
    fn jitter_is_deterministic_per_seed() {
        let config = RetryConfig::default();
        let a = RetryPolicy::with_seed(config.clone(), 7);
        let b = RetryPolicy::with_seed(config, 7);
        for attempt in 0..5 {
            assert_eq!(
                a.next_delay(attempt, &FailureKind::Connection),
                b.next_delay(attempt, &FailureKind::Connection)
            );
        }
    }
}
