use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Halts outbound sends towards a `(workspace, integration)` pair after a
/// run of failures, so a dead relay is not hammered for a whole audience
///
/// `closed` counts consecutive failures, `open` suppresses sends until the
/// cool down elapses, `half_open` lets exactly one probe send through and
/// its result decides between `closed` and `open`
pub struct CircuitBreaker {
    failure_threshold: i32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: i32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// what the dispatcher should do with the send it is about to make
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    Allow,
    Suppress,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: i32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker {
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// decides the fate of the next send, transitioning `open` to
    /// `half_open` once the cool down elapsed
    pub fn check(&self) -> BreakerDecision {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            BreakerState::Closed => BreakerDecision::Allow,

            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);

                if elapsed >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    BreakerDecision::Allow
                } else {
                    BreakerDecision::Suppress
                }
            }

            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    BreakerDecision::Suppress
                } else {
                    inner.probe_in_flight = true;
                    BreakerDecision::Allow
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();

        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;

                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }

            // a failed probe re-opens for another full cool down
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }

            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_the_failure_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.check(), BreakerDecision::Allow);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.check(), BreakerDecision::Suppress);
    }

    #[test]
    fn success_resets_the_failure_run() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_allows_a_single_probe() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // zero cooldown, first check flips to half open and admits the probe
        assert_eq!(breaker.check(), BreakerDecision::Allow);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // no second send while the probe is in flight
        assert_eq!(breaker.check(), BreakerDecision::Suppress);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);

        breaker.record_failure();
        assert_eq!(breaker.check(), BreakerDecision::Allow);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
