use governor::{
    clock::{QuantaClock, QuantaInstant},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota,
};
use std::{num::NonZeroU32, time::Duration};

type Limiter =
    governor::RateLimiter<NotKeyed, InMemoryState, QuantaClock, NoOpMiddleware<QuantaInstant>>;

/// Admission control over sendEmail operations of a single
/// `(workspace, integration)` pair
///
/// admission blocks until a permit is available or the callers budget is
/// exhausted, so a slow provider cap can never stall a slice past its
/// deadline
pub struct SendRateLimiter {
    limiter: Limiter,
}

impl SendRateLimiter {
    pub fn new(requests_per_minute: u32) -> SendRateLimiter {
        let cap = NonZeroU32::new(requests_per_minute.max(1)).expect("requests_per_minute >= 1");

        SendRateLimiter {
            limiter: governor::RateLimiter::direct(Quota::per_minute(cap)),
        }
    }

    /// waits for a send permit for at most `budget`, false means the caller
    /// should give up on this recipient for now (`throttled`)
    pub async fn acquire(&self, budget: Duration) -> bool {
        tokio::time::timeout(budget, self.limiter.until_ready())
            .await
            .is_ok()
    }

    /// non blocking admission probe
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_the_cap_without_waiting() {
        let limiter = SendRateLimiter::new(30);

        // governor allows the full burst of a per-minute quota up front
        for _ in 0..30 {
            assert!(limiter.try_acquire());
        }

        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn acquire_times_out_when_the_cap_is_spent() {
        let limiter = SendRateLimiter::new(1);

        assert!(limiter.acquire(Duration::from_millis(50)).await);

        // second permit would only free up a minute later, well past budget
        assert!(!limiter.acquire(Duration::from_millis(50)).await);
    }
}
