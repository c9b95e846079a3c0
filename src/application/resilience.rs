use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::Mutex;
use tokio::time::{Duration as TokioDuration, sleep};

/// Bounded retry with exponential backoff, shared by every call site that
/// retries instead of each one hand-rolling the loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u8) -> TokioDuration {
        let factor = (self.multiplier as u64).saturating_pow(attempt as u32);
        TokioDuration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Runs `operation` until it succeeds or `max_attempts` is exhausted,
    /// sleeping the backoff delay between attempts. The last error is
    /// returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(_) if attempt + 1 < max_attempts => {
                    sleep(self.delay_for_attempt(attempt)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Start,
    Throttled,
    AlreadyRunning,
}

#[derive(Debug, Default)]
struct GateState {
    last_accepted: Option<DateTime<Utc>>,
    in_flight: bool,
}

/// Combined throttle window and single-flight admission gate. A trigger is
/// accepted at most once per window, and never while an accepted run is
/// still in flight.
#[derive(Debug)]
pub struct CoalesceGate {
    window: Duration,
    state: Mutex<GateState>,
}

impl CoalesceGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn try_enter(&self, now: DateTime<Utc>) -> GateDecision {
        let Ok(mut state) = self.state.lock() else {
            return GateDecision::AlreadyRunning;
        };
        if let Some(last_accepted) = state.last_accepted {
            if now - last_accepted < self.window {
                return GateDecision::Throttled;
            }
        }
        if state.in_flight {
            return GateDecision::AlreadyRunning;
        }
        state.last_accepted = Some(now);
        state.in_flight = true;
        GateDecision::Start
    }

    /// Must be called when the accepted run ends, success or not.
    pub fn finish(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.in_flight = false;
        }
    }
}
