//! Retry policy and backoff state machine
//!
//! ```text
//! Idle --begin--> Fetching(n) --fail(retryable, budget left)--> Retrying(n+1) --begin--> Fetching(n+1)
//!                     |
//!                     +--succeed--> Idle        +--fail(otherwise)--> Exhausted
//! ```
//!
//! The delay before retry `n` is a pure function of `n`; timers are the
//! caller's business.

use crate::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::time::Instant;
use std::time::Duration;
use tracing::debug;

/// Largest random stretch applied to a delay
const MAX_JITTER: f64 = 0.3;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds)
    pub base_delay_ms: u64,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Upper bound for any single delay (milliseconds)
    pub max_delay_ms: u64,
    /// Add up to 30% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given budget and base delay
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
            ..Default::default()
        }
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Scale the base delay down so the whole backoff schedule, jitter
    /// included, sleeps no longer than `budget`
    pub fn fit_within(mut self, budget: Duration) -> Self {
        let mut worst = 0.0;
        let mut step = self.base_delay_ms as f64;
        for _ in 0..self.max_retries {
            worst += step;
            step *= self.multiplier.max(1.0);
        }
        if self.jitter {
            worst *= 1.0 + MAX_JITTER;
        }

        let budget_ms = budget.as_millis() as f64;
        if worst > budget_ms {
            self.base_delay_ms = (self.base_delay_ms as f64 * budget_ms / worst).floor() as u64;
        }
        self
    }

    /// Deterministic delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
            Duration::from_millis(self.max_delay_ms),
            attempt,
        )
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter {
            let jitter = rand::random::<f64>() * MAX_JITTER;
            Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter))
        } else {
            delay
        }
    }
}

/// Exponential backoff: `base * multiplier^(attempt - 1)`, capped at `max`
pub fn backoff_delay(base: Duration, multiplier: f64, max: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exponent = (attempt - 1).min(32) as i32;
    let scaled = base.as_secs_f64() * multiplier.max(1.0).powi(exponent);
    Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
}

/// Retry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// No attempt in progress
    Idle,
    /// Attempt `attempt` running (1-based)
    Fetching { attempt: u32 },
    /// Waiting before attempt `attempt`
    Retrying { attempt: u32 },
    /// Budget spent or error not retryable
    Exhausted,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then run attempt `attempt`
    Retry { attempt: u32, delay: Duration },
    /// Stop
    GiveUp,
}

/// Retry state machine for one request
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    retries: u32,
}

impl RetryMachine {
    /// Create an idle machine
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
            retries: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Retries performed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Start the next attempt, returning its 1-based number.
    ///
    /// `None` once exhausted.
    pub fn begin(&mut self) -> Option<u32> {
        let attempt = match self.state {
            RetryState::Idle => 1,
            RetryState::Retrying { attempt } => attempt,
            RetryState::Fetching { attempt } => attempt,
            RetryState::Exhausted => return None,
        };
        self.state = RetryState::Fetching { attempt };
        Some(attempt)
    }

    /// Record a successful attempt
    pub fn succeed(&mut self) {
        self.state = RetryState::Idle;
    }

    /// Record a failed attempt and decide what happens next
    pub fn fail(&mut self, retryable: bool) -> RetryDecision {
        let RetryState::Fetching { attempt } = self.state else {
            self.state = RetryState::Exhausted;
            return RetryDecision::GiveUp;
        };

        if !retryable || self.retries >= self.policy.max_retries {
            self.state = RetryState::Exhausted;
            return RetryDecision::GiveUp;
        }

        self.retries += 1;
        let delay = self.policy.jittered(self.policy.delay_for(self.retries));
        self.state = RetryState::Retrying {
            attempt: attempt + 1,
        };
        RetryDecision::Retry {
            attempt: attempt + 1,
            delay,
        }
    }
}

/// Outcome of [`run_with_retry`]
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    /// Retries performed (attempts - 1)
    pub retries: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy budget is spent. `op` receives the 1-based attempt number.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_with_retry_until(policy, None, op).await
}

/// [`run_with_retry`] that gives up instead of sleeping past `cutoff`
pub async fn run_with_retry_until<T, F, Fut>(
    policy: &RetryPolicy,
    cutoff: Option<Instant>,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut machine = RetryMachine::new(policy.clone());
    let mut last_error = LoaderError::network("unknown", "no attempts made");
    // A retry the machine granted but the cutoff refused was never made
    let mut refused = 0;

    while let Some(attempt) = machine.begin() {
        match op(attempt).await {
            Ok(value) => {
                machine.succeed();
                return RetryOutcome {
                    result: Ok(value),
                    retries: machine.retries(),
                };
            }
            Err(e) => {
                let retry_after = e.retry_after();
                match machine.fail(e.is_retryable()) {
                    RetryDecision::Retry { attempt, delay } => {
                        let delay = retry_after.map_or(delay, |after| after.max(delay));
                        if cutoff.is_some_and(|cutoff| Instant::now() + delay >= cutoff) {
                            debug!(attempt, ?delay, "Retry would overrun the cutoff, giving up");
                            last_error = e;
                            refused = 1;
                            break;
                        }
                        debug!(attempt, ?delay, "Retrying after error: {}", e);
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        last_error = e;
                        break;
                    }
                }
            }
        }
    }

    RetryOutcome {
        result: Err(last_error),
        retries: machine.retries() - refused,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(1000);

        assert_eq!(backoff_delay(base, 2.0, max, 0), Duration::ZERO);
        assert_eq!(backoff_delay(base, 2.0, max, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2.0, max, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 2.0, max, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 2.0, max, 10), max);
        assert_eq!(backoff_delay(base, 2.0, max, u32::MAX), max);
    }

    #[test]
    fn test_machine_transitions() {
        let mut machine = RetryMachine::new(RetryPolicy::new(2, Duration::from_millis(10)).without_jitter());
        assert_eq!(machine.state(), RetryState::Idle);

        assert_eq!(machine.begin(), Some(1));
        assert_eq!(machine.state(), RetryState::Fetching { attempt: 1 });

        assert_eq!(
            machine.fail(true),
            RetryDecision::Retry {
                attempt: 2,
                delay: Duration::from_millis(10)
            }
        );
        assert_eq!(machine.state(), RetryState::Retrying { attempt: 2 });

        assert_eq!(machine.begin(), Some(2));
        assert_eq!(
            machine.fail(true),
            RetryDecision::Retry {
                attempt: 3,
                delay: Duration::from_millis(20)
            }
        );

        assert_eq!(machine.begin(), Some(3));
        assert_eq!(machine.fail(true), RetryDecision::GiveUp);
        assert_eq!(machine.state(), RetryState::Exhausted);
        assert_eq!(machine.begin(), None);
        assert_eq!(machine.retries(), 2);
    }

    #[test]
    fn test_non_retryable_exhausts_immediately() {
        let mut machine = RetryMachine::new(RetryPolicy::default());
        machine.begin();
        assert_eq!(machine.fail(false), RetryDecision::GiveUp);
        assert_eq!(machine.retries(), 0);
    }

    #[test]
    fn test_success_returns_to_idle() {
        let mut machine = RetryMachine::new(RetryPolicy::default());
        machine.begin();
        machine.succeed();
        assert_eq!(machine.state(), RetryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_retry_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(50));

        let outcome = run_with_retry(&policy, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(LoaderError::network("react", "reset"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 3);
        assert_eq!(outcome.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_retry_stops_on_fatal_error() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = run_with_retry(&RetryPolicy::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LoaderError::UnknownFramework("ember".into())) }
        })
        .await;

        assert!(matches!(
            outcome.result,
            Err(LoaderError::UnknownFramework(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_retry_exhausts_budget() {
        let outcome: RetryOutcome<()> =
            run_with_retry(&RetryPolicy::new(2, Duration::from_millis(5)), |_| async {
                Err(LoaderError::network("vue", "unreachable"))
            })
            .await;

        assert!(matches!(outcome.result, Err(LoaderError::NetworkFailure { .. })));
        assert_eq!(outcome.retries, 2);
    }

    #[test]
    fn test_fit_within_bounds_whole_schedule() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500)).fit_within(Duration::from_millis(1200));

        let total: Duration = (1..=policy.max_retries).map(|n| policy.delay_for(n)).sum();
        assert!(total.mul_f64(1.0 + MAX_JITTER) <= Duration::from_millis(1200));
        assert!(policy.base_delay_ms > 0);

        // Schedules that already fit are left alone
        let roomy = RetryPolicy::new(2, Duration::from_millis(10)).fit_within(Duration::from_secs(5));
        assert_eq!(roomy.base_delay_ms, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cutoff_stops_retries_before_sleeping_past_it() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let policy = RetryPolicy::new(5, Duration::from_millis(100)).without_jitter();

        // 100 + 200 fit before 350ms, the 400ms sleep does not
        let outcome: RetryOutcome<()> = run_with_retry_until(
            &policy,
            Some(started + Duration::from_millis(350)),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LoaderError::network("solid", "reset")) }
            },
        )
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.retries, 2);
        assert!(started.elapsed() < Duration::from_millis(350));
    }
}
