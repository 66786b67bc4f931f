//! The retry loop shared by the sync and async execution paths.
//!
//! Both paths use the same schedule resolution, the same delay computation
//! (`delay * (1 + rand_in[-jitter, +jitter])`, clamped at zero), and the
//! same failure-class matching; only the sleep primitive and the engine
//! invocation differ. Total attempts are always `1 + max_retries`.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::constants;
use crate::engine::{EngineError, FailureClass};

/// What one run cost: attempt count, the delays slept between attempts, and
/// total wall-clock time.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub attempts: u32,
    pub delays: Vec<Duration>,
    pub elapsed: Duration,
}

/// Terminal retry-loop failure.
pub(crate) enum RetryError {
    Exhausted { cause: EngineError, attempts: u32 },
    Cancelled,
}

/// The retry policy, resolved once per run.
#[derive(Debug, Clone)]
pub(crate) struct RetrySchedule {
    max_retries: u32,
    delay_secs: f64,
    jitter_factor: f64,
    classes: Option<Vec<FailureClass>>,
}

impl RetrySchedule {
    pub(crate) fn from_policy(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries(),
            delay_secs: policy.retry_delay_secs(),
            jitter_factor: policy.jitter_factor(),
            classes: policy.retry_exceptions.clone(),
        }
    }

    fn matches(&self, raised: FailureClass) -> bool {
        self.classes.as_ref().map_or(true, |classes| {
            classes.iter().any(|class| class.matches(raised))
        })
    }

    fn compute_delay(&self) -> Duration {
        let spread = if self.jitter_factor > 0.0 {
            fastrand::f64().mul_add(2.0 * self.jitter_factor, -self.jitter_factor)
        } else {
            0.0
        };
        Duration::from_secs_f64((self.delay_secs * (1.0 + spread)).max(0.0))
    }

    /// The delay before the next attempt, or `None` when the policy gives
    /// up (retries exhausted or the failure class does not match).
    fn next_delay(&self, attempt_index: u32, error: &EngineError) -> Option<Duration> {
        if attempt_index >= self.max_retries || !self.matches(error.class()) {
            return None;
        }
        Some(self.compute_delay())
    }
}

fn truncate_cause(cause: &EngineError) -> String {
    let text = cause.to_string();
    if text.chars().count() <= constants::MAX_LOGGED_CAUSE_CHARS {
        text
    } else {
        let mut excerpt: String = text
            .chars()
            .take(constants::MAX_LOGGED_CAUSE_CHARS)
            .collect();
        excerpt.push_str("...");
        excerpt
    }
}

#[allow(clippy::cast_possible_truncation)]
fn log_retry(pipeline: &str, attempt: u32, started: Instant, delay: Duration, cause: &EngineError) {
    tracing::warn!(
        pipeline,
        attempt,
        elapsed_ms = started.elapsed().as_millis() as u64,
        next_delay_ms = delay.as_millis() as u64,
        cause = %truncate_cause(cause),
        "attempt failed, retrying"
    );
}

/// Runs the blocking attempt loop.
pub(crate) fn run_with_retry<T>(
    schedule: &RetrySchedule,
    pipeline: &str,
    mut attempt: impl FnMut(u32) -> Result<T, EngineError>,
) -> (Result<T, RetryError>, RunReport) {
    let started = Instant::now();
    let mut delays = Vec::new();
    let mut index = 0;
    loop {
        match attempt(index) {
            Ok(value) => {
                let report = RunReport {
                    attempts: index + 1,
                    delays,
                    elapsed: started.elapsed(),
                };
                return (Ok(value), report);
            }
            Err(error) => match schedule.next_delay(index, &error) {
                Some(delay) => {
                    log_retry(pipeline, index + 1, started, delay, &error);
                    delays.push(delay);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    index += 1;
                }
                None => {
                    let report = RunReport {
                        attempts: index + 1,
                        delays,
                        elapsed: started.elapsed(),
                    };
                    return (
                        Err(RetryError::Exhausted {
                            cause: error,
                            attempts: index + 1,
                        }),
                        report,
                    );
                }
            },
        }
    }
}

type AttemptFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// Runs the awaitable attempt loop. Cancellation interrupts both in-flight
/// attempts and pending delays, and schedules no further attempts.
pub(crate) async fn run_with_retry_async<'a, T>(
    schedule: &RetrySchedule,
    pipeline: &str,
    cancel: &CancellationToken,
    mut attempt: impl FnMut(u32) -> AttemptFuture<'a, T>,
) -> (Result<T, RetryError>, RunReport) {
    let started = Instant::now();
    let mut delays = Vec::new();
    let mut index = 0;
    loop {
        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                let report = make_report(index, delays, started);
                return (Err(RetryError::Cancelled), report);
            }
            outcome = attempt(index) => outcome,
        };

        match outcome {
            Ok(value) => return (Ok(value), make_report(index + 1, delays, started)),
            Err(error) => match schedule.next_delay(index, &error) {
                Some(delay) => {
                    log_retry(pipeline, index + 1, started, delay, &error);
                    delays.push(delay);
                    if !delay.is_zero() {
                        tokio::select! {
                            () = cancel.cancelled() => {
                                let report = make_report(index + 1, delays, started);
                                return (Err(RetryError::Cancelled), report);
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    index += 1;
                }
                None => {
                    return (
                        Err(RetryError::Exhausted {
                            cause: error,
                            attempts: index + 1,
                        }),
                        make_report(index + 1, delays, started),
                    );
                }
            },
        }
    }
}

fn make_report(attempts: u32, delays: Vec<Duration>, started: Instant) -> RunReport {
    RunReport {
        attempts,
        delays,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(max_retries: u32, delay: f64, jitter: f64) -> RetrySchedule {
        RetrySchedule::from_policy(&RetryPolicy {
            max_retries: Some(max_retries),
            retry_delay: Some(delay),
            jitter_factor: Some(jitter),
            retry_exceptions: None,
        })
    }

    fn failure() -> EngineError {
        EngineError::new(FailureClass::NodeFailure, "boom")
    }

    #[test]
    fn zero_jitter_delay_is_exactly_the_base() {
        let schedule = schedule(3, 0.5, 0.0);
        for _ in 0..16 {
            assert_eq!(schedule.compute_delay(), Duration::from_secs_f64(0.5));
        }
    }

    #[test]
    fn jittered_delay_stays_within_the_band() {
        let schedule = schedule(3, 1.0, 0.25);
        for _ in 0..256 {
            let delay = schedule.compute_delay().as_secs_f64();
            assert!((0.75..=1.25).contains(&delay), "delay {delay} out of band");
        }
    }

    #[test]
    fn total_attempts_is_one_plus_max_retries() {
        let schedule = schedule(2, 0.0, 0.0);
        let mut calls = 0;
        let (outcome, report) = run_with_retry(&schedule, "p", |_| {
            calls += 1;
            Err::<(), _>(failure())
        });
        assert!(matches!(
            outcome,
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(calls, 3);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.delays.len(), 2);
    }

    #[test]
    fn zero_max_retries_means_a_single_attempt_and_no_delay() {
        let schedule = schedule(0, 5.0, 0.0);
        let mut calls = 0;
        let (outcome, report) = run_with_retry(&schedule, "p", |_| {
            calls += 1;
            Err::<(), _>(failure())
        });
        assert!(matches!(outcome, Err(RetryError::Exhausted { .. })));
        assert_eq!(calls, 1);
        assert!(report.delays.is_empty());
    }

    #[test]
    fn success_mid_way_stops_the_loop() {
        let schedule = schedule(5, 0.0, 0.0);
        let mut calls = 0;
        let (outcome, report) = run_with_retry(&schedule, "p", |attempt| {
            calls += 1;
            if attempt < 2 {
                Err(failure())
            } else {
                Ok(attempt)
            }
        });
        assert!(matches!(outcome, Ok(2)));
        assert_eq!(calls, 3);
        assert_eq!(report.attempts, 3);
    }

    #[test]
    fn non_matching_class_is_not_retried() {
        let policy = RetryPolicy {
            max_retries: Some(5),
            retry_delay: Some(0.0),
            jitter_factor: Some(0.0),
            retry_exceptions: Some(vec![FailureClass::Timeout]),
        };
        let schedule = RetrySchedule::from_policy(&policy);
        let mut calls = 0;
        let (outcome, _) = run_with_retry(&schedule, "p", |_| {
            calls += 1;
            Err::<(), _>(failure())
        });
        assert!(matches!(
            outcome,
            Err(RetryError::Exhausted { attempts: 1, .. })
        ));
        assert_eq!(calls, 1);
    }

    #[test]
    fn empty_class_list_disables_retry() {
        let policy = RetryPolicy {
            max_retries: Some(5),
            retry_delay: Some(0.0),
            jitter_factor: Some(0.0),
            retry_exceptions: Some(Vec::new()),
        };
        let schedule = RetrySchedule::from_policy(&policy);
        let (outcome, _) = run_with_retry(&schedule, "p", |_| Err::<(), _>(failure()));
        assert!(matches!(
            outcome,
            Err(RetryError::Exhausted { attempts: 1, .. })
        ));
    }

    #[test]
    fn truncate_cause_caps_long_messages() {
        let long = EngineError::new(FailureClass::NodeFailure, "x".repeat(1000));
        let excerpt = truncate_cause(&long);
        assert!(excerpt.ends_with("..."));
        assert!(excerpt.chars().count() <= constants::MAX_LOGGED_CAUSE_CHARS + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn async_loop_matches_the_sync_attempt_count() {
        let schedule = schedule(2, 10.0, 0.0);
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let token = CancellationToken::new();
        let calls_in = std::sync::Arc::clone(&calls);
        let (outcome, report) = run_with_retry_async(&schedule, "p", &token, move |_| {
            let calls = std::sync::Arc::clone(&calls_in);
            Box::pin(async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err::<(), _>(EngineError::new(FailureClass::NodeFailure, "boom"))
            })
        })
        .await;
        assert!(matches!(
            outcome,
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(report.delays, vec![Duration::from_secs(10); 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_pending_delay() {
        let schedule = schedule(5, 3600.0, 0.0);
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let (outcome, _) = run_with_retry_async(&schedule, "p", &loop_token, |_| {
                Box::pin(async {
                    Err::<(), _>(EngineError::new(FailureClass::NodeFailure, "boom"))
                })
            })
            .await;
            matches!(outcome, Err(RetryError::Cancelled))
        });
        // Let the first attempt fail and the hour-long delay begin.
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn async_success_dispatches_no_delay() {
        let schedule = schedule(3, 5.0, 0.0);
        let token = CancellationToken::new();
        let (outcome, report) = run_with_retry_async(&schedule, "p", &token, |_| {
            Box::pin(async { Ok::<_, EngineError>(7) })
        })
        .await;
        assert!(matches!(outcome, Ok(7)));
        assert_eq!(report.attempts, 1);
        assert!(report.delays.is_empty());
    }
}
