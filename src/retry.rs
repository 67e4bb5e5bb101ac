//! Bounded retry with exponential backoff.

use crate::config::RetryPolicy;
use crate::error::{RelayError, Result};
use std::thread;

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up.
///
/// Exhaustion is reported as [`RelayError::RetriesExhausted`] wrapping the
/// last error. Non-transient errors are returned as they are.
pub fn retry<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    retry_with_sleep(policy, what, &mut op, thread::sleep)
}

fn retry_with_sleep<T, F, S>(policy: &RetryPolicy, what: &str, op: &mut F, mut sleep: S) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
    S: FnMut(std::time::Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(what, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                tracing::error!(what, attempts = attempt, error = %e, "giving up");
                return Err(RelayError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                sleep(backoff);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut sleeps = Vec::new();
        let result = retry_with_sleep(
            &policy(5),
            "connect",
            &mut |attempt| {
                if attempt < 3 {
                    Err(RelayError::Transport("refused".into()))
                } else {
                    Ok(attempt)
                }
            },
            |d| sleeps.push(d),
        );

        assert_eq!(result.unwrap(), 3);
        assert_eq!(sleeps, vec![Duration::from_millis(10), Duration::from_millis(20)]);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = retry_with_sleep(
            &policy(4),
            "connect",
            &mut |_| {
                calls += 1;
                Err(RelayError::Disconnected)
            },
            |_| {},
        );

        assert_eq!(calls, 4);
        match result {
            Err(RelayError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, RelayError::Disconnected));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let mut calls = 0;
        let result: Result<()> = retry(&policy(5), "encode", |_| {
            calls += 1;
            Err(RelayError::Encode("buffer".into()))
        });

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(RelayError::Encode(_))));
    }
}
