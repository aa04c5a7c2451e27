use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::types::Stage;
use crate::{Error, Result};

pub(crate) type AttemptFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Bounded retry for one protocol stage.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub stage: Stage,
    pub max_attempts: u8,
    /// Handed to every attempt as its wait bound.
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attempt {
    /// 1-based.
    pub number: u8,
    pub timeout: Duration,
}

/// Everything except a negative device reply is worth another attempt.
pub(crate) fn retry_unless_protocol(err: &Error) -> bool {
    !matches!(err, Error::Protocol(_))
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up (`Error::RetriesExhausted`). Every attempt
/// gets its own clone of `arg`.
pub(crate) async fn with_retries<C, A, T, F, P>(
    ctx: &mut C,
    policy: RetryPolicy,
    arg: A,
    attempt: F,
    retryable: P,
) -> Result<T>
where
    C: Send,
    A: Clone,
    F: for<'a> Fn(&'a mut C, Attempt, A) -> AttemptFuture<'a, T>,
    P: Fn(&Error) -> bool,
{
    for number in 1..=policy.max_attempts {
        let current = Attempt {
            number,
            timeout: policy.timeout,
        };
        match attempt(ctx, current, arg.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if retryable(&e) => {
                debug!(stage = %policy.stage, attempt = number, "attempt failed: {e}");
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::RetriesExhausted {
        stage: policy.stage,
        attempts: policy.max_attempts,
    })
}
