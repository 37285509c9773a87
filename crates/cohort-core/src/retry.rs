//! Retry driver for the stale-sequence condition.
//!
//! The authority enforces strict monotonic sequencing: when two clients race
//! for the same next sequence number, the loser's post is rejected as stale.
//! That one condition is safe to retry once the attempt rebuilds its section
//! against the advanced chain. Everything that must be fresh per attempt
//! (sequence number, anchor, snapshot) belongs inside the attempt closure,
//! never hoisted outside it.

use std::future::Future;

use tracing::debug;

use crate::error::TeamError;

/// Run `post` until it succeeds or fails with anything other than
/// [`TeamError::StaleSequence`], up to `max_attempts` attempts numbered
/// from 0.
///
/// The last error is returned verbatim after the bound is exhausted. A bound
/// of zero (or a closure that somehow retries without ever erroring) is a
/// contract violation reported as [`TeamError::RetryLogic`].
pub async fn retry_on_stale_sequence<F, Fut>(
    max_attempts: u32,
    mut post: F,
) -> Result<(), TeamError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), TeamError>>,
{
    let mut last_err = None;
    for attempt in 0..max_attempts {
        debug!(attempt, "posting team operation");
        match post(attempt).await {
            Err(err) if err.is_retryable() => {
                debug!(attempt, %err, "chain advanced concurrently, retrying");
                last_err = Some(err);
            }
            other => return other,
        }
    }
    debug!(max_attempts, "retry attempts exhausted");
    last_err.map_or(Err(TeamError::RetryLogic), Err)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::retry_on_stale_sequence;
    use crate::error::TeamError;

    #[tokio::test]
    async fn success_on_first_attempt_does_not_retry() {
        let calls = AtomicU32::new(0);
        retry_on_stale_sequence(3, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(attempt, 0);
            async { Ok(()) }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_sequence_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        retry_on_stale_sequence(3, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(TeamError::StaleSequence { seqno: 10 + u64::from(attempt) })
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry_on_stale_sequence(3, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TeamError::AdminRequired) }
        })
        .await
        .unwrap_err();

        assert_eq!(err, TeamError::AdminRequired);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_error_verbatim() {
        let calls = AtomicU32::new(0);
        let err = retry_on_stale_sequence(3, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(TeamError::StaleSequence { seqno: 100 + u64::from(attempt) }) }
        })
        .await
        .unwrap_err();

        assert_eq!(err, TeamError::StaleSequence { seqno: 102 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_is_a_contract_violation() {
        let err = retry_on_stale_sequence(0, |_| async { Ok(()) }).await.unwrap_err();
        assert_eq!(err, TeamError::RetryLogic);
    }
}
