//! Bounded retry-with-backoff for fallible async operations.

use std::time::Duration;

use tokio::time::delay_for;

/// Base delay before the first retry.
const BASE_DELAY: Duration = Duration::from_millis(500);

/// Retries the fallible async operation `op` up to `max_retries` times,
/// doubling the delay between attempts starting from [`BASE_DELAY`].
///
/// The first attempt is not counted as a retry. Returns the first
/// successful result, or the last error if every attempt failed.
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_retries: u32,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt >= max_retries {
                    return Err(err);
                }
                let delay = BASE_DELAY * 2u32.pow(attempt);
                delay_for(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod spec {
    use std::{
        cell::Cell,
        sync::atomic::{AtomicU32, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let res: Result<u32, &str> = retry_with_backoff(2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(res, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_the_limit_then_fails() {
        let calls = Cell::new(0);
        let res: Result<u32, &str> = retry_with_backoff(2, || {
            calls.set(calls.get() + 1);
            async { Err("boom") }
        })
        .await;
        assert_eq!(res, Err("boom"));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let calls = Cell::new(0);
        let res: Result<u32, &str> = retry_with_backoff(2, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(res, Ok(2));
    }
}
