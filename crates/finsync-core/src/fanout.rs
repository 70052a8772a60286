//! Structured fan-out for one pipeline phase
//!
//! Every item gets its own task in a `JoinSet`. Each task is bounded by a
//! timeout and, optionally, by a shared semaphore. The phase always waits
//! for every sibling and hands back the successes and the failures
//! separately; callers decide whether failures are fatal.
//!
//! Dropping the returned future drops the `JoinSet`, which aborts every
//! in-flight task of the phase.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::error::{Error, Result};

/// Default upper bound for in-flight tasks per phase
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Successes and failures of a phase, merged after the join
#[derive(Debug)]
pub struct FanOutResult<T> {
    pub ok: Vec<T>,
    pub errors: Vec<Error>,
}

impl<T> FanOutResult<T> {
    /// Fail with the joined errors if any sibling failed
    pub fn into_result(self) -> Result<Vec<T>> {
        match Error::aggregate(self.errors) {
            Some(err) => Err(err),
            None => Ok(self.ok),
        }
    }
}

/// Task-group settings shared by every phase of a run
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    timeout: Option<Duration>,
    max_concurrency: usize,
}

impl Default for FanOut {
    fn default() -> Self {
        Self {
            timeout: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl FanOut {
    pub fn new(timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            timeout: Some(timeout),
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Same limits with a different per-task timeout
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Same concurrency bound, no per-task timeout
    pub fn without_timeout(self) -> Self {
        Self {
            timeout: None,
            ..self
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `f` for every item concurrently and join all of them.
    ///
    /// Never fails fast: a failing or panicking task is recorded and its
    /// siblings keep running. Result order is completion order.
    pub async fn run_all<I, F, Fut, T>(&self, items: I, f: F) -> FanOutResult<T>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set = JoinSet::new();

        for item in items {
            let task = f(item);
            let permits = Arc::clone(&permits);
            let timeout = self.timeout;

            set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Task(format!("semaphore closed: {}", e)))?;

                match timeout {
                    Some(limit) => tokio::time::timeout(limit, task)
                        .await
                        .map_err(|_| Error::Timeout(limit))?,
                    None => task.await,
                }
            });
        }

        let mut ok = Vec::new();
        let mut errors = Vec::new();

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(value)) => ok.push(value),
                Ok(Err(err)) => errors.push(err),
                Err(join_err) => errors.push(join_error(join_err)),
            }
        }

        FanOutResult { ok, errors }
    }

    /// Bound a single outbound call with the configured timeout
    pub async fn call<Fut, T>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => fut.await,
        }
    }
}

fn join_error(err: JoinError) -> Error {
    if err.is_panic() {
        Error::Task("task panicked".to_string())
    } else {
        Error::Task("task cancelled".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_collects_all_results() {
        let fanout = FanOut::new(Duration::from_secs(5), 4);
        let result = fanout
            .run_all(1..=5, |n| async move { Ok(n * 2) })
            .await;

        let mut ok = result.ok;
        ok.sort();
        assert_eq!(ok, vec![2, 4, 6, 8, 10]);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_siblings() {
        let fanout = FanOut::new(Duration::from_secs(5), 4);
        let finished = Arc::new(AtomicUsize::new(0));

        let result = fanout
            .run_all(0..6, |n| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    if n % 2 == 0 {
                        Err(Error::upstream(format!("item {}", n)))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(finished.load(Ordering::SeqCst), 6);
        assert_eq!(result.ok.len(), 3);
        assert_eq!(result.errors.len(), 3);

        let err = result.into_result().unwrap_err();
        assert_eq!(err.len(), 3);
        assert!(err.to_string().contains("item 0"));
        assert!(err.to_string().contains("item 4"));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let fanout = FanOut::new(Duration::from_millis(20), 4);
        let result = fanout
            .run_all(vec![0u64, 500], |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            })
            .await;

        assert_eq!(result.ok, vec![0]);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let fanout = FanOut::default();
        let result = fanout
            .run_all(0..3, |n| async move {
                if n == 1 {
                    panic!("boom");
                }
                Ok(n)
            })
            .await;

        assert_eq!(result.ok.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], Error::Task(ref m) if m.contains("panicked")));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fanout = FanOut::new(Duration::from_secs(5), 2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let result = fanout
            .run_all(0..8, |_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(result.ok.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let result = FanOut::default()
            .run_all(Vec::<u32>::new(), |n| async move { Ok(n) })
            .await;
        assert!(result.ok.is_empty());
        assert!(result.into_result().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let fanout = FanOut::new(Duration::from_millis(10), 1);
        let err = fanout
            .call(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
