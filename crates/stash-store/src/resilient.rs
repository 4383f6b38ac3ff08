//! Retrying, rate-bounded wrapper around any [`ObjectStore`].
//!
//! Every call gets its own deadline, holds one permit of a store-wide
//! semaphore while in flight, and is retried with backoff when it fails
//! transiently. Once the retry budget is spent the last transient error is
//! wrapped in [`StoreError::Exhausted`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::object::{ListPage, ObjectStore, StoredObject, WriteCondition};
use crate::retry::{RetryOutcome, RetryPolicy, retry};

/// Tuning for [`ResilientStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceConfig {
    /// Backoff policy for transient failures.
    pub retry: RetryPolicy,
    /// Deadline applied to each individual store call.
    pub call_timeout: Duration,
    /// Maximum number of concurrent in-flight store calls.
    pub max_in_flight: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(10),
            max_in_flight: 32,
        }
    }
}

/// Object store decorator adding timeouts, retries and a concurrency cap.
#[derive(Debug)]
pub struct ResilientStore<S> {
    inner: S,
    config: ResilienceConfig,
    permits: Arc<Semaphore>,
}

impl<S: ObjectStore> ResilientStore<S> {
    /// Wrap `inner` with the given tuning.
    #[must_use]
    pub fn new(inner: S, config: ResilienceConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            inner,
            config,
            permits,
        }
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// The active tuning.
    #[must_use]
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    async fn run<T, F, Fut>(&self, op: &'static str, key: &str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let permits = &self.permits;
        let deadline = self.config.call_timeout;
        let outcome = retry(
            &self.config.retry,
            |_| {
                let fut = call();
                async move {
                    let _permit = permits
                        .acquire()
                        .await
                        .map_err(|e| StoreError::Internal(e.to_string()))?;
                    match tokio::time::timeout(deadline, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(StoreError::Timeout(deadline)),
                    }
                }
            },
            StoreError::is_transient,
        )
        .await;

        match outcome {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Failed {
                error,
                attempts,
                retryable: true,
            } => {
                warn!(op, key, attempts, error = %error, "store retry budget exhausted");
                Err(StoreError::Exhausted {
                    attempts,
                    last: Box::new(error),
                })
            },
            RetryOutcome::Failed { error, .. } => Err(error),
        }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for ResilientStore<S> {
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let inner = &self.inner;
        self.run("put", key, move || inner.put(key, value.clone()))
            .await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        let inner = &self.inner;
        self.run("get", key, move || inner.get(key)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let inner = &self.inner;
        self.run("delete", key, move || inner.delete(key)).await
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<ListPage> {
        let inner = &self.inner;
        self.run("list", prefix, move || {
            inner.list_page(prefix, start_after, limit)
        })
        .await
    }

    fn supports_conditional_writes(&self) -> bool {
        self.inner.supports_conditional_writes()
    }

    async fn put_if(
        &self,
        key: &str,
        value: Vec<u8>,
        condition: WriteCondition,
    ) -> StoreResult<()> {
        let inner = &self.inner;
        self.run("put_if", key, move || {
            inner.put_if(key, value.clone(), condition.clone())
        })
        .await
    }

    async fn delete_if(&self, key: &str, etag: &str) -> StoreResult<bool> {
        let inner = &self.inner;
        self.run("delete_if", key, move || inner.delete_if(key, etag))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use super::*;
    use crate::memory::MemoryObjectStore;

    /// Fails the first `failures` calls with `Throttled`, then delegates.
    struct Stutter {
        inner: MemoryObjectStore,
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl Stutter {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryObjectStore::new(),
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }

        fn trip(&self) -> StoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left.saturating_sub(1), Ordering::SeqCst);
                return Err(StoreError::Throttled("slow down".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ObjectStore for Stutter {
        async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
            self.trip()?;
            self.inner.put(key, value).await
        }

        async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
            self.trip()?;
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> StoreResult<bool> {
            self.trip()?;
            self.inner.delete(key).await
        }

        async fn list_page(
            &self,
            prefix: &str,
            start_after: Option<&str>,
            limit: usize,
        ) -> StoreResult<ListPage> {
            self.trip()?;
            self.inner.list_page(prefix, start_after, limit).await
        }
    }

    /// Never answers.
    struct Hang;

    #[async_trait]
    impl ObjectStore for Hang {
        async fn put(&self, _key: &str, _value: Vec<u8>) -> StoreResult<()> {
            std::future::pending().await
        }

        async fn get(&self, _key: &str) -> StoreResult<Option<StoredObject>> {
            std::future::pending().await
        }

        async fn delete(&self, _key: &str) -> StoreResult<bool> {
            std::future::pending().await
        }

        async fn list_page(
            &self,
            _prefix: &str,
            _start_after: Option<&str>,
            _limit: usize,
        ) -> StoreResult<ListPage> {
            std::future::pending().await
        }
    }

    fn config(max_attempts: u32) -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryPolicy::new(
                max_attempts,
                Duration::from_millis(5),
                Duration::from_millis(20),
            ),
            call_timeout: Duration::from_millis(100),
            max_in_flight: 4,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let store = ResilientStore::new(Stutter::new(2), config(5));
        store.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.get("k").await.unwrap().unwrap().data, b"v".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_yields_exhausted() {
        let store = ResilientStore::new(Stutter::new(10), config(3));
        let err = store.get("k").await.unwrap_err();
        match err {
            StoreError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, StoreError::Throttled(_)));
            },
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out() {
        let store = ResilientStore::new(Hang, config(2));
        let err = store.get("k").await.unwrap_err();
        match err {
            StoreError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, StoreError::Timeout(_)));
            },
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let store = ResilientStore::new(MemoryObjectStore::new(), config(5));
        let err = store.put("", vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_conflict_passes_through() {
        let store = ResilientStore::new(MemoryObjectStore::new(), config(5));
        assert!(store.supports_conditional_writes());
        store
            .put_if("k", vec![1], WriteCondition::IfAbsent)
            .await
            .unwrap();
        let err = store
            .put_if("k", vec![2], WriteCondition::IfAbsent)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    /// Records the peak number of concurrent calls.
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for Gauge {
        async fn put(&self, _key: &str, _value: Vec<u8>) -> StoreResult<()> {
            Ok(())
        }

        async fn get(&self, _key: &str) -> StoreResult<Option<StoredObject>> {
            let now = self.current.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn delete(&self, _key: &str) -> StoreResult<bool> {
            Ok(false)
        }

        async fn list_page(
            &self,
            _prefix: &str,
            _start_after: Option<&str>,
            _limit: usize,
        ) -> StoreResult<ListPage> {
            Ok(ListPage::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_calls_are_capped() {
        let gauge = Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let mut cfg = config(1);
        cfg.max_in_flight = 2;
        let store = ResilientStore::new(gauge, cfg);

        let calls = (0..8).map(|i| {
            let store = &store;
            async move { store.get(&format!("k{i}")).await }
        });
        for result in futures::future::join_all(calls).await {
            assert!(result.unwrap().is_none());
        }
        assert!(store.inner().peak.load(Ordering::SeqCst) <= 2);
    }
}
