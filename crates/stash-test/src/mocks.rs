//! Object store doubles for exercising failure and consistency paths.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stash_store::{ListPage, ObjectStore, StoreError, StoreResult, StoredObject, WriteCondition};
use tracing::debug;

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Store call kinds a fault can target. Conditional writes count as their
/// plain counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `put` and `put_if`.
    Put,
    /// `get`.
    Get,
    /// `delete` and `delete_if`.
    Delete,
    /// `list_page`.
    List,
}

/// A failure injected by [`FaultyStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fails with [`StoreError::Unavailable`].
    Unavailable,
    /// Fails with [`StoreError::Throttled`].
    Throttled,
    /// Fails with [`StoreError::AccessDenied`].
    AccessDenied,
    /// Sleeps before forwarding the call, to trip call timeouts.
    Hang(Duration),
}

impl Fault {
    fn into_error(self, op: StoreOp) -> Option<StoreError> {
        let what = format!("injected {op:?} fault");
        match self {
            Self::Unavailable => Some(StoreError::Unavailable(what)),
            Self::Throttled => Some(StoreError::Throttled(what)),
            Self::AccessDenied => Some(StoreError::AccessDenied(what)),
            Self::Hang(_) => None,
        }
    }
}

/// Wraps a store and fails selected calls on demand.
///
/// Queued faults are consumed one per call; a sticky fault applies to every
/// call of its kind until [`heal`](Self::heal).
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    queued: Mutex<HashMap<StoreOp, VecDeque<Fault>>>,
    sticky: Mutex<HashMap<StoreOp, Fault>>,
    calls: Mutex<HashMap<StoreOp, u32>>,
}

impl<S: ObjectStore> FaultyStore<S> {
    /// Wrap `inner` with no faults armed.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            queued: Mutex::new(HashMap::new()),
            sticky: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the next `times` calls of kind `op`.
    pub fn fail_next(&self, op: StoreOp, fault: Fault, times: usize) {
        if let Ok(mut guard) = self.queued.lock() {
            guard
                .entry(op)
                .or_default()
                .extend(std::iter::repeat_n(fault, times));
        }
    }

    /// Fail every call of kind `op` until healed.
    pub fn fail_always(&self, op: StoreOp, fault: Fault) {
        if let Ok(mut guard) = self.sticky.lock() {
            guard.insert(op, fault);
        }
    }

    /// Disarm every fault.
    pub fn heal(&self) {
        if let Ok(mut guard) = self.queued.lock() {
            guard.clear();
        }
        if let Ok(mut guard) = self.sticky.lock() {
            guard.clear();
        }
    }

    /// Number of calls of kind `op` seen so far, failed ones included.
    #[must_use]
    pub fn calls(&self, op: StoreOp) -> u32 {
        self.calls
            .lock()
            .ok()
            .and_then(|guard| guard.get(&op).copied())
            .unwrap_or(0)
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn enter(&self, op: StoreOp) -> StoreResult<()> {
        if let Ok(mut guard) = self.calls.lock() {
            let count = guard.entry(op).or_insert(0);
            *count = count.saturating_add(1);
        }
        let queued = self
            .queued
            .lock()
            .ok()
            .and_then(|mut guard| guard.get_mut(&op).and_then(VecDeque::pop_front));
        let fault = queued.or_else(|| {
            self.sticky
                .lock()
                .ok()
                .and_then(|guard| guard.get(&op).cloned())
        });
        let Some(fault) = fault else {
            return Ok(());
        };

        debug!(?op, ?fault, "injecting store fault");
        if let Fault::Hang(delay) = fault {
            tokio::time::sleep(delay).await;
        }
        match fault.into_error(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for FaultyStore<S> {
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.enter(StoreOp::Put).await?;
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        self.enter(StoreOp::Get).await?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.enter(StoreOp::Delete).await?;
        self.inner.delete(key).await
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<ListPage> {
        self.enter(StoreOp::List).await?;
        self.inner.list_page(prefix, start_after, limit).await
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
        self.enter(StoreOp::Put).await?;
        self.inner.put_if(key, value, condition).await
    }

    async fn delete_if(&self, key: &str, etag: &str) -> StoreResult<bool> {
        self.enter(StoreOp::Delete).await?;
        self.inner.delete_if(key, etag).await
    }
}

// ---------------------------------------------------------------------------
// Eventually consistent listing
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Lag {
    /// Written but not yet listed.
    unseen: BTreeSet<String>,
    /// Deleted but still listed.
    ghosts: BTreeSet<String>,
}

/// Wraps a store whose listings trail its writes.
///
/// Point reads are always current. Until [`settle`](Self::settle), keys
/// written through this wrapper are missing from listings and deleted keys
/// still show up in them.
#[derive(Debug)]
pub struct LaggyListStore<S> {
    inner: S,
    lag: Mutex<Lag>,
}

impl<S: ObjectStore> LaggyListStore<S> {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            lag: Mutex::new(Lag::default()),
        }
    }

    /// Let listings catch up with every write so far.
    pub fn settle(&self) {
        if let Ok(mut lag) = self.lag.lock() {
            lag.unseen.clear();
            lag.ghosts.clear();
        }
    }

    fn wrote(&self, key: &str) {
        if let Ok(mut lag) = self.lag.lock() {
            lag.ghosts.remove(key);
            lag.unseen.insert(key.to_owned());
        }
    }

    fn deleted(&self, key: &str) {
        if let Ok(mut lag) = self.lag.lock() {
            // A key written and deleted inside the window was never listed.
            if !lag.unseen.remove(key) {
                lag.ghosts.insert(key.to_owned());
            }
        }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for LaggyListStore<S> {
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let existed = self.inner.get(key).await?.is_some();
        self.inner.put(key, value).await?;
        if !existed {
            self.wrote(key);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let deleted = self.inner.delete(key).await?;
        if deleted {
            self.deleted(key);
        }
        Ok(deleted)
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<ListPage> {
        let mut page = self.inner.list_page(prefix, start_after, limit).await?;
        let Ok(lag) = self.lag.lock() else {
            return Ok(page);
        };
        page.keys.retain(|key| !lag.unseen.contains(key));

        let upper = if page.next.is_some() {
            page.keys.last().cloned()
        } else {
            None
        };
        let ghosts = lag.ghosts.iter().filter(|key| {
            key.starts_with(prefix)
                && start_after.is_none_or(|after| key.as_str() > after)
                && upper.as_deref().is_none_or(|upper| key.as_str() < upper)
        });
        page.keys.extend(ghosts.cloned());
        page.keys.sort();
        page.keys.dedup();
        Ok(page)
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
        let fresh = condition == WriteCondition::IfAbsent;
        self.inner.put_if(key, value, condition).await?;
        if fresh {
            self.wrote(key);
        }
        Ok(())
    }

    async fn delete_if(&self, key: &str, etag: &str) -> StoreResult<bool> {
        let deleted = self.inner.delete_if(key, etag).await?;
        if deleted {
            self.deleted(key);
        }
        Ok(deleted)
    }
}
