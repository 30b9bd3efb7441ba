//! Per-identity lazy singleton slot.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::error::InitFailure;
use crate::registrant::{Instance, RegistrantFactory};
use crate::types::KIND_SEPARATOR;

enum State {
    Registered,
    Initialized(Instance),
    Failed(InitFailure),
}

/// A registered factory and the outcome of its one initialization.
///
/// Uses a single-flight pattern: concurrent callers of [`Record::get_or_init`]
/// run the initializer at most once and all observe the same outcome. A failed
/// initialization is terminal and is handed out again instead of retried.
pub struct Record {
    factory: RegistrantFactory,
    /// Settled outcome (sync lock for the fast path).
    state: RwLock<State>,
    /// Held for the whole initialization.
    gate: Mutex<()>,
    /// Records this record's initializer is currently resolving, one entry per
    /// pending lookup. Together they form the waits-for graph of every
    /// in-flight initialization.
    waiting_on: parking_lot::Mutex<Vec<Arc<Record>>>,
}

impl Record {
    pub fn new(factory: RegistrantFactory) -> Self {
        Self {
            factory,
            state: RwLock::new(State::Registered),
            gate: Mutex::new(()),
            waiting_on: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn factory(&self) -> &RegistrantFactory {
        &self.factory
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.state.read(), State::Initialized(_))
    }

    /// Outcome of a finished initialization, `None` while still `Registered`.
    pub fn settled(&self) -> Option<Result<Instance, InitFailure>> {
        match &*self.state.read() {
            State::Registered => None,
            State::Initialized(instance) => Some(Ok(Arc::clone(instance))),
            State::Failed(failure) => Some(Err(Arc::clone(failure))),
        }
    }

    /// `kind:identity` of this record.
    pub fn label(&self) -> String {
        format!(
            "{}{KIND_SEPARATOR}{}",
            self.factory.kind(),
            self.factory.identity()
        )
    }

    /// Note that the initializer of `this` waits on `target` until the
    /// returned guard is dropped.
    #[must_use = "the wait is forgotten as soon as the guard is dropped"]
    pub fn wait_on(this: &Arc<Self>, target: &Arc<Self>) -> Waiting {
        this.waiting_on.lock().push(Arc::clone(target));
        Waiting {
            from: Arc::clone(this),
            to: Arc::clone(target),
        }
    }

    /// Chain of in-flight waits leading from `this` to `target`, both ends
    /// included, if there is one.
    pub fn waits_for(this: &Arc<Self>, target: &Arc<Self>) -> Option<Vec<Arc<Self>>> {
        let mut visited: Vec<*const Self> = Vec::new();
        let mut pending = vec![vec![Arc::clone(this)]];
        while let Some(chain) = pending.pop() {
            let last = chain.last()?;
            if Arc::ptr_eq(last, target) {
                return Some(chain);
            }
            if visited.contains(&Arc::as_ptr(last)) {
                continue;
            }
            visited.push(Arc::as_ptr(last));
            for next in last.waiting_on.lock().iter() {
                let mut longer = chain.clone();
                longer.push(Arc::clone(next));
                pending.push(longer);
            }
        }
        None
    }

    /// Returns the cached outcome, or runs `init` exactly once to produce it.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<Instance, InitFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Instance>>,
    {
        // Fast path: already settled (sync lock, no await)
        if let Some(outcome) = self.settled() {
            return outcome;
        }

        // Slow path: acquire the gate for single-flight
        let _gate = self.gate.lock().await;

        // Re-check after acquiring the gate (another caller may have finished)
        if let Some(outcome) = self.settled() {
            return outcome;
        }

        match init().await {
            Ok(instance) => {
                *self.state.write() = State::Initialized(Arc::clone(&instance));
                Ok(instance)
            }
            Err(err) => {
                let failure: InitFailure =
                    Arc::from(Box::<dyn std::error::Error + Send + Sync>::from(err));
                *self.state.write() = State::Failed(Arc::clone(&failure));
                Err(failure)
            }
        }
    }
}

/// One edge of the waits-for graph, removed on drop.
pub struct Waiting {
    from: Arc<Record>,
    to: Arc<Record>,
}

impl Drop for Waiting {
    fn drop(&mut self) {
        let mut waiting_on = self.from.waiting_on.lock();
        if let Some(pos) = waiting_on.iter().position(|r| Arc::ptr_eq(r, &self.to)) {
            waiting_on.swap_remove(pos);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record() -> Record {
        named("counter")
    }

    fn named(identity: &str) -> Record {
        Record::new(RegistrantFactory::from_fn("resource", identity, |_ctx| async {
            Ok(0_u8)
        }))
    }

    #[tokio::test]
    async fn init_called_once_returns_same_instance() {
        let record = record();
        let calls = AtomicUsize::new(0);

        let a = record
            .get_or_init(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(1_u32) as Instance)
            })
            .await
            .unwrap();
        let b = record
            .get_or_init(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(2_u32) as Instance)
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(record.is_initialized());
    }

    #[tokio::test]
    async fn failure_is_terminal() {
        let record = record();
        let calls = AtomicUsize::new(0);

        let first = record
            .get_or_init(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("boom"))
            })
            .await
            .unwrap_err();
        let second = record
            .get_or_init(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(()) as Instance)
            })
            .await
            .unwrap_err();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.to_string(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!record.is_initialized());
    }

    #[tokio::test]
    async fn concurrent_get_or_init_runs_once() {
        let record = Arc::new(record());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let record = Arc::clone(&record);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                record
                    .get_or_init(|| async {
                        // Small delay to increase chance of concurrent access
                        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Arc::new(7_u32) as Instance)
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        for instance in &results {
            assert!(Arc::ptr_eq(instance, &results[0]));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waits_are_followed_transitively() {
        let a = Arc::new(named("a"));
        let b = Arc::new(named("b"));
        let c = Arc::new(named("c"));

        let ab = Record::wait_on(&a, &b);
        let _bc = Record::wait_on(&b, &c);

        let chain = Record::waits_for(&a, &c).unwrap();
        assert_eq!(
            chain.iter().map(|r| r.label()).collect::<Vec<_>>(),
            vec!["resource:a", "resource:b", "resource:c"]
        );
        assert!(Record::waits_for(&c, &a).is_none());

        drop(ab);
        assert!(Record::waits_for(&a, &c).is_none());
        assert!(Record::waits_for(&b, &c).is_some());
    }

    #[test]
    fn waits_tolerate_existing_loops() {
        let a = Arc::new(named("a"));
        let b = Arc::new(named("b"));
        let c = Arc::new(named("c"));

        let _ab = Record::wait_on(&a, &b);
        let _ba = Record::wait_on(&b, &a);
        assert!(Record::waits_for(&a, &c).is_none());
    }
}
