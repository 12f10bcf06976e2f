use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use crate::engine::{Promise, TaskContext};
use crate::error::PromiseError;

/// A computation that runs at most once per session.
///
/// The first caller of [`Once::get_or_run`] spawns the body as its own task;
/// every caller, including the first, then awaits that task's promise. Since
/// the awaiting goes through the scheduler, a body that ends up needing its
/// own result fails with [`PromiseError::SelfDependent`] instead of hanging.
pub struct Once<T> {
    promise: Mutex<Option<Promise<T>>>,
}

impl<T> Once<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            promise: Mutex::new(None),
        }
    }

    pub async fn get_or_run<F, Fut>(
        &self,
        ctx: &TaskContext,
        name: impl Into<Arc<str>>,
        body: F,
    ) -> Result<T, PromiseError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let promise = {
            let mut slot = self.promise.lock().unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert_with(|| ctx.spawn(name, body)).clone()
        };

        promise.wait(ctx).await
    }

    /// The result, if the computation has already finished.
    pub fn peek(&self) -> Option<Result<T, PromiseError>> {
        self.promise
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Promise::peek)
    }

    pub fn is_started(&self) -> bool {
        self.promise
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<T> Default for Once<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A keyed family of [`Once`] cells.
pub struct Memo<K, T> {
    entries: Mutex<HashMap<K, Arc<Once<T>>>>,
}

impl<K, T> Memo<K, T>
where
    K: Eq + Hash,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cell for `key`, creating an unstarted one if needed.
    pub fn entry(&self, key: K) -> Arc<Once<T>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key).or_default())
    }

    pub fn get(&self, key: &K) -> Option<Arc<Once<T>>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, T> Default for Memo<K, T>
where
    K: Eq + Hash,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::engine::Session;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_once_runs_body_once() {
        let session = Session::new();
        let once = Arc::new(Once::<usize>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let results = session
            .main_task(|ctx| async move {
                let callers: Vec<_> = (0..8)
                    .map(|i| {
                        let once = once.clone();
                        let runs = runs.clone();
                        ctx.spawn(format!("caller-{i}"), move |ctx| async move {
                            once.get_or_run(&ctx, "shared", move |_| async move {
                                runs.fetch_add(1, Ordering::SeqCst) + 10
                            })
                            .await
                        })
                    })
                    .collect();

                let mut results = Vec::new();
                for caller in callers {
                    results.push(caller.wait(&ctx).await.unwrap());
                }
                assert_eq!(runs.load(Ordering::SeqCst), 1);
                results
            })
            .await
            .unwrap();

        assert!(results.iter().all(|result| *result == Ok(10)));
    }

    #[tokio::test]
    async fn test_once_self_dependent() {
        let session = Session::new();
        let once = Arc::new(Once::<i32>::new());

        let result = session
            .main_task(|ctx| async move {
                let inner = once.clone();
                once.get_or_run(&ctx, "loop", move |ctx| async move {
                    inner
                        .get_or_run(&ctx, "loop", |_| async { 0 })
                        .await
                        .unwrap_or(-1)
                })
                .await
            })
            .await
            .unwrap();

        assert!(matches!(result, Err(PromiseError::SelfDependent { .. })));
    }

    #[tokio::test]
    async fn test_memo_entries() {
        let memo = Memo::<&str, i32>::new();

        let a = memo.entry("a");
        assert!(Arc::ptr_eq(&a, &memo.entry("a")));
        assert!(!a.is_started());
        assert!(memo.get(&"b").is_none());
        assert_eq!(memo.len(), 1);
    }
}
