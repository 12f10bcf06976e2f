use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::Instrument;

use crate::engine::promise::{Cell, Settle};
use crate::engine::{Promise, PromiseId, PromiseResolver, TaskId};
use crate::error::{ContractViolation, PromiseError, SessionError};

tokio::task_local! {
    static CURRENT_TASK: TaskId;
}

struct TaskState {
    name: Arc<str>,
    /// The single promise this task is currently suspended on, if any.
    awaiting: Option<PromiseId>,
    responsible_for: HashSet<PromiseId>,
}

struct PendingPromise {
    name: Arc<str>,
    responsible: TaskId,
    slot: Arc<dyn Settle>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    tasks: HashMap<TaskId, TaskState>,
    pending: HashMap<PromiseId, PendingPromise>,
    /// Promises the scheduler failed on behalf of their owner, either because
    /// they were part of an await cycle or because the session was cancelled,
    /// mapped to that owner. A late settlement by the owner is dropped instead
    /// of being reported as a double resolution. Entries go away with the
    /// late settlement or when the owner finishes.
    failed_early: HashMap<PromiseId, TaskId>,
    cancelled: bool,
    fatal: Option<ContractViolation>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn add_task(&mut self, name: Arc<str>) -> TaskId {
        let id = TaskId(self.next_id());
        self.tasks.insert(
            id,
            TaskState {
                name,
                awaiting: None,
                responsible_for: HashSet::new(),
            },
        );
        id
    }

    fn take_pending(&mut self, id: PromiseId) -> Option<PendingPromise> {
        let promise = self.pending.remove(&id)?;
        if let Some(task) = self.tasks.get_mut(&promise.responsible) {
            task.responsible_for.remove(&id);
        }
        Some(promise)
    }

    fn fail_early(&mut self, id: PromiseId, err: PromiseError) {
        if let Some(promise) = self.take_pending(id) {
            self.failed_early.insert(id, promise.responsible);
            promise.slot.fail(err);
        }
    }

    fn transfer(&mut self, id: PromiseId, from: TaskId, to: TaskId) {
        if let Some(promise) = self.pending.get_mut(&id) {
            promise.responsible = to;
        }
        if let Some(task) = self.tasks.get_mut(&from) {
            task.responsible_for.remove(&id);
        }
        if let Some(task) = self.tasks.get_mut(&to) {
            task.responsible_for.insert(id);
        }
    }

    /// Follows the wait chain starting at `start`: the task responsible for
    /// it, the promise that task awaits, and so on. Returns the promises on
    /// the chain if it leads back to `current`.
    fn find_cycle(&self, current: TaskId, start: PromiseId) -> Option<Vec<PromiseId>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = start;

        loop {
            let promise = self.pending.get(&next)?;
            if !seen.insert(next) {
                return None;
            }
            chain.push(next);

            if promise.responsible == current {
                return Some(chain);
            }

            next = self.tasks.get(&promise.responsible)?.awaiting?;
        }
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        let pending: Vec<PromiseId> = self.pending.keys().copied().collect();
        for id in pending {
            self.fail_early(id, PromiseError::Cancelled);
        }
    }
}

/// One evaluation session: the scheduler state shared by every task and
/// promise created through it.
///
/// Sessions are cheap to clone. All clones refer to the same state.
#[derive(Clone, Default)]
pub struct Session {
    state: Arc<Mutex<State>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `body` as the root task of the session and waits for it.
    ///
    /// This is the only entry point from ordinary async code into the
    /// scheduler. Calling it from inside a scheduler task is rejected, since
    /// the nested root would be invisible to the outer task's wait chain.
    pub async fn main_task<F, Fut, T>(&self, body: F) -> Result<T, SessionError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = T>,
    {
        if CURRENT_TASK.try_with(|_| ()).is_ok() {
            return Err(SessionError::NestedMainTask);
        }

        let task = {
            let mut state = self.lock();
            if state.cancelled {
                return Err(SessionError::Cancelled);
            }
            state.add_task("main".into())
        };

        let guard = TaskGuard {
            session: self.clone(),
            task,
        };
        let ctx = TaskContext {
            session: self.clone(),
            task,
        };
        let output = CURRENT_TASK
            .scope(task, body(ctx))
            .instrument(tracing::debug_span!("main_task", id = %task))
            .await;
        drop(guard);

        match self.fatal_error() {
            Some(violation) => Err(SessionError::Internal(violation)),
            None => Ok(output),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Fails every pending promise with [`PromiseError::Cancelled`]. Tasks
    /// keep running until they observe the cancellation; every wait they
    /// start from now on fails immediately.
    pub fn cancel(&self) {
        let mut state = self.lock();
        if !state.cancelled {
            tracing::info!(pending = state.pending.len(), "cancelling evaluation session");
        }
        state.cancel();
    }

    /// Records a scheduler contract violation and cancels the session. The
    /// enclosing [`Session::main_task`] reports the first violation recorded.
    pub fn abort(&self, violation: ContractViolation) {
        tracing::error!(%violation, "aborting evaluation session");
        let mut state = self.lock();
        state.fatal.get_or_insert(violation);
        state.cancel();
    }

    pub fn fatal_error(&self) -> Option<ContractViolation> {
        self.lock().fatal.clone()
    }

    fn finish_task(&self, task: TaskId) {
        let mut state = self.lock();
        let Some(entry) = state.tasks.remove(&task) else {
            return;
        };
        state.failed_early.retain(|_, owner| *owner != task);

        for id in entry.responsible_for {
            if let Some(promise) = state.pending.remove(&id) {
                tracing::warn!(
                    promise = %promise.name,
                    task = %entry.name,
                    "task finished without settling a promise it was responsible for"
                );
                promise.slot.fail(PromiseError::Unresolved(promise.name.clone()));
            }
        }
    }

    pub(crate) fn settle<T>(
        &self,
        task: TaskId,
        cell: &Cell<T>,
        result: Result<T, PromiseError>,
    ) -> Result<(), ContractViolation>
    where
        T: Clone,
    {
        let mut state = self.lock();
        let responsible = state.pending.get(&cell.id).map(|p| p.responsible);

        match responsible {
            Some(owner) if owner == task => {
                state.take_pending(cell.id);
                cell.set(result);
                Ok(())
            }
            Some(_) => Err(ContractViolation::NotResponsible {
                task,
                promise: cell.name.clone(),
            }),
            None if state.cancelled || state.failed_early.contains_key(&cell.id) => {
                state.failed_early.remove(&cell.id);
                tracing::debug!(promise = %cell.name, "dropping late settlement");
                Ok(())
            }
            None => Err(ContractViolation::AlreadyResolved(cell.name.clone())),
        }
    }

    pub(crate) async fn await_promise<T>(
        &self,
        task: TaskId,
        cell: &Arc<Cell<T>>,
    ) -> Result<T, PromiseError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut rx = {
            let mut state = self.lock();

            if let Some(result) = cell.get() {
                return result;
            }
            if state.cancelled {
                return Err(PromiseError::Cancelled);
            }

            if let Some(chain) = state.find_cycle(task, cell.id) {
                let names = chain
                    .iter()
                    .filter_map(|id| state.pending.get(id).map(|p| p.name.clone()))
                    .collect();
                let err = PromiseError::SelfDependent { chain: names };
                tracing::warn!(%err, "await cycle detected");

                for id in chain {
                    state.fail_early(id, err.clone());
                }
                return Err(err);
            }

            if let Some(entry) = state.tasks.get_mut(&task) {
                entry.awaiting = Some(cell.id);
            }
            cell.subscribe()
        };
        let _edge = AwaitEdge {
            session: self,
            task,
            promise: cell.id,
        };

        match rx.wait_for(Option::is_some).await {
            Ok(settled) => (*settled).clone().unwrap_or(Err(PromiseError::Cancelled)),
            Err(_) => Err(PromiseError::Cancelled),
        }
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Session")
            .field("tasks", &state.tasks.len())
            .field("pending", &state.pending.len())
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

/// Removes a task's await edge when its wait ends, including when the waiting
/// future is dropped before the promise settles.
struct AwaitEdge<'a> {
    session: &'a Session,
    task: TaskId,
    promise: PromiseId,
}

impl Drop for AwaitEdge<'_> {
    fn drop(&mut self) {
        let mut state = self.session.lock();
        if let Some(entry) = state.tasks.get_mut(&self.task)
            && entry.awaiting == Some(self.promise)
        {
            entry.awaiting = None;
        }
    }
}

/// Fails whatever its task still owns once the task ends, whether it returned
/// normally, panicked, or was dropped by the runtime.
struct TaskGuard {
    session: Session,
    task: TaskId,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.session.finish_task(self.task);
    }
}

/// Handle given to every task body. It identifies the running task to the
/// scheduler, so promises created and settled through it are attributed to
/// the right owner.
#[derive(Clone)]
pub struct TaskContext {
    pub(crate) session: Session,
    pub(crate) task: TaskId,
}

impl TaskContext {
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    /// Creates a promise owned by the current task.
    pub fn new_promise<T>(&self, name: impl Into<Arc<str>>) -> (PromiseResolver<T>, Promise<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut state = self.session.lock();
        let id = PromiseId(state.next_id());
        let cell = Arc::new(Cell::new(id, name.into()));

        if state.cancelled {
            state.failed_early.insert(id, self.task);
            cell.set(Err(PromiseError::Cancelled));
        } else {
            state.pending.insert(
                id,
                PendingPromise {
                    name: cell.name.clone(),
                    responsible: self.task,
                    slot: cell.clone(),
                },
            );
            if let Some(entry) = state.tasks.get_mut(&self.task) {
                entry.responsible_for.insert(id);
            }
        }

        (
            PromiseResolver {
                cell: Arc::clone(&cell),
            },
            Promise { cell },
        )
    }

    /// Starts `body` as a new task and returns a promise for its output.
    pub fn spawn<T, F, Fut>(&self, name: impl Into<Arc<str>>, body: F) -> Promise<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let name = name.into();
        let (resolver, promise) = self.new_promise(name.clone());

        self.spawn_resolving(name, resolver, |ctx, resolver| async move {
            let value = body(ctx.clone()).await;
            if let Err(violation) = resolver.resolve(&ctx, value) {
                ctx.session.abort(violation);
            }
        });

        promise
    }

    /// Starts `body` as a new task and hands it responsibility for the
    /// promise behind `resolver`, which the current task must own.
    pub fn spawn_resolving<T, F, Fut>(
        &self,
        name: impl Into<Arc<str>>,
        resolver: PromiseResolver<T>,
        body: F,
    ) where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(TaskContext, PromiseResolver<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let promise = resolver.cell.id;

        let started = {
            let mut state = self.session.lock();
            let responsible = state.pending.get(&promise).map(|p| p.responsible);

            match responsible {
                _ if state.cancelled => None,
                Some(owner) if owner == self.task => {
                    let task = state.add_task(name.clone());
                    state.transfer(promise, self.task, task);
                    Some(Ok(task))
                }
                Some(_) => Some(Err(ContractViolation::NotResponsible {
                    task: self.task,
                    promise: resolver.cell.name.clone(),
                })),
                None if state.failed_early.contains_key(&promise) => None,
                None => Some(Err(ContractViolation::AlreadyResolved(
                    resolver.cell.name.clone(),
                ))),
            }
        };

        let task = match started {
            Some(Ok(task)) => task,
            Some(Err(violation)) => return self.session.abort(violation),
            None => return,
        };

        let ctx = TaskContext {
            session: self.session.clone(),
            task,
        };
        let span = tracing::debug_span!("task", name = %name, id = %task);

        tokio::spawn(
            CURRENT_TASK
                .scope(task, async move {
                    let _guard = TaskGuard {
                        session: ctx.session.clone(),
                        task,
                    };
                    body(ctx, resolver).await;
                })
                .instrument(span),
        );
    }
}

impl Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task)
            .finish()
    }
}
