use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::watch;

use crate::engine::{PromiseId, TaskContext};
use crate::error::{ContractViolation, PromiseError};

type Slot<T> = Option<Result<T, PromiseError>>;

/// Storage shared by both halves of a promise.
///
/// The slot is only ever written while the session state lock is held, which
/// keeps "is this promise still pending" in the scheduler state consistent
/// with what the slot contains.
pub(crate) struct Cell<T> {
    pub(crate) id: PromiseId,
    pub(crate) name: Arc<str>,
    tx: watch::Sender<Slot<T>>,
}

impl<T> Cell<T>
where
    T: Clone,
{
    pub(crate) fn new(id: PromiseId, name: Arc<str>) -> Self {
        let (tx, _) = watch::channel(None);
        Self { id, name, tx }
    }

    pub(crate) fn get(&self) -> Slot<T> {
        self.tx.borrow().clone()
    }

    pub(crate) fn set(&self, result: Result<T, PromiseError>) {
        self.tx.send_replace(Some(result));
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Slot<T>> {
        self.tx.subscribe()
    }
}

/// Type-erased view the scheduler keeps of every pending promise, so it can
/// fail promises of any value type on cycles and cancellation.
pub(crate) trait Settle: Send + Sync {
    fn fail(&self, err: PromiseError);
}

impl<T> Settle for Cell<T>
where
    T: Clone + Send + Sync,
{
    fn fail(&self, err: PromiseError) {
        self.set(Err(err));
    }
}

/// The awaiting half of a promise. Cheap to clone; every clone observes the
/// same eventual result.
pub struct Promise<T> {
    pub(crate) cell: Arc<Cell<T>>,
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> PromiseId {
        self.cell.id
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Returns the result if the promise has already settled.
    pub fn peek(&self) -> Option<Result<T, PromiseError>> {
        self.cell.get()
    }

    /// Suspends the calling task until the promise settles.
    ///
    /// Fails with [`PromiseError::SelfDependent`] instead of suspending when
    /// the wait would close an await cycle, and with
    /// [`PromiseError::Cancelled`] when the session has been cancelled.
    /// Results of promises that settled before cancellation stay readable.
    pub async fn wait(&self, ctx: &TaskContext) -> Result<T, PromiseError> {
        ctx.session.await_promise(ctx.task, &self.cell).await
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .finish()
    }
}

/// The producing half of a promise. Only the task currently responsible for
/// the promise may settle it, and only once.
pub struct PromiseResolver<T> {
    pub(crate) cell: Arc<Cell<T>>,
}

impl<T> PromiseResolver<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> PromiseId {
        self.cell.id
    }

    pub fn resolve(&self, ctx: &TaskContext, value: T) -> Result<(), ContractViolation> {
        ctx.session.settle(ctx.task, &self.cell, Ok(value))
    }

    pub fn fail(&self, ctx: &TaskContext, err: PromiseError) -> Result<(), ContractViolation> {
        ctx.session.settle(ctx.task, &self.cell, Err(err))
    }
}

impl<T> Debug for PromiseResolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseResolver")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .finish()
    }
}
