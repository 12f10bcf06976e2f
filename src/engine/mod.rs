//! Cooperative promise/task scheduler.
//!
//! A [`Session`] owns a set of tasks running on the ambient tokio runtime.
//! Tasks communicate only through single-assignment [`Promise`]s: every
//! promise has exactly one task responsible for settling it, and any number
//! of tasks may await it. Because each task awaits at most one promise at a
//! time, the "waits for" relation forms chains, and a task about to suspend
//! only has to follow the chain starting at the promise it awaits to find out
//! whether it would wait for itself. When it would, every promise on the
//! chain is failed with [`PromiseError::SelfDependent`](crate::PromiseError)
//! and no task deadlocks.
//!
//! [`Once`] and [`Memo`] build memoization on top: the first caller spawns
//! the computation, later callers attach to the same promise.

mod once;
mod promise;
mod task;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

pub use crate::engine::once::{Memo, Once};
pub use crate::engine::promise::{Promise, PromiseResolver};
pub use crate::engine::task::{Session, TaskContext};

/// A boxed, type-erased future, used where evaluation recurses through
/// references to other nodes.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(pub(crate) u64);

impl Display for PromiseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "promise#{}", self.0)
    }
}
