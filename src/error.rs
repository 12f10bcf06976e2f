use std::sync::Arc;

use thiserror::Error;

use crate::diagnostics::Diagnostics;
use crate::engine::TaskId;

/// Why a promise settled without a value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PromiseError {
    /// The promise was part of an await cycle. `chain` names every promise
    /// on the cycle, starting from the one being awaited when the cycle was
    /// closed.
    #[error("self-referential evaluation: {}", .chain.join(" -> "))]
    SelfDependent { chain: Vec<Arc<str>> },

    #[error("'{0}' was never resolved by the task responsible for it")]
    Unresolved(Arc<str>),

    #[error("evaluation was cancelled")]
    Cancelled,

    #[error("failed with {} diagnostic(s)", .0.len())]
    Failed(Diagnostics),
}

/// A misuse of the scheduler API. These indicate a bug in the evaluator, not
/// in the configuration being evaluated, and abort the whole session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContractViolation {
    #[error("promise '{0}' was settled more than once")]
    AlreadyResolved(Arc<str>),

    #[error("task {task} tried to settle promise '{promise}' it is not responsible for")]
    NotResponsible { task: TaskId, promise: Arc<str> },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("internal scheduler error: {0}")]
    Internal(#[from] ContractViolation),

    #[error("a main task cannot be started from inside another task")]
    NestedMainTask,

    #[error("the evaluation session was cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read configuration file.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't parse configuration.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider configuration '{0}' is declared more than once in {1}")]
    DuplicateProvider(String, String),

    #[error("Element '{0}' in {1} has an invalid name")]
    InvalidName(String, String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddrError {
    #[error("malformed address '{0}'")]
    Malformed(String),

    #[error("unknown element kind '{0}'")]
    UnknownKind(String),
}
