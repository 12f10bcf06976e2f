#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod addrs;
pub mod config;
pub mod diagnostics;
pub mod engine;
mod error;
pub mod expr;
mod functions;
pub mod graph;
pub mod stack;
#[cfg(feature = "logging")]
pub mod utils;
mod value;

pub use crate::addrs::{AbsAddr, Item, ProviderAddr, StackAddr};
pub use crate::config::{
    ComponentDecl, LocalDecl, OutputDecl, ProviderDecl, StackCallDecl, StackConfig, VariableDecl,
};
pub use crate::diagnostics::{Diagnostic, Diagnostics, DiagnosticsError, Severity, SourcePos, SourceRange};
pub use crate::engine::{Promise, PromiseResolver, Session, TaskContext};
pub use crate::error::*;
pub use crate::expr::{BinaryOp, EvalError, Expr, Reference, UnaryOp};
pub use crate::graph::DependencyGraph;
pub use crate::stack::{
    EvaluatorOptions, Evaluated, Execution, Main, Node, NodeKey, Phase, ProviderClient,
    ProviderFactory, Stack,
};
pub use crate::value::{TypeConstraint, Value};
