//! The stack evaluation graph.
//!
//! [`Main`] is the root of one evaluation session. It owns the scheduler
//! session, the configuration and the memo table, and hands out views of the
//! stacks and elements in the configuration tree. Every element view exposes
//! an async `check_*` method for a [`Phase`], returning the element's value
//! together with every diagnostic raised while computing it, including those
//! of the elements it read.
//!
//! Each (element, phase) pair is computed at most once per session. The
//! computation runs as its own scheduler task; concurrent readers share it,
//! and a reference cycle between elements surfaces as a "Self-referential
//! evaluation" diagnostic on every element of the cycle.
//!
//! ```rust,no_run
//! use camino::Utf8Path;
//! use stackeval::{AbsAddr, EvaluatorOptions, Main, Phase, StackConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = StackConfig::load(Utf8Path::new("stack.json"))?;
//! let main = Main::new(config, EvaluatorOptions::new());
//!
//! let addr: AbsAddr = "local.name".parse()?;
//! let (value, diags) = main.get_value(&addr, Phase::Inspect).await?;
//! println!("{value}");
//! for diag in diags {
//!     eprintln!("{diag}");
//! }
//! # Ok(())
//! # }
//! ```

mod component;
mod input_variable;
mod local_value;
mod output_value;
mod phase;
mod provider;
mod stack_call;

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::addrs::{AbsAddr, Item, ProviderAddr, StackAddr};
use crate::config::StackConfig;
use crate::diagnostics::{Diagnostic, Diagnostics, SourceRange};
use crate::engine::{BoxFuture, Memo, Session, TaskContext};
use crate::error::{PromiseError, SessionError};
use crate::expr::Expr;
use crate::value::Value;

pub use crate::stack::component::Component;
pub use crate::stack::input_variable::InputVariable;
pub use crate::stack::local_value::LocalValue;
pub use crate::stack::output_value::OutputValue;
pub use crate::stack::phase::Phase;
pub use crate::stack::provider::ProviderInstance;
pub use crate::stack::stack_call::StackCall;

/// Result of evaluating one element for one phase.
pub type Evaluated = (Value, Diagnostics);

/// A live, configured provider. The evaluator treats it as opaque.
pub trait ProviderClient: Send + Sync {
    fn provider_type(&self) -> &str;

    /// Releases the client. Called at most once, by [`Main::close`].
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Creates provider clients for one provider type.
///
/// `configure` runs on tokio's blocking pool, so it may block.
pub trait ProviderFactory: Send + Sync {
    fn configure(
        &self,
        provider_type: &str,
        config: &Value,
    ) -> anyhow::Result<Arc<dyn ProviderClient>>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&str, &Value) -> anyhow::Result<Arc<dyn ProviderClient>> + Send + Sync,
{
    fn configure(
        &self,
        provider_type: &str,
        config: &Value,
    ) -> anyhow::Result<Arc<dyn ProviderClient>> {
        self(provider_type, config)
    }
}

/// Everything an evaluation needs besides the configuration itself.
#[derive(Clone, Default)]
pub struct EvaluatorOptions {
    /// Provider factories keyed by provider type.
    pub providers: HashMap<String, Arc<dyn ProviderFactory>>,
    /// Values for the main stack's input variables.
    pub input_values: BTreeMap<String, Value>,
}

impl EvaluatorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(
        mut self,
        provider_type: impl Into<String>,
        factory: impl ProviderFactory + 'static,
    ) -> Self {
        self.providers.insert(provider_type.into(), Arc::new(factory));
        self
    }

    pub fn input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_values.insert(name.into(), value.into());
        self
    }
}

/// Memo key of an evaluation. A stack call has two independently memoized
/// results: the inputs it passes down and the outputs it collects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    Node(AbsAddr),
    CallInputs(AbsAddr),
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKey::Node(addr) => write!(f, "{addr}"),
            NodeKey::CallInputs(addr) => write!(f, "{addr} inputs"),
        }
    }
}

/// One run of an evaluation body.
#[derive(Debug, Clone)]
pub struct Execution {
    pub node: NodeKey,
    pub phase: Phase,
    pub start: Instant,
    pub duration: Duration,
}

/// The root of an evaluation session.
pub struct Main {
    session: Session,
    config: Arc<StackConfig>,
    options: EvaluatorOptions,
    memo: Memo<(NodeKey, Phase), Evaluated>,
    clients: Mutex<HashMap<(AbsAddr, Phase), Arc<dyn ProviderClient>>>,
    executions: Arc<Mutex<Vec<Execution>>>,
}

impl Main {
    pub fn new(config: impl Into<Arc<StackConfig>>, options: EvaluatorOptions) -> Arc<Self> {
        Arc::new(Self {
            session: Session::new(),
            config: config.into(),
            options,
            memo: Memo::new(),
            clients: Mutex::new(HashMap::new()),
            executions: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &Arc<StackConfig> {
        &self.config
    }

    pub(crate) fn options(&self) -> &EvaluatorOptions {
        &self.options
    }

    /// Evaluates the element at `addr` for `phase`.
    ///
    /// Every call is a root task of this evaluator's session. Calls may run
    /// concurrently, and concurrent calls for the same element and phase share
    /// a single evaluation. A result that is already settled is returned
    /// directly, even after [`Main::cancel`].
    pub async fn get_value(
        self: &Arc<Self>,
        addr: &AbsAddr,
        phase: Phase,
    ) -> Result<Evaluated, SessionError> {
        let key = NodeKey::Node(addr.clone());
        let settled = self
            .memo
            .get(&(key.clone(), phase))
            .and_then(|once| once.peek());

        match settled {
            Some(Ok(evaluated)) => return Ok(evaluated),
            Some(Err(PromiseError::Cancelled)) | None => {}
            Some(Err(err)) => return Ok((Value::Unknown, promise_diagnostics(&key, err))),
        }

        let main = Arc::clone(self);
        let addr = addr.clone();

        self.session
            .main_task(|ctx| async move { main.check_value(&ctx, &addr, phase).await })
            .await
    }

    /// Like [`Main::get_value`], from inside a task that is already running.
    pub async fn check_value(
        self: &Arc<Self>,
        ctx: &TaskContext,
        addr: &AbsAddr,
        phase: Phase,
    ) -> Evaluated {
        match self.node(addr) {
            Some(node) => node.check_value(ctx, phase).await,
            None => (
                Value::Unknown,
                Diagnostic::error(
                    "Reference to undeclared element",
                    format!("There is no element at {addr} in this configuration."),
                )
                .into(),
            ),
        }
    }

    pub fn main_stack(self: &Arc<Self>) -> Stack {
        Stack {
            main: Arc::clone(self),
            addr: StackAddr::root(),
            config: Arc::clone(&self.config),
        }
    }

    pub fn stack(self: &Arc<Self>, addr: &StackAddr) -> Option<Stack> {
        let mut config = Arc::clone(&self.config);
        for step in addr.steps() {
            config = Arc::clone(&config.stacks.get(step)?.config);
        }

        Some(Stack {
            main: Arc::clone(self),
            addr: addr.clone(),
            config,
        })
    }

    pub fn node(self: &Arc<Self>, addr: &AbsAddr) -> Option<Node> {
        self.stack(&addr.stack)?.node(&addr.item)
    }

    /// The client configured for the provider at `addr` during `phase`, if
    /// that phase configured it.
    pub fn provider_client(&self, addr: &AbsAddr, phase: Phase) -> Option<Arc<dyn ProviderClient>> {
        let clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients.get(&(addr.clone(), phase)).cloned()
    }

    pub(crate) fn register_client(&self, addr: AbsAddr, phase: Phase, client: Arc<dyn ProviderClient>) {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients.insert((addr, phase), client);
    }

    /// Every evaluation body run so far, in completion order.
    pub fn executions(&self) -> Vec<Execution> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn execution_count(&self, node: &NodeKey, phase: Phase) -> usize {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|run| run.node == *node && run.phase == phase)
            .count()
    }

    /// Cancels every evaluation still in flight. Results that are already
    /// computed stay readable through [`Main::get_value`] and
    /// [`Main::check_value`]; anything else is rejected with
    /// [`SessionError::Cancelled`].
    pub fn cancel(&self) {
        self.session.cancel();
    }

    /// Closes every configured provider client. Returns the first failure,
    /// after attempting to close all of them.
    pub fn close(&self) -> anyhow::Result<()> {
        let clients: Vec<_> = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let mut failure = None;
        for ((addr, phase), client) in clients {
            tracing::debug!(%addr, %phase, "closing provider");
            if let Err(err) = client.close() {
                tracing::warn!(%addr, %phase, "failed to close provider: {err:#}");
                failure.get_or_insert(err.context(format!("closing {addr} for {phase}")));
            }
        }

        failure.map_or(Ok(()), Err)
    }

    /// Runs `body` at most once for `(key, phase)` and returns its result.
    ///
    /// Scheduler failures become diagnostics, so callers always get a value:
    /// a cycle through this node yields "Self-referential evaluation".
    pub(crate) async fn memoized<F, Fut>(
        &self,
        ctx: &TaskContext,
        key: NodeKey,
        phase: Phase,
        body: F,
    ) -> Evaluated
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Evaluated> + Send + 'static,
    {
        let once = self.memo.entry((key.clone(), phase));
        if let Some(Ok(evaluated)) = once.peek() {
            return evaluated;
        }

        let records = Arc::clone(&self.executions);
        let node = key.clone();

        let result = once
            .get_or_run(ctx, key.to_string(), move |ctx| async move {
                tracing::debug!(%node, %phase, "evaluating");
                let start = Instant::now();
                let result = body(ctx).await;
                let duration = start.elapsed();
                tracing::debug!(%node, %phase, ?duration, errors = result.1.has_errors(), "evaluated");

                records
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Execution {
                        node,
                        phase,
                        start,
                        duration,
                    });
                result
            })
            .await;

        match result {
            Ok(evaluated) => evaluated,
            Err(err) => (Value::Unknown, promise_diagnostics(&key, err)),
        }
    }
}

fn promise_diagnostics(key: &NodeKey, err: PromiseError) -> Diagnostics {
    let diagnostic = match err {
        PromiseError::Failed(diags) => return diags,
        PromiseError::SelfDependent { chain } => Diagnostic::error(
            "Self-referential evaluation",
            format!(
                "The value of {key} depends on itself, through {}.",
                chain.join(" -> ")
            ),
        ),
        PromiseError::Unresolved(_) => Diagnostic::error(
            "Evaluation did not complete",
            format!("The evaluation of {key} stopped before producing a value."),
        ),
        PromiseError::Cancelled => Diagnostic::error(
            "Evaluation cancelled",
            format!("The evaluation of {key} was cancelled."),
        ),
    };
    diagnostic.into()
}

/// A stack in the configuration tree, seen as the scope its elements'
/// expressions are evaluated in.
#[derive(Clone)]
pub struct Stack {
    main: Arc<Main>,
    addr: StackAddr,
    config: Arc<StackConfig>,
}

impl Stack {
    pub fn addr(&self) -> &StackAddr {
        &self.addr
    }

    pub fn main(&self) -> &Arc<Main> {
        &self.main
    }

    pub fn config(&self) -> &Arc<StackConfig> {
        &self.config
    }

    pub fn is_main(&self) -> bool {
        self.addr.is_root()
    }

    /// The calling stack and the name of the call that instantiated this
    /// stack. `None` for the main stack.
    pub fn parent(&self) -> Option<(Stack, String)> {
        let (addr, call) = self.addr.parent()?;
        let stack = self.main.stack(&addr)?;
        Some((stack, call.to_string()))
    }

    pub fn local_value(&self, name: &str) -> Option<LocalValue> {
        let decl = self.config.locals.get(name)?;
        Some(LocalValue::new(self.clone(), name, decl.clone()))
    }

    pub fn output_value(&self, name: &str) -> Option<OutputValue> {
        let decl = self.config.outputs.get(name)?;
        Some(OutputValue::new(self.clone(), name, decl.clone()))
    }

    pub fn output_values(&self) -> BTreeMap<String, OutputValue> {
        self.config
            .outputs
            .iter()
            .map(|(name, decl)| (name.clone(), OutputValue::new(self.clone(), name, decl.clone())))
            .collect()
    }

    pub fn input_variable(&self, name: &str) -> Option<InputVariable> {
        let decl = self.config.variables.get(name)?;
        Some(InputVariable::new(self.clone(), name, decl.clone()))
    }

    pub fn provider(&self, provider_type: &str, name: &str) -> Option<ProviderInstance> {
        let decl = self.config.provider(provider_type, name)?;
        Some(ProviderInstance::new(self.clone(), decl.clone()))
    }

    pub fn stack_call(&self, name: &str) -> Option<StackCall> {
        let decl = self.config.stacks.get(name)?;
        Some(StackCall::new(self.clone(), name, decl.clone()))
    }

    pub fn child_stack(&self, name: &str) -> Option<Stack> {
        self.stack_call(name).map(|call| call.child())
    }

    pub fn component(&self, name: &str) -> Option<Component> {
        let decl = self.config.components.get(name)?;
        Some(Component::new(self.clone(), name, decl.clone()))
    }

    pub fn node(&self, item: &Item) -> Option<Node> {
        match item {
            Item::LocalValue(name) => self.local_value(name).map(Node::LocalValue),
            Item::OutputValue(name) => self.output_value(name).map(Node::OutputValue),
            Item::InputVariable(name) => self.input_variable(name).map(Node::InputVariable),
            Item::ProviderInstance(ProviderAddr {
                provider_type,
                name,
            }) => self
                .provider(provider_type, name)
                .map(Node::ProviderInstance),
            Item::StackCall(name) => self.stack_call(name).map(Node::StackCall),
            Item::Component(name) => self.component(name).map(Node::Component),
        }
    }

    /// Evaluates `expr` in this stack's scope.
    ///
    /// Each referenced element is awaited in turn, and its diagnostics are
    /// merged into the result. A reference to an element this stack does not
    /// declare is reported against `subject` and reads as unknown.
    pub async fn eval_expr(
        &self,
        ctx: &TaskContext,
        expr: &Expr,
        phase: Phase,
        subject: Option<&SourceRange>,
    ) -> Evaluated {
        let mut diags = Diagnostics::new();
        let mut refs = HashMap::new();

        for reference in expr.references() {
            let value = match self.node(&reference.item()) {
                Some(node) => {
                    let (value, more) = node.check_value(ctx, phase).await;
                    diags.append(more);
                    value
                }
                None => {
                    diags.push(
                        Diagnostic::error(
                            "Reference to undeclared element",
                            format!("There is no {reference} declared in {self}."),
                        )
                        .with_subject(subject),
                    );
                    Value::Unknown
                }
            };
            refs.insert(reference.clone(), value);
        }

        match expr.evaluate(&refs) {
            Ok(value) => (value, diags),
            Err(err) => {
                diags.push(err.into_diagnostic(subject));
                (Value::Unknown, diags)
            }
        }
    }
}

impl Display for Stack {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.addr.is_root() {
            f.write_str("the main stack")
        } else {
            write!(f, "{}", self.addr)
        }
    }
}

/// Any evaluatable element of the configuration.
#[derive(Clone)]
pub enum Node {
    LocalValue(LocalValue),
    OutputValue(OutputValue),
    InputVariable(InputVariable),
    ProviderInstance(ProviderInstance),
    StackCall(StackCall),
    Component(Component),
}

impl Node {
    pub fn addr(&self) -> AbsAddr {
        match self {
            Node::LocalValue(node) => node.addr(),
            Node::OutputValue(node) => node.addr(),
            Node::InputVariable(node) => node.addr(),
            Node::ProviderInstance(node) => node.addr(),
            Node::StackCall(node) => node.addr(),
            Node::Component(node) => node.addr(),
        }
    }

    /// The value an expression referring to this element reads. For a stack
    /// call that is the object of the nested stack's outputs.
    pub fn check_value(&self, ctx: &TaskContext, phase: Phase) -> BoxFuture<'static, Evaluated> {
        let node = self.clone();
        let ctx = ctx.clone();

        Box::pin(async move {
            match &node {
                Node::LocalValue(node) => node.check_value(&ctx, phase).await,
                Node::OutputValue(node) => node.check_result_value(&ctx, phase).await,
                Node::InputVariable(node) => node.check_value(&ctx, phase).await,
                Node::ProviderInstance(node) => node.check_value(&ctx, phase).await,
                Node::StackCall(node) => node.check_results(&ctx, phase).await,
                Node::Component(node) => node.check_value(&ctx, phase).await,
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::testing::{addr, fixture};
    use super::*;
    use crate::expr::BinaryOp;

    const LIMIT: Duration = Duration::from_secs(5);

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_evaluation() {
        let main = Main::new(fixture("basics"), EvaluatorOptions::new());
        let target = addr("local.childName");

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let main = main.clone();
                let target = target.clone();
                tokio::spawn(async move { main.get_value(&target, Phase::Inspect).await })
            })
            .collect();

        let mut results = Vec::new();
        for caller in callers {
            results.push(caller.await.unwrap().unwrap());
        }

        assert!(results.iter().all(|result| *result == results[0]));
        assert_eq!(results[0].0, Value::string("outputted-child of jackson"));
        assert_eq!(
            main.execution_count(&NodeKey::Node(target), Phase::Inspect),
            1
        );
        assert_eq!(
            main.execution_count(&NodeKey::Node(addr("local.name")), Phase::Inspect),
            1
        );
    }

    #[tokio::test]
    async fn test_phase_isolation() {
        let main = Main::new(fixture("basics"), EvaluatorOptions::new());
        let name = addr("local.name");

        for phase in [Phase::Plan, Phase::Plan, Phase::Apply, Phase::Inspect] {
            let (value, diags) = main.get_value(&name, phase).await.unwrap();
            assert_eq!(value, Value::string("jackson"));
            assert!(diags.is_empty());
        }

        let key = NodeKey::Node(name);
        assert_eq!(main.execution_count(&key, Phase::Plan), 1);
        assert_eq!(main.execution_count(&key, Phase::Apply), 1);
        assert_eq!(main.execution_count(&key, Phase::Inspect), 1);
        assert_eq!(main.executions().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cycle_detected_in_every_phase() {
        for phase in [Phase::Plan, Phase::Apply, Phase::Inspect] {
            let main = Main::new(fixture("cycle"), EvaluatorOptions::new());

            for target in ["local.a", "local.b"] {
                let (value, diags) = timeout(LIMIT, main.get_value(&addr(target), phase))
                    .await
                    .expect("cycle evaluation hung")
                    .unwrap();

                assert_eq!(value, Value::Unknown);
                let cycle = diags
                    .errors()
                    .find(|diag| diag.summary == "Self-referential evaluation")
                    .unwrap_or_else(|| panic!("no cycle diagnostic for {target} in {phase}"));
                assert!(cycle.detail.contains("local.a"));
                assert!(cycle.detail.contains("local.b"));
            }

            let (value, diags) = main.get_value(&addr("local.unrelated"), phase).await.unwrap();
            assert_eq!(value, Value::string("fine"));
            assert!(diags.is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cycle_requests() {
        let main = Main::new(fixture("cycle"), EvaluatorOptions::new());

        let a = tokio::spawn({
            let main = main.clone();
            async move { main.get_value(&addr("local.a"), Phase::Plan).await }
        });
        let b = tokio::spawn({
            let main = main.clone();
            async move { main.get_value(&addr("local.b"), Phase::Plan).await }
        });

        for handle in [a, b] {
            let (value, diags) = timeout(LIMIT, handle).await.unwrap().unwrap().unwrap();
            assert_eq!(value, Value::Unknown);
            assert!(diags.has_errors());
        }
    }

    #[tokio::test]
    async fn test_self_reference() {
        let config = StackConfig::new().with_local(
            "me",
            Expr::binary(BinaryOp::Add, Expr::local("me"), Expr::literal(1)),
        );
        let main = Main::new(config, EvaluatorOptions::new());

        let (value, diags) = timeout(LIMIT, main.get_value(&addr("local.me"), Phase::Plan))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(value, Value::Unknown);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().summary, "Self-referential evaluation");
    }

    #[tokio::test]
    async fn test_unknown_address() {
        let main = Main::new(fixture("basics"), EvaluatorOptions::new());

        for target in ["local.nope", "stack.nope.output.x", "provider.test.main"] {
            let (value, diags) = main.get_value(&addr(target), Phase::Inspect).await.unwrap();
            assert_eq!(value, Value::Unknown);
            assert_eq!(
                diags.iter().next().unwrap().summary,
                "Reference to undeclared element"
            );
        }
    }

    #[tokio::test]
    async fn test_undeclared_reference_is_local() {
        let config = StackConfig::new()
            .with_local("broken", Expr::local("missing"))
            .with_local("fine", Expr::literal("ok"));
        let main = Main::new(config, EvaluatorOptions::new());

        let (value, diags) = main.get_value(&addr("local.broken"), Phase::Plan).await.unwrap();
        assert_eq!(value, Value::Unknown);
        assert_eq!(diags.len(), 1);
        assert_eq!(
            diags.iter().next().unwrap().detail,
            "There is no local.missing declared in the main stack."
        );

        let (value, diags) = main.get_value(&addr("local.fine"), Phase::Plan).await.unwrap();
        assert_eq!(value, Value::string("ok"));
        assert!(diags.is_empty());
    }

    #[tokio::test]
    async fn test_diagnostics_merge_without_duplicates() {
        let config = StackConfig::new()
            .with_local("bad", Expr::local("missing"))
            .with_local("left", Expr::local("bad"))
            .with_local("right", Expr::local("bad"))
            .with_local("top", Expr::tuple([Expr::local("left"), Expr::local("right")]));
        let main = Main::new(config, EvaluatorOptions::new());

        let (value, diags) = main.get_value(&addr("local.top"), Phase::Plan).await.unwrap();

        assert_eq!(value, Value::Unknown);
        assert_eq!(diags.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_values_survive_cancel() {
        let main = Main::new(fixture("basics"), EvaluatorOptions::new());
        let (before, _) = main.get_value(&addr("local.name"), Phase::Plan).await.unwrap();

        main.cancel();

        let (after, diags) = main.get_value(&addr("local.name"), Phase::Plan).await.unwrap();
        assert_eq!(after, before);
        assert!(diags.is_empty());
        assert_eq!(
            main.execution_count(&NodeKey::Node(addr("local.name")), Phase::Plan),
            1
        );

        assert_eq!(
            main.get_value(&addr("local.name"), Phase::Apply).await,
            Err(SessionError::Cancelled)
        );
        assert_eq!(
            main.get_value(&addr("local.childName"), Phase::Plan).await,
            Err(SessionError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_node_lookup() {
        let main = Main::new(fixture("basics"), EvaluatorOptions::new());

        assert!(matches!(main.node(&addr("local.name")), Some(Node::LocalValue(_))));
        assert!(matches!(
            main.node(&addr("stack.child.var.name")),
            Some(Node::InputVariable(_))
        ));
        assert!(matches!(main.node(&addr("stack.child")), Some(Node::StackCall(_))));
        assert!(main.node(&addr("stack.child.local.name")).is_none());

        let child = main.main_stack().child_stack("child").unwrap();
        let (parent, call) = child.parent().unwrap();
        assert!(parent.is_main());
        assert_eq!(call, "child");
        assert_eq!(child.to_string(), "stack.child");
    }
}
