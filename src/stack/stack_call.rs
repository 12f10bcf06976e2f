use std::collections::BTreeMap;

use crate::addrs::{AbsAddr, Item};
use crate::config::StackCallDecl;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::engine::TaskContext;
use crate::stack::{Evaluated, NodeKey, Phase, Stack};
use crate::value::Value;

/// A `stacks` entry: the call in the parent stack that instantiates a nested
/// stack.
#[derive(Clone)]
pub struct StackCall {
    stack: Stack,
    name: String,
    decl: StackCallDecl,
}

impl StackCall {
    pub(crate) fn new(stack: Stack, name: &str, decl: StackCallDecl) -> Self {
        Self {
            stack,
            name: name.to_string(),
            decl,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> AbsAddr {
        AbsAddr::new(self.stack.addr().clone(), Item::StackCall(self.name.clone()))
    }

    /// The stack this call instantiates.
    pub fn child(&self) -> Stack {
        Stack {
            main: self.stack.main().clone(),
            addr: self.stack.addr().child(&self.name),
            config: self.decl.config.clone(),
        }
    }

    /// The `inputs` object, evaluated in the calling stack. Attributes the
    /// nested stack does not declare as variables are reported and dropped.
    pub async fn check_inputs(&self, ctx: &TaskContext, phase: Phase) -> Evaluated {
        let this = self.clone();

        self.stack
            .main()
            .memoized(ctx, NodeKey::CallInputs(self.addr()), phase, move |ctx| async move {
                let range = this.decl.range.as_ref();
                let (value, mut diags) = this
                    .stack
                    .eval_expr(&ctx, &this.decl.inputs, phase, range)
                    .await;

                let value = match value {
                    Value::Unknown => Value::Unknown,
                    Value::Object(fields) => {
                        let declared = &this.decl.config.variables;
                        let (accepted, rejected): (BTreeMap<_, _>, BTreeMap<_, _>) = fields
                            .into_iter()
                            .partition(|(name, _)| declared.contains_key(name));

                        for name in rejected.keys() {
                            diags.push(
                                Diagnostic::error(
                                    "Unsupported input variable",
                                    format!(
                                        "{} does not declare an input variable named {name:?}.",
                                        this.child()
                                    ),
                                )
                                .with_subject(range),
                            );
                        }
                        Value::Object(accepted)
                    }
                    other => {
                        diags.push(
                            Diagnostic::error(
                                "Invalid inputs",
                                format!(
                                    "The inputs for stack.{} must be an object, but have {}.",
                                    this.name,
                                    other.type_name()
                                ),
                            )
                            .with_subject(range),
                        );
                        Value::Unknown
                    }
                };

                (value, diags)
            })
            .await
    }

    /// An object holding every output value of the nested stack. This is what
    /// `stack.<name>` reads as in the calling stack.
    pub async fn check_results(&self, ctx: &TaskContext, phase: Phase) -> Evaluated {
        let this = self.clone();

        self.stack
            .main()
            .memoized(ctx, NodeKey::Node(self.addr()), phase, move |ctx| async move {
                let mut fields = BTreeMap::new();
                let mut diags = Diagnostics::new();

                for (name, output) in this.child().output_values() {
                    let (value, more) = output.check_result_value(&ctx, phase).await;
                    diags.append(more);
                    fields.insert(name, value);
                }

                (Value::Object(fields), diags)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StackConfig, VariableDecl};
    use crate::expr::Expr;
    use crate::stack::testing::{addr, fixture};
    use crate::stack::{EvaluatorOptions, Main};

    #[tokio::test]
    async fn test_results_object() {
        let main = Main::new(fixture("basics"), EvaluatorOptions::new());

        let (value, diags) = main.get_value(&addr("stack.child"), Phase::Inspect).await.unwrap();

        assert_eq!(value, Value::object([("name", Value::string("jackson"))]));
        assert!(diags.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_input() {
        let child = StackConfig::new()
            .with_variable("name", VariableDecl::required())
            .with_output("name", Expr::var("name"));
        let config = StackConfig::new().with_stack(
            "child",
            Expr::object([("name", Expr::literal("a")), ("nmae", Expr::literal("b"))]),
            child,
        );
        let main = Main::new(config, EvaluatorOptions::new());
        let call = main.main_stack().stack_call("child").unwrap();

        let (inputs, diags) = main
            .session()
            .main_task(|ctx| async move { call.check_inputs(&ctx, Phase::Plan).await })
            .await
            .unwrap();

        assert_eq!(inputs, Value::object([("name", Value::string("a"))]));
        assert_eq!(diags.len(), 1);
        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.summary, "Unsupported input variable");
        assert!(diag.detail.contains("\"nmae\""));

        // The error reaches every value fed by the call's inputs, which
        // degrade to unknown.
        let (value, diags) = main
            .get_value(&addr("stack.child.output.name"), Phase::Plan)
            .await
            .unwrap();
        assert_eq!(value, Value::Unknown);
        assert_eq!(diags.len(), 1);
    }

    #[tokio::test]
    async fn test_inputs_must_be_object() {
        let config = StackConfig::new().with_stack("child", Expr::literal("nope"), StackConfig::new());
        let main = Main::new(config, EvaluatorOptions::new());
        let call = main.main_stack().stack_call("child").unwrap();

        let (inputs, diags) = main
            .session()
            .main_task(|ctx| async move { call.check_inputs(&ctx, Phase::Plan).await })
            .await
            .unwrap();

        assert_eq!(inputs, Value::Unknown);
        assert_eq!(diags.iter().next().unwrap().summary, "Invalid inputs");
    }
}
