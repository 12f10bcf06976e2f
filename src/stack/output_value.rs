use crate::addrs::{AbsAddr, Item};
use crate::config::OutputDecl;
use crate::diagnostics::Diagnostic;
use crate::engine::TaskContext;
use crate::stack::{Evaluated, NodeKey, Phase, Stack};
use crate::value::Value;

/// An `outputs` entry. A nested stack's outputs are what its caller sees
/// when it reads the stack call.
#[derive(Clone)]
pub struct OutputValue {
    stack: Stack,
    name: String,
    decl: OutputDecl,
}

impl OutputValue {
    pub(crate) fn new(stack: Stack, name: &str, decl: OutputDecl) -> Self {
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
        AbsAddr::new(self.stack.addr().clone(), Item::OutputValue(self.name.clone()))
    }

    /// The output's value, converted to its declared type.
    pub async fn check_result_value(&self, ctx: &TaskContext, phase: Phase) -> Evaluated {
        let this = self.clone();

        self.stack
            .main()
            .memoized(ctx, NodeKey::Node(self.addr()), phase, move |ctx| async move {
                let range = this.decl.range.as_ref();
                let (value, mut diags) = this
                    .stack
                    .eval_expr(&ctx, &this.decl.value, phase, range)
                    .await;

                let converted = match this.decl.ty {
                    Some(ty) => ty.convert(value),
                    None => Ok(value),
                };
                let value = match converted {
                    Ok(value) => value,
                    Err(detail) => {
                        diags.push(
                            Diagnostic::error(
                                "Invalid output value",
                                format!("Unsuitable value for output {:?}: {detail}.", this.name),
                            )
                            .with_subject(range),
                        );
                        Value::Unknown
                    }
                };

                let value = phase.validate(value, &mut diags, range);
                (value, diags)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::expr::Expr;
    use crate::stack::{EvaluatorOptions, Main};
    use crate::value::TypeConstraint;

    async fn output(config: StackConfig, name: &str, phase: Phase) -> Evaluated {
        let main = Main::new(config, EvaluatorOptions::new());
        let stack = main.main_stack();
        let name = name.to_string();

        main.session()
            .main_task(|ctx| async move {
                let output = stack.output_values().remove(&name).unwrap();
                output.check_result_value(&ctx, phase).await
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_type_conversion() {
        let config = StackConfig::new()
            .with_typed_output("age", TypeConstraint::String, Expr::literal(30))
            .with_typed_output("count", TypeConstraint::Number, Expr::literal("many"));

        let (value, diags) = output(config.clone(), "age", Phase::Apply).await;
        assert_eq!(value, Value::string("30"));
        assert!(diags.is_empty());

        let (value, diags) = output(config, "count", Phase::Apply).await;
        assert_eq!(value, Value::Unknown);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().summary, "Invalid output value");
    }

    #[tokio::test]
    async fn test_untyped_output() {
        let config = StackConfig::new().with_output("list", Expr::tuple([Expr::literal(true)]));
        let (value, diags) = output(config, "list", Phase::Inspect).await;

        assert_eq!(value, Value::list([Value::Bool(true)]));
        assert!(diags.is_empty());
    }
}
