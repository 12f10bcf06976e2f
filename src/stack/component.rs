use crate::addrs::{AbsAddr, Item};
use crate::config::ComponentDecl;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::engine::TaskContext;
use crate::expr::{Expr, Reference};
use crate::stack::{Evaluated, NodeKey, Phase, Stack};
use crate::value::Value;

/// A `component` block. Its value is its inputs object, once every provider
/// it uses has been evaluated for the same phase.
#[derive(Clone)]
pub struct Component {
    stack: Stack,
    name: String,
    decl: ComponentDecl,
}

impl Component {
    pub(crate) fn new(stack: Stack, name: &str, decl: ComponentDecl) -> Self {
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
        AbsAddr::new(self.stack.addr().clone(), Item::Component(self.name.clone()))
    }

    pub async fn check_value(&self, ctx: &TaskContext, phase: Phase) -> Evaluated {
        let this = self.clone();

        self.stack
            .main()
            .memoized(ctx, NodeKey::Node(self.addr()), phase, move |ctx| async move {
                let range = this.decl.range.as_ref();
                let mut diags = this.check_providers(&ctx, phase).await;

                let (inputs, more) = this
                    .stack
                    .eval_expr(&ctx, &this.decl.inputs, phase, range)
                    .await;
                diags.append(more);

                if !matches!(inputs, Value::Object(_) | Value::Unknown) {
                    diags.push(
                        Diagnostic::error(
                            "Invalid inputs",
                            format!(
                                "The inputs for component.{} must be an object, but have {}.",
                                this.name,
                                inputs.type_name()
                            ),
                        )
                        .with_subject(range),
                    );
                }

                let inputs = phase.validate(inputs, &mut diags, range);
                (inputs, diags)
            })
            .await
    }

    /// Evaluates every provider the component uses. Only their diagnostics
    /// matter here; the configured clients stay with [`Main`].
    ///
    /// [`Main`]: crate::stack::Main
    async fn check_providers(&self, ctx: &TaskContext, phase: Phase) -> Diagnostics {
        let range = self.decl.range.as_ref();
        let mut diags = Diagnostics::new();

        for (key, expr) in &self.decl.providers {
            if !matches!(expr, Expr::Reference(Reference::Provider { .. })) {
                diags.push(
                    Diagnostic::error(
                        "Invalid provider reference",
                        format!(
                            "The provider {key:?} of component.{} must refer to a provider configuration.",
                            self.name
                        ),
                    )
                    .with_subject(range),
                );
                continue;
            }

            let (_, more) = self.stack.eval_expr(ctx, expr, phase, range).await;
            diags.append(more);
        }

        diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::stack::testing::{CountingFactory, addr, fixture};
    use crate::stack::{EvaluatorOptions, Main};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_provider_configured_once() {
        let factory = CountingFactory::default();
        let main = Main::new(
            fixture("custom_provider"),
            EvaluatorOptions::new().provider("test", factory.clone()),
        );

        let (value, diags) = main.get_value(&addr("local.name"), Phase::Plan).await.unwrap();
        assert_eq!(value, Value::string("jackson"));
        assert!(diags.is_empty());

        let stack = main.main_stack();
        let (value, diags) = main
            .session()
            .main_task(|ctx| async move {
                let nested = ctx.spawn("nested", move |ctx| async move {
                    stack.local_value("name").unwrap().check_value(&ctx, Phase::Plan).await
                });
                nested.wait(&ctx).await
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, Value::string("jackson"));
        assert!(diags.is_empty());
        assert_eq!(factory.calls(), 1);

        let (value, _) = main.get_value(&addr("component.self"), Phase::Plan).await.unwrap();
        assert_eq!(value, Value::object([("name", Value::string("jackson"))]));

        let (value, _) = main.get_value(&addr("output.name"), Phase::Inspect).await.unwrap();
        assert_eq!(value, Value::string("jackson"));
        assert_eq!(factory.calls(), 1);
        assert!(main.provider_client(&addr("provider.test.main"), Phase::Plan).is_some());
    }

    #[tokio::test]
    async fn test_invalid_provider_reference() {
        let config = StackConfig::new()
            .with_local("notprovider", Expr::literal(1))
            .with_component(
                "broken",
                Expr::object([("a", Expr::literal(1))]),
                [("test", Expr::local("notprovider"))],
            );
        let main = Main::new(config, EvaluatorOptions::new());

        let (value, diags) = main.get_value(&addr("component.broken"), Phase::Plan).await.unwrap();

        assert_eq!(value, Value::Unknown);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().summary, "Invalid provider reference");
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let config = StackConfig::new().with_component(
            "orphan",
            Expr::object::<&str>([]),
            [("test", Expr::provider("test", "absent"))],
        );
        let main = Main::new(config, EvaluatorOptions::new());

        let (value, diags) = main.get_value(&addr("component.orphan"), Phase::Inspect).await.unwrap();

        assert_eq!(value, Value::Unknown);
        assert_eq!(
            diags.iter().next().unwrap().detail,
            "There is no provider.test.absent declared in the main stack."
        );
    }

    #[tokio::test]
    async fn test_inputs_must_be_object() {
        let config = StackConfig::new().with_component(
            "scalar",
            Expr::literal("nope"),
            Vec::<(String, Expr)>::new(),
        );
        let main = Main::new(config, EvaluatorOptions::new());

        let (value, diags) = main.get_value(&addr("component.scalar"), Phase::Plan).await.unwrap();

        assert_eq!(value, Value::Unknown);
        assert_eq!(diags.iter().next().unwrap().summary, "Invalid inputs");
    }
}
