use crate::addrs::{AbsAddr, Item};
use crate::config::LocalDecl;
use crate::engine::TaskContext;
use crate::stack::{Evaluated, NodeKey, Phase, Stack};

/// A `locals` entry.
#[derive(Clone)]
pub struct LocalValue {
    stack: Stack,
    name: String,
    decl: LocalDecl,
}

impl LocalValue {
    pub(crate) fn new(stack: Stack, name: &str, decl: LocalDecl) -> Self {
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
        AbsAddr::new(self.stack.addr().clone(), Item::LocalValue(self.name.clone()))
    }

    pub async fn check_value(&self, ctx: &TaskContext, phase: Phase) -> Evaluated {
        let this = self.clone();

        self.stack
            .main()
            .memoized(ctx, NodeKey::Node(self.addr()), phase, move |ctx| async move {
                let range = this.decl.range.as_ref();
                let (value, mut diags) = this
                    .stack
                    .eval_expr(&ctx, &this.decl.value, phase, range)
                    .await;
                let value = phase.validate(value, &mut diags, range);
                (value, diags)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::testing::fixture;
    use crate::stack::{EvaluatorOptions, Main};
    use crate::value::Value;

    async fn local(name: &str, phase: Phase) -> Evaluated {
        let main = Main::new(fixture("basics"), EvaluatorOptions::new());
        let stack = main.main_stack();
        let name = name.to_string();

        main.session()
            .main_task(|ctx| async move {
                let local = stack.local_value(&name).unwrap();
                local.check_value(&ctx, phase).await
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_values() {
        let cases = [
            ("name", Value::string("jackson")),
            ("childName", Value::string("outputted-child of jackson")),
            ("functional", Value::string("Hello, Ander!")),
            (
                "mappy",
                Value::object([("name", Value::string("jackson")), ("age", Value::from(30))]),
            ),
            (
                "listy",
                Value::list([Value::string("jackson"), Value::from(30)]),
            ),
            ("booleany", Value::Bool(true)),
            ("conditiony", Value::string("true")),
        ];

        for (name, want) in cases {
            let (got, diags) = local(name, Phase::Inspect).await;

            assert!(diags.err().is_none(), "unexpected errors for {name}\n{:?}", diags.err());
            assert_eq!(got.equals(&want), Value::Bool(true), "got {got}, want {want}");
        }
    }

    #[tokio::test]
    async fn test_mappy_is_object() {
        let (got, _) = local("mappy", Phase::Inspect).await;
        let fields = got.as_object().unwrap();

        assert_eq!(fields["name"], Value::string("jackson"));
        assert_eq!(fields["age"], Value::from(30));
    }
}
