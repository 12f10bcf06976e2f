use crate::addrs::{AbsAddr, Item};
use crate::config::VariableDecl;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::engine::TaskContext;
use crate::stack::{Evaluated, NodeKey, Phase, Stack};
use crate::value::Value;

/// A `variables` entry.
///
/// Variables of the main stack take their values from
/// [`EvaluatorOptions::input_values`](crate::stack::EvaluatorOptions). Those
/// of a nested stack come from the `inputs` object of the call that
/// instantiated it. Either way a missing or null value falls back to the
/// declared default.
#[derive(Clone)]
pub struct InputVariable {
    stack: Stack,
    name: String,
    decl: VariableDecl,
}

impl InputVariable {
    pub(crate) fn new(stack: Stack, name: &str, decl: VariableDecl) -> Self {
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
        AbsAddr::new(self.stack.addr().clone(), Item::InputVariable(self.name.clone()))
    }

    pub async fn check_value(&self, ctx: &TaskContext, phase: Phase) -> Evaluated {
        let this = self.clone();

        self.stack
            .main()
            .memoized(ctx, NodeKey::Node(self.addr()), phase, move |ctx| async move {
                this.compute(&ctx, phase).await
            })
            .await
    }

    async fn compute(&self, ctx: &TaskContext, phase: Phase) -> Evaluated {
        let range = self.decl.range.as_ref();
        let mut diags = Diagnostics::new();

        let supplied = match self.stack.parent() {
            None => self.stack.main().options().input_values.get(&self.name).cloned(),
            Some((parent, call)) => {
                let Some(call) = parent.stack_call(&call) else {
                    return (Value::Unknown, diags);
                };
                let (inputs, more) = call.check_inputs(ctx, phase).await;
                diags.append(more);

                match inputs {
                    Value::Object(mut fields) => fields.remove(&self.name),
                    Value::Unknown => Some(Value::Unknown),
                    _ => None,
                }
            }
        };

        let value = match supplied.filter(|value| !value.is_null()) {
            Some(value) => value,
            None => match &self.decl.default {
                Some(default) => default.clone(),
                None if diags.has_errors() => Value::Unknown,
                None => {
                    diags.push(
                        Diagnostic::error(
                            "No value for required variable",
                            format!(
                                "The input variable {:?} is required, but no value was given for it.",
                                self.name
                            ),
                        )
                        .with_subject(range),
                    );
                    Value::Unknown
                }
            },
        };

        let converted = match self.decl.ty {
            Some(ty) => ty.convert(value),
            None => Ok(value),
        };
        let value = match converted {
            Ok(value) => value,
            Err(detail) => {
                diags.push(
                    Diagnostic::error(
                        "Invalid value for input variable",
                        format!("Unsuitable value for var.{}: {detail}.", self.name),
                    )
                    .with_subject(range),
                );
                Value::Unknown
            }
        };

        let value = phase.validate(value, &mut diags, range);
        (value, diags)
    }
}
