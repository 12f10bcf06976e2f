use std::fmt::{Display, Formatter};

use crate::diagnostics::{Diagnostic, Diagnostics, SourceRange};
use crate::value::Value;

/// Evaluation mode. Every memoized result is keyed by phase, so the same
/// element evaluated for plan and for apply never shares a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Unknown values are legitimate results and propagate to dependents.
    Plan,
    /// Every value must be wholly known; side effects are allowed.
    Apply,
    /// Read-only inspection. Providers are never configured.
    Inspect,
}

impl Phase {
    pub fn allows_unknown(self) -> bool {
        matches!(self, Phase::Plan)
    }

    pub fn allows_side_effects(self) -> bool {
        !matches!(self, Phase::Inspect)
    }

    /// Applies the phase's rules for unknown values to a finished result.
    ///
    /// A result whose diagnostics already contain errors degrades to unknown
    /// without further complaint.
    pub fn validate(
        self,
        value: Value,
        diags: &mut Diagnostics,
        subject: Option<&SourceRange>,
    ) -> Value {
        if diags.has_errors() {
            return Value::Unknown;
        }
        if self.allows_unknown() || value.is_wholly_known() {
            return value;
        }

        let diagnostic = match self {
            Phase::Apply => Diagnostic::error(
                "Unknown value during apply",
                "All values must be known during the apply phase, but this one will only be known after apply.",
            ),
            _ => Diagnostic::error(
                "Unresolved value",
                "This value depends on something that is not known yet, so it cannot be inspected.",
            ),
        };
        diags.push(diagnostic.with_subject(subject));
        Value::Unknown
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Plan => "plan",
            Phase::Apply => "apply",
            Phase::Inspect => "inspect",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let partial = Value::list([Value::from(1), Value::Unknown]);

        let mut diags = Diagnostics::new();
        assert_eq!(Phase::Plan.validate(partial.clone(), &mut diags, None), partial);
        assert!(diags.is_empty());

        let mut diags = Diagnostics::new();
        assert_eq!(Phase::Apply.validate(partial.clone(), &mut diags, None), Value::Unknown);
        assert_eq!(diags.iter().next().unwrap().summary, "Unknown value during apply");

        let mut diags = Diagnostics::new();
        assert_eq!(Phase::Inspect.validate(partial, &mut diags, None), Value::Unknown);
        assert_eq!(diags.iter().next().unwrap().summary, "Unresolved value");
    }

    #[test]
    fn test_errors_degrade_silently() {
        let mut diags = Diagnostics::from(Diagnostic::error("Broken", "already failed"));

        assert_eq!(Phase::Apply.validate(Value::Unknown, &mut diags, None), Value::Unknown);
        assert_eq!(diags.len(), 1);
    }
}
