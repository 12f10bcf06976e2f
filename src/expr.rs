//! Expression trees handed over by the configuration loader.
//!
//! Expressions arrive already parsed. In JSON they use serde's externally
//! tagged form, for example
//!
//! ```json
//! {"binary": {"op": "add",
//!             "lhs": {"literal": "outputted-child of "},
//!             "rhs": {"get_attr": {"source": {"reference": {"stack": "child"}},
//!                                  "name": "name"}}}}
//! ```
//!
//! Evaluation is split in two. [`Expr::references`] lists what the expression
//! reads, the caller resolves each of those (this is where awaiting other
//! nodes happens), and [`Expr::evaluate`] then computes the result
//! synchronously from the resolved values.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use serde::Deserialize;

use crate::addrs::{Item, ProviderAddr};
use crate::diagnostics::{Diagnostic, SourceRange};
use crate::functions;
use crate::value::Value;

/// A reference from an expression to another element of the same stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    Local(String),
    Var(String),
    Stack(String),
    Provider {
        #[serde(rename = "type")]
        ty: String,
        name: String,
    },
    Component(String),
}

impl Reference {
    /// The element this reference names, relative to the referring stack.
    pub fn item(&self) -> Item {
        match self {
            Reference::Local(name) => Item::LocalValue(name.clone()),
            Reference::Var(name) => Item::InputVariable(name.clone()),
            Reference::Stack(name) => Item::StackCall(name.clone()),
            Reference::Provider { ty, name } => Item::ProviderInstance(ProviderAddr::new(ty, name)),
            Reference::Component(name) => Item::Component(name.clone()),
        }
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Local(name) => write!(f, "local.{name}"),
            Reference::Var(name) => write!(f, "var.{name}"),
            Reference::Stack(name) => write!(f, "stack.{name}"),
            Reference::Provider { ty, name } => write!(f, "provider.{ty}.{name}"),
            Reference::Component(name) => write!(f, "component.{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Value),
    Reference(Reference),
    /// String interpolation; every part is converted to a string and the
    /// results are concatenated.
    Template(Vec<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Object(BTreeMap<String, Expr>),
    Tuple(Vec<Expr>),
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    GetAttr {
        source: Box<Expr>,
        name: String,
    },
    Index {
        source: Box<Expr>,
        key: Box<Expr>,
    },
}

/// A failed expression evaluation, reported as a diagnostic on the node that
/// owns the expression.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub summary: &'static str,
    pub detail: String,
}

impl EvalError {
    pub fn new(summary: &'static str, detail: impl Into<String>) -> Self {
        Self {
            summary,
            detail: detail.into(),
        }
    }

    pub fn into_diagnostic(self, subject: Option<&SourceRange>) -> Diagnostic {
        Diagnostic::error(self.summary, self.detail).with_subject(subject)
    }
}

impl Display for EvalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.summary, self.detail)
    }
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn local(name: impl Into<String>) -> Self {
        Expr::Reference(Reference::Local(name.into()))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Reference(Reference::Var(name.into()))
    }

    pub fn stack(name: impl Into<String>) -> Self {
        Expr::Reference(Reference::Stack(name.into()))
    }

    pub fn component(name: impl Into<String>) -> Self {
        Expr::Reference(Reference::Component(name.into()))
    }

    pub fn provider(ty: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Reference(Reference::Provider {
            ty: ty.into(),
            name: name.into(),
        })
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn conditional(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn template(parts: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Template(parts.into_iter().collect())
    }

    pub fn object<K>(fields: impl IntoIterator<Item = (K, Expr)>) -> Self
    where
        K: Into<String>,
    {
        Expr::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn tuple(items: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Tuple(items.into_iter().collect())
    }

    pub fn call(name: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    pub fn get_attr(self, name: impl Into<String>) -> Self {
        Expr::GetAttr {
            source: Box::new(self),
            name: name.into(),
        }
    }

    pub fn index(self, key: Expr) -> Self {
        Expr::Index {
            source: Box::new(self),
            key: Box::new(key),
        }
    }

    /// Every distinct reference in the expression, in order of first
    /// appearance.
    pub fn references(&self) -> Vec<&Reference> {
        let mut acc = Vec::new();
        self.collect_references(&mut acc);
        acc
    }

    fn collect_references<'a>(&'a self, acc: &mut Vec<&'a Reference>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Reference(reference) => {
                if !acc.contains(&reference) {
                    acc.push(reference);
                }
            }
            Expr::Template(parts) | Expr::Tuple(parts) | Expr::Call { args: parts, .. } => {
                for part in parts {
                    part.collect_references(acc);
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_references(acc);
                rhs.collect_references(acc);
            }
            Expr::Unary { operand, .. } => operand.collect_references(acc),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_references(acc);
                then.collect_references(acc);
                otherwise.collect_references(acc);
            }
            Expr::Object(fields) => {
                for field in fields.values() {
                    field.collect_references(acc);
                }
            }
            Expr::GetAttr { source, .. } => source.collect_references(acc),
            Expr::Index { source, key } => {
                source.collect_references(acc);
                key.collect_references(acc);
            }
        }
    }

    /// Evaluates the expression against already resolved references. A
    /// reference missing from `refs` evaluates to an unknown value.
    pub fn evaluate(&self, refs: &HashMap<Reference, Value>) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Reference(reference) => Ok(refs.get(reference).cloned().unwrap_or(Value::Unknown)),
            Expr::Template(parts) => {
                let mut acc = Some(String::new());
                for part in parts {
                    let value = part.evaluate(refs)?;
                    let piece = value
                        .to_template_string()
                        .map_err(|detail| EvalError::new("Invalid template interpolation value", detail))?;
                    acc = acc.zip(piece).map(|(mut acc, piece)| {
                        acc.push_str(&piece);
                        acc
                    });
                }
                Ok(acc.map_or(Value::Unknown, Value::String))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.evaluate(refs)?;
                let rhs = rhs.evaluate(refs)?;
                binary(*op, lhs, rhs)
            }
            Expr::Unary { op, operand } => unary(*op, operand.evaluate(refs)?),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => match condition.evaluate(refs)? {
                Value::Unknown => Ok(Value::Unknown),
                Value::Bool(true) => then.evaluate(refs),
                Value::Bool(false) => otherwise.evaluate(refs),
                other => Err(EvalError::new(
                    "Incorrect condition type",
                    format!(
                        "The condition expression must be of type bool, but have {}.",
                        other.type_name()
                    ),
                )),
            },
            Expr::Object(fields) => fields
                .iter()
                .map(|(key, field)| Ok((key.clone(), field.evaluate(refs)?)))
                .collect::<Result<_, _>>()
                .map(Value::Object),
            Expr::Tuple(items) => items
                .iter()
                .map(|item| item.evaluate(refs))
                .collect::<Result<_, _>>()
                .map(Value::List),
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| arg.evaluate(refs))
                    .collect::<Result<Vec<_>, _>>()?;
                functions::call(name, args)
            }
            Expr::GetAttr { source, name } => get_attr(source.evaluate(refs)?, name),
            Expr::Index { source, key } => index(source.evaluate(refs)?, key.evaluate(refs)?),
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    use BinaryOp::*;

    match op {
        Equal => return Ok(lhs.equals(&rhs)),
        NotEqual => {
            return Ok(match lhs.equals(&rhs) {
                Value::Bool(b) => Value::Bool(!b),
                other => other,
            });
        }
        _ => {}
    }

    if !lhs.is_known() || !rhs.is_known() {
        return Ok(Value::Unknown);
    }

    match (op, lhs, rhs) {
        (Add, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Add, Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Subtract, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
        (Multiply, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
        (Divide | Modulo, Value::Number(_), Value::Number(b)) if b == 0.0 => Err(EvalError::new(
            "Invalid operand",
            "Can't divide by zero.",
        )),
        (Divide, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),
        (Modulo, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a % b)),
        (Less, Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a < b)),
        (LessEqual, Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a <= b)),
        (Greater, Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a > b)),
        (GreaterEqual, Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a >= b)),
        (And, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a && b)),
        (Or, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a || b)),
        (op, lhs, rhs) => Err(EvalError::new(
            "Invalid operand",
            format!(
                "Unsuitable operands for {}: have {} and {}.",
                op_name(op),
                lhs.type_name(),
                rhs.type_name()
            ),
        )),
    }
}

fn op_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "\"+\"",
        BinaryOp::Subtract => "\"-\"",
        BinaryOp::Multiply => "\"*\"",
        BinaryOp::Divide => "\"/\"",
        BinaryOp::Modulo => "\"%\"",
        BinaryOp::Equal => "\"==\"",
        BinaryOp::NotEqual => "\"!=\"",
        BinaryOp::Less => "\"<\"",
        BinaryOp::LessEqual => "\"<=\"",
        BinaryOp::Greater => "\">\"",
        BinaryOp::GreaterEqual => "\">=\"",
        BinaryOp::And => "\"&&\"",
        BinaryOp::Or => "\"||\"",
    }
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, EvalError> {
    match (op, operand) {
        (_, Value::Unknown) => Ok(Value::Unknown),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOp::Not, other) => Err(EvalError::new(
            "Invalid operand",
            format!("Unsuitable value for \"!\": a bool is required, but have {}.", other.type_name()),
        )),
        (UnaryOp::Negate, other) => Err(EvalError::new(
            "Invalid operand",
            format!("Unsuitable value for \"-\": a number is required, but have {}.", other.type_name()),
        )),
    }
}

fn get_attr(source: Value, name: &str) -> Result<Value, EvalError> {
    match source {
        Value::Unknown => Ok(Value::Unknown),
        Value::Object(mut fields) => fields.remove(name).ok_or_else(|| {
            EvalError::new(
                "Unsupported attribute",
                format!("This object does not have an attribute named {name:?}."),
            )
        }),
        Value::Null => Err(EvalError::new(
            "Attempt to get attribute from null value",
            "This value is null, so it does not have any attributes.",
        )),
        other => Err(EvalError::new(
            "Unsupported attribute",
            format!("Can't access attributes on a primitive-typed value ({}).", other.type_name()),
        )),
    }
}

fn index(source: Value, key: Value) -> Result<Value, EvalError> {
    match (source, key) {
        (Value::Unknown, _) | (_, Value::Unknown) => Ok(Value::Unknown),
        (Value::List(mut items), Value::Number(n)) => {
            if n.fract() != 0.0 || n < 0.0 || n as usize >= items.len() {
                return Err(EvalError::new(
                    "Invalid index",
                    format!("The given key does not identify an element in this collection value: {n} is out of range."),
                ));
            }
            Ok(items.swap_remove(n as usize))
        }
        (Value::Object(mut fields), Value::String(key)) => fields.remove(&key).ok_or_else(|| {
            EvalError::new(
                "Invalid index",
                format!("The given key does not identify an element in this collection value: {key:?}."),
            )
        }),
        (source, key) => Err(EvalError::new(
            "Invalid index",
            format!("Can't index a {} with a {} key.", source.type_name(), key.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(pairs: &[(Reference, Value)]) -> HashMap<Reference, Value> {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{"binary": {"op": "add",
            "lhs": {"literal": "outputted-child of "},
            "rhs": {"get_attr": {"source": {"reference": {"stack": "child"}}, "name": "name"}}}}"#;
        let expr: Expr = serde_json::from_str(json).unwrap();

        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Add,
                Expr::literal("outputted-child of "),
                Expr::stack("child").get_attr("name"),
            )
        );

        let provider: Expr =
            serde_json::from_str(r#"{"reference": {"provider": {"type": "test", "name": "main"}}}"#)
                .unwrap();
        assert_eq!(provider, Expr::provider("test", "main"));
    }

    #[test]
    fn test_references_distinct() {
        let expr = Expr::template([
            Expr::local("name"),
            Expr::literal(" "),
            Expr::local("name"),
            Expr::var("greeting"),
        ]);

        assert_eq!(
            expr.references(),
            vec![&Reference::Local("name".into()), &Reference::Var("greeting".into())]
        );
    }

    #[test]
    fn test_string_concat() {
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::literal("outputted-child of "),
            Expr::stack("child").get_attr("name"),
        );
        let child = Value::object([("name", Value::string("jackson"))]);
        let refs = refs(&[(Reference::Stack("child".into()), child)]);

        assert_eq!(
            expr.evaluate(&refs),
            Ok(Value::string("outputted-child of jackson"))
        );
    }

    #[test]
    fn test_unknown_propagates() {
        let expr = Expr::binary(BinaryOp::Add, Expr::literal("a"), Expr::local("later"));
        assert_eq!(expr.evaluate(&HashMap::new()), Ok(Value::Unknown));

        let template = Expr::template([Expr::literal("id-"), Expr::local("later")]);
        assert_eq!(template.evaluate(&HashMap::new()), Ok(Value::Unknown));

        let attr = Expr::local("later").get_attr("name");
        assert_eq!(attr.evaluate(&HashMap::new()), Ok(Value::Unknown));
    }

    #[test]
    fn test_type_errors() {
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::literal("a"),
            Expr::tuple([Expr::literal(1)]),
        );
        let err = expr.evaluate(&HashMap::new()).unwrap_err();
        assert_eq!(err.summary, "Invalid operand");

        let div = Expr::binary(BinaryOp::Divide, Expr::literal(1), Expr::literal(0));
        assert!(div.evaluate(&HashMap::new()).is_err());

        let cond = Expr::conditional(Expr::literal("yes"), Expr::literal(1), Expr::literal(2));
        assert_eq!(
            cond.evaluate(&HashMap::new()).unwrap_err().summary,
            "Incorrect condition type"
        );
    }

    #[test]
    fn test_conditional_and_index() {
        let refs = refs(&[(Reference::Local("booleany".into()), Value::Bool(true))]);
        let cond = Expr::conditional(Expr::local("booleany"), Expr::literal("true"), Expr::literal("false"));
        assert_eq!(cond.evaluate(&refs), Ok(Value::string("true")));

        let list = Expr::tuple([Expr::literal("a"), Expr::literal("b")]);
        assert_eq!(
            list.clone().index(Expr::literal(1)).evaluate(&refs),
            Ok(Value::string("b"))
        );
        assert!(list.index(Expr::literal(2)).evaluate(&refs).is_err());
    }

    #[test]
    fn test_equality_and_logic() {
        let eq = Expr::binary(BinaryOp::Equal, Expr::literal(30), Expr::literal(30));
        assert_eq!(eq.evaluate(&HashMap::new()), Ok(Value::Bool(true)));

        let ne = Expr::binary(BinaryOp::NotEqual, Expr::literal("a"), Expr::local("x"));
        assert_eq!(ne.evaluate(&HashMap::new()), Ok(Value::Unknown));

        let and = Expr::binary(
            BinaryOp::And,
            Expr::literal(true),
            Expr::unary(UnaryOp::Not, Expr::literal(false)),
        );
        assert_eq!(and.evaluate(&HashMap::new()), Ok(Value::Bool(true)));
    }
}
