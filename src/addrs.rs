use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::AddrError;

/// Path of stack calls leading from the main stack to a nested stack.
///
/// The main stack has the empty path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackAddr(Vec<String>);

impl StackAddr {
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, call: impl Into<String>) -> Self {
        let mut steps = self.0.clone();
        steps.push(call.into());
        Self(steps)
    }

    /// The calling stack and the name of the call that instantiated this one.
    pub fn parent(&self) -> Option<(StackAddr, &str)> {
        let (last, rest) = self.0.split_last()?;
        Some((StackAddr(rest.to_vec()), last))
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Display for StackAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "stack.{step}")?;
        }
        Ok(())
    }
}

/// Address of a provider configuration block within a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderAddr {
    pub provider_type: String,
    pub name: String,
}

impl ProviderAddr {
    pub fn new(provider_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            name: name.into(),
        }
    }
}

impl Display for ProviderAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "provider.{}.{}", self.provider_type, self.name)
    }
}

/// An element declared inside a single stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Item {
    LocalValue(String),
    OutputValue(String),
    InputVariable(String),
    ProviderInstance(ProviderAddr),
    StackCall(String),
    Component(String),
}

impl Display for Item {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Item::LocalValue(name) => write!(f, "local.{name}"),
            Item::OutputValue(name) => write!(f, "output.{name}"),
            Item::InputVariable(name) => write!(f, "var.{name}"),
            Item::ProviderInstance(addr) => write!(f, "{addr}"),
            Item::StackCall(name) => write!(f, "stack.{name}"),
            Item::Component(name) => write!(f, "component.{name}"),
        }
    }
}

/// Absolute address of a configuration element: the stack it lives in plus
/// the element itself.
///
/// The textual form joins the stack path and the element with dots, e.g.
/// `stack.child.output.name` or `provider.test.main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AbsAddr {
    pub stack: StackAddr,
    pub item: Item,
}

impl AbsAddr {
    pub fn new(stack: StackAddr, item: Item) -> Self {
        Self { stack, item }
    }

    pub fn root(item: Item) -> Self {
        Self::new(StackAddr::root(), item)
    }
}

impl Display for AbsAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.stack.is_root() {
            write!(f, "{}", self.item)
        } else {
            write!(f, "{}.{}", self.stack, self.item)
        }
    }
}

impl FromStr for AbsAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();

        if parts.iter().any(|part| part.is_empty()) {
            return Err(AddrError::Malformed(s.to_string()));
        }

        let mut stack = StackAddr::root();
        let mut rest = parts.as_slice();

        // A "stack.<name>" prefix followed by more segments steps into the
        // nested stack; as the final pair it addresses the call itself.
        while let ["stack", name, tail @ ..] = rest
            && !tail.is_empty()
        {
            stack = stack.child(*name);
            rest = tail;
        }

        let item = match rest {
            ["local", name] => Item::LocalValue(name.to_string()),
            ["output", name] => Item::OutputValue(name.to_string()),
            ["var", name] => Item::InputVariable(name.to_string()),
            ["stack", name] => Item::StackCall(name.to_string()),
            ["component", name] => Item::Component(name.to_string()),
            ["provider", ty, name] => Item::ProviderInstance(ProviderAddr::new(*ty, *name)),
            [kind, ..] => return Err(AddrError::UnknownKind(kind.to_string())),
            [] => return Err(AddrError::Malformed(s.to_string())),
        };

        Ok(AbsAddr { stack, item })
    }
}
