//! Static description of a stack tree.
//!
//! A [`StackConfig`] is what a configuration loader produces: every element
//! declared in one stack, with its expressions already parsed, plus the
//! configurations of the nested stacks it calls. It can be built in code
//! with the chained `with_*` methods or deserialized from JSON:
//!
//! ```json
//! {
//!   "locals": { "name": { "value": { "literal": "jackson" } } },
//!   "stacks": {
//!     "child": {
//!       "inputs": { "object": { "name": { "reference": { "local": "name" } } } },
//!       "config": {
//!         "variables": { "name": { "type": "string" } },
//!         "outputs": { "name": { "value": { "reference": { "var": "name" } } } }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! The evaluator only ever reads it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use camino::Utf8Path;
use serde::Deserialize;

use crate::addrs::StackAddr;
use crate::diagnostics::SourceRange;
use crate::error::ConfigError;
use crate::expr::Expr;
use crate::value::{TypeConstraint, Value};

fn empty_object() -> Expr {
    Expr::Object(BTreeMap::new())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    pub variables: BTreeMap<String, VariableDecl>,
    pub locals: BTreeMap<String, LocalDecl>,
    pub outputs: BTreeMap<String, OutputDecl>,
    pub providers: Vec<ProviderDecl>,
    pub stacks: BTreeMap<String, StackCallDecl>,
    pub components: BTreeMap<String, ComponentDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VariableDecl {
    #[serde(rename = "type")]
    pub ty: Option<TypeConstraint>,
    pub default: Option<Value>,
    pub range: Option<SourceRange>,
}

impl VariableDecl {
    pub fn required() -> Self {
        Self::default()
    }

    pub fn with_default(value: impl Into<Value>) -> Self {
        Self {
            default: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn typed(mut self, ty: TypeConstraint) -> Self {
        self.ty = Some(ty);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalDecl {
    pub value: Expr,
    #[serde(default)]
    pub range: Option<SourceRange>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDecl {
    pub value: Expr,
    #[serde(default, rename = "type")]
    pub ty: Option<TypeConstraint>,
    #[serde(default)]
    pub range: Option<SourceRange>,
}

/// A `provider "<type>" "<name>"` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderDecl {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub name: String,
    #[serde(default = "empty_object")]
    pub config: Expr,
    #[serde(default)]
    pub range: Option<SourceRange>,
}

/// A call to a nested stack. `inputs` is evaluated in the calling stack and
/// populates the nested stack's input variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackCallDecl {
    #[serde(default = "empty_object")]
    pub inputs: Expr,
    pub config: Arc<StackConfig>,
    #[serde(default)]
    pub range: Option<SourceRange>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDecl {
    #[serde(default = "empty_object")]
    pub inputs: Expr,
    /// Provider configurations the component uses, keyed by local name. Each
    /// entry must be a provider reference.
    #[serde(default)]
    pub providers: BTreeMap<String, Expr>,
    #[serde(default)]
    pub range: Option<SourceRange>,
}

impl StackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON and validates the whole stack tree.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: StackConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(%path, "loaded stack configuration");
        Self::from_json(&json)
    }

    /// Checks element names and provider uniqueness in this stack and every
    /// nested stack.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_at(&StackAddr::root())
    }

    fn validate_at(&self, addr: &StackAddr) -> Result<(), ConfigError> {
        let names = self
            .variables
            .keys()
            .chain(self.locals.keys())
            .chain(self.outputs.keys())
            .chain(self.stacks.keys())
            .chain(self.components.keys());

        for name in names {
            if !is_valid_name(name) {
                return Err(ConfigError::InvalidName(name.clone(), describe(addr)));
            }
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !is_valid_name(&provider.provider_type) || !is_valid_name(&provider.name) {
                let name = format!("{}.{}", provider.provider_type, provider.name);
                return Err(ConfigError::InvalidName(name, describe(addr)));
            }
            if !seen.insert((&provider.provider_type, &provider.name)) {
                let name = format!("provider.{}.{}", provider.provider_type, provider.name);
                return Err(ConfigError::DuplicateProvider(name, describe(addr)));
            }
        }

        for (name, call) in &self.stacks {
            call.config.validate_at(&addr.child(name))?;
        }

        Ok(())
    }

    pub fn provider(&self, provider_type: &str, name: &str) -> Option<&ProviderDecl> {
        self.providers
            .iter()
            .find(|p| p.provider_type == provider_type && p.name == name)
    }

    pub fn with_variable(mut self, name: impl Into<String>, decl: VariableDecl) -> Self {
        self.variables.insert(name.into(), decl);
        self
    }

    pub fn with_local(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.locals.insert(name.into(), LocalDecl { value, range: None });
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.outputs.insert(
            name.into(),
            OutputDecl {
                value,
                ty: None,
                range: None,
            },
        );
        self
    }

    pub fn with_typed_output(
        mut self,
        name: impl Into<String>,
        ty: TypeConstraint,
        value: Expr,
    ) -> Self {
        self.outputs.insert(
            name.into(),
            OutputDecl {
                value,
                ty: Some(ty),
                range: None,
            },
        );
        self
    }

    pub fn with_provider(
        mut self,
        provider_type: impl Into<String>,
        name: impl Into<String>,
        config: Expr,
    ) -> Self {
        self.providers.push(ProviderDecl {
            provider_type: provider_type.into(),
            name: name.into(),
            config,
            range: None,
        });
        self
    }

    pub fn with_stack(mut self, name: impl Into<String>, inputs: Expr, config: StackConfig) -> Self {
        self.stacks.insert(
            name.into(),
            StackCallDecl {
                inputs,
                config: Arc::new(config),
                range: None,
            },
        );
        self
    }

    pub fn with_component<K>(
        mut self,
        name: impl Into<String>,
        inputs: Expr,
        providers: impl IntoIterator<Item = (K, Expr)>,
    ) -> Self
    where
        K: Into<String>,
    {
        self.components.insert(
            name.into(),
            ComponentDecl {
                inputs,
                providers: providers.into_iter().map(|(k, v)| (k.into(), v)).collect(),
                range: None,
            },
        );
        self
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('.')
}

fn describe(addr: &StackAddr) -> String {
    if addr.is_root() {
        "the main stack".into()
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let json = r#"{
            "variables": { "name": { "type": "string", "default": "anon" } },
            "locals": { "greeting": { "value": { "literal": "hi" } } },
            "providers": [ { "type": "test", "name": "main" } ],
            "stacks": {
                "child": {
                    "config": { "outputs": { "x": { "value": { "literal": 1 } } } }
                }
            }
        }"#;
        let config = StackConfig::from_json(json).unwrap();

        assert_eq!(config.variables["name"].ty, Some(TypeConstraint::String));
        assert_eq!(config.variables["name"].default, Some(Value::string("anon")));
        assert_eq!(config.locals["greeting"].value, Expr::literal("hi"));
        assert_eq!(config.provider("test", "main").unwrap().config, empty_object());
        assert!(config.stacks["child"].config.outputs.contains_key("x"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = StackConfig::from_json(r#"{ "resources": {} }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_duplicate_provider() {
        let nested = StackConfig::new()
            .with_provider("test", "a", empty_object())
            .with_provider("test", "a", empty_object());
        let config = StackConfig::new().with_stack("child", empty_object(), nested);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateProvider(name, stack))
                if name == "provider.test.a" && stack == "stack.child"
        ));
    }

    #[test]
    fn test_invalid_name() {
        let config = StackConfig::new().with_local("a.b", Expr::literal(1));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidName(name, _)) if name == "a.b"
        ));
    }
}
