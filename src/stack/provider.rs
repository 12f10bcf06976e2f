use std::sync::Arc;

use crate::addrs::{AbsAddr, Item, ProviderAddr};
use crate::config::ProviderDecl;
use crate::diagnostics::Diagnostic;
use crate::engine::TaskContext;
use crate::stack::{Evaluated, NodeKey, Phase, ProviderClient, Stack};
use crate::value::Value;

/// A `provider "<type>" "<name>"` block.
///
/// Evaluating it evaluates its configuration and, when the phase allows it,
/// configures a client through the provider factory registered for its type.
/// Memoization per (provider, phase) guarantees the factory runs at most once
/// for each phase however many elements use the provider. The value other
/// elements read is the configuration object.
#[derive(Clone)]
pub struct ProviderInstance {
    stack: Stack,
    provider: ProviderAddr,
    decl: ProviderDecl,
}

impl ProviderInstance {
    pub(crate) fn new(stack: Stack, decl: ProviderDecl) -> Self {
        Self {
            stack,
            provider: ProviderAddr::new(&decl.provider_type, &decl.name),
            decl,
        }
    }

    pub fn provider_addr(&self) -> &ProviderAddr {
        &self.provider
    }

    pub fn addr(&self) -> AbsAddr {
        AbsAddr::new(
            self.stack.addr().clone(),
            Item::ProviderInstance(self.provider.clone()),
        )
    }

    /// The client configured during `phase`, if evaluation got that far.
    pub fn client(&self, phase: Phase) -> Option<Arc<dyn ProviderClient>> {
        self.stack.main().provider_client(&self.addr(), phase)
    }

    pub async fn check_value(&self, ctx: &TaskContext, phase: Phase) -> Evaluated {
        let this = self.clone();

        self.stack
            .main()
            .memoized(ctx, NodeKey::Node(self.addr()), phase, move |ctx| async move {
                let range = this.decl.range.as_ref();
                let (config, mut diags) = this
                    .stack
                    .eval_expr(&ctx, &this.decl.config, phase, range)
                    .await;

                if !matches!(config, Value::Object(_) | Value::Unknown) {
                    diags.push(
                        Diagnostic::error(
                            "Invalid provider configuration",
                            format!(
                                "The configuration for {} must be an object, but have {}.",
                                this.provider,
                                config.type_name()
                            ),
                        )
                        .with_subject(range),
                    );
                }

                let config = phase.validate(config, &mut diags, range);

                if diags.has_errors() || !phase.allows_side_effects() {
                    return (config, diags);
                }
                if !config.is_wholly_known() {
                    tracing::debug!(provider = %this.provider, %phase, "configuration not known yet, not configuring");
                    return (config, diags);
                }

                if let Err(diag) = this.configure(&config, phase).await {
                    diags.push(diag.with_subject(range));
                    return (Value::Unknown, diags);
                }

                (config, diags)
            })
            .await
    }

    async fn configure(&self, config: &Value, phase: Phase) -> Result<(), Diagnostic> {
        let main = self.stack.main();
        let provider_type = self.provider.provider_type.clone();

        let Some(factory) = main.options().providers.get(&provider_type).cloned() else {
            return Err(Diagnostic::error(
                "Provider unavailable",
                format!("No provider factory is registered for provider type {provider_type:?}."),
            ));
        };

        tracing::info!(provider = %self.provider, %phase, "configuring provider");

        let config = config.clone();
        let result =
            tokio::task::spawn_blocking(move || factory.configure(&provider_type, &config)).await;

        match result {
            Ok(Ok(client)) => {
                main.register_client(self.addr(), phase, client);
                Ok(())
            }
            Ok(Err(err)) => Err(Diagnostic::error(
                "Failed to configure provider",
                format!("{}: {err:#}", self.provider),
            )),
            Err(err) => Err(Diagnostic::error(
                "Failed to configure provider",
                format!("{}: the provider factory did not finish: {err}", self.provider),
            )),
        }
    }
}
