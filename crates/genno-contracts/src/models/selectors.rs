use thiserror::Error;

use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No models available for capability '{0}'.")]
pub struct ModelSelectionError(pub Capability);

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Picks the requested model when it exists and has the capability,
    /// otherwise the first registered model that does, with a reason.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, ModelSelectionError> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = match requested {
            Some(name) => {
                if let Some(model) = self.registry.ensure(name, capability) {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                format!("Requested model '{name}' unavailable for capability '{capability}'.")
            }
            None => "No model specified; using default.".to_string(),
        };

        let model = self
            .registry
            .by_capability(capability)
            .into_iter()
            .next()
            .ok_or(ModelSelectionError(capability))?;
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}
