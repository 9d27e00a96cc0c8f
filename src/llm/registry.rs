use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig, RoleEntry};
use crate::errors::{PinpointError, PinpointResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Model roles used by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Short numeric answers: OCR disambiguation and window selection.
    Routing,
    /// Image understanding for visual localisation.
    Vision,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Routing => "routing",
            Role::Vision => "vision",
        }
    }
}

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn get_active(&self) -> PinpointResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            PinpointError::BackendUnavailable(format!(
                "active provider '{}' not found in registry",
                self.active
            ))
        })
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Return the provider and call configuration for a role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature
    pub fn call_config_for_role(
        &self,
        role: Role,
    ) -> PinpointResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let role_entry: Option<&RoleEntry> = match role {
            Role::Routing => self.llm_config.roles.routing.as_ref(),
            Role::Vision => self.llm_config.roles.vision.as_ref(),
        };

        if let Some(entry) = role_entry {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                PinpointError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role.as_str(),
                    entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.1)
            });
            tracing::debug!(
                role = role.as_str(),
                provider = %entry.provider,
                model = %entry.model,
                temperature = temperature,
                "resolved role config"
            );
            return Ok((
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    temperature,
                    max_tokens: entry.max_tokens,
                },
            ));
        }

        // Fallback: active provider, provider-level defaults
        let provider = self.get_active()?;
        let entry = self.llm_config.providers.get(&self.active);
        let (model, temperature) = entry
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        tracing::debug!(
            role = role.as_str(),
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((provider, CallConfig { model, temperature, max_tokens: None }))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `PINPOINT_<ID>_API_KEY`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(api_key_var(id))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            let provider =
                OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            registry.register(Arc::new(provider));
        }
        tracing::debug!(providers = ?registry.list_names(), active = %registry.active, "provider registry built");
        registry
    }
}

fn api_key_var(id: &str) -> String {
    format!("PINPOINT_{}_API_KEY", id.to_uppercase().replace('-', "_"))
}
