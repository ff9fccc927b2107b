use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{resolve_api_key, AppConfig, LlmConfig};
use crate::errors::{RagError, RagResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(llm_config: LlmConfig) -> Self {
        Self {
            providers: HashMap::new(),
            active: llm_config.active_provider.clone(),
            llm_config,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> RagResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            RagError::Config(format!(
                "Active provider '{}' not found in registry",
                self.active
            ))
        })
    }

    /// Return the provider and call configuration for a named role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature and `stream = true`
    pub fn call_config_for_role(&self, role: &str) -> RagResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let role_entry = match role {
            "chat" => self.llm_config.roles.chat.as_ref(),
            "tools" => self.llm_config.roles.tools.as_ref(),
            other => {
                tracing::warn!(role = other, "unknown role, falling back to active provider");
                None
            }
        };

        if let Some(entry) = role_entry {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                RagError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role, entry.provider
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
                role = role,
                provider = %entry.provider,
                model = %entry.model,
                stream = entry.stream,
                temperature = temperature,
                "resolved role config"
            );
            return Ok((
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    stream: entry.stream,
                    temperature,
                    response_format: None,
                },
            ));
        }

        let provider = self.get_active()?;
        let (model, temperature) = self
            .llm_config
            .providers
            .get(&self.active)
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        tracing::debug!(
            role = role,
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((
            provider,
            CallConfig {
                model,
                stream: true,
                temperature,
                response_format: None,
            },
        ))
    }

    /// Build a registry from the loaded app config, one OpenAI-compatible client per provider.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new(config.llm.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = resolve_api_key(id, entry);
            if api_key.is_empty() {
                tracing::debug!(provider = %id, "no API key resolved");
            }
            let provider = OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            registry.register(Arc::new(provider));
        }
        registry
    }
}
