//! LLM client factory.
//!
//! Centralizes provider-specific logic for creating LLM clients.

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{AgentError, Result};
use crate::llm::openai::DEFAULT_BASE_URL;
use crate::llm::{LlmClient, LlmProvider, MockLlmClient, OpenAiClient, OpenAiConfig};

/// Creates an LLM client from configuration.
///
/// The API key is resolved in order:
/// 1. `llm.api_key` from the config file
/// 2. `OPENAI_API_KEY` environment variable
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    create_client_with(config, |key| std::env::var(key).ok())
}

/// Same as [`create_client`], reading environment values through `lookup`.
pub fn create_client_with(
    config: &LlmConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn LlmClient>> {
    let provider: LlmProvider = config.provider.parse().map_err(AgentError::config)?;

    match provider {
        LlmProvider::OpenAi => {
            let key = config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()))
                .ok_or_else(|| {
                    AgentError::config("No API key configured. Set OPENAI_API_KEY or llm.api_key.")
                })?;

            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

            let client_config = OpenAiConfig::new(key, config.model.clone())
                .with_base_url(base_url)
                .with_timeout(config.timeout_secs)
                .with_sampling(config.temperature, config.max_tokens);

            tracing::debug!(
                model = %client_config.model,
                base_url = %client_config.base_url,
                "Created chat-completions client"
            );
            Ok(Arc::new(OpenAiClient::new(client_config)?))
        }
        LlmProvider::Mock => Ok(Arc::new(MockLlmClient::new())),
    }
}
