use replayscan_core::config::ProviderConfig;
use replayscan_core::Config;

use crate::{AnthropicProvider, OpenAIProvider, Provider};

/// Base URL for the OpenAI-compatible providers known by name.
fn default_api_base(provider_name: &str) -> &'static str {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "ollama" => "http://localhost:11434/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Provider name implied by a model string, if any.
pub fn infer_provider_from_model(model: &str) -> Option<&'static str> {
    if model.starts_with("anthropic/") || model.starts_with("claude-") {
        Some("anthropic")
    } else if model.starts_with("openai/")
        || model.starts_with("gpt-")
        || model.starts_with("o1")
        || model.starts_with("o3")
    {
        Some("openai")
    } else if model.starts_with("deepseek") {
        Some("deepseek")
    } else if model.starts_with("groq/") {
        Some("groq")
    } else if model.starts_with("ollama/") {
        Some("ollama")
    } else {
        None
    }
}

fn has_key(cfg: &ProviderConfig) -> bool {
    !cfg.api_key.is_empty() && cfg.api_key != "dummy"
}

fn fallback_provider_name(config: &Config) -> Option<&'static str> {
    ["anthropic", "openai", "openrouter", "deepseek", "groq"]
        .into_iter()
        .find(|name| config.providers.get(*name).map(has_key).unwrap_or(false))
}

/// Build the analysis provider from `config.analysis`.
///
/// Resolution order: `analysis.provider`, then the model prefix, then the
/// first provider with an API key. An explicitly named provider must be
/// configured with a key (ollama excepted).
pub fn create_provider(config: &Config) -> anyhow::Result<Box<dyn Provider>> {
    let analysis = &config.analysis;
    let model = analysis.model.as_str();
    let explicit_provider = analysis.provider.as_deref();

    let effective_provider: &str = if let Some(ep) = explicit_provider {
        ep
    } else if let Some(inferred) = infer_provider_from_model(model) {
        inferred
    } else if let Some(fallback) = fallback_provider_name(config) {
        fallback
    } else {
        return Err(anyhow::anyhow!(
            "No LLM provider configured. Set 'analysis.provider', use a recognized model prefix \
             (e.g. 'claude-...', 'gpt-4o'), or add an API key to the providers section."
        ));
    };

    let provider_cfg = config.providers.get(effective_provider);
    if effective_provider != "ollama" {
        match provider_cfg {
            None => {
                return Err(anyhow::anyhow!(
                    "Provider '{}' is selected but not found in providers section",
                    effective_provider
                ));
            }
            Some(cfg) if !has_key(cfg) => {
                return Err(anyhow::anyhow!(
                    "Provider '{}' is selected but has no API key",
                    effective_provider
                ));
            }
            _ => {}
        }
    }

    let empty_cfg = ProviderConfig::default();
    let resolved_cfg = provider_cfg.unwrap_or(&empty_cfg);
    let provider_proxy = resolved_cfg.proxy.as_deref();
    let global_proxy = config.network.proxy.as_deref();
    let no_proxy = &config.network.no_proxy;

    match effective_provider {
        "anthropic" => Ok(Box::new(AnthropicProvider::new_with_proxy(
            &resolved_cfg.api_key,
            resolved_cfg.api_base.as_deref(),
            model,
            analysis.max_tokens,
            analysis.temperature,
            provider_proxy,
            global_proxy,
            no_proxy,
        ))),
        other => {
            let api_base = resolved_cfg
                .api_base
                .as_deref()
                .unwrap_or_else(|| default_api_base(other));
            let model = model.strip_prefix("ollama/").unwrap_or(model);
            Ok(Box::new(OpenAIProvider::new_with_proxy(
                &resolved_cfg.api_key,
                Some(api_base),
                model,
                analysis.max_tokens,
                analysis.temperature,
                provider_proxy,
                global_proxy,
                no_proxy,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_key(config: &mut Config, name: &str, key: &str) {
        config.providers.insert(
            name.to_string(),
            ProviderConfig {
                api_key: key.to_string(),
                ..Default::default()
            },
        );
    }

    #[test]
    fn test_infer_provider_from_model() {
        assert_eq!(infer_provider_from_model("anthropic/claude-sonnet-4"), Some("anthropic"));
        assert_eq!(infer_provider_from_model("claude-3-5-sonnet"), Some("anthropic"));
        assert_eq!(infer_provider_from_model("gpt-4o-mini"), Some("openai"));
        assert_eq!(infer_provider_from_model("deepseek-chat"), Some("deepseek"));
        assert_eq!(infer_provider_from_model("ollama/llama3"), Some("ollama"));
        assert_eq!(infer_provider_from_model("some-unknown-model"), None);
    }

    #[test]
    fn test_explicit_provider_wins() {
        let mut config = Config::default();
        with_key(&mut config, "openai", "sk-test");
        config.analysis.model = "claude-3-5-sonnet".to_string();
        config.analysis.provider = Some("openai".to_string());
        assert!(create_provider(&config).is_ok());
    }

    #[test]
    fn test_model_prefix_needs_key() {
        let mut config = Config::default();
        config.analysis.model = "claude-3-5-sonnet".to_string();
        assert!(create_provider(&config).is_err());
        with_key(&mut config, "anthropic", "sk-ant");
        assert!(create_provider(&config).is_ok());
    }

    #[test]
    fn test_fallback_to_first_key() {
        let mut config = Config::default();
        config.analysis.model = "custom-model".to_string();
        assert!(create_provider(&config).is_err());
        with_key(&mut config, "deepseek", "sk-ds");
        assert!(create_provider(&config).is_ok());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let mut config = Config::default();
        config.analysis.model = "ollama/llama3".to_string();
        assert!(create_provider(&config).is_ok());
    }
}
