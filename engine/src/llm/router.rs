//! LLM Router
//!
//! Ranks the configured providers for a request and calls them in order
//! with a per-call timeout, failing over on error. A failed request is never
//! retried against the same provider; the caller decides whether to retry.

use super::{Completion, LLMError, LLMProvider, Message};
use crate::config::LLMConfig;
use std::sync::Arc;
use std::time::Duration;

/// Sensitivity profile of a request
#[derive(Debug, Clone)]
pub struct TaskProfile {
    /// Sensitivity score (0.0-1.0); higher means more private content
    pub sensitivity: f64,

    /// Estimated token count for the request
    pub estimated_tokens: usize,
}

impl TaskProfile {
    pub fn new(sensitivity: f64, estimated_tokens: usize) -> Self {
        Self {
            sensitivity: sensitivity.clamp(0.0, 1.0),
            estimated_tokens,
        }
    }
}

/// Router over the registered providers
pub struct LLMRouter {
    providers: Vec<Box<dyn LLMProvider>>,
    config: Arc<LLMConfig>,
}

impl LLMRouter {
    pub fn new(providers: Vec<Box<dyn LLMProvider>>, config: Arc<LLMConfig>) -> Self {
        Self { providers, config }
    }

    /// Names of the registered providers, in registration order
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn analyze_task(&self, messages: &[Message]) -> TaskProfile {
        let sensitivity = self.calculate_sensitivity(messages);
        let estimated_tokens = messages.iter().map(|m| m.content.len()).sum::<usize>() / 4;
        TaskProfile::new(sensitivity, estimated_tokens)
    }

    /// Score private content: credentials, keys, personal data, dotfiles
    fn calculate_sensitivity(&self, messages: &[Message]) -> f64 {
        const SENSITIVE_KEYWORDS: &[&str] = &[
            "password",
            "credential",
            "secret",
            "token",
            "api_key",
            "private_key",
            "ssh",
            ".env",
            "ssn",
            "bank",
        ];

        let total_content: String = messages
            .iter()
            .map(|m| m.content.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        let hits = SENSITIVE_KEYWORDS
            .iter()
            .filter(|k| total_content.contains(*k))
            .count();

        (hits as f64 * 0.2).min(1.0)
    }

    /// Rank providers (best first)
    ///
    /// 1. The configured default provider
    /// 2. Local providers when the request is sensitive
    /// 3. Cheaper providers
    ///
    /// With the shipped config (default `ollama`, registered first) every
    /// request tries the local provider first. A cloud default only loses
    /// its place to a local provider when sensitivity crosses
    /// `sensitivity_threshold`.
    pub fn rank_providers(&self, profile: &TaskProfile) -> Vec<&dyn LLMProvider> {
        let mut providers: Vec<&dyn LLMProvider> =
            self.providers.iter().map(|b| b.as_ref()).collect();

        let default_provider = &self.config.default_provider;
        let sensitive = profile.sensitivity > self.config.sensitivity_threshold;

        let score = |p: &dyn LLMProvider| {
            let mut s = 0.0_f64;
            if p.name() == default_provider {
                s += 200.0;
            }
            if sensitive && p.is_local() {
                s += 300.0;
            }
            s - p.estimated_cost(profile.estimated_tokens) * 1000.0
        };

        // Stable sort keeps registration order among equal scores
        providers.sort_by(|a, b| {
            score(*b)
                .partial_cmp(&score(*a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        providers
    }

    fn timeout_for(&self, provider: &dyn LLMProvider) -> u64 {
        if provider.is_local() {
            self.config.local_timeout_secs
        } else {
            self.config.cloud_timeout_secs
        }
    }

    /// Call providers with automatic failover
    ///
    /// Returns the completion and the name of the provider that produced it.
    /// When every provider fails, the last provider's error is returned.
    pub async fn call(&self, messages: &[Message]) -> super::Result<(Completion, String)> {
        if self.providers.is_empty() {
            return Err(LLMError::ProviderUnavailable(
                "No LLM providers configured".to_string(),
            ));
        }

        let profile = self.analyze_task(messages);
        let ranked = self.rank_providers(&profile);

        let mut last_error = LLMError::ProviderUnavailable("All LLM providers failed".into());
        for provider in ranked {
            let timeout_secs = self.timeout_for(provider);
            tracing::debug!(
                "Attempting provider: {} (timeout: {}s)",
                provider.name(),
                timeout_secs
            );

            let result = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                provider.generate(messages),
            )
            .await;

            match result {
                Ok(Ok(completion)) => {
                    tracing::debug!(
                        "Provider {} succeeded ({} tokens)",
                        provider.name(),
                        completion.tokens
                    );
                    return Ok((completion, provider.name().to_string()));
                }
                Ok(Err(e)) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                    last_error = e;
                }
                Err(_) => {
                    tracing::warn!(
                        "Provider {} timed out after {}s",
                        provider.name(),
                        timeout_secs
                    );
                    last_error = LLMError::Timeout(timeout_secs);
                }
            }
        }

        tracing::error!("All LLM providers exhausted");
        Err(last_error)
    }

    /// Returns (provider_name, is_healthy) for every provider
    pub async fn check_health(&self) -> Vec<(&str, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            let is_healthy = provider.check_health().await;
            results.push((provider.name(), is_healthy));
        }
        results
    }
}
