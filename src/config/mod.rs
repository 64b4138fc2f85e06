//! # Typed Configuration
//!
//! Every tunable in the crate lives here, with defaults that run the whole
//! pipeline locally against an in-memory broker and a local Ollama daemon.
//! Loading and environment layering live in [`loader`].

pub mod loader;

pub use loader::ConfigManager;

use crate::dead_letter::RetryPolicy;
use crate::error::ReviewFlowError;
use crate::gateway::TokenBudget;
use crate::orchestration::ConsumerSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewFlowConfig {
    pub topics: TopicsConfig,
    pub token_budget: TokenBudgetConfig,
    pub providers: ProvidersConfig,
    pub retry: RetryConfig,
    pub idempotency: IdempotencyConfig,
    pub consumer: ConsumerConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub pr_received: String,
    pub context_enriched: String,
    pub review_completed: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            pr_received: crate::events::topics::PR_RECEIVED.to_string(),
            context_enriched: crate::events::topics::CONTEXT_ENRICHED.to_string(),
            review_completed: crate::events::topics::REVIEW_COMPLETED.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudgetConfig {
    pub max_tokens_per_request: usize,
    pub prompt_overhead: usize,
    pub max_completion_tokens: u32,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        let budget = TokenBudget::default();
        Self {
            max_tokens_per_request: budget.max_tokens_per_request,
            prompt_overhead: budget.prompt_overhead,
            max_completion_tokens: budget.max_completion_tokens,
        }
    }
}

impl TokenBudgetConfig {
    pub fn to_budget(&self) -> TokenBudget {
        TokenBudget {
            max_tokens_per_request: self.max_tokens_per_request,
            prompt_overhead: self.prompt_overhead,
            max_completion_tokens: self.max_completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Failover order. Entries name configured providers below.
    pub preference: Vec<String>,
    pub ollama: OllamaConfig,
    pub gemini: GeminiConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            preference: vec!["ollama".to_string(), "gemini".to_string()],
            ollama: OllamaConfig::default(),
            gemini: GeminiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub model: String,
    /// Empty key leaves the provider configured but not ready, so the gateway
    /// skips it without failing startup.
    pub api_key: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter_factor: self.jitter_factor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 24 * 60 * 60,
            max_entries: 10_000,
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub worker_count: usize,
    pub batch_size: usize,
    pub visibility_timeout_seconds: u64,
    pub poll_interval_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        let settings = ConsumerSettings::default();
        Self {
            worker_count: settings.worker_count,
            batch_size: settings.batch_size,
            visibility_timeout_seconds: settings.visibility_timeout.as_secs(),
            poll_interval_ms: settings.poll_interval.as_millis() as u64,
        }
    }
}

impl ConsumerConfig {
    pub fn to_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            worker_count: self.worker_count,
            batch_size: self.batch_size,
            visibility_timeout: Duration::from_secs(self.visibility_timeout_seconds),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub max_concurrent_requests: usize,
    /// Deadline for a single provider call.
    pub call_timeout_seconds: u64,
    /// Deadline over one whole review generation.
    pub request_timeout_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            call_timeout_seconds: 30,
            request_timeout_seconds: 90,
        }
    }
}

impl GatewayConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl ReviewFlowConfig {
    /// Reject configurations that would misbehave at runtime rather than
    /// failing loudly here.
    pub fn validate(&self) -> Result<(), ReviewFlowError> {
        if self.providers.preference.is_empty() {
            return Err(ReviewFlowError::ConfigurationError(
                "providers.preference must name at least one provider".to_string(),
            ));
        }
        for name in &self.providers.preference {
            if name != "ollama" && name != "gemini" {
                return Err(ReviewFlowError::ConfigurationError(format!(
                    "providers.preference names unknown provider '{name}'"
                )));
            }
        }

        if self.token_budget.max_tokens_per_request <= self.token_budget.prompt_overhead {
            return Err(ReviewFlowError::ConfigurationError(
                "token_budget.max_tokens_per_request must exceed prompt_overhead".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ReviewFlowError::ConfigurationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ReviewFlowError::ConfigurationError(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ReviewFlowError::ConfigurationError(
                "retry.jitter_factor must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.consumer.worker_count == 0 || self.consumer.batch_size == 0 {
            return Err(ReviewFlowError::ConfigurationError(
                "consumer.worker_count and consumer.batch_size must be at least 1".to_string(),
            ));
        }
        // A visibility timeout shorter than the request deadline redelivers
        // messages that are still being processed.
        if self.consumer.visibility_timeout_seconds <= self.gateway.request_timeout_seconds {
            return Err(ReviewFlowError::ConfigurationError(
                "consumer.visibility_timeout_seconds must exceed gateway.request_timeout_seconds"
                    .to_string(),
            ));
        }

        if self.gateway.max_concurrent_requests == 0 {
            return Err(ReviewFlowError::ConfigurationError(
                "gateway.max_concurrent_requests must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
