//! # AI Provider Contract
//!
//! Uniform async surface over heterogeneous model backends. The gateway only ever
//! talks to `AiProvider`; wire formats, auth, and endpoint shapes stay inside the
//! individual adapters.

use async_trait::async_trait;
use std::time::Duration;

/// A single completion returned by a provider.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Tokens the provider reports consuming, when its API exposes that.
    pub tokens_used: Option<u64>,
}

/// Provider call failures, normalized so failover logic does not need to know
/// which backend produced them.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider HTTP error: {0}")]
    Http(String),

    #[error("Provider returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider is not available: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            // The per-call deadline is enforced upstream; this covers the HTTP
            // client's own transport timeout.
            ProviderError::Timeout(Duration::ZERO)
        } else if error.is_connect() {
            ProviderError::Unavailable(error.to_string())
        } else {
            ProviderError::Http(error.to_string())
        }
    }
}

/// Async model backend. Implementations must be cheap to call `is_ready` on
/// because the gateway probes it before every chunk attempt.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable identifier recorded on every comment this provider produces.
    fn name(&self) -> &str;

    /// Model the adapter is configured to invoke.
    fn model(&self) -> &str;

    /// Whether the adapter has everything it needs to attempt a call. A false
    /// here skips the provider without burning an attempt.
    fn is_ready(&self) -> bool;

    /// Run one completion with a hard deadline.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Completion, ProviderError>;
}
