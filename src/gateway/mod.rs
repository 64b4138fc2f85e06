//! # AI Provider Gateway
//!
//! The single entry point for review generation. The gateway owns everything the
//! rest of the pipeline should not have to care about: token budgeting, diff
//! chunking, provider preference and failover, per-call deadlines, and the
//! concurrency ceiling on in-flight provider work.
//!
//! Failover is per chunk, in configured preference order. A chunk no provider can
//! serve is recorded as failed rather than sinking the whole request; only when
//! every chunk fails does the request itself error.

pub mod chunker;
pub mod gemini;
pub mod ollama;
pub mod provider;
pub mod tokenizer;

pub use chunker::{split_diff, ChunkError, DiffChunk};
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use provider::{AiProvider, Completion, ProviderError};
pub use tokenizer::{HeuristicTokenizer, Tokenizer};

use crate::correlation::CorrelationId;
use crate::events::payloads::{ReviewComment, ReviewRequest, ReviewRequestMetadata, ReviewResult, TokenUsage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Review generation failures surfaced to the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("No provider is available: {0}")]
    ProviderUnavailable(String),

    #[error("Token budget exceeded: {0}")]
    TokenBudgetExceeded(String),

    #[error("All providers exhausted across {chunk_count} chunk(s)")]
    AllProvidersExhausted { chunk_count: usize },
}

/// Token limits applied to every provider request.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    /// Hard ceiling on tokens in one provider call, prompt included.
    pub max_tokens_per_request: usize,
    /// Tokens set aside for the prompt scaffolding around the diff chunk.
    pub prompt_overhead: usize,
    /// Cap on tokens the provider may generate in response.
    pub max_completion_tokens: u32,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            max_tokens_per_request: 8_000,
            prompt_overhead: 500,
            max_completion_tokens: 1_024,
        }
    }
}

impl TokenBudget {
    /// Tokens available to the diff content itself.
    pub fn chunk_budget(&self) -> usize {
        self.max_tokens_per_request
            .saturating_sub(self.prompt_overhead)
    }
}

/// Orchestrates provider calls for one review at a time slot, bounded by a
/// semaphore so a burst of enriched contexts cannot stampede the backends.
pub struct ReviewGateway {
    providers: Vec<Arc<dyn AiProvider>>,
    tokenizer: Box<dyn Tokenizer>,
    budget: TokenBudget,
    call_timeout: Duration,
    limiter: Arc<Semaphore>,
}

impl ReviewGateway {
    /// `providers` is the failover order: earlier entries are preferred.
    pub fn new(
        providers: Vec<Arc<dyn AiProvider>>,
        tokenizer: Box<dyn Tokenizer>,
        budget: TokenBudget,
        max_concurrent_requests: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            tokenizer,
            budget,
            call_timeout,
            limiter: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        }
    }

    /// Plan a review request from a raw diff. Chunking happens here so a retried
    /// event rebuilds its chunks from scratch instead of reusing partial state.
    pub fn build_request(
        &self,
        correlation_id: CorrelationId,
        diff: &str,
        metadata: ReviewRequestMetadata,
    ) -> Result<ReviewRequest, GatewayError> {
        let chunks = split_diff(diff, self.budget.chunk_budget(), self.tokenizer.as_ref())
            .map_err(|e| GatewayError::TokenBudgetExceeded(e.to_string()))?;

        debug!(
            correlation_id = %correlation_id,
            chunk_count = chunks.len(),
            chunk_budget = self.budget.chunk_budget(),
            "Planned review request"
        );

        Ok(ReviewRequest {
            correlation_id,
            diff_chunks: chunks,
            metadata,
        })
    }

    /// Generate review comments for every chunk of the request.
    ///
    /// Chunks that at least one provider serves contribute comments; chunks no
    /// provider can serve land in `failed_chunks`. Errors only when nothing at
    /// all could be generated.
    pub async fn generate_review(
        &self,
        request: &ReviewRequest,
    ) -> Result<ReviewResult, GatewayError> {
        if !self.providers.iter().any(|p| p.is_ready()) {
            return Err(GatewayError::ProviderUnavailable(
                "no configured provider reports ready".to_string(),
            ));
        }

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| GatewayError::ProviderUnavailable("gateway is shutting down".to_string()))?;

        let mut comments = Vec::new();
        let mut failed_chunks = Vec::new();
        let mut usage = TokenUsage::default();
        let mut provider_used: Option<String> = None;

        for chunk in &request.diff_chunks {
            let prompt = build_prompt(&request.metadata, chunk);
            let prompt_tokens = self.tokenizer.count_tokens(&prompt) as u64;

            match self.complete_chunk(request.correlation_id, chunk, &prompt).await {
                Some((provider_name, completion)) => {
                    usage.prompt_tokens += prompt_tokens;
                    usage.completion_tokens +=
                        self.tokenizer.count_tokens(&completion.text) as u64;
                    comments.extend(parse_comments(
                        &completion.text,
                        chunk,
                        &provider_name,
                    ));
                    provider_used.get_or_insert(provider_name);
                }
                None => failed_chunks.push(chunk.index),
            }
        }

        let Some(provider_used) = provider_used else {
            warn!(
                correlation_id = %request.correlation_id,
                chunk_count = request.diff_chunks.len(),
                "Every chunk failed across all providers"
            );
            return Err(GatewayError::AllProvidersExhausted {
                chunk_count: request.diff_chunks.len(),
            });
        };

        info!(
            correlation_id = %request.correlation_id,
            provider = %provider_used,
            comment_count = comments.len(),
            failed_chunk_count = failed_chunks.len(),
            total_tokens = usage.total(),
            "Review generation finished"
        );

        Ok(ReviewResult {
            correlation_id: request.correlation_id,
            comments,
            provider_used,
            token_usage: usage,
            failed_chunks,
        })
    }

    /// Try each ready provider in preference order for one chunk. Returns the
    /// first success, or `None` when every provider failed or timed out.
    async fn complete_chunk(
        &self,
        correlation_id: CorrelationId,
        chunk: &DiffChunk,
        prompt: &str,
    ) -> Option<(String, Completion)> {
        for provider in &self.providers {
            if !provider.is_ready() {
                debug!(
                    correlation_id = %correlation_id,
                    provider = provider.name(),
                    chunk_index = chunk.index,
                    "Skipping provider that is not ready"
                );
                continue;
            }

            let call = provider.complete(
                prompt,
                self.budget.max_completion_tokens,
                self.call_timeout,
            );
            match tokio::time::timeout(self.call_timeout, call).await {
                Ok(Ok(completion)) => {
                    debug!(
                        correlation_id = %correlation_id,
                        provider = provider.name(),
                        chunk_index = chunk.index,
                        provider_reported_tokens = ?completion.tokens_used,
                        "Chunk served"
                    );
                    return Some((provider.name().to_string(), completion));
                }
                Ok(Err(error)) => {
                    warn!(
                        correlation_id = %correlation_id,
                        provider = provider.name(),
                        chunk_index = chunk.index,
                        error = %error,
                        "Provider failed, trying next in preference order"
                    );
                }
                Err(_) => {
                    warn!(
                        correlation_id = %correlation_id,
                        provider = provider.name(),
                        chunk_index = chunk.index,
                        timeout = ?self.call_timeout,
                        "Provider call deadline elapsed, trying next in preference order"
                    );
                }
            }
        }
        None
    }
}

fn build_prompt(metadata: &ReviewRequestMetadata, chunk: &DiffChunk) -> String {
    format!(
        "You are reviewing a pull request for {}/{} (#{}: {}).\n\
         Review the following diff and report concrete problems only.\n\
         Respond with one finding per line, formatted as `path:line: comment`.\n\
         If the diff looks fine, respond with a short overall assessment.\n\n\
         {}",
        metadata.repository_owner,
        metadata.repository_name,
        metadata.pull_request_number,
        metadata.title,
        chunk.content
    )
}

/// Parse `path:line: comment` findings out of a completion. Free-form output that
/// matches no finding line is kept as a single summary comment anchored to the
/// chunk's first file, so reviewer prose is never silently dropped.
fn parse_comments(text: &str, chunk: &DiffChunk, provider: &str) -> Vec<ReviewComment> {
    let mut comments = Vec::new();
    for line in text.lines() {
        let line = line.trim().trim_matches('`');
        if let Some(comment) = parse_finding_line(line, chunk.index, provider) {
            comments.push(comment);
        }
    }

    if comments.is_empty() {
        let summary = text.trim();
        if !summary.is_empty() {
            comments.push(ReviewComment {
                path: chunk.files.first().cloned().unwrap_or_default(),
                line: 0,
                text: summary.to_string(),
                chunk_index: chunk.index,
                provider: provider.to_string(),
            });
        }
    }
    comments
}

fn parse_finding_line(line: &str, chunk_index: usize, provider: &str) -> Option<ReviewComment> {
    // Shape: path ':' line-number ':' space comment. Paths may not contain ':'.
    let (path, rest) = line.split_once(':')?;
    let (line_number, text) = rest.split_once(':')?;
    let line_number: u64 = line_number.trim().parse().ok()?;
    let path = path.trim();
    let text = text.trim();
    if path.is_empty() || text.is_empty() {
        return None;
    }
    Some(ReviewComment {
        path: path.to_string(),
        line: line_number,
        text: text.to_string(),
        chunk_index,
        provider: provider.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Provider that replays a scripted sequence of outcomes.
    struct ScriptedProvider {
        name: String,
        ready: bool,
        responses: Mutex<VecDeque<Result<Completion, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(name: &str, responses: Vec<Result<Completion, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ready: true,
                responses: Mutex::new(responses.into()),
            })
        }

        fn not_ready(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ready: false,
                responses: Mutex::new(VecDeque::new()),
            })
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self) -> &str {
            "scripted"
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn complete(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _timeout: Duration,
        ) -> Result<Completion, ProviderError> {
            self.responses.lock().pop_front().unwrap_or_else(|| {
                Err(ProviderError::Unavailable("script exhausted".to_string()))
            })
        }
    }

    fn ok(text: &str) -> Result<Completion, ProviderError> {
        Ok(Completion {
            text: text.to_string(),
            tokens_used: None,
        })
    }

    fn err() -> Result<Completion, ProviderError> {
        Err(ProviderError::Http("boom".to_string()))
    }

    fn gateway_with(providers: Vec<Arc<dyn AiProvider>>) -> ReviewGateway {
        ReviewGateway::new(
            providers,
            Box::new(HeuristicTokenizer::new()),
            TokenBudget::default(),
            4,
            Duration::from_secs(5),
        )
    }

    fn request_with_chunks(count: usize) -> ReviewRequest {
        let chunks = (0..count)
            .map(|index| DiffChunk {
                index,
                content: format!("diff --git a/src/f{index}.rs b/src/f{index}.rs\n+line\n"),
                files: vec![format!("src/f{index}.rs")],
                token_count: 20,
            })
            .collect();
        ReviewRequest {
            correlation_id: CorrelationId::generate(),
            diff_chunks: chunks,
            metadata: ReviewRequestMetadata {
                repository_owner: "octo".to_string(),
                repository_name: "widgets".to_string(),
                pull_request_number: 7,
                title: "Tighten error handling".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_single_provider_serves_all_chunks() {
        let alpha = ScriptedProvider::new(
            "alpha",
            vec![ok("src/f0.rs:3: prefer ? over unwrap"), ok("src/f1.rs:9: missing test")],
        );
        let gateway = gateway_with(vec![alpha]);

        let result = gateway
            .generate_review(&request_with_chunks(2))
            .await
            .unwrap();
        assert_eq!(result.provider_used, "alpha");
        assert_eq!(result.comments.len(), 2);
        assert!(result.failed_chunks.is_empty());
        assert!(result.token_usage.total() > 0);
    }

    #[tokio::test]
    async fn test_failover_serves_failed_chunk_from_next_provider() {
        // alpha serves chunks 0 and 2 but fails chunk 1; beta picks chunk 1 up.
        let alpha = ScriptedProvider::new(
            "alpha",
            vec![ok("src/f0.rs:1: a"), err(), ok("src/f2.rs:3: c")],
        );
        let beta = ScriptedProvider::new("beta", vec![ok("src/f1.rs:2: b")]);
        let gateway = gateway_with(vec![alpha, beta]);

        let result = gateway
            .generate_review(&request_with_chunks(3))
            .await
            .unwrap();
        assert!(result.failed_chunks.is_empty());
        assert_eq!(result.provider_used, "alpha");

        let by_chunk: Vec<(usize, &str)> = result
            .comments
            .iter()
            .map(|c| (c.chunk_index, c.provider.as_str()))
            .collect();
        assert_eq!(by_chunk, vec![(0, "alpha"), (1, "beta"), (2, "alpha")]);
    }

    #[tokio::test]
    async fn test_partial_failure_records_failed_chunks() {
        let alpha = ScriptedProvider::new("alpha", vec![ok("src/f0.rs:1: fine"), err()]);
        let beta = ScriptedProvider::new("beta", vec![err()]);
        let gateway = gateway_with(vec![alpha, beta]);

        let result = gateway
            .generate_review(&request_with_chunks(2))
            .await
            .unwrap();
        assert_eq!(result.failed_chunks, vec![1]);
        assert_eq!(result.comments.len(), 1);
    }

    #[tokio::test]
    async fn test_every_chunk_failing_is_exhaustion() {
        let alpha = ScriptedProvider::new("alpha", vec![err(), err()]);
        let gateway = gateway_with(vec![alpha]);

        let error = gateway
            .generate_review(&request_with_chunks(2))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            GatewayError::AllProvidersExhausted { chunk_count: 2 }
        ));
    }

    #[tokio::test]
    async fn test_unready_provider_is_skipped_without_an_attempt() {
        let alpha = ScriptedProvider::not_ready("alpha");
        let beta = ScriptedProvider::new("beta", vec![ok("src/f0.rs:5: ok")]);
        let gateway = gateway_with(vec![alpha, beta]);

        let result = gateway
            .generate_review(&request_with_chunks(1))
            .await
            .unwrap();
        assert_eq!(result.provider_used, "beta");
    }

    #[tokio::test]
    async fn test_no_ready_provider_is_unavailable() {
        let gateway = gateway_with(vec![
            ScriptedProvider::not_ready("alpha") as Arc<dyn AiProvider>,
        ]);
        let error = gateway
            .generate_review(&request_with_chunks(1))
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_slow_provider_hits_call_deadline() {
        struct StallingProvider;

        #[async_trait]
        impl AiProvider for StallingProvider {
            fn name(&self) -> &str {
                "stalled"
            }
            fn model(&self) -> &str {
                "stalled"
            }
            fn is_ready(&self) -> bool {
                true
            }
            async fn complete(
                &self,
                _prompt: &str,
                _max_tokens: u32,
                _timeout: Duration,
            ) -> Result<Completion, ProviderError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!("deadline should fire first")
            }
        }

        let gateway = ReviewGateway::new(
            vec![Arc::new(StallingProvider)],
            Box::new(HeuristicTokenizer::new()),
            TokenBudget::default(),
            1,
            Duration::from_millis(20),
        );

        let error = gateway
            .generate_review(&request_with_chunks(1))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            GatewayError::AllProvidersExhausted { chunk_count: 1 }
        ));
    }

    #[test]
    fn test_build_request_splits_large_diffs() {
        let gateway = gateway_with(vec![ScriptedProvider::new("alpha", vec![])
            as Arc<dyn AiProvider>]);
        let line = "+let value = compute_from_parts(left, right, carry_bit);\n".repeat(40);
        let diff: String = (0..30)
            .map(|i| {
                format!(
                    "diff --git a/src/m{i}.rs b/src/m{i}.rs\n--- a/src/m{i}.rs\n+++ b/src/m{i}.rs\n@@ -1,1 +1,40 @@\n{line}"
                )
            })
            .collect();

        let request = gateway
            .build_request(
                CorrelationId::generate(),
                &diff,
                ReviewRequestMetadata {
                    repository_owner: "octo".to_string(),
                    repository_name: "widgets".to_string(),
                    pull_request_number: 1,
                    title: "big change".to_string(),
                },
            )
            .unwrap();
        assert!(request.diff_chunks.len() > 1);
        for chunk in &request.diff_chunks {
            assert!(chunk.token_count <= TokenBudget::default().chunk_budget());
        }
    }

    #[test]
    fn test_free_form_output_becomes_summary_comment() {
        let chunk = DiffChunk {
            index: 0,
            content: String::new(),
            files: vec!["src/lib.rs".to_string()],
            token_count: 0,
        };
        let comments = parse_comments("Looks clean overall, nothing to flag.", &chunk, "alpha");
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].path, "src/lib.rs");
        assert_eq!(comments[0].line, 0);
    }

    #[test]
    fn test_finding_lines_are_parsed() {
        let chunk = DiffChunk {
            index: 2,
            content: String::new(),
            files: vec!["src/a.rs".to_string()],
            token_count: 0,
        };
        let text = "src/a.rs:14: this allocation is avoidable\nnot a finding\nsrc/a.rs:30: missing error context";
        let comments = parse_comments(text, &chunk, "beta");
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].line, 14);
        assert_eq!(comments[1].line, 30);
        assert!(comments.iter().all(|c| c.chunk_index == 2 && c.provider == "beta"));
    }
}
