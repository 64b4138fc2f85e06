//! # Event Payload Types
//!
//! Typed payload for each domain event exchanged between services. These are pure
//! data: the shapes mirror what the webhook, context, review, and integration
//! services agree on, one struct per event type.

use crate::correlation::CorrelationId;
use serde::{Deserialize, Serialize};

/// Webhook action that produced a `PullRequestReceived` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAction {
    Opened,
    Synchronize,
    Reopened,
    Closed,
    Edited,
}

impl WebhookAction {
    /// Only content-changing actions start a review cycle.
    pub fn triggers_review(&self) -> bool {
        matches!(
            self,
            WebhookAction::Opened | WebhookAction::Synchronize | WebhookAction::Reopened
        )
    }
}

/// Emitted by the webhook ingress when a pull request event arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestReceived {
    pub repository_owner: String,
    pub repository_name: String,
    pub pull_request_number: u64,
    pub action: WebhookAction,
    pub title: String,
    pub author: String,
    pub commit_sha: String,
}

/// Outcome of diff collection for a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    Completed,
    Failed,
}

/// Emitted by the context service once the diff for a pull request has been fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEnriched {
    pub context_id: String,
    pub repository_owner: String,
    pub repository_name: String,
    pub pull_request_number: u64,
    pub title: String,
    pub diff: String,
    pub status: ContextStatus,
}

/// A single review remark anchored to a location in the diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub path: String,
    pub line: u64,
    pub text: String,
    /// Which chunk of the (possibly split) diff produced this comment.
    pub chunk_index: usize,
    /// Provider that generated the comment, recorded per chunk because failover
    /// can serve different chunks from different providers.
    pub provider: String,
}

/// Token accounting for one review, measured with the gateway's own tokenizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Emitted by the review orchestrator after the gateway produced review output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCompleted {
    pub review_id: String,
    pub context_id: String,
    pub repository_owner: String,
    pub repository_name: String,
    pub pull_request_number: u64,
    pub comments: Vec<ReviewComment>,
    pub provider_used: String,
    pub token_usage: TokenUsage,
    /// Chunk indices that no provider could serve; empty on full success.
    #[serde(default)]
    pub failed_chunks: Vec<usize>,
}

/// Emitted when a review could not be produced, so integration can surface the
/// failure on the pull request instead of going silent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFailed {
    pub review_id: String,
    pub context_id: String,
    pub repository_owner: String,
    pub repository_name: String,
    pub pull_request_number: u64,
    pub error_message: String,
}

/// The payload union carried by an [`crate::events::EventEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    PullRequestReceived(PullRequestReceived),
    ContextEnriched(ContextEnriched),
    ReviewCompleted(ReviewCompleted),
    ReviewFailed(ReviewFailed),
}

/// Immutable input to one review generation. Rebuilt from the originating event on
/// every retry so retried attempts never see partial state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequest {
    pub correlation_id: CorrelationId,
    pub diff_chunks: Vec<crate::gateway::DiffChunk>,
    pub metadata: ReviewRequestMetadata,
}

/// Context the gateway folds into prompts and logging.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequestMetadata {
    pub repository_owner: String,
    pub repository_name: String,
    pub pull_request_number: u64,
    pub title: String,
}

/// Output of one review generation, at most one per request under normal operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewResult {
    pub correlation_id: CorrelationId,
    pub comments: Vec<ReviewComment>,
    pub provider_used: String,
    pub token_usage: TokenUsage,
    pub failed_chunks: Vec<usize>,
}
