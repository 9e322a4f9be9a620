use crate::domain::ContentType;
use crate::engine::{Campaign, Subscriber};
use crate::telemetry::error_chain_fmt;
use std::collections::HashMap;

/// Opaque delivery failure. The core does not distinguish retryable from
/// non-retryable causes — both are counted against the per-campaign error
/// budget.
#[derive(thiserror::Error)]
#[error(transparent)]
pub struct TransportError(#[from] anyhow::Error);

impl std::fmt::Debug for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// A fully-rendered message ready to hand to a backend. No further template
/// expansion is permitted past this point.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub content_type: ContentType,
    pub body: Vec<u8>,
    pub alt_body: Vec<u8>,
    pub headers: HashMap<String, String>,
    /// Present for campaign messages, `None` for ad-hoc ones.
    pub campaign: Option<Campaign>,
    pub subscriber: Subscriber,
}

/// A pluggable delivery backend. The dispatcher holds a
/// `messenger name -> Transport` map rather than modelling this through
/// inheritance.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Unique key used by campaigns to select this transport. Stable across
    /// restarts.
    fn name(&self) -> &str;

    /// Delivers `message`. `concurrency_hint` is advisory — transports may
    /// use it to pace themselves internally, but correctness must not
    /// depend on it; the sliding-window limiter is authoritative.
    async fn push(
        &self,
        message: OutboundMessage,
        concurrency_hint: usize,
    ) -> Result<(), TransportError>;

    async fn close(&self);
}
