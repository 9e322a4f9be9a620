use crate::domain::CampaignStatus;
use crate::engine::{Campaign, CampaignId, Subscriber};
use crate::telemetry::error_chain_fmt;

/// Opaque backend failure. The core never inspects the cause, only whether
/// an operation succeeded — it must not assume any particular storage.
#[derive(thiserror::Error)]
#[error(transparent)]
pub struct DataSourceError(#[from] anyhow::Error);

impl std::fmt::Debug for DataSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// The persistence contract the dispatch engine is driven by.
/// Implementations own transactional boundaries and cursor state; the
/// core holds no long-lived transaction across a batch.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Campaigns whose status is `running` or ripe-`scheduled`, excluding
    /// any id already in the engine's active set. May return an empty Vec.
    async fn next_campaigns(&self, exclude_ids: &[CampaignId]) -> Result<Vec<Campaign>, DataSourceError>;

    /// Next batch of subscribers for `camp_id`, ordered by id ascending,
    /// starting strictly after the highest id previously delivered for this
    /// campaign. Empty once the campaign's subscriber stream is exhausted.
    async fn next_subscribers(
        &self,
        camp_id: CampaignId,
        limit: usize,
    ) -> Result<Vec<Subscriber>, DataSourceError>;

    /// The authoritative, up-to-date campaign record.
    async fn get_campaign(&self, camp_id: CampaignId) -> Result<Campaign, DataSourceError>;

    /// Persists a status transition. Idempotent.
    async fn update_campaign_status(
        &self,
        camp_id: CampaignId,
        status: CampaignStatus,
    ) -> Result<(), DataSourceError>;

    /// Registers (or looks up) a tracking token for `url`. Stable for the
    /// same URL across calls.
    async fn create_link(&self, url: &str) -> Result<String, DataSourceError>;

    /// Best-effort bookkeeping; failures are logged, never fatal.
    async fn update_last_email_sent(&self, email: &str) -> Result<(), DataSourceError>;

    /// Bumps `sent` and the delivery cursor. `delta` is the actual number of
    /// messages pushed in this batch, never the configured batch size.
    /// Best-effort.
    async fn update_sent_campaign(
        &self,
        camp_id: CampaignId,
        delta: i64,
        last_sub_id: i64,
    ) -> Result<(), DataSourceError>;
}
