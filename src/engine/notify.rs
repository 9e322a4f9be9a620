use crate::domain::CampaignStatus;
use crate::engine::CampaignId;

/// The structured payload handed to `NotifySink::notify`: a mapping of
/// campaign id, name, status, sent/to_send counters, and a reason string.
#[derive(Debug, Clone)]
pub struct NotificationPayload {
    pub campaign_id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    pub sent: i64,
    pub to_send: i64,
    pub reason: String,
}

/// External collaborator the engine calls on campaign pause/finish/cancel/
/// admission-failure. Modelled as a trait object rather than a
/// bare function type so implementations can hold state (an SMTP client, a
/// Slack webhook handle, ...).
#[async_trait::async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify(&self, subject: &str, payload: NotificationPayload) -> Result<(), anyhow::Error>;
}
