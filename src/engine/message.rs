use crate::engine::{Campaign, Subscriber};

/// A single recipient instance of a campaign, created in the fetch loop and
/// consumed exactly once by a worker. `campaign` is a cheap
/// clone (it owns only an `Arc<tera::Tera>` and a handful of `String`s) so
/// the message can outlive the active-set entry it was built from — workers
/// must tolerate that.
#[derive(Debug, Clone)]
pub struct CampaignMessage {
    pub campaign: Campaign,
    pub subscriber: Subscriber,

    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: Vec<u8>,
    pub alt_body: Vec<u8>,
    pub unsubscribe_url: String,
}

/// A generic, non-campaign message pushed via `Manager::push_message`.
/// Errors pushing these are logged but
/// never reported to the error aggregator, so they cannot pause a campaign.
#[derive(Debug, Clone)]
pub struct AdHocMessage {
    pub messenger: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub content_type: crate::domain::ContentType,
    pub body: Vec<u8>,
    pub alt_body: Vec<u8>,
}
