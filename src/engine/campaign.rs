use crate::domain::{CampaignStatus, ContentType};
use crate::engine::Subscriber;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Template names registered into a campaign's compiled `Tera` instance:
/// a base/content pair plus a third slot for the (optional) subject
/// template.
pub const SUBJECT_TPL: &str = "subject";
pub const BODY_TPL: &str = "body";
pub const ALT_BODY_TPL: &str = "alt_body";

/// Recipient-facing URLs substitute this in the subscriber position when
/// `IndividualTracking` is disabled.
pub const ANONYMOUS_SUBSCRIBER_UUID: Uuid = Uuid::nil();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CampaignId(pub i64);

impl std::fmt::Display for CampaignId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The campaign record as returned by a `DataSource`. `template` is `None`
/// until the campaign is admitted, at which
/// point the manager compiles it and produces a new `Campaign` value
/// carrying the compiled handle — the engine never mutates a `Campaign` in
/// place, it replaces the `ActiveSet` entry.
#[derive(Clone)]
pub struct Campaign {
    // Intentionally no `#[derive(Debug)]`: `tera::Tera` (behind `template`)
    // holds boxed `Fn` trait objects that aren't `Debug`. See the manual
    // impl below, which logs every field except the compiled template.
    pub id: CampaignId,
    pub uuid: Uuid,
    pub name: String,

    pub subject: String,
    pub subject_is_template: bool,
    pub body: String,
    pub alt_body: Option<String>,
    pub alt_body_is_template: bool,
    pub content_type: ContentType,

    pub messenger: String,
    pub from_email: String,
    pub send_at: Option<DateTime<Utc>>,

    pub status: CampaignStatus,
    pub to_send: i64,
    pub sent: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    pub(crate) template: Option<Arc<tera::Tera>>,
    /// The working slice of subscribers fetched but not yet pushed onto the
    /// campaign-message queue. In practice this drains to empty every pass — a full batch
    /// is always pushed before the fetch loop re-observes the campaign —
    /// but the field exists so a future batching policy that defers part of
    /// a batch has somewhere to put the remainder.
    pub(crate) buffered: Vec<Subscriber>,
}

/// Parameters a `DataSource` supplies for a freshly-read campaign, before
/// the engine has admitted and compiled it.
pub struct NewCampaign {
    pub id: CampaignId,
    pub uuid: Uuid,
    pub name: String,
    pub subject: String,
    pub subject_is_template: bool,
    pub body: String,
    pub alt_body: Option<String>,
    pub alt_body_is_template: bool,
    pub content_type: ContentType,
    pub messenger: String,
    pub from_email: String,
    pub send_at: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
    pub to_send: i64,
    pub sent: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Builds an uncompiled, not-yet-admitted `Campaign` from the fields a
    /// `DataSource` implementation reads off its backing store.
    pub fn new(fields: NewCampaign) -> Self {
        Self {
            id: fields.id,
            uuid: fields.uuid,
            name: fields.name,
            subject: fields.subject,
            subject_is_template: fields.subject_is_template,
            body: fields.body,
            alt_body: fields.alt_body,
            alt_body_is_template: fields.alt_body_is_template,
            content_type: fields.content_type,
            messenger: fields.messenger,
            from_email: fields.from_email,
            send_at: fields.send_at,
            status: fields.status,
            to_send: fields.to_send,
            sent: fields.sent,
            started_at: fields.started_at,
            updated_at: fields.updated_at,
            template: None,
            buffered: Vec::new(),
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.template.is_some()
    }

    pub fn with_compiled_template(&self, template: tera::Tera) -> Campaign {
        let mut c = self.clone();
        c.template = Some(Arc::new(template));
        c
    }
}

impl std::fmt::Debug for Campaign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Campaign")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("messenger", &self.messenger)
            .field("status", &self.status)
            .field("to_send", &self.to_send)
            .field("sent", &self.sent)
            .field("is_compiled", &self.is_compiled())
            .finish_non_exhaustive()
    }
}
