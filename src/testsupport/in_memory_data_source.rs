//! An in-memory `DataSource` test double (spec.md §8). Holds every
//! campaign's mutable state (status, delivery cursor, sent count) and its
//! subscriber list behind a single `std::sync::Mutex`, which is adequate for
//! the test scenarios this backs — they never contend for it under load.

use crate::domain::CampaignStatus;
use crate::engine::{Campaign, CampaignId, DataSource, DataSourceError, NewCampaign, Subscriber};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// The fields a test needs to seed a campaign with; everything the engine
/// mutates at runtime (status, sent count, delivery cursor) starts at its
/// natural initial value.
pub struct CampaignSeed {
    pub id: CampaignId,
    pub uuid: Uuid,
    pub name: String,
    pub subject: String,
    pub subject_is_template: bool,
    pub body: String,
    pub alt_body: Option<String>,
    pub alt_body_is_template: bool,
    pub content_type: crate::domain::ContentType,
    pub messenger: String,
    pub from_email: String,
    pub status: CampaignStatus,
    pub subscribers: Vec<Subscriber>,
}

struct CampaignRecord {
    seed: CampaignSeed,
    status: CampaignStatus,
    sent: i64,
    delivered_cursor: i64,
}

#[derive(Default)]
struct Inner {
    campaigns: HashMap<CampaignId, CampaignRecord>,
    links: HashMap<String, String>,
    next_link_id: usize,
    emails_marked_sent: Vec<String>,
}

pub struct InMemoryDataSource {
    inner: Mutex<Inner>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn seed_campaign(&self, seed: CampaignSeed) {
        let mut inner = self.inner.lock().unwrap();
        let id = seed.id;
        let status = seed.status;
        inner.campaigns.insert(
            id,
            CampaignRecord {
                seed,
                status,
                sent: 0,
                delivered_cursor: 0,
            },
        );
    }

    pub fn status_of(&self, id: CampaignId) -> Option<CampaignStatus> {
        self.inner.lock().unwrap().campaigns.get(&id).map(|r| r.status)
    }

    pub fn sent_count(&self, id: CampaignId) -> Option<i64> {
        self.inner.lock().unwrap().campaigns.get(&id).map(|r| r.sent)
    }

    pub fn emails_marked_sent(&self) -> Vec<String> {
        self.inner.lock().unwrap().emails_marked_sent.clone()
    }

    pub fn link_count(&self) -> usize {
        self.inner.lock().unwrap().links.len()
    }
}

impl Default for InMemoryDataSource {
    fn default() -> Self {
        Self::new()
    }
}

fn record_to_campaign(record: &CampaignRecord) -> Campaign {
    let seed = &record.seed;
    Campaign::new(NewCampaign {
        id: seed.id,
        uuid: seed.uuid,
        name: seed.name.clone(),
        subject: seed.subject.clone(),
        subject_is_template: seed.subject_is_template,
        body: seed.body.clone(),
        alt_body: seed.alt_body.clone(),
        alt_body_is_template: seed.alt_body_is_template,
        content_type: seed.content_type,
        messenger: seed.messenger.clone(),
        from_email: seed.from_email.clone(),
        send_at: None,
        status: record.status,
        to_send: seed.subscribers.len() as i64,
        sent: record.sent,
        started_at: None,
        updated_at: chrono::Utc::now(),
    })
}

#[async_trait::async_trait]
impl DataSource for InMemoryDataSource {
    async fn next_campaigns(&self, exclude_ids: &[CampaignId]) -> Result<Vec<Campaign>, DataSourceError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .campaigns
            .values()
            .filter(|r| r.status.is_dispatch_candidate() && !exclude_ids.contains(&r.seed.id))
            .map(record_to_campaign)
            .collect())
    }

    async fn next_subscribers(
        &self,
        camp_id: CampaignId,
        limit: usize,
    ) -> Result<Vec<Subscriber>, DataSourceError> {
        let inner = self.inner.lock().unwrap();
        let Some(record) = inner.campaigns.get(&camp_id) else {
            return Ok(Vec::new());
        };
        Ok(record
            .seed
            .subscribers
            .iter()
            .filter(|s| s.id > record.delivered_cursor)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_campaign(&self, camp_id: CampaignId) -> Result<Campaign, DataSourceError> {
        let inner = self.inner.lock().unwrap();
        inner
            .campaigns
            .get(&camp_id)
            .map(record_to_campaign)
            .ok_or_else(|| DataSourceError::from(anyhow::anyhow!("unknown campaign {camp_id}")))
    }

    async fn update_campaign_status(
        &self,
        camp_id: CampaignId,
        status: CampaignStatus,
    ) -> Result<(), DataSourceError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.campaigns.get_mut(&camp_id) {
            record.status = status;
        }
        Ok(())
    }

    async fn create_link(&self, url: &str) -> Result<String, DataSourceError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(token) = inner.links.get(url) {
            return Ok(token.clone());
        }
        inner.next_link_id += 1;
        let token = format!("tok-{}", inner.next_link_id);
        inner.links.insert(url.to_string(), token.clone());
        Ok(token)
    }

    async fn update_last_email_sent(&self, email: &str) -> Result<(), DataSourceError> {
        self.inner.lock().unwrap().emails_marked_sent.push(email.to_string());
        Ok(())
    }

    async fn update_sent_campaign(
        &self,
        camp_id: CampaignId,
        delta: i64,
        last_sub_id: i64,
    ) -> Result<(), DataSourceError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.campaigns.get_mut(&camp_id) {
            record.sent += delta;
            record.delivered_cursor = last_sub_id;
        }
        Ok(())
    }
}
