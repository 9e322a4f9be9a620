use crate::configuration::EngineSettings;
use crate::domain::CampaignStatus;
use crate::engine::template_funcs::{self, TemplateFuncContext};
use crate::engine::{
    AdHocMessage, Campaign, CampaignId, CampaignMessage, DataSource, LinkRegistry,
    NotificationPayload, NotifySink, Transport,
};
use crate::telemetry::error_chain_fmt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};

/// Admission / setup / push failures the `Manager`'s public surface can
/// return. Everything past admission is handled by logging and/or an admin
/// notification (spec.md §7: "the core does not raise exceptions to the
/// outside").
#[derive(thiserror::Error)]
pub enum EngineError {
    #[error("messenger '{0}' is already registered")]
    DuplicateMessenger(String),
    #[error("unknown messenger '{0}' on campaign '{1}'")]
    UnknownMessenger(String, String),
    #[error("template compile error for campaign '{0}': {1}")]
    TemplateCompile(String, tera::Error),
    #[error("message push timed out")]
    PushTimedOut,
    #[error("manager is closed")]
    Closed,
    #[error(transparent)]
    DataSource(#[from] crate::engine::DataSourceError),
}

impl std::fmt::Debug for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::TemplateCompile(_, e) => Some(e),
            EngineError::DataSource(e) => Some(e),
            _ => None,
        }
    }
}

const PUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// An error report fed into the error-aggregation side of the scheduler
/// (spec.md §4.3, §4.8): which campaign a `Transport::push` failed for.
pub(crate) type ErrorReport = (CampaignId, Campaign);

/// The `Manager` owns the two guarded maps (`ActiveSet`, link registry), the
/// bounded inter-task queues, and the registered `Transport`s (spec.md §2,
/// §5, §9: "Global-ish state ... are fields of a single Manager instance").
/// Scheduler, fetch-loop, and worker tasks are spawned against a shared
/// `Arc<Manager>` by `Manager::run`; `ErrorCounts` and `SlidingWindowState`
/// live as local state inside the scheduler and fetch-loop tasks
/// respectively, per spec.md §5's "owned exclusively by X, no locking
/// needed" — they are never shared, so they don't belong on this struct.
///
/// Each queue's sending half is wrapped in `Mutex<Option<Sender<_>>>` so
/// `close` can drop every outstanding clone and let receivers observe a
/// closed channel, without requiring `self` to be consumed (other `Arc`
/// clones are still held by the spawned tasks at shutdown time).
pub struct Manager {
    pub(crate) cfg: EngineSettings,
    pub(crate) data_source: Arc<dyn DataSource>,
    pub(crate) notify: Arc<dyn NotifySink>,
    pub(crate) messengers: HashMap<String, Arc<dyn Transport>>,

    pub(crate) active: RwLock<HashMap<CampaignId, Campaign>>,
    pub(crate) link_registry: Arc<LinkRegistry>,

    sub_fetch_tx: AsyncMutex<Option<mpsc::Sender<CampaignId>>>,
    sub_fetch_rx: AsyncMutex<Option<mpsc::Receiver<CampaignId>>>,

    camp_msg_tx: AsyncMutex<Option<mpsc::Sender<CampaignMessage>>>,
    camp_msg_rx: Arc<AsyncMutex<mpsc::Receiver<CampaignMessage>>>,

    adhoc_msg_tx: AsyncMutex<Option<mpsc::Sender<AdHocMessage>>>,
    adhoc_msg_rx: Arc<AsyncMutex<mpsc::Receiver<AdHocMessage>>>,

    pub(crate) error_tx: AsyncMutex<Option<mpsc::Sender<ErrorReport>>>,
    error_rx: AsyncMutex<Option<mpsc::Receiver<ErrorReport>>>,
}

/// Join handles for the tasks spawned by `Manager::run`. Dropping this
/// without awaiting it detaches the tasks; call `wait` after `close` for a
/// clean shutdown.
pub struct EngineHandle {
    pub scheduler: tokio::task::JoinHandle<()>,
    pub fetch_loop: tokio::task::JoinHandle<()>,
    pub workers: Vec<tokio::task::JoinHandle<()>>,
}

impl EngineHandle {
    pub async fn wait(self) {
        let _ = self.scheduler.await;
        let _ = self.fetch_loop.await;
        for w in self.workers {
            let _ = w.await;
        }
    }
}

impl Manager {
    pub fn new(
        cfg: EngineSettings,
        data_source: Arc<dyn DataSource>,
        notify: Arc<dyn NotifySink>,
    ) -> Self {
        let cfg = cfg.with_defaults();
        let (sub_fetch_tx, sub_fetch_rx) = mpsc::channel(cfg.concurrency.max(1));
        let (camp_msg_tx, camp_msg_rx) = mpsc::channel(cfg.concurrency.max(1) * 2);
        let (adhoc_msg_tx, adhoc_msg_rx) = mpsc::channel(cfg.concurrency.max(1));
        let error_capacity = cfg.max_send_errors.max(1);
        let (error_tx, error_rx) = mpsc::channel(error_capacity);

        Self {
            cfg,
            data_source,
            notify,
            messengers: HashMap::new(),
            active: RwLock::new(HashMap::new()),
            link_registry: Arc::new(LinkRegistry::new()),
            sub_fetch_tx: AsyncMutex::new(Some(sub_fetch_tx)),
            sub_fetch_rx: AsyncMutex::new(Some(sub_fetch_rx)),
            camp_msg_tx: AsyncMutex::new(Some(camp_msg_tx)),
            camp_msg_rx: Arc::new(AsyncMutex::new(camp_msg_rx)),
            adhoc_msg_tx: AsyncMutex::new(Some(adhoc_msg_tx)),
            adhoc_msg_rx: Arc::new(AsyncMutex::new(adhoc_msg_rx)),
            error_tx: AsyncMutex::new(Some(error_tx)),
            error_rx: AsyncMutex::new(Some(error_rx)),
        }
    }

    /// Registers a `Transport` under its own name. Must be called before
    /// `run` — the messenger map is not behind a lock (spec.md §9).
    pub fn add_transport(&mut self, transport: Arc<dyn Transport>) -> Result<(), EngineError> {
        let name = transport.name().to_string();
        if self.messengers.contains_key(&name) {
            return Err(EngineError::DuplicateMessenger(name));
        }
        self.messengers.insert(name, transport);
        Ok(())
    }

    pub fn has_messenger(&self, name: &str) -> bool {
        self.messengers.contains_key(name)
    }

    /// Spawns the scheduler, subscriber-fetch loop, and `Concurrency`
    /// workers against a shared handle to this manager (spec.md §4.3's
    /// `Run`).
    pub fn run(self: &Arc<Self>, tick: Duration) -> EngineHandle {
        let sub_fetch_rx = take_receiver(&self.sub_fetch_rx);
        let error_rx = take_receiver(&self.error_rx);

        let scheduler = tokio::spawn(crate::engine::scheduler_task(self.clone(), tick, error_rx));
        let fetch_loop = tokio::spawn(crate::engine::fetch_loop_task(self.clone(), sub_fetch_rx));

        let mut workers = Vec::with_capacity(self.cfg.concurrency);
        for worker_id in 0..self.cfg.concurrency {
            workers.push(tokio::spawn(crate::engine::worker_task(
                self.clone(),
                worker_id,
                self.camp_msg_rx.clone(),
                self.adhoc_msg_rx.clone(),
            )));
        }

        EngineHandle {
            scheduler,
            fetch_loop,
            workers,
        }
    }

    /// Blocking (within a 3 s timeout) push of a non-campaign message
    /// (spec.md §7 "Queue-full on admin push").
    pub async fn push_message(&self, msg: AdHocMessage) -> Result<(), EngineError> {
        let tx = self
            .adhoc_msg_tx
            .lock()
            .await
            .clone()
            .ok_or(EngineError::Closed)?;
        tokio::time::timeout(PUSH_TIMEOUT, tx.send(msg))
            .await
            .map_err(|_| EngineError::PushTimedOut)?
            .map_err(|_| EngineError::Closed)
    }

    /// Blocking (within a 3 s timeout) push of a campaign message.
    pub async fn push_campaign_message(&self, msg: CampaignMessage) -> Result<(), EngineError> {
        let tx = self
            .camp_msg_tx
            .lock()
            .await
            .clone()
            .ok_or(EngineError::Closed)?;
        tokio::time::timeout(PUSH_TIMEOUT, tx.send(msg))
            .await
            .map_err(|_| EngineError::PushTimedOut)?
            .map_err(|_| EngineError::Closed)
    }

    /// Non-blocking enqueue of a campaign onto the subscriber-fetch channel
    /// (spec.md §4.3 step 2: "If the fetch channel is full, skip"). Returns
    /// whether the enqueue succeeded.
    pub(crate) async fn try_enqueue_fetch(&self, id: CampaignId) -> bool {
        let Some(tx) = self.sub_fetch_tx.lock().await.clone() else {
            return false;
        };
        tx.try_send(id).is_ok()
    }

    /// Non-blocking error report (spec.md §4.8: "if the channel is full,
    /// drop — the aggregator has already saturated").
    pub(crate) async fn try_report_error(&self, report: ErrorReport) {
        if let Some(tx) = self.error_tx.lock().await.clone() {
            let _ = tx.try_send(report);
        }
    }

    pub async fn is_active(&self, id: CampaignId) -> bool {
        self.active.read().await.contains_key(&id)
    }

    pub async fn active_ids(&self) -> Vec<CampaignId> {
        self.active.read().await.keys().copied().collect()
    }

    pub(crate) async fn get_active(&self, id: CampaignId) -> Option<Campaign> {
        self.active.read().await.get(&id).cloned()
    }

    pub(crate) async fn set_active(&self, id: CampaignId, campaign: Campaign) {
        self.active.write().await.insert(id, campaign);
    }

    /// Writes `buffered` back onto the active-set entry for `id` in place,
    /// but only if that entry is still present. Returns whether it was.
    /// Never inserts: a missing entry means `exhaust_campaign` already
    /// removed it (e.g. an admin pause/cancel raced an in-flight fetch),
    /// and re-inserting it here would resurrect a campaign the scheduler
    /// has already decided to drop.
    pub(crate) async fn update_active_buffered(
        &self,
        id: CampaignId,
        buffered: Vec<crate::engine::Subscriber>,
    ) -> bool {
        let mut active = self.active.write().await;
        match active.get_mut(&id) {
            Some(c) => {
                c.buffered = buffered;
                true
            }
            None => false,
        }
    }

    /// Validates the campaign's messenger, compiles its templates, and adds
    /// it to the active set (spec.md §4.3, §4.9 `addCampaign`). On an
    /// unknown messenger the campaign is force-cancelled in the data store;
    /// on a template error the campaign is left untouched — admission
    /// simply fails and the caller (the scheduler) notifies.
    pub async fn add_campaign(&self, campaign: Campaign) -> Result<Campaign, EngineError> {
        if !self.messengers.contains_key(&campaign.messenger) {
            let messenger = campaign.messenger.clone();
            let name = campaign.name.clone();
            self.exhaust_campaign(&campaign, Some(CampaignStatus::Cancelled)).await;
            return Err(EngineError::UnknownMessenger(messenger, name));
        }

        let compiled = self.compile_template(&campaign)?;
        self.set_active(compiled.id, compiled.clone()).await;
        Ok(compiled)
    }

    fn compile_template(&self, campaign: &Campaign) -> Result<Campaign, EngineError> {
        let mut tera = tera::Tera::default();
        tera.add_raw_template(crate::engine::campaign::BODY_TPL, &campaign.body)
            .map_err(|e| EngineError::TemplateCompile(campaign.name.clone(), e))?;
        if campaign.subject_is_template {
            tera.add_raw_template(crate::engine::campaign::SUBJECT_TPL, &campaign.subject)
                .map_err(|e| EngineError::TemplateCompile(campaign.name.clone(), e))?;
        }
        if campaign.alt_body_is_template {
            if let Some(alt_body) = &campaign.alt_body {
                tera.add_raw_template(crate::engine::campaign::ALT_BODY_TPL, alt_body)
                    .map_err(|e| EngineError::TemplateCompile(campaign.name.clone(), e))?;
            }
        }

        template_funcs::register(
            &mut tera,
            TemplateFuncContext {
                data_source: self.data_source.clone(),
                link_registry: self.link_registry.clone(),
                campaign_id: campaign.id,
                campaign_uuid: campaign.uuid,
                individual_tracking: self.cfg.individual_tracking,
                unsub_url: self.cfg.unsub_url.clone(),
                optin_url: self.cfg.optin_url.clone(),
                link_track_url: self.cfg.link_track_url.clone(),
                view_track_url: self.cfg.view_track_url.clone(),
                message_url: self.cfg.message_url.clone(),
            },
        );

        Ok(campaign.with_compiled_template(tera))
    }

    /// Removes `campaign` from the active set and settles its final status
    /// (spec.md §4.9 `exhaustCampaign`). When `forced_status` is given it is
    /// persisted unconditionally (error-budget pause, unknown-messenger
    /// cancel); otherwise the authoritative status is re-read and only
    /// flipped to `finished` if it is still `running` — an admin pause or
    /// cancel that raced the fetch loop is respected.
    pub async fn exhaust_campaign(&self, campaign: &Campaign, forced_status: Option<CampaignStatus>) {
        self.active.write().await.remove(&campaign.id);

        let (final_campaign, status, reason) = match forced_status {
            Some(status) => {
                if let Err(e) = self
                    .data_source
                    .update_campaign_status(campaign.id, status)
                    .await
                {
                    tracing::error!(error.cause_chain = ?e, error.message = %e, campaign = %campaign.name, ?status, "failed to persist forced campaign status");
                }
                let reason = if status == CampaignStatus::Paused {
                    "Too many errors"
                } else {
                    ""
                };
                (campaign.clone(), status, reason.to_string())
            }
            None => match self.data_source.get_campaign(campaign.id).await {
                Ok(cm) => {
                    if cm.status == CampaignStatus::Running {
                        if let Err(e) = self
                            .data_source
                            .update_campaign_status(campaign.id, CampaignStatus::Finished)
                            .await
                        {
                            tracing::error!(error.cause_chain = ?e, error.message = %e, campaign = %campaign.name, "failed to finish campaign");
                        }
                        (cm, CampaignStatus::Finished, String::new())
                    } else {
                        let status = cm.status;
                        (cm, status, String::new())
                    }
                }
                Err(e) => {
                    tracing::error!(error.cause_chain = ?e, error.message = %e, campaign = %campaign.name, "failed to read authoritative campaign status while exhausting");
                    return;
                }
            },
        };

        tracing::info!(campaign = %final_campaign.name, ?status, "campaign left the active set");

        let subject = format!("{}: {}", title_case(status), final_campaign.name);
        if let Err(e) = self
            .notify
            .notify(
                &subject,
                NotificationPayload {
                    campaign_id: final_campaign.id,
                    name: final_campaign.name.clone(),
                    status,
                    sent: final_campaign.sent,
                    to_send: final_campaign.to_send,
                    reason,
                },
            )
            .await
        {
            tracing::error!(error.cause_chain = ?e, error.message = %e, "admin notification failed");
        }
    }

    /// Closes every sending half (spec.md §4.9 `Close`: subscriber-fetch,
    /// error, and ad-hoc-message channels — plus, so workers can actually
    /// observe closure and exit as §4.3/§5 require, the campaign-message
    /// channel too). Dropping the last `Sender` clone lets the
    /// corresponding `Receiver::recv` return `None`.
    pub async fn close(&self) {
        self.sub_fetch_tx.lock().await.take();
        self.error_tx.lock().await.take();
        self.adhoc_msg_tx.lock().await.take();
        self.camp_msg_tx.lock().await.take();
    }
}

/// `run` is called once, before any task contends for these mutexes, so a
/// non-blocking `try_lock` is always available here.
fn take_receiver<T>(m: &AsyncMutex<Option<T>>) -> T {
    m.try_lock()
        .expect("Manager::run's receiver mutexes are uncontended at startup")
        .take()
        .expect("Manager::run called more than once")
}

fn title_case(status: CampaignStatus) -> String {
    let s = status.to_string();
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => s,
    }
}
