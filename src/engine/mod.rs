//! The campaign dispatch engine.
//!
//! Submodule layout mirrors the engine's component list: a
//! `DataSource`/`Transport` pair of external contracts, the data types that
//! flow between them (`campaign`, `subscriber`, `message`), the two guarded
//! maps (`link_registry`, and `manager`'s active-campaign map), the
//! single-owner `sliding_window` limiter, the `template_funcs`/`renderer`
//! pair that turns a compiled campaign + subscriber into bytes, and the
//! three concurrent tasks (`scheduler`, `fetch_loop`, `worker`) wired
//! together by `manager`.

mod campaign;
mod data_source;
mod fetch_loop;
mod link_registry;
mod manager;
mod message;
mod notify;
mod renderer;
mod scheduler;
mod sliding_window;
mod subscriber;
mod template_funcs;
mod transport;
mod worker;

pub use campaign::{Campaign, CampaignId, NewCampaign, ANONYMOUS_SUBSCRIBER_UUID};
pub use data_source::{DataSource, DataSourceError};
pub use manager::{EngineError, EngineHandle, Manager};
pub use message::{AdHocMessage, CampaignMessage};
pub use notify::{NotificationPayload, NotifySink};
pub use subscriber::Subscriber;
pub use transport::{OutboundMessage, Transport, TransportError};

/// Thin pass-throughs so `manager::run` can spawn each task without its
/// submodules needing to be public — `Manager::run` is the only caller.
pub(crate) async fn scheduler_task(
    manager: std::sync::Arc<Manager>,
    tick: std::time::Duration,
    error_rx: tokio::sync::mpsc::Receiver<(CampaignId, Campaign)>,
) {
    scheduler::run(manager, tick, error_rx).await;
}

pub(crate) async fn fetch_loop_task(
    manager: std::sync::Arc<Manager>,
    sub_fetch_rx: tokio::sync::mpsc::Receiver<CampaignId>,
) {
    fetch_loop::run(manager, sub_fetch_rx).await;
}

pub(crate) async fn worker_task(
    manager: std::sync::Arc<Manager>,
    worker_id: usize,
    camp_msg_rx: std::sync::Arc<tokio::sync::Mutex<tokio::sync::mpsc::Receiver<CampaignMessage>>>,
    adhoc_msg_rx: std::sync::Arc<tokio::sync::Mutex<tokio::sync::mpsc::Receiver<AdHocMessage>>>,
) {
    worker::run(manager, worker_id, camp_msg_rx, adhoc_msg_rx).await;
}
