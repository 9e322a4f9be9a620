//! Delivery workers. `Concurrency` of these run concurrently,
//! each competing for items off the shared campaign-message and ad-hoc
//! queues. A campaign-message delivery failure is reported to the
//! scheduler's error aggregator; an ad-hoc one never is, since ad-hoc
//! messages don't belong to any campaign's error budget.

use crate::engine::manager::Manager;
use crate::engine::{AdHocMessage, CampaignMessage, OutboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc::Receiver, Mutex as AsyncMutex};

pub(crate) async fn run(
    manager: Arc<Manager>,
    worker_id: usize,
    camp_msg_rx: Arc<AsyncMutex<Receiver<CampaignMessage>>>,
    adhoc_msg_rx: Arc<AsyncMutex<Receiver<AdHocMessage>>>,
) {
    let mut campaigns_open = true;
    let mut adhoc_open = true;

    while campaigns_open || adhoc_open {
        tokio::select! {
            Some(msg) = async { camp_msg_rx.lock().await.recv().await }, if campaigns_open => {
                handle_campaign_message(&manager, msg).await;
            }
            Some(msg) = async { adhoc_msg_rx.lock().await.recv().await }, if adhoc_open => {
                handle_adhoc_message(&manager, msg).await;
            }
            else => {
                // Whichever guarded branch(es) are still enabled returned `None`;
                // re-check below which channel(s) actually closed.
                if campaigns_open && camp_msg_rx.lock().await.is_closed() {
                    campaigns_open = false;
                }
                if adhoc_open && adhoc_msg_rx.lock().await.is_closed() {
                    adhoc_open = false;
                }
            }
        }
    }

    tracing::info!(worker_id, "worker exiting: both queues closed");
}

async fn handle_campaign_message(manager: &Arc<Manager>, msg: CampaignMessage) {
    let campaign_id = msg.campaign.id;
    let campaign = msg.campaign.clone();
    let transport = manager.messengers.get(&campaign.messenger).cloned();

    let Some(transport) = transport else {
        tracing::error!(campaign_id = %campaign_id, messenger = %campaign.messenger, "no transport registered for messenger, dropping message");
        return;
    };

    let mut headers = HashMap::new();
    if manager.cfg.unsub_header {
        headers.insert("List-Unsubscribe".to_string(), format!("<{}>", msg.unsubscribe_url));
        headers.insert(
            "List-Unsubscribe-Post".to_string(),
            "List-Unsubscribe=One-Click".to_string(),
        );
    }

    let outbound = OutboundMessage {
        from: msg.from,
        to: vec![msg.to],
        subject: msg.subject,
        content_type: campaign.content_type,
        body: msg.body,
        alt_body: msg.alt_body,
        headers,
        campaign: Some(campaign.clone()),
        subscriber: msg.subscriber.clone(),
    };

    let email = msg.subscriber.email.as_ref().to_string();

    if let Err(e) = transport.push(outbound, manager.cfg.concurrency).await {
        tracing::error!(error.cause_chain = ?e, error.message = %e, campaign_id = %campaign_id, "message delivery failed");
        manager.try_report_error((campaign_id, campaign)).await;
    }

    // Bookkeeping runs on success or failure alike.
    if let Err(e) = manager.data_source.update_last_email_sent(&email).await {
        tracing::error!(error.cause_chain = ?e, error.message = %e, email, "failed to record last-sent timestamp");
    }
}

async fn handle_adhoc_message(manager: &Arc<Manager>, msg: AdHocMessage) {
    let Some(transport) = manager.messengers.get(&msg.messenger).cloned() else {
        tracing::error!(messenger = %msg.messenger, "no transport registered for messenger, dropping ad-hoc message");
        return;
    };

    let to = msg.to.clone();
    let outbound = OutboundMessage {
        from: msg.from,
        to: msg.to,
        subject: msg.subject,
        content_type: msg.content_type,
        body: msg.body,
        alt_body: msg.alt_body,
        headers: HashMap::new(),
        campaign: None,
        subscriber: adhoc_placeholder_subscriber(),
    };

    if let Err(e) = transport.push(outbound, manager.cfg.concurrency).await {
        tracing::error!(error.cause_chain = ?e, error.message = %e, ?to, "ad-hoc message delivery failed");
    }
}

/// Ad-hoc messages carry no subscriber identity, but `OutboundMessage`
/// models campaign deliveries and ad-hoc ones with the same shape.
/// A placeholder with no real identity keeps `Transport`
/// implementations from having to special-case the ad-hoc path.
fn adhoc_placeholder_subscriber() -> crate::engine::Subscriber {
    crate::engine::Subscriber {
        id: 0,
        uuid: crate::engine::ANONYMOUS_SUBSCRIBER_UUID,
        email: crate::domain::SubscriberEmailAddress::parse("adhoc@localhost".to_string())
            .expect("static ad-hoc placeholder email is always valid"),
        name: crate::domain::SubscriberName::parse("ad-hoc".to_string())
            .expect("static ad-hoc placeholder name is always valid"),
        attribs: serde_json::Value::Null,
        status: String::new(),
    }
}
