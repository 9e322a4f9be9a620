//! The subscriber-fetch loop. Single consumer of the
//! subscriber-fetch channel; for each campaign id it receives, tops up that
//! campaign's `buffered` subscribers from the `DataSource`, renders and
//! pushes a `CampaignMessage` per subscriber, and either re-enqueues the
//! campaign for another pass, backs off briefly, or hands it to
//! `Manager::exhaust_campaign` once its subscriber stream is dry.
//!
//! The sliding-window limiter is task-local state here — this is its only
//! caller, so it needs no lock.

use crate::engine::manager::Manager;
use crate::engine::sliding_window::SlidingWindowLimiter;
use crate::engine::{renderer, CampaignId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

/// Campaigns that came back empty are retried after this pause rather than
/// immediately re-enqueued, so a slow-filling campaign doesn't spin the loop.
const EMPTY_BATCH_BACKOFF: Duration = Duration::from_secs(5);

pub(crate) async fn run(manager: Arc<Manager>, mut sub_fetch_rx: Receiver<CampaignId>) {
    let mut limiter = SlidingWindowLimiter::new(
        manager.cfg.sliding_window_enabled,
        manager.cfg.sliding_window_duration(),
        manager.cfg.sliding_window_rate,
    );

    while let Some(id) = sub_fetch_rx.recv().await {
        process_campaign(&manager, &mut limiter, id).await;
    }

    tracing::info!("fetch loop exiting: subscriber-fetch channel closed");
}

async fn process_campaign(manager: &Arc<Manager>, limiter: &mut SlidingWindowLimiter, id: CampaignId) {
    let Some(mut campaign) = manager.get_active(id).await else {
        return;
    };

    if campaign.buffered.is_empty() {
        match manager
            .data_source
            .next_subscribers(id, manager.cfg.batch_size)
            .await
        {
            Ok(batch) => campaign.buffered = batch,
            Err(e) => {
                tracing::error!(error.cause_chain = ?e, error.message = %e, campaign_id = %id, "failed to fetch subscribers");
                return;
            }
        }
    }

    if campaign.buffered.is_empty() {
        manager.exhaust_campaign(&campaign, None).await;
        return;
    }

    let subscribers = std::mem::take(&mut campaign.buffered);
    let fetched_full_batch = subscribers.len() >= manager.cfg.batch_size;

    // Write the drained buffer back only if the campaign is still in the
    // active set. An admin pause/cancel observed while `next_subscribers`
    // was in flight may already have called `exhaust_campaign`, which
    // removed this id; unconditionally re-inserting it here would
    // resurrect it and let an extra full batch dispatch before the next
    // scheduler tick notices — violating spec §5's "at most one batch
    // ... before the next scheduler tick ... removes the campaign from
    // ActiveSet". The subscribers already fetched below are still
    // rendered and pushed either way: that's the one in-flight batch the
    // spec tolerates, not a second one.
    let still_active = manager.update_active_buffered(id, Vec::new()).await;

    let mut pushed = 0i64;
    let mut last_sub_id = 0i64;

    for subscriber in subscribers {
        let message = match renderer::render(&campaign, &subscriber, &manager.cfg.unsub_url) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error.cause_chain = ?e, error.message = %e, campaign_id = %id, subscriber_id = subscriber.id, "failed to render message, skipping subscriber");
                last_sub_id = subscriber.id;
                continue;
            }
        };

        match manager.push_campaign_message(message).await {
            Ok(()) => {
                pushed += 1;
                last_sub_id = subscriber.id;
                limiter.record_push().await;
            }
            Err(e) => {
                tracing::error!(error.cause_chain = ?e, error.message = %e, campaign_id = %id, subscriber_id = subscriber.id, "failed to push campaign message, skipping subscriber");
                last_sub_id = subscriber.id;
            }
        }
    }

    if pushed > 0 {
        if let Err(e) = manager
            .data_source
            .update_sent_campaign(id, pushed, last_sub_id)
            .await
        {
            tracing::error!(error.cause_chain = ?e, error.message = %e, campaign_id = %id, "failed to persist sent-count update");
        }
    }

    if !still_active {
        tracing::info!(campaign_id = %id, "campaign left the active set while this batch was in flight, not re-enqueuing");
        return;
    }

    // A full batch means more subscribers may still be waiting, so the
    // campaign is re-observed right away. Fewer than a full batch means the
    // stream likely just ran dry (end-of-stream, or a DataSource hiccup
    // above) — back off briefly so in-flight `UpdateSentCampaign` writes can
    // settle before the campaign is re-observed.
    if !fetched_full_batch {
        tokio::time::sleep(EMPTY_BATCH_BACKOFF).await;
    }

    if !manager.try_enqueue_fetch(id).await {
        tracing::warn!(campaign_id = %id, "subscriber-fetch queue full while re-enqueuing, will retry after backing off");
        tokio::time::sleep(EMPTY_BATCH_BACKOFF).await;
        let _ = manager.try_enqueue_fetch(id).await;
    }
}
