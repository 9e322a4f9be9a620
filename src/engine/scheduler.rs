//! The periodic admission loop. Ticks on a fixed interval, asks the
//! `DataSource` for campaigns not already in the active set, admits each
//! one, and hands it to the fetch loop by enqueuing its id. Also drains the
//! error-report channel and keeps a task-local error-count map — never
//! shared, never locked — pausing a campaign once its error budget is
//! exhausted.

use crate::domain::CampaignStatus;
use crate::engine::manager::{ErrorReport, Manager};
use crate::engine::CampaignId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

pub(crate) async fn run(manager: Arc<Manager>, tick: Duration, mut error_rx: Receiver<ErrorReport>) {
    let mut interval = tokio::time::interval(tick);
    let mut error_counts: HashMap<CampaignId, usize> = HashMap::new();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                reap_stale_campaigns(&manager).await;
                scan_campaigns(&manager).await;
            }
            report = error_rx.recv() => {
                match report {
                    Some((id, campaign)) => {
                        handle_error_report(&manager, &mut error_counts, id, campaign).await;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("scheduler exiting: error channel closed");
}

/// Re-reads the authoritative status of every campaign already in the
/// active set and exhausts any that an admin has moved off `running`
/// out-of-band (pause/cancel). `next_campaigns` alone can't observe this —
/// it excludes ids already active — so without this pass a cancelled or
/// admin-paused campaign would only ever leave the active set once its
/// subscriber stream happened to run dry. The next tick here is what
/// observes the new status and removes the campaign from the active set.
async fn reap_stale_campaigns(manager: &Arc<Manager>) {
    for id in manager.active_ids().await {
        let Some(campaign) = manager.get_active(id).await else {
            continue;
        };
        match manager.data_source.get_campaign(id).await {
            Ok(authoritative) if authoritative.status != CampaignStatus::Running => {
                tracing::info!(campaign_id = %id, status = %authoritative.status, "admin moved campaign off running, leaving the active set");
                manager.exhaust_campaign(&campaign, None).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error.cause_chain = ?e, error.message = %e, campaign_id = %id, "failed to re-check campaign status");
            }
        }
    }
}

async fn scan_campaigns(manager: &Arc<Manager>) {
    let active_ids = manager.active_ids().await;
    let candidates = match manager.data_source.next_campaigns(&active_ids).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error.cause_chain = ?e, error.message = %e, "failed to poll for next campaigns");
            return;
        }
    };

    for campaign in candidates {
        if !campaign.status.is_dispatch_candidate() {
            continue;
        }

        let id = campaign.id;
        match manager.add_campaign(campaign).await {
            Ok(_) => {
                if !manager.try_enqueue_fetch(id).await {
                    tracing::warn!(campaign_id = %id, "subscriber-fetch queue full, will retry next tick");
                }
            }
            Err(e) => {
                tracing::error!(error.cause_chain = ?e, error.message = %e, campaign_id = %id, "failed to admit campaign");
            }
        }
    }
}

async fn handle_error_report(
    manager: &Arc<Manager>,
    error_counts: &mut HashMap<CampaignId, usize>,
    id: CampaignId,
    campaign: crate::engine::Campaign,
) {
    let count = error_counts.entry(id).or_insert(0);
    *count += 1;

    if manager.cfg.max_send_errors > 0 && *count >= manager.cfg.max_send_errors {
        tracing::warn!(campaign_id = %id, errors = *count, "campaign exceeded its error budget, pausing");
        error_counts.remove(&id);
        manager
            .exhaust_campaign(&campaign, Some(CampaignStatus::Paused))
            .await;
    }
}
