//! End-to-end scenario tests against the in-memory `DataSource` and the
//! recording `Transport`/`NotifySink` test doubles (spec.md §8, S1-S6).
//! Gated behind the `e2e-tests` feature so the test doubles never ship in an
//! ordinary build.

use campaign_dispatch_engine::configuration::EngineSettings;
use campaign_dispatch_engine::domain::{CampaignStatus, ContentType, SubscriberEmailAddress, SubscriberName};
use campaign_dispatch_engine::engine::{
    AdHocMessage, CampaignId, EngineError, Manager, Subscriber, ANONYMOUS_SUBSCRIBER_UUID,
};
use campaign_dispatch_engine::testsupport::{
    CampaignSeed, InMemoryDataSource, RecordingNotifySink, RecordingTransport,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TICK: Duration = Duration::from_millis(30);
const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn settings(batch_size: usize, concurrency: usize, max_send_errors: usize) -> EngineSettings {
    EngineSettings {
        batch_size,
        concurrency,
        max_send_errors,
        sliding_window_enabled: false,
        sliding_window_duration_secs: 1,
        sliding_window_rate: 0,
        unsub_header: true,
        individual_tracking: true,
        unsub_url: "/subscription/%s/%s".to_string(),
        optin_url: "/subscription/optin/%s".to_string(),
        link_track_url: "/link/%s/%s/%s".to_string(),
        view_track_url: "/campaign/%s/%s/px.png".to_string(),
        message_url: "/campaign/%s/%s".to_string(),
        scheduler_tick_secs: 5,
    }
}

fn subscriber(id: i64, name: &str) -> Subscriber {
    Subscriber {
        id,
        uuid: Uuid::new_v4(),
        email: SubscriberEmailAddress::parse(format!("sub{id}@x.test")).unwrap(),
        name: SubscriberName::parse(name.to_string()).unwrap(),
        attribs: serde_json::Value::Null,
        status: "enabled".to_string(),
    }
}

fn running_campaign(id: i64, messenger: &str, body: &str, subscribers: Vec<Subscriber>) -> CampaignSeed {
    CampaignSeed {
        id: CampaignId(id),
        uuid: Uuid::new_v4(),
        name: format!("camp-{id}"),
        subject: "Hello".to_string(),
        subject_is_template: false,
        body: body.to_string(),
        alt_body: None,
        alt_body_is_template: false,
        content_type: ContentType::Html,
        messenger: messenger.to_string(),
        from_email: "from@x.test".to_string(),
        status: CampaignStatus::Running,
        subscribers,
    }
}

/// Polls `cond` until it returns `true` or `POLL_TIMEOUT` elapses, panicking
/// with `what` on timeout. Every scenario here drives three concurrent
/// tasks through channels, so there is no single event to await — polling
/// the externally observable state (transport/data-source) is the only
/// option short of instrumenting the engine's internals for tests alone.
async fn poll_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn s1_single_batch_happy_path() {
    let data_source = Arc::new(InMemoryDataSource::new());
    let camp_id = CampaignId(1);
    data_source.seed_campaign(running_campaign(
        1,
        "t1",
        "Hi {{ subscriber.name }}",
        vec![subscriber(1, "A"), subscriber(2, "B"), subscriber(3, "C")],
    ));

    let transport = Arc::new(RecordingTransport::new("t1"));
    let notify = Arc::new(RecordingNotifySink::new());

    let mut manager = Manager::new(settings(3, 2, 0), data_source.clone(), notify.clone());
    manager.add_transport(transport.clone()).unwrap();
    let manager = Arc::new(manager);
    let _handle = manager.run(TICK);

    poll_until("3 messages sent", || transport.sent_count() == 3).await;
    poll_until("campaign finished", || {
        data_source.status_of(camp_id) == Some(CampaignStatus::Finished)
    })
    .await;

    let mut bodies: Vec<String> = transport
        .sent_messages()
        .into_iter()
        .map(|m| String::from_utf8(m.body).unwrap())
        .collect();
    bodies.sort();
    assert_eq!(bodies, vec!["Hi A", "Hi B", "Hi C"]);

    let notifications = notify.notifications();
    assert!(
        notifications.iter().any(|n| n.subject.starts_with("Finished")),
        "expected a 'Finished: ...' notification, got {notifications:?}"
    );

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn s2_error_pause() {
    let data_source = Arc::new(InMemoryDataSource::new());
    let camp_id = CampaignId(1);
    let subscribers: Vec<_> = (1..=10).map(|i| subscriber(i, "A")).collect();
    data_source.seed_campaign(running_campaign(1, "t1", "Hi {{ subscriber.name }}", subscribers));

    let transport = Arc::new(RecordingTransport::new("t1"));
    transport.fail_next(10_000);
    let notify = Arc::new(RecordingNotifySink::new());

    let mut manager = Manager::new(settings(3, 2, 2), data_source.clone(), notify.clone());
    manager.add_transport(transport.clone()).unwrap();
    let manager = Arc::new(manager);
    let _handle = manager.run(TICK);

    poll_until("campaign paused", || {
        data_source.status_of(camp_id) == Some(CampaignStatus::Paused)
    })
    .await;

    let attempts_at_pause = transport.attempt_count();
    assert!(
        attempts_at_pause < 10,
        "expected fewer than all 10 subscribers to be attempted before pause, got {attempts_at_pause}"
    );
    assert_eq!(transport.sent_count(), 0, "every push was made to fail");

    // No further messages for this campaign should be enqueued once paused.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        transport.attempt_count(),
        attempts_at_pause,
        "no further pushes should be attempted for a paused campaign"
    );

    let notifications = notify.notifications();
    assert!(notifications.iter().any(|n| n.payload.reason == "Too many errors"));

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn s3_sliding_window_caps_throughput() {
    let data_source = Arc::new(InMemoryDataSource::new());
    let subscribers: Vec<_> = (1..=20).map(|i| subscriber(i, "A")).collect();
    data_source.seed_campaign(running_campaign(1, "t1", "Hi {{ subscriber.name }}", subscribers));

    let transport = Arc::new(RecordingTransport::new("t1"));
    let notify = Arc::new(RecordingNotifySink::new());

    let mut cfg = settings(100, 4, 0);
    cfg.sliding_window_enabled = true;
    cfg.sliding_window_duration_secs = 1;
    cfg.sliding_window_rate = 5;

    let mut manager = Manager::new(cfg, data_source.clone(), notify.clone());
    manager.add_transport(transport.clone()).unwrap();
    let manager = Arc::new(manager);

    let start = tokio::time::Instant::now();
    let _handle = manager.run(TICK);

    poll_until("all 20 messages sent", || transport.sent_count() == 20).await;
    let elapsed = start.elapsed();

    // 20 messages at 5/window allows one free window before the limiter
    // starts sleeping: 3 full windows' worth of waiting (spec.md §8 S3).
    assert!(
        elapsed >= Duration::from_secs(3),
        "expected sliding window to stretch dispatch across >= 3s, took {elapsed:?}"
    );

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn s4_link_dedup() {
    let data_source = Arc::new(InMemoryDataSource::new());
    let subscribers: Vec<_> = (1..=100).map(|i| subscriber(i, "A")).collect();
    data_source.seed_campaign(running_campaign(
        1,
        "t1",
        r#"{{ track_link(url="https://x.test/a", sub_uuid=subscriber.uuid) }}"#,
        subscribers,
    ));

    let transport = Arc::new(RecordingTransport::new("t1"));
    let notify = Arc::new(RecordingNotifySink::new());

    let mut manager = Manager::new(settings(1000, 4, 0), data_source.clone(), notify.clone());
    manager.add_transport(transport.clone()).unwrap();
    let manager = Arc::new(manager);
    let _handle = manager.run(TICK);

    poll_until("all 100 messages sent", || transport.sent_count() == 100).await;

    assert_eq!(data_source.link_count(), 1, "CreateLink should be called exactly once");

    let bodies: Vec<String> = transport
        .sent_messages()
        .into_iter()
        .map(|m| String::from_utf8(m.body).unwrap())
        .collect();
    // Body is exactly the rendered URL: `/link/{token}/{camp_uuid}/{sub_uuid}`.
    // The subscriber-uuid segment legitimately differs per recipient; the
    // token segment must not.
    assert!(bodies[0].starts_with("/link/"));
    let first_token = bodies[0].split('/').nth(2).unwrap().to_string();
    assert!(
        bodies.iter().all(|b| b.split('/').nth(2) == Some(first_token.as_str())),
        "every rendered URL should share the same tracking token"
    );

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn s5_admin_cancel_mid_run() {
    let data_source = Arc::new(InMemoryDataSource::new());
    let camp_id = CampaignId(1);
    let subscribers: Vec<_> = (1..=10_000).map(|i| subscriber(i, "A")).collect();
    data_source.seed_campaign(running_campaign(1, "t1", "Hi {{ subscriber.name }}", subscribers));

    let transport = Arc::new(RecordingTransport::new("t1"));
    let notify = Arc::new(RecordingNotifySink::new());

    let batch_size = 500;
    let concurrency = 4;
    let mut manager = Manager::new(settings(batch_size, concurrency, 0), data_source.clone(), notify.clone());
    manager.add_transport(transport.clone()).unwrap();
    let manager = Arc::new(manager);
    let _handle = manager.run(TICK);

    poll_until("at least 100 messages dispatched", || transport.sent_count() >= 100).await;
    data_source
        .update_campaign_status(camp_id, CampaignStatus::Cancelled)
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    loop {
        if !manager.is_active(camp_id).await {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: campaign exits the active set");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    // Let any in-flight batch finish draining before taking the final count.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let total = transport.sent_count();
    // One in-flight batch may already be mid-push when the cancellation is
    // issued, and that same batch's messages still drain through the
    // worker pool before the next scheduler tick observes the new status
    // and removes the campaign from the active set (spec.md §5) — allow
    // one full batch of slack on top of the 100-message threshold.
    let bound = 100 + concurrency * 2 + batch_size;
    assert!(total <= bound, "expected at most {bound} messages, got {total}");
    assert!(total < 10_000, "cancellation should have stopped dispatch well short of all 10,000 subscribers");

    let notifications = notify.notifications();
    assert!(notifications.iter().any(|n| n.payload.status == CampaignStatus::Cancelled));

    manager.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn s6_unknown_messenger_is_cancelled() {
    let data_source = Arc::new(InMemoryDataSource::new());
    let camp_id = CampaignId(1);
    data_source.seed_campaign(running_campaign(1, "nope", "Hi {{ subscriber.name }}", vec![subscriber(1, "A")]));

    let transport = Arc::new(RecordingTransport::new("t1"));
    let notify = Arc::new(RecordingNotifySink::new());

    let mut manager = Manager::new(settings(10, 1, 0), data_source.clone(), notify.clone());
    manager.add_transport(transport.clone()).unwrap();
    let manager = Arc::new(manager);
    let _handle = manager.run(TICK);

    poll_until("campaign cancelled", || {
        data_source.status_of(camp_id) == Some(CampaignStatus::Cancelled)
    })
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.sent_count(), 0, "no messages should ever be enqueued");

    manager.close().await;
}

/// spec.md §8 invariant 1: messages are pushed, and here also dispatched, in
/// strictly ascending subscriber-id order. `s1_single_batch_happy_path` only
/// checks the set of rendered bodies, not their order, so this test pins
/// the ordering guarantee directly. Concurrency is 1 so a single worker
/// drains the campaign-message queue serially: dispatch order then matches
/// enqueue order exactly (with more than one worker, dispatch order is
/// explicitly not guaranteed — only enqueue order is, per spec.md §4.4).
#[tokio::test(flavor = "multi_thread")]
async fn invariant1_messages_dispatch_in_ascending_subscriber_id_order() {
    let data_source = Arc::new(InMemoryDataSource::new());
    let camp_id = CampaignId(1);
    let subscribers: Vec<_> = (1..=25).map(|i| subscriber(i, "A")).collect();
    data_source.seed_campaign(running_campaign(1, "t1", "Hi {{ subscriber.name }}", subscribers));

    let transport = Arc::new(RecordingTransport::new("t1"));
    let notify = Arc::new(RecordingNotifySink::new());

    let mut manager = Manager::new(settings(7, 1, 0), data_source.clone(), notify.clone());
    manager.add_transport(transport.clone()).unwrap();
    let manager = Arc::new(manager);
    let _handle = manager.run(TICK);

    poll_until("all 25 messages sent", || transport.sent_count() == 25).await;
    poll_until("campaign finished", || {
        data_source.status_of(camp_id) == Some(CampaignStatus::Finished)
    })
    .await;

    let ids: Vec<i64> = transport
        .sent_messages()
        .into_iter()
        .map(|m| m.subscriber.id)
        .collect();
    let expected: Vec<i64> = (1..=25).collect();
    assert_eq!(
        ids, expected,
        "messages must be pushed and dispatched in strictly ascending subscriber-id order"
    );

    manager.close().await;
}

/// spec.md §8 invariant 7: with `IndividualTracking=false`, every generated
/// tracking URL carries the zero-uuid in the subscriber position. Every
/// other scenario here sets `individual_tracking: true`, so this is the
/// only test that exercises `subscriber_uuid`'s anonymization branch.
#[tokio::test(flavor = "multi_thread")]
async fn invariant7_anonymized_tracking_urls_use_the_zero_uuid() {
    let data_source = Arc::new(InMemoryDataSource::new());
    let camp_id = CampaignId(1);
    data_source.seed_campaign(running_campaign(
        1,
        "t1",
        r#"{{ track_link(url="https://x.test/a", sub_uuid=subscriber.uuid) }}"#,
        vec![subscriber(1, "A"), subscriber(2, "B")],
    ));

    let transport = Arc::new(RecordingTransport::new("t1"));
    let notify = Arc::new(RecordingNotifySink::new());

    let mut cfg = settings(10, 1, 0);
    cfg.individual_tracking = false;
    let mut manager = Manager::new(cfg, data_source.clone(), notify.clone());
    manager.add_transport(transport.clone()).unwrap();
    let manager = Arc::new(manager);
    let _handle = manager.run(TICK);

    poll_until("2 messages sent", || transport.sent_count() == 2).await;
    poll_until("campaign finished", || {
        data_source.status_of(camp_id) == Some(CampaignStatus::Finished)
    })
    .await;

    let zero_uuid = ANONYMOUS_SUBSCRIBER_UUID.to_string();
    for message in transport.sent_messages() {
        let body = String::from_utf8(message.body).unwrap();
        assert!(
            body.ends_with(&zero_uuid),
            "expected the subscriber segment of the tracking URL to be the zero-uuid, got {body}"
        );
    }

    manager.close().await;
}

/// spec.md §8 invariant 8: `push_message`/`push_campaign_message` return an
/// error after at most 3s when their queue is saturated, rather than
/// blocking indefinitely.
#[tokio::test(flavor = "multi_thread")]
async fn invariant8_push_message_times_out_on_a_saturated_queue() {
    let data_source = Arc::new(InMemoryDataSource::new());
    let notify = Arc::new(RecordingNotifySink::new());
    let transport = Arc::new(RecordingTransport::new("t1"));

    let mut manager = Manager::new(settings(10, 1, 0), data_source, notify);
    manager.add_transport(transport).unwrap();
    let manager = Arc::new(manager);
    // `manager.run` is deliberately never called: nothing drains the
    // ad-hoc queue (capacity = Concurrency = 1), so the first push fills
    // the only slot and the second must block until it times out.

    let adhoc = |n: i64| AdHocMessage {
        messenger: "t1".to_string(),
        from: "from@x.test".to_string(),
        to: vec![format!("to{n}@x.test")],
        subject: "hi".to_string(),
        content_type: ContentType::Html,
        body: b"hi".to_vec(),
        alt_body: Vec::new(),
    };

    manager
        .push_message(adhoc(1))
        .await
        .expect("first push fills the only empty slot");

    let start = tokio::time::Instant::now();
    let result = manager.push_message(adhoc(2)).await;
    let elapsed = start.elapsed();

    match result {
        Err(EngineError::PushTimedOut) => {}
        other => panic!("expected a timeout error, got {other:?}"),
    }
    assert!(
        elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4),
        "expected the timeout to fire at ~3s, took {elapsed:?}"
    );
}
