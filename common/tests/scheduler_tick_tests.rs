// Scheduler tick behavior against the in-memory store and scripted platforms

mod support;

use chrono::{Duration as ChronoDuration, Utc};
use common::config::SchedulerConfig;
use common::models::{ContentItem, FailureKind, MediaRef, Platform, PublicationStatus};
use common::publication;
use common::store::{ContentStore, InMemoryContentStore};
use std::sync::Arc;
use std::time::Duration;
use support::{
    engine, route, scheduled, test_config, Behavior, FlakyStore, ScriptedTransport, SnapshotListStore,
};
use tokio::sync::Notify;

#[tokio::test]
async fn test_timeout_on_one_platform_does_not_block_the_other() {
    let now = Utc::now();
    let item = ContentItem::new("alice", "<p>Launch <b>today</b></p>")
        .with_platform(Platform::Telegram, scheduled(now))
        .with_platform(Platform::Vk, scheduled(now));
    let store = Arc::new(InMemoryContentStore::with_items(vec![item.clone()]));

    let slow = ScriptedTransport::new(Behavior::Hang);
    let fast = ScriptedTransport::new(Behavior::Succeed);
    let engine = engine(
        test_config(),
        store.clone(),
        vec![
            route(Platform::Telegram, slow.clone(), Duration::from_millis(100)),
            route(Platform::Vk, fast.clone(), Duration::from_secs(5)),
        ],
    );

    let report = engine.run_tick_at(now).await.unwrap();
    assert_eq!(report.due_pairs, 2);
    assert_eq!(report.published, 1);
    assert_eq!(report.failed, 1);

    let stored = store.get(item.id).await.unwrap();
    let vk = &stored.platforms[&Platform::Vk];
    assert!(publication::is_terminal_success(vk));
    assert_eq!(vk.remote_id.as_deref(), Some("1"));

    let telegram = &stored.platforms[&Platform::Telegram];
    assert_eq!(telegram.status, PublicationStatus::Failed);
    assert_eq!(telegram.error_kind, Some(FailureKind::Transport));
    assert_eq!(telegram.attempts, 1);
    assert!(telegram.permalink.is_none());
}

#[tokio::test]
async fn test_panicking_pair_is_isolated_from_the_rest_of_the_tick() {
    let now = Utc::now();
    let first = ContentItem::new("alice", "first")
        .with_platform(Platform::Telegram, scheduled(now))
        .with_platform(Platform::Vk, scheduled(now))
        .with_platform(Platform::Facebook, scheduled(now));
    let second = ContentItem::new("bob", "second").with_platform(Platform::Vk, scheduled(now));
    let store = Arc::new(InMemoryContentStore::with_items(vec![first.clone(), second.clone()]));

    let succeed = ScriptedTransport::new(Behavior::Succeed);
    let engine = engine(
        test_config(),
        store.clone(),
        vec![
            route(Platform::Telegram, ScriptedTransport::new(Behavior::Panic), Duration::from_secs(5)),
            route(Platform::Vk, succeed.clone(), Duration::from_secs(5)),
            route(Platform::Facebook, succeed.clone(), Duration::from_secs(5)),
        ],
    );

    let report = engine.run_tick_at(now).await.unwrap();
    assert_eq!(report.due_pairs, 4);
    assert_eq!(report.published, 3);
    assert_eq!(report.failed, 1);
    assert!(!engine.guard().status().held);

    let stored = store.get(first.id).await.unwrap();
    let telegram = &stored.platforms[&Platform::Telegram];
    assert_eq!(telegram.status, PublicationStatus::Failed);
    assert_eq!(telegram.error_kind, Some(FailureKind::Interrupted));
    assert!(publication::is_terminal_success(&stored.platforms[&Platform::Vk]));
    assert!(publication::is_terminal_success(&stored.platforms[&Platform::Facebook]));

    let other = store.get(second.id).await.unwrap();
    assert!(publication::is_terminal_success(&other.platforms[&Platform::Vk]));
}

#[tokio::test]
async fn test_stale_flag_is_force_cleared_by_next_tick() {
    let now = Utc::now();
    let item = ContentItem::new("alice", "hello").with_platform(Platform::Vk, scheduled(now));
    let store = Arc::new(InMemoryContentStore::with_items(vec![item]));
    let engine = engine(
        test_config(),
        store,
        vec![route(Platform::Vk, ScriptedTransport::new(Behavior::Succeed), Duration::from_secs(5))],
    );

    let abandoned = engine.guard().try_enter(now - ChronoDuration::seconds(61)).unwrap();

    let report = engine.run_tick_at(now).await.unwrap();
    assert!(!report.skipped);
    assert_eq!(report.published, 1);

    drop(abandoned);
    assert!(!engine.guard().status().held);
}

#[tokio::test]
async fn test_recent_flag_makes_tick_skip() {
    let now = Utc::now();
    let item = ContentItem::new("alice", "hello").with_platform(Platform::Vk, scheduled(now));
    let store = Arc::new(InMemoryContentStore::with_items(vec![item.clone()]));
    let transport = ScriptedTransport::new(Behavior::Succeed);
    let engine = engine(
        test_config(),
        store.clone(),
        vec![route(Platform::Vk, transport.clone(), Duration::from_secs(5))],
    );

    let _holder = engine.guard().try_enter(now - ChronoDuration::seconds(30)).unwrap();
    let report = engine.run_tick_at(now).await.unwrap();

    assert!(report.skipped);
    assert_eq!(transport.calls(), 0);
    let stored = store.get(item.id).await.unwrap();
    assert_eq!(stored.platforms[&Platform::Vk].status, PublicationStatus::Scheduled);
}

#[tokio::test]
async fn test_concurrent_tick_is_skipped_while_one_is_in_flight() {
    let now = Utc::now();
    let item = ContentItem::new("alice", "hello").with_platform(Platform::Vk, scheduled(now));
    let store = Arc::new(InMemoryContentStore::with_items(vec![item.clone()]));

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let transport = ScriptedTransport::new(Behavior::Block {
        entered: entered.clone(),
        release: release.clone(),
    });
    let engine = Arc::new(engine(
        test_config(),
        store.clone(),
        vec![route(Platform::Vk, transport.clone(), Duration::from_secs(5))],
    ));

    let running = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run_tick_at(now).await })
    };
    entered.notified().await;

    let second = engine.run_tick_at(now + ChronoDuration::seconds(1)).await.unwrap();
    assert!(second.skipped);
    assert!(engine.guard().status().held);

    release.notify_one();
    let first = running.await.unwrap().unwrap();
    assert_eq!(first.published, 1);
    assert_eq!(transport.calls(), 1);
    assert!(!engine.guard().status().held);
}

#[tokio::test]
async fn test_no_attempt_before_grace_window() {
    let now = Utc::now();
    let item = ContentItem::new("alice", "later")
        .with_platform(Platform::Vk, scheduled(now + ChronoDuration::seconds(120)));
    let store = Arc::new(InMemoryContentStore::with_items(vec![item.clone()]));
    let transport = ScriptedTransport::new(Behavior::Succeed);
    let engine = engine(
        test_config(),
        store.clone(),
        vec![route(Platform::Vk, transport.clone(), Duration::from_secs(5))],
    );

    let early = engine.run_tick_at(now).await.unwrap();
    assert_eq!(early.due_pairs, 0);
    let early = engine.run_tick_at(now + ChronoDuration::seconds(59)).await.unwrap();
    assert_eq!(early.due_pairs, 0);
    assert_eq!(transport.calls(), 0);

    let on_time = engine.run_tick_at(now + ChronoDuration::seconds(60)).await.unwrap();
    assert_eq!(on_time.published, 1);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_short_grace_delays_near_future_record() {
    let now = Utc::now();
    let item = ContentItem::new("alice", "soon")
        .with_platform(Platform::Vk, scheduled(now + ChronoDuration::seconds(5)));
    let store = Arc::new(InMemoryContentStore::with_items(vec![item.clone()]));
    let transport = ScriptedTransport::new(Behavior::Succeed);
    let config = SchedulerConfig {
        early_grace_seconds: 2,
        ..test_config()
    };
    let engine = engine(
        config,
        store.clone(),
        vec![route(Platform::Vk, transport.clone(), Duration::from_secs(5))],
    );

    assert_eq!(engine.run_tick_at(now).await.unwrap().due_pairs, 0);
    let report = engine.run_tick_at(now + ChronoDuration::seconds(3)).await.unwrap();
    assert_eq!(report.published, 1);
}

#[tokio::test]
async fn test_failed_publishing_write_defers_pair_untouched() {
    let now = Utc::now();
    let item = ContentItem::new("alice", "hello").with_platform(Platform::Vk, scheduled(now));
    let store = Arc::new(FlakyStore::failing_patches(vec![item.clone()], vec![0]));
    let transport = ScriptedTransport::new(Behavior::Succeed);
    let engine = engine(
        test_config(),
        store.clone(),
        vec![route(Platform::Vk, transport.clone(), Duration::from_secs(5))],
    );

    let first = engine.run_tick_at(now).await.unwrap();
    assert_eq!(first.deferred, 1);
    assert_eq!(transport.calls(), 0);
    let record = &store.get(item.id).await.unwrap().platforms[&Platform::Vk];
    assert_eq!(record.status, PublicationStatus::Scheduled);
    assert_eq!(record.attempts, 0);

    let second = engine.run_tick_at(now + ChronoDuration::seconds(90)).await.unwrap();
    assert_eq!(second.published, 1);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_lost_outcome_leaves_record_publishing() {
    let now = Utc::now();
    let item = ContentItem::new("alice", "hello").with_platform(Platform::Vk, scheduled(now));
    let store = Arc::new(FlakyStore::failing_from(vec![item.clone()], 1));
    let transport = ScriptedTransport::new(Behavior::Succeed);
    let engine = engine(
        test_config(),
        store.clone(),
        vec![route(Platform::Vk, transport.clone(), Duration::from_secs(5))],
    );

    let report = engine.run_tick_at(now).await.unwrap();
    assert_eq!(report.unrecorded, 1);
    assert_eq!(report.published, 0);

    let record = &store.get(item.id).await.unwrap().platforms[&Platform::Vk];
    assert_eq!(record.status, PublicationStatus::Publishing);
    assert!(record.permalink.is_none());

    // Never re-sent while the outcome is unknown
    let again = engine.run_tick_at(now + ChronoDuration::seconds(90)).await.unwrap();
    assert_eq!(again.due_pairs, 0);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_open_circuit_defers_remaining_pairs() {
    let now = Utc::now();
    let items: Vec<ContentItem> = (0..6)
        .map(|i| ContentItem::new("alice", format!("post {}", i)).with_platform(Platform::Telegram, scheduled(now)))
        .collect();
    let store = Arc::new(InMemoryContentStore::with_items(items));
    let transport = ScriptedTransport::new(Behavior::Reject);
    let config = SchedulerConfig {
        max_concurrent_pairs: 1,
        ..test_config()
    };
    let engine = engine(
        config,
        store,
        vec![route(Platform::Telegram, transport.clone(), Duration::from_secs(5))],
    );

    let report = engine.run_tick_at(now).await.unwrap();
    assert_eq!(report.due_pairs, 6);
    assert_eq!(report.failed, 5);
    assert_eq!(report.deferred, 1);
    assert_eq!(transport.calls(), 5);
}

#[tokio::test]
async fn test_content_rejected_by_transformer_is_content_failure() {
    let now = Utc::now();
    let item = ContentItem::new("alice", "no picture").with_platform(Platform::Instagram, scheduled(now));
    let with_media = ContentItem::new("alice", "picture")
        .with_media(MediaRef::image("https://cdn.example.com/a.jpg"))
        .with_platform(Platform::Instagram, scheduled(now));
    let store = Arc::new(InMemoryContentStore::with_items(vec![item.clone(), with_media.clone()]));
    let transport = ScriptedTransport::new(Behavior::Succeed);
    let engine = engine(
        test_config(),
        store.clone(),
        vec![route(Platform::Instagram, transport.clone(), Duration::from_secs(5))],
    );

    let report = engine.run_tick_at(now).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.published, 1);
    assert_eq!(transport.calls(), 1);

    let record = &store.get(item.id).await.unwrap().platforms[&Platform::Instagram];
    assert_eq!(record.error_kind, Some(FailureKind::Content));
}

#[tokio::test]
async fn test_overlapping_ticks_publish_each_pair_once() {
    let t0 = Utc::now();
    let items: Vec<ContentItem> = (0..3)
        .map(|i| ContentItem::new("alice", format!("post {}", i)).with_platform(Platform::Telegram, scheduled(t0)))
        .collect();
    let store = Arc::new(InMemoryContentStore::with_items(items.clone()));
    let transport = ScriptedTransport::new(Behavior::Delay(Duration::from_millis(300)));
    let config = SchedulerConfig {
        max_concurrent_pairs: 1,
        ..test_config()
    };
    let engine = Arc::new(engine(
        config,
        store.clone(),
        vec![route(Platform::Telegram, transport.clone(), Duration::from_secs(5))],
    ));

    let running = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run_tick_at(t0).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The first tick is still delivering when this one force-clears its flag
    let second = engine.run_tick_at(t0 + ChronoDuration::seconds(61)).await.unwrap();
    let first = running.await.unwrap().unwrap();

    assert!(!second.skipped);
    assert_eq!(first.due_pairs, 3);
    assert_eq!(second.due_pairs, 2);
    assert_eq!(first.published + second.published, 3);
    assert_eq!(first.deferred + second.deferred, 2);
    assert_eq!(transport.calls(), 3);

    for item in &items {
        let record = &store.get(item.id).await.unwrap().platforms[&Platform::Telegram];
        assert!(publication::is_terminal_success(record));
        assert_eq!(record.attempts, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_tick_starts_no_pair_after_stuck_timeout() {
    let now = Utc::now();
    let items: Vec<ContentItem> = (0..3)
        .map(|i| ContentItem::new("alice", format!("post {}", i)).with_platform(Platform::Telegram, scheduled(now)))
        .collect();
    let store = Arc::new(InMemoryContentStore::with_items(items.clone()));
    let transport = ScriptedTransport::new(Behavior::Delay(Duration::from_secs(50)));
    let config = SchedulerConfig {
        max_concurrent_pairs: 1,
        stuck_tick_timeout_seconds: 60,
        ..test_config()
    };
    let engine = engine(
        config,
        store.clone(),
        vec![route(Platform::Telegram, transport.clone(), Duration::from_secs(55))],
    );

    // Pairs start at 0 s and 50 s; the third would start at 100 s
    let report = engine.run_tick_at(now).await.unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(report.deferred, 1);
    assert_eq!(transport.calls(), 2);

    let untouched = store
        .list(&common::models::ContentFilter::due_by(now))
        .await
        .unwrap();
    assert_eq!(untouched.len(), 1);
    let record = &untouched[0].platforms[&Platform::Telegram];
    assert_eq!(record.status, PublicationStatus::Scheduled);
    assert_eq!(record.attempts, 0);
}

#[tokio::test]
async fn test_stale_listing_never_overwrites_delivered_records() {
    let now = Utc::now();
    let delivered = common::models::PlatformRecord {
        status: PublicationStatus::Published,
        permalink: Some("https://t.me/news/1".to_string()),
        remote_id: Some("1".to_string()),
        attempts: 1,
        ..scheduled(now)
    };
    let listed = ContentItem::new("alice", "no picture")
        .with_platform(Platform::Telegram, scheduled(now))
        .with_platform(Platform::Instagram, scheduled(now));
    let mut live = listed.clone();
    live.platforms.insert(Platform::Telegram, delivered.clone());
    live.platforms.insert(Platform::Instagram, delivered.clone());
    let store = Arc::new(SnapshotListStore::new(vec![listed.clone()], vec![live]));

    let transport = ScriptedTransport::new(Behavior::Succeed);
    let engine = engine(
        test_config(),
        store.clone(),
        vec![
            route(Platform::Telegram, transport.clone(), Duration::from_secs(5)),
            route(Platform::Instagram, transport.clone(), Duration::from_secs(5)),
        ],
    );

    let report = engine.run_tick_at(now).await.unwrap();
    assert_eq!(report.due_pairs, 2);
    assert_eq!(report.deferred, 2);
    assert_eq!(transport.calls(), 0);

    // Neither the claim nor the pre-delivery content failure lands
    let stored = store.get(listed.id).await.unwrap();
    assert_eq!(stored.platforms[&Platform::Telegram], delivered);
    assert_eq!(stored.platforms[&Platform::Instagram], delivered);
}
