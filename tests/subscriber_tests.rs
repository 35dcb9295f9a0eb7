use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{self, Duration};

use quorum_feed::aggregator::{
    DataPackageSubscriber, SignedPackagesResponse, SubscriberEvent, SubscriberState,
};
use quorum_feed::error::QuorumError;
use quorum_feed::limiters::RateLimitsCircuitBreaker;
use quorum_feed::package::{DataPackage, DataPackagesResponse, DataPoint, Wallet};
use quorum_feed::pubsub::{DataPackageTopic, LocalPubSubClient, PubSubClient, PubSubPayload};
use quorum_feed::settings::{ReferenceVerifierSettings, SubscriberSettings};

const SERVICE: &str = "redstone-primary-prod";
const KEYS: [&str; 7] = [
    "0xfae81e7c122f2ad245be182d88889e6a037bbeebd7de7bb5ca10f891d359e440",
    "0x0a566b182e650472efe9a17efb850cc01bb5e479add24739942ba43327a194f9",
    "0xd56e1ee933657d6bcdec81f9956392aef47a7f8b1a1275b6e4ad551fb5d6b14c",
    "0x7712474356ae40814b45e9317579388d5e185ac17177f0399831f29141c7c896",
    "0x0926c41d4b99ce1a7b713f14bc553975ee1de28311a94f10ccedec7d9c35c329",
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
];

fn wallets() -> Vec<Wallet> {
    KEYS.iter()
        .map(|k| Wallet::from_private_key_hex(k).unwrap())
        .collect()
}

fn now_ts() -> i64 {
    // whole seconds, like node packages
    Utc::now().timestamp_millis() / 1000 * 1000
}

fn settings(
    feeds: &[&str],
    signers: &[Wallet],
    unique: usize,
    minimal: usize,
) -> SubscriberSettings {
    let mut settings = SubscriberSettings::new(
        SERVICE,
        feeds.iter().map(|f| f.to_string()).collect(),
        signers.iter().map(|w| w.address().to_string()).collect(),
        unique,
    );
    settings.minimal_off_chain_signers_count = minimal;
    settings
}

fn package_json(wallet: &Wallet, feed: &str, ts: i64, value: f64) -> serde_json::Value {
    let signed = DataPackage::new(feed, ts, vec![DataPoint::new(feed, value)])
        .sign(wallet)
        .unwrap();
    serde_json::to_value(signed).unwrap()
}

fn topic(feed: &str, wallet: &Wallet) -> String {
    DataPackageTopic::new(SERVICE, feed, wallet.address()).encode()
}

struct Harness {
    client: Arc<LocalPubSubClient>,
    subscriber: DataPackageSubscriber,
    events: mpsc::UnboundedReceiver<SubscriberEvent>,
}

impl Harness {
    async fn start(settings: SubscriberSettings) -> Self {
        let client = Arc::new(LocalPubSubClient::new("test"));
        let subscriber = DataPackageSubscriber::new(client.clone(), settings).unwrap();
        let events = subscriber.subscribe().await.unwrap();
        Self {
            client,
            subscriber,
            events,
        }
    }

    async fn send(&self, wallet: &Wallet, feed: &str, ts: i64, value: f64) {
        self.send_raw(&topic(feed, wallet), package_json(wallet, feed, ts, value))
            .await;
    }

    async fn send_raw(&self, topic: &str, payload: serde_json::Value) {
        self.client
            .publish(vec![PubSubPayload::new(topic, payload)])
            .await
            .unwrap();
    }

    /// Every command sent so far has been handled once this returns
    async fn settle(&self) -> quorum_feed::aggregator::SubscriberStatus {
        self.subscriber.status().await.unwrap()
    }

    async fn next_batch(&mut self) -> DataPackagesResponse {
        match time::timeout(Duration::from_secs(30), self.events.recv()).await {
            Ok(Some(SubscriberEvent::Packages(batch))) => batch,
            other => panic!("expected a batch, got {:?}", other),
        }
    }

    fn assert_no_event(&mut self) {
        assert!(self.events.try_recv().is_err(), "unexpected event");
    }
}

fn signers_of(batch: &DataPackagesResponse, feed: &str) -> BTreeSet<String> {
    batch[feed].iter().map(|p| p.signer.clone()).collect()
}

fn values_of(batch: &DataPackagesResponse, feed: &str) -> Vec<f64> {
    let mut values: Vec<f64> = batch[feed].iter().map(|p| p.value()).collect();
    values.sort_by(f64::total_cmp);
    values
}

#[tokio::test]
async fn test_construction_validates_without_subscribing() {
    let w = wallets();
    let client = Arc::new(LocalPubSubClient::new("test"));

    let config_error = |s: SubscriberSettings| match DataPackageSubscriber::new(client.clone(), s) {
        Err(QuorumError::Config(msg)) => msg,
        _ => panic!("expected a configuration error"),
    };
    assert!(config_error(settings(&["ETH"], &[], 1, 1)).contains("at least one authorized signer"));
    assert!(config_error(settings(&["ETH"], &w[..2], 3, 3)).contains("Misconfiguration"));
    assert!(config_error(settings(&["ETH"], &w[..3], 3, 2)).contains("Misconfiguration"));

    assert!(DataPackageSubscriber::new(client.clone(), settings(&["ETH"], &w[..3], 2, 2)).is_ok());
    assert!(client.subscribed_topics().is_empty());
}

#[tokio::test]
async fn test_topics_are_feed_major() {
    let w = wallets();
    let client = Arc::new(LocalPubSubClient::new("test"));
    let subscriber =
        DataPackageSubscriber::new(client, settings(&["ETH", "BTC"], &w[..2], 1, 1)).unwrap();
    assert_eq!(
        subscriber.topics(),
        &[
            topic("ETH", &w[0]),
            topic("ETH", &w[1]),
            topic("BTC", &w[0]),
            topic("BTC", &w[1]),
        ]
    );
}

#[tokio::test]
async fn test_subscribing_twice_fails() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..2], 1, 1)).await;
    let err = h.subscriber.subscribe().await.err();
    assert!(matches!(err, Some(QuorumError::Subscription(_))));
    assert_eq!(h.client.subscribed_topics().len(), 2);
    h.assert_no_event();
}

#[tokio::test]
async fn test_status_before_subscribe_fails() {
    let w = wallets();
    let client = Arc::new(LocalPubSubClient::new("test"));
    let subscriber =
        DataPackageSubscriber::new(client, settings(&["ETH"], &w[..2], 1, 1)).unwrap();
    assert!(matches!(
        subscriber.status().await,
        Err(QuorumError::Subscription(_))
    ));
}

#[tokio::test]
async fn test_publishes_instantly_when_all_signers_report() {
    let w = wallets();
    let mut s = settings(&["ETH", "BTC"], &w[..3], 2, 2);
    s.wait_ms_after_minimal_satisfied = 60_000;
    let mut h = Harness::start(s).await;
    let ts = now_ts();

    for (i, wallet) in w[..3].iter().enumerate() {
        h.send(wallet, "ETH", ts, 3000.0 + i as f64).await;
    }
    for wallet in &w[..2] {
        h.send(wallet, "BTC", ts, 60_000.0).await;
    }
    let status = h.settle().await;
    assert_eq!(status.scheduled_publishes, vec![ts]);
    h.assert_no_event();

    h.send(&w[2], "BTC", ts, 60_001.0).await;
    let batch = h.next_batch().await;
    assert_eq!(batch.len(), 2);
    assert_eq!(batch["ETH"].len(), 2);
    assert_eq!(batch["BTC"].len(), 2);

    let status = h.settle().await;
    assert_eq!(status.last_published["ETH"].timestamp_ms, ts);
    assert_eq!(status.last_published["BTC"].timestamp_ms, ts);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_publish_includes_late_arrivals() {
    let w = wallets();
    let mut s = settings(&["ETH"], &w[..4], 2, 2);
    s.wait_ms_after_minimal_satisfied = 200;
    let mut h = Harness::start(s).await;
    let ts = now_ts();

    h.send(&w[0], "ETH", ts, 100.0).await;
    h.send(&w[1], "ETH", ts, 200.0).await;
    h.settle().await;
    h.assert_no_event();

    time::advance(Duration::from_millis(100)).await;
    h.send(&w[2], "ETH", ts, 110.0).await;
    h.settle().await;
    h.assert_no_event();

    let batch = h.next_batch().await;
    assert_eq!(values_of(&batch, "ETH"), vec![100.0, 110.0]);
    assert!(signers_of(&batch, "ETH").contains(w[2].address()));

    // a single timer per timestamp
    h.settle().await;
    time::sleep(Duration::from_secs(1)).await;
    h.assert_no_event();
}

#[tokio::test]
async fn test_zero_wait_publishes_once_minimum_reached() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..5], 3, 3)).await;
    let ts = now_ts();

    h.send(&w[0], "ETH", ts, 1.0).await;
    h.send(&w[1], "ETH", ts, 1.0).await;
    h.settle().await;
    h.assert_no_event();

    h.send(&w[2], "ETH", ts, 1.0).await;
    let batch = h.next_batch().await;
    assert_eq!(batch["ETH"].len(), 3);
}

#[tokio::test]
async fn test_four_nodes_and_one_lagging() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..5], 4, 4)).await;
    let ts = now_ts();

    for wallet in &w[..4] {
        h.send(wallet, "ETH", ts, 2500.0).await;
    }
    let batch = h.next_batch().await;
    assert_eq!(batch["ETH"].len(), 4);
    assert!(!signers_of(&batch, "ETH").contains(w[4].address()));

    // the straggler for an already published timestamp is dropped
    h.send(&w[4], "ETH", ts, 2500.0).await;
    h.settle().await;
    h.assert_no_event();

    let next = ts + 1000;
    for wallet in &w[1..5] {
        h.send(wallet, "ETH", next, 2501.0).await;
    }
    let batch = h.next_batch().await;
    assert_eq!(batch["ETH"][0].timestamp(), next);
}

#[tokio::test]
async fn test_strict_mode_waits_for_every_feed() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH", "BTC"], &w[..3], 2, 2)).await;
    let ts = now_ts();

    h.send(&w[0], "ETH", ts, 1.0).await;
    h.send(&w[1], "ETH", ts, 1.0).await;
    h.send(&w[0], "BTC", ts, 2.0).await;
    h.settle().await;
    h.assert_no_event();

    h.send(&w[1], "BTC", ts, 2.0).await;
    let batch = h.next_batch().await;
    assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["BTC", "ETH"]);
}

#[tokio::test]
async fn test_ignore_missing_feeds_publishes_partial_batch() {
    let w = wallets();
    let mut s = settings(&["ETH", "BTC"], &w[..3], 2, 2);
    s.ignore_missing_feeds = true;
    let mut h = Harness::start(s).await;
    let ts = now_ts();

    h.send(&w[0], "ETH", ts, 1.0).await;
    h.send(&w[1], "ETH", ts, 1.0).await;
    let batch = h.next_batch().await;
    assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["ETH"]);

    h.send(&w[0], "BTC", ts, 2.0).await;
    h.send(&w[2], "BTC", ts, 2.0).await;
    let batch = h.next_batch().await;
    assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["BTC"]);
}

#[tokio::test]
async fn test_publishes_packages_closest_to_median() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..4], 2, 3)).await;
    let ts = now_ts();

    h.send(&w[0], "ETH", ts, 100.0).await;
    h.send(&w[1], "ETH", ts, 150.0).await;
    h.send(&w[2], "ETH", ts, 101.0).await;
    let batch = h.next_batch().await;
    assert_eq!(values_of(&batch, "ETH"), vec![100.0, 101.0]);
}

#[tokio::test]
async fn test_invalid_packages_are_dropped() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..2], 1, 1)).await;
    let ts = now_ts();
    let eth_topic = topic("ETH", &w[0]);

    // schema
    h.send_raw(&eth_topic, json!({"dataPoints": "nope"})).await;
    let mut two_points = package_json(&w[0], "ETH", ts, 1.0);
    two_points["dataPoints"] = json!([
        {"dataFeedId": "ETH", "value": 1.0},
        {"dataFeedId": "ETH", "value": 2.0}
    ]);
    h.send_raw(&eth_topic, two_points).await;

    // signed by someone else than the topic's signer
    h.send_raw(&eth_topic, package_json(&w[1], "ETH", ts, 1.0))
        .await;
    // signed by an unauthorized wallet
    h.send_raw(&eth_topic, package_json(&w[5], "ETH", ts, 1.0))
        .await;
    // tampered value
    let mut tampered = package_json(&w[0], "ETH", ts, 1.0);
    tampered["dataPoints"][0]["value"] = json!(2.0);
    h.send_raw(&eth_topic, tampered).await;

    // feed nobody asked for
    h.send_raw(&eth_topic, package_json(&w[0], "SOL", ts, 1.0))
        .await;
    // older than the staleness horizon
    h.send(&w[0], "ETH", ts - 10 * 60 * 1000, 1.0).await;

    let status = h.settle().await;
    assert_eq!(status.bucket_count, 0);
    h.assert_no_event();
}

#[tokio::test]
async fn test_duplicate_signer_is_ignored() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..3], 2, 2)).await;
    let ts = now_ts();

    h.send(&w[0], "ETH", ts, 1.0).await;
    h.send(&w[0], "ETH", ts, 5.0).await;
    h.settle().await;
    h.assert_no_event();

    h.send(&w[1], "ETH", ts, 1.0).await;
    let batch = h.next_batch().await;
    assert_eq!(values_of(&batch, "ETH"), vec![1.0, 1.0]);
}

#[tokio::test]
async fn test_transport_errors_are_forwarded() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..2], 1, 1)).await;
    h.client.emit_error(&topic("ETH", &w[1]), "connection reset").unwrap();
    h.settle().await;
    assert_eq!(
        h.events.try_recv().unwrap(),
        SubscriberEvent::TransportError("connection reset".to_string())
    );
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..2], 1, 1)).await;

    h.subscriber.unsubscribe().await.unwrap();
    h.subscriber.unsubscribe().await.unwrap();
    assert_eq!(h.client.unsubscribe_requests().len(), 1);
    assert!(h.client.subscribed_topics().is_empty());

    let status = h.settle().await;
    assert_eq!(status.state, SubscriberState::Stopped);
    h.assert_no_event();
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_unsubscribes_once() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..3], 3, 3)).await;
    h.subscriber
        .enable_circuit_breaker(RateLimitsCircuitBreaker::new(Duration::from_secs(10), 2))
        .unwrap();
    let ts = now_ts();

    for i in 0..3 {
        h.send(&w[0], "ETH", ts + i * 1000, 1.0).await;
    }
    let status = h.settle().await;
    assert_eq!(status.state, SubscriberState::Stopped);

    // later traffic is ignored and no second unsubscribe happens
    for wallet in &w[..3] {
        h.send(wallet, "ETH", ts + 5000, 1.0).await;
    }
    h.subscriber.unsubscribe().await.unwrap();
    time::sleep(Duration::from_millis(10)).await;
    h.settle().await;
    assert_eq!(h.client.unsubscribe_requests().len(), 1);
    h.assert_no_event();
}

#[tokio::test(start_paused = true)]
async fn test_failed_unsubscribe_after_trip_resumes() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..2], 2, 2)).await;
    h.client.set_fail_unsubscribe(true);
    h.subscriber
        .enable_circuit_breaker(RateLimitsCircuitBreaker::new(Duration::from_secs(10), 0))
        .unwrap();
    let ts = now_ts();

    h.send(&w[0], "ETH", ts, 1.0).await;
    h.settle().await;
    time::sleep(Duration::from_millis(10)).await;

    let status = h.settle().await;
    assert_eq!(h.client.unsubscribe_requests().len(), 1);
    assert_eq!(status.state, SubscriberState::Active);
    assert!(!status.circuit_breaker_attached);

    h.send(&w[1], "ETH", ts, 1.0).await;
    let batch = h.next_batch().await;
    assert_eq!(batch["ETH"].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_during_trip_teardown_stays_stopped() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..2], 2, 2)).await;
    h.client.set_fail_unsubscribe(true);
    h.subscriber
        .enable_circuit_breaker(RateLimitsCircuitBreaker::new(Duration::from_secs(10), 0))
        .unwrap();
    let ts = now_ts();

    h.send(&w[0], "ETH", ts, 1.0).await;
    // the trip teardown fails, so the explicit request has to be retried and reported
    let result = h.subscriber.unsubscribe().await;
    assert!(result.is_err());

    time::sleep(Duration::from_millis(10)).await;
    let status = h.settle().await;
    assert_eq!(status.state, SubscriberState::Stopped);
    assert_eq!(h.client.unsubscribe_requests().len(), 2);

    h.send(&w[1], "ETH", ts, 1.0).await;
    h.settle().await;
    h.assert_no_event();
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_during_trip_teardown_waits_for_it() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..2], 2, 2)).await;
    h.subscriber
        .enable_circuit_breaker(RateLimitsCircuitBreaker::new(Duration::from_secs(10), 0))
        .unwrap();
    let ts = now_ts();

    h.send(&w[0], "ETH", ts, 1.0).await;
    h.subscriber.unsubscribe().await.unwrap();

    let status = h.settle().await;
    assert_eq!(status.state, SubscriberState::Stopped);
    assert_eq!(h.client.unsubscribe_requests().len(), 1);
    assert!(h.client.subscribed_topics().is_empty());
    h.assert_no_event();
}

#[tokio::test]
async fn test_reference_guard_rejects_deviating_values() {
    let w = wallets();
    let mut s = settings(&["ETH"], &w[..3], 2, 2);
    let mut reference = ReferenceVerifierSettings::new(vec![w[0].address().to_string()]);
    reference.threshold_deviation_percent = 1.0;
    s.reference = Some(reference);
    let mut h = Harness::start(s).await;
    let ts = now_ts();

    h.send(&w[0], "ETH", ts, 100.0).await;
    h.send(&w[1], "ETH", ts, 150.0).await;
    let status = h.settle().await;
    assert_eq!(status.reference_buckets, Some(1));
    h.assert_no_event();

    h.send(&w[2], "ETH", ts, 100.5).await;
    let batch = h.next_batch().await;
    let signers = signers_of(&batch, "ETH");
    assert!(signers.contains(w[0].address()));
    assert!(signers.contains(w[2].address()));
}

fn fallback_response(wallet: &Wallet, feed: &str, ts: i64, value: f64) -> SignedPackagesResponse {
    let signed = DataPackage::new(feed, ts, vec![DataPoint::new(feed, value)])
        .sign(wallet)
        .unwrap();
    let mut response = SignedPackagesResponse::new();
    response.insert(feed.to_string(), vec![signed]);
    response
}

#[tokio::test(start_paused = true)]
async fn test_fallback_publishes_when_quorum_stalls() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..3], 2, 2)).await;
    let ts = now_ts();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fallback_wallet = w[6].clone();
    let source = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let response = fallback_response(&fallback_wallet, "ETH", ts, 42.0);
        async move { Ok::<_, QuorumError>(response) }
    };

    h.subscriber
        .enable_fallback(Arc::new(source), Duration::from_secs(1), Duration::from_millis(100))
        .unwrap();
    let batch = h.next_batch().await;
    assert_eq!(values_of(&batch, "ETH"), vec![42.0]);
    assert_eq!(batch["ETH"][0].signer, w[6].address());

    let status = h.settle().await;
    assert!(status.fallback_enabled);
    assert_eq!(status.last_published["ETH"].timestamp_ms, ts);

    // same packages again are not newer, nothing is emitted
    time::sleep(Duration::from_secs(3)).await;
    h.settle().await;
    assert!(calls.load(Ordering::SeqCst) >= 2);
    h.assert_no_event();
}

#[tokio::test(start_paused = true)]
async fn test_fallback_idle_while_publishes_flow() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..2], 2, 2)).await;
    let ts = now_ts();
    h.send(&w[0], "ETH", ts, 1.0).await;
    h.send(&w[1], "ETH", ts, 1.0).await;
    h.next_batch().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let source = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, QuorumError>(SignedPackagesResponse::new()) }
    };
    h.subscriber
        .enable_fallback(Arc::new(source), Duration::from_secs(10), Duration::from_millis(100))
        .unwrap();

    time::sleep(Duration::from_secs(2)).await;
    h.settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_failure_keeps_ticking() {
    let w = wallets();
    let mut h = Harness::start(settings(&["ETH"], &w[..2], 2, 2)).await;
    let ts = now_ts();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fallback_wallet = w[0].clone();
    let source = move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        let response = fallback_response(&fallback_wallet, "ETH", ts, 7.0);
        async move {
            if attempt == 0 {
                Err(QuorumError::Fallback("cache unavailable".to_string()))
            } else {
                Ok::<_, QuorumError>(response)
            }
        }
    };

    h.subscriber
        .enable_fallback(Arc::new(source), Duration::from_millis(500), Duration::from_millis(100))
        .unwrap();
    let batch = h.next_batch().await;
    assert_eq!(values_of(&batch, "ETH"), vec![7.0]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disable_fallback_stops_polling() {
    let w = wallets();
    let h = Harness::start(settings(&["ETH"], &w[..2], 2, 2)).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let source = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, QuorumError>(SignedPackagesResponse::new()) }
    };

    h.subscriber
        .enable_fallback(Arc::new(source), Duration::from_secs(1), Duration::from_millis(500))
        .unwrap();
    h.subscriber.disable_fallback().unwrap();
    time::sleep(Duration::from_secs(5)).await;

    let status = h.settle().await;
    assert!(!status.fallback_enabled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_subscribe_continues_with_fallback() {
    let w = wallets();
    let client = Arc::new(LocalPubSubClient::new("down"));
    client.stop().await;

    let without = DataPackageSubscriber::new(client.clone(), settings(&["ETH"], &w[..2], 1, 1))
        .unwrap();
    assert!(matches!(
        without.subscribe().await,
        Err(QuorumError::Transport(_))
    ));

    let with = DataPackageSubscriber::new(client, settings(&["ETH"], &w[..2], 1, 1)).unwrap();
    let ts = now_ts();
    let fallback_wallet = w[1].clone();
    let source = move || {
        let response = fallback_response(&fallback_wallet, "ETH", ts, 3.0);
        async move { Ok::<_, QuorumError>(response) }
    };
    with.enable_fallback(Arc::new(source), Duration::from_secs(1), Duration::from_millis(100))
        .unwrap();
    let mut events = with.subscribe().await.unwrap();
    match time::timeout(Duration::from_secs(30), events.recv()).await {
        Ok(Some(SubscriberEvent::Packages(batch))) => assert!(batch.contains_key("ETH")),
        other => panic!("expected a fallback batch, got {:?}", other),
    }
}
