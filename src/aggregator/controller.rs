//! The task that owns all subscriber state
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info, warn};

use super::bucket_store::TimestampBucketStore;
use super::fallback::{FallbackSource, SignedPackagesResponse};
use super::last_published::LastPublishedFeedState;
use super::reference_verifier::ReferenceValueVerifier;
use super::{SubscriberCommand, SubscriberEvent, SubscriberState, SubscriberStatus};
use crate::error::{QuorumError, Result};
use crate::limiters::RateLimitsCircuitBreaker;
use crate::package::signer::normalize_address;
use crate::package::{
    pick_packages_closest_to_median, DataPackagesResponse, SignedDataPackage, VerifiedDataPackage,
};
use crate::pubsub::{DataPackageTopic, PubSubClient};
use crate::settings::{SubscriberSettings, MAX_PACKAGE_STALENESS_MS};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Publish state for one package timestamp
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingPublish {
    Scheduled { deadline: Instant },
    Published,
}

struct FallbackRunner {
    source: Arc<dyn FallbackSource>,
    max_delay: Duration,
    ticker: JoinHandle<()>,
    in_flight: bool,
    last_attempt: Option<Instant>,
}

pub struct SubscriberController {
    settings: SubscriberSettings,
    authorized_signers: HashSet<String>,
    topics: Vec<String>,
    pubsub: Arc<dyn PubSubClient>,
    command_tx: mpsc::UnboundedSender<SubscriberCommand>,
    events_tx: mpsc::UnboundedSender<SubscriberEvent>,
    state: SubscriberState,
    store: TimestampBucketStore,
    last_published: LastPublishedFeedState,
    pending: BTreeMap<i64, PendingPublish>,
    circuit_breaker: Option<RateLimitsCircuitBreaker>,
    reference_verifier: Option<ReferenceValueVerifier>,
    fallback: Option<FallbackRunner>,
    fallback_generation: u64,
    teardown_in_flight: bool,
    /// Set once `unsubscribe()` is called; a trip teardown never reverts after that
    unsubscribe_requested: bool,
    unsubscribe_waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl SubscriberController {
    pub fn new(
        settings: SubscriberSettings,
        topics: Vec<String>,
        pubsub: Arc<dyn PubSubClient>,
        command_tx: mpsc::UnboundedSender<SubscriberCommand>,
        events_tx: mpsc::UnboundedSender<SubscriberEvent>,
    ) -> Self {
        let authorized_signers = settings.normalized_signers().into_iter().collect();
        let last_published = LastPublishedFeedState::new(
            &settings.data_package_ids,
            now_ms() - MAX_PACKAGE_STALENESS_MS,
        );
        let reference_verifier = settings.reference.as_ref().map(ReferenceValueVerifier::new);

        Self {
            settings,
            authorized_signers,
            topics,
            pubsub,
            command_tx,
            events_tx,
            state: SubscriberState::Active,
            store: TimestampBucketStore::exact(),
            last_published,
            pending: BTreeMap::new(),
            circuit_breaker: None,
            reference_verifier,
            fallback: None,
            fallback_generation: 0,
            teardown_in_flight: false,
            unsubscribe_requested: false,
            unsubscribe_waiters: Vec::new(),
        }
    }

    /// Handle commands and periodic stale sweeps until shut down
    pub async fn start(mut self, mut command_rx: mpsc::UnboundedReceiver<SubscriberCommand>) {
        info!(
            "Subscriber started for {} with {} topics",
            self.settings.data_service_id,
            self.topics.len()
        );

        let cleanup_period = Duration::from_millis(self.settings.cleanup_interval_ms.max(1));
        let mut cleanup_timer = time::interval_at(Instant::now() + cleanup_period, cleanup_period);

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => {
                        info!("Subscriber command channel closed, exiting");
                        break;
                    }
                },
                _ = cleanup_timer.tick() => self.clean_stale_packages(),
            }
        }

        if let Some(runner) = self.fallback.take() {
            runner.ticker.abort();
        }
        info!("Subscriber stopped for {}", self.settings.data_service_id);
    }

    /// Returns false once the task should exit
    fn handle_command(&mut self, cmd: SubscriberCommand) -> bool {
        match cmd {
            SubscriberCommand::Message { topic, payload } => self.on_message(&topic, payload),
            SubscriberCommand::PublishDue { timestamp } => self.on_publish_due(timestamp),
            SubscriberCommand::EnableFallback {
                source,
                max_delay,
                check_interval,
            } => self.enable_fallback(source, max_delay, check_interval),
            SubscriberCommand::DisableFallback => self.disable_fallback(),
            SubscriberCommand::FallbackTick { generation } => self.on_fallback_tick(generation),
            SubscriberCommand::FallbackFetched { generation, result } => {
                self.on_fallback_fetched(generation, result)
            }
            SubscriberCommand::EnableCircuitBreaker(breaker) => {
                self.circuit_breaker = Some(breaker);
            }
            SubscriberCommand::Unsubscribe { resp_chan } => self.on_unsubscribe(resp_chan),
            SubscriberCommand::UnsubscribeFinished { error, after_trip } => {
                self.on_unsubscribe_finished(error, after_trip)
            }
            SubscriberCommand::CleanStale => self.clean_stale_packages(),
            SubscriberCommand::Status { resp_chan } => {
                if resp_chan.send(self.status()).is_err() {
                    error!("Failed sending oneshot status response");
                }
            }
            SubscriberCommand::Shutdown => return false,
        }
        true
    }

    fn on_message(&mut self, topic: &str, payload: std::result::Result<serde_json::Value, String>) {
        if self.state == SubscriberState::Stopped {
            return;
        }

        let value = match payload {
            Ok(value) => value,
            Err(e) => {
                self.emit(SubscriberEvent::TransportError(e));
                return;
            }
        };

        let package = match SignedDataPackage::from_json(value) {
            Ok(package) => package,
            Err(e) => {
                warn!("Schema validation error topic={} error={}", topic, e);
                return;
            }
        };

        let package = match self.verify_signer(topic, package) {
            Ok(package) => package,
            Err(e) => {
                warn!("Failed to verify signature topic={} error={}", topic, e);
                return;
            }
        };

        let feed_id = package.feed_id().to_string();
        let timestamp = package.timestamp();
        let description = format!(
            "{} timestamp={} dataPackageId={}",
            package.signer, timestamp, feed_id
        );

        if !self.settings.data_package_ids.contains(&feed_id) {
            debug!(
                "Received package with unexpected id={} expectedIds={}",
                feed_id,
                self.settings.data_package_ids.join(",")
            );
            return;
        }

        if let Some(verifier) = self.reference_verifier.as_mut() {
            verifier.register_data_package(&package);
            if !verifier.verify_data_package(&package) {
                debug!("Package from {} was rejected after verification", description);
                return;
            }
        }

        if !self
            .last_published
            .is_newer_than_last_published(&feed_id, timestamp)
        {
            debug!(
                "Package from {} was rejected because packageTimestamp={} <= lastPublishedTimestamp={:?}",
                description,
                timestamp,
                self.last_published.last_publish_time(&feed_id)
            );
            return;
        }

        if !self.store.insert_unique(package) {
            debug!(
                "Package from {} was rejected because already have package from this signer",
                description
            );
            return;
        }
        debug!("Received and verified data package from={}", description);

        if let Some(breaker) = self.circuit_breaker.as_mut() {
            breaker.record_event();
            if breaker.should_break_circuit() {
                error!("Rate limits crossed will unsubscribe from pub/sub");
                self.begin_unsubscribe(true);
                return;
            }
        }

        self.evaluate_quorum(timestamp);
    }

    /// Recover the signer and check it against the topic and the authorized set
    fn verify_signer(
        &self,
        topic: &str,
        package: SignedDataPackage,
    ) -> Result<VerifiedDataPackage> {
        let topic = DataPackageTopic::decode(topic)?;
        let package = package.verify()?;
        if normalize_address(&topic.node_address) != package.signer {
            return Err(QuorumError::Signature(format!(
                "signer={} does not match topic signer={}",
                package.signer, topic.node_address
            )));
        }
        if !self.authorized_signers.contains(&package.signer) {
            return Err(QuorumError::Signature(format!(
                "signer={} is not authorized dataPackageId={} packageTimestamp={}",
                package.signer,
                package.feed_id(),
                package.timestamp()
            )));
        }
        Ok(package)
    }

    fn evaluate_quorum(&mut self, timestamp: i64) {
        if self.has_packages_from_all_signers(timestamp) {
            debug!(
                "Got packages from all signers timestamp={}, will try to publish instantly",
                timestamp
            );
            self.publish(timestamp);
            return;
        }

        if !self.has_packages_from_enough_signers(timestamp) {
            return;
        }

        let wait_ms = self.settings.wait_ms_after_minimal_satisfied;
        if wait_ms == 0 {
            debug!(
                "Got packages from enough authorized signers timestamp={}, publishing instantly",
                timestamp
            );
            self.publish(timestamp);
            return;
        }

        if matches!(
            self.pending.get(&timestamp),
            Some(PendingPublish::Scheduled { .. })
        ) {
            return;
        }

        debug!(
            "Got packages from enough authorized signers timestamp={}, will try to publish in {} [ms]",
            timestamp, wait_ms
        );
        let wait = Duration::from_millis(wait_ms);
        self.pending.insert(
            timestamp,
            PendingPublish::Scheduled {
                deadline: Instant::now() + wait,
            },
        );
        let command_tx = self.command_tx.clone();
        tokio::spawn(async move {
            time::sleep(wait).await;
            // the subscriber may already be gone
            let _ = command_tx.send(SubscriberCommand::PublishDue { timestamp });
        });
    }

    fn has_packages_from_all_signers(&self, timestamp: i64) -> bool {
        let signers = self.authorized_signers.len();
        self.settings
            .data_package_ids
            .iter()
            .all(|feed_id| self.store.signer_count(timestamp, feed_id) >= signers)
    }

    fn has_packages_from_enough_signers(&self, timestamp: i64) -> bool {
        let minimal = self.settings.minimal_off_chain_signers_count;
        let mut feeds = self.settings.data_package_ids.iter();
        let enough = |feed_id: &String| self.store.signer_count(timestamp, feed_id) >= minimal;
        if self.settings.ignore_missing_feeds {
            feeds.any(enough)
        } else {
            feeds.all(enough)
        }
    }

    fn on_publish_due(&mut self, timestamp: i64) {
        if self.state == SubscriberState::Stopped {
            return;
        }
        match self.pending.get(&timestamp) {
            Some(PendingPublish::Published) => {
                debug!("Already published timestamp={}", timestamp);
                return;
            }
            Some(PendingPublish::Scheduled { deadline }) => debug!(
                "Scheduled publish due timestamp={} overdue={:?}",
                timestamp,
                Instant::now().saturating_duration_since(*deadline)
            ),
            None => {}
        }
        self.publish(timestamp);
    }

    fn publish(&mut self, timestamp: i64) {
        let Some(feeds) = self.store.get(timestamp) else {
            warn!("No packages available for timestamp={}", timestamp);
            return;
        };

        let minimal = self.settings.minimal_off_chain_signers_count;
        let unique = self.settings.unique_signers_count;
        let mut candidates = DataPackagesResponse::new();
        for (feed_id, packages) in feeds {
            if packages.len() < minimal {
                debug!(
                    "Omitting dataPackageId={} in published packages because not enough received={} expected={}",
                    feed_id,
                    packages.len(),
                    minimal
                );
                continue;
            }
            let picked = pick_packages_closest_to_median(packages, unique);
            if picked.len() >= unique {
                candidates.insert(feed_id.clone(), picked);
            }
        }
        let to_publish = self.last_published.filter_out_not_newer_packages(candidates);

        if self.pending.contains_key(&timestamp) {
            self.pending.insert(timestamp, PendingPublish::Published);
        }
        if to_publish.is_empty() {
            return;
        }

        let feed_ids: Vec<String> = to_publish.keys().cloned().collect();
        info!(
            "Publishing packages timestamp={} latency={} dataPackageIds={}",
            timestamp,
            now_ms() - timestamp,
            feed_ids.join(",")
        );
        self.emit(SubscriberEvent::Packages(to_publish));
        self.last_published.update(&feed_ids, timestamp);

        self.store.clear_feeds(timestamp, &feed_ids);
        self.pending.retain(|ts, _| *ts >= timestamp);
        self.clean_stale_packages();
    }

    fn emit(&self, event: SubscriberEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("Subscriber consumer is gone, dropping event");
        }
    }

    fn on_unsubscribe(&mut self, resp_chan: oneshot::Sender<Result<()>>) {
        self.unsubscribe_requested = true;
        if self.teardown_in_flight {
            // answered when the running teardown finishes
            self.unsubscribe_waiters.push(resp_chan);
        } else if self.state == SubscriberState::Stopped {
            if resp_chan.send(Ok(())).is_err() {
                error!("Failed sending oneshot unsubscribe response");
            }
        } else {
            self.unsubscribe_waiters.push(resp_chan);
            self.begin_unsubscribe(false);
        }
    }

    /// Move to `Stopped` and ask the transport to drop every topic
    fn begin_unsubscribe(&mut self, after_trip: bool) {
        self.state = SubscriberState::Stopped;
        self.teardown_in_flight = true;
        let pubsub = self.pubsub.clone();
        let topics = self.topics.clone();
        let command_tx = self.command_tx.clone();

        tokio::spawn(async move {
            let error = pubsub.unsubscribe(&topics).await.err().map(|e| e.to_string());
            let _ = command_tx.send(SubscriberCommand::UnsubscribeFinished { error, after_trip });
        });
    }

    fn on_unsubscribe_finished(&mut self, error: Option<String>, after_trip: bool) {
        self.teardown_in_flight = false;
        match error {
            None => {
                info!("Unsubscribed from {} topics", self.topics.len());
                self.reply_unsubscribe_waiters(|| Ok(()));
            }
            Some(e) if after_trip && self.unsubscribe_requested => {
                warn!(
                    "Failed to unsubscribe after rate limits crossed error={}, retrying for unsubscribe request",
                    e
                );
                self.begin_unsubscribe(false);
            }
            Some(e) if after_trip => {
                error!(
                    "Failed to unsubscribe error={}, detaching circuit breaker and resuming",
                    e
                );
                self.state = SubscriberState::Active;
                self.circuit_breaker = None;
            }
            Some(e) => {
                error!("Failed to unsubscribe error={}", e);
                self.reply_unsubscribe_waiters(|| {
                    Err(QuorumError::Subscription(format!("Failed to unsubscribe: {}", e)))
                });
            }
        }
    }

    fn reply_unsubscribe_waiters<F>(&mut self, result: F)
    where
        F: Fn() -> Result<()>,
    {
        for resp_chan in self.unsubscribe_waiters.drain(..) {
            if resp_chan.send(result()).is_err() {
                error!("Failed sending oneshot unsubscribe response");
            }
        }
    }

    fn enable_fallback(
        &mut self,
        source: Arc<dyn FallbackSource>,
        max_delay: Duration,
        check_interval: Duration,
    ) {
        info!(
            "Enabled fallback mode interval={:?} maxDelayBetweenPublishes={:?}",
            check_interval, max_delay
        );
        if let Some(old) = self.fallback.take() {
            old.ticker.abort();
        }
        self.fallback_generation += 1;

        let generation = self.fallback_generation;
        let period = check_interval.max(Duration::from_millis(1));
        let command_tx = self.command_tx.clone();
        let ticker = tokio::spawn(async move {
            let mut timer = time::interval_at(Instant::now() + period, period);
            loop {
                timer.tick().await;
                if command_tx
                    .send(SubscriberCommand::FallbackTick { generation })
                    .is_err()
                {
                    break;
                }
            }
        });

        self.fallback = Some(FallbackRunner {
            source,
            max_delay,
            ticker,
            in_flight: false,
            last_attempt: None,
        });
    }

    fn disable_fallback(&mut self) {
        if let Some(runner) = self.fallback.take() {
            runner.ticker.abort();
            info!("Disabled fallback mode");
        }
        self.fallback_generation += 1;
    }

    fn on_fallback_tick(&mut self, generation: u64) {
        if generation != self.fallback_generation {
            return;
        }
        let Some(runner) = self.fallback.as_mut() else {
            return;
        };
        if runner.in_flight
            || !self
                .last_published
                .is_any_feed_not_published_in(runner.max_delay)
        {
            return;
        }
        if let Some(at) = runner.last_attempt {
            if at.elapsed() < runner.max_delay {
                return;
            }
        }

        warn!(
            "Fallback triggered now={} lastPublishedTimestamp={}",
            now_ms(),
            self.last_published
        );
        runner.in_flight = true;
        runner.last_attempt = Some(Instant::now());

        let source = runner.source.clone();
        let command_tx = self.command_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch().await;
            let _ = command_tx.send(SubscriberCommand::FallbackFetched { generation, result });
        });
    }

    fn on_fallback_fetched(&mut self, generation: u64, result: Result<SignedPackagesResponse>) {
        if generation != self.fallback_generation {
            debug!("Ignoring fallback result from a disabled fallback");
            return;
        }
        match self.fallback.as_mut() {
            Some(runner) => runner.in_flight = false,
            None => return,
        }

        match result {
            Ok(packages) => self.publish_fallback(packages),
            Err(e) => error!("FallbackFn has failed error={}", e),
        }
    }

    fn publish_fallback(&mut self, packages: SignedPackagesResponse) {
        let mut verified = DataPackagesResponse::new();
        for (feed_id, feed_packages) in packages {
            let mut recovered = Vec::with_capacity(feed_packages.len());
            for package in feed_packages {
                if let Err(e) = package.validate() {
                    warn!("Dropping fallback package for {} error={}", feed_id, e);
                    continue;
                }
                match package.verify() {
                    Ok(package) => recovered.push(package),
                    Err(e) => warn!("Dropping fallback package for {} error={}", feed_id, e),
                }
            }
            if !recovered.is_empty() {
                verified.insert(feed_id, recovered);
            }
        }

        let newer = self.last_published.filter_out_not_newer_packages(verified);
        let updates: Vec<(String, i64)> = newer
            .iter()
            .filter_map(|(feed_id, packages)| {
                packages
                    .iter()
                    .map(VerifiedDataPackage::timestamp)
                    .max()
                    .map(|ts| (feed_id.clone(), ts))
            })
            .collect();
        let Some(timestamp) = updates.iter().map(|(_, ts)| *ts).max() else {
            debug!("Fallback returned nothing newer than last published");
            return;
        };

        info!(
            "Publishing packages from fallback method timestamp={} latency={} dataPackageIds={}",
            timestamp,
            now_ms() - timestamp,
            updates
                .iter()
                .map(|(feed_id, _)| feed_id.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        self.emit(SubscriberEvent::Packages(newer));
        for (feed_id, ts) in updates {
            self.last_published.update(&[feed_id], ts);
        }
    }

    fn clean_stale_packages(&mut self) {
        let now = now_ms();
        let removed = self.store.clean_stale(now, MAX_PACKAGE_STALENESS_MS);
        let horizon = now - MAX_PACKAGE_STALENESS_MS;
        self.pending.retain(|ts, _| *ts >= horizon);
        if let Some(verifier) = self.reference_verifier.as_mut() {
            verifier.clean_stale_packages();
        }
        if removed > 0 {
            debug!("Removed {} stale timestamp buckets", removed);
        }
    }

    fn status(&self) -> SubscriberStatus {
        SubscriberStatus {
            state: self.state,
            topics: self.topics.len(),
            bucket_count: self.store.len(),
            last_published: self.last_published.snapshot(),
            scheduled_publishes: self
                .pending
                .iter()
                .filter(|(_, p)| matches!(p, PendingPublish::Scheduled { .. }))
                .map(|(ts, _)| *ts)
                .collect(),
            fallback_enabled: self.fallback.is_some(),
            circuit_breaker_attached: self.circuit_breaker.is_some(),
            reference_buckets: self
                .reference_verifier
                .as_ref()
                .map(ReferenceValueVerifier::bucket_count),
        }
    }
}
