//! Quorum aggregation of signed data packages.
//!
//! [`DataPackageSubscriber`] is a handle; the buckets, last published state,
//! scheduled publishes, circuit breaker and reference guard all live inside a
//! single [`controller::SubscriberController`] task and are only touched there.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::error::{QuorumError, Result};
use crate::limiters::RateLimitsCircuitBreaker;
use crate::package::DataPackagesResponse;
use crate::pubsub::{
    data_package_topics, with_rate_limiter, with_stats, MessageStatsTracker, PubSubClient,
    SubscribeCallback,
};
use crate::settings::SubscriberSettings;
use crate::subscription_error;

pub mod bucket_store;
pub mod controller;
pub mod fallback;
pub mod last_published;
pub mod reference_verifier;

pub use bucket_store::TimestampBucketStore;
pub use controller::SubscriberController;
pub use fallback::{FallbackSource, HttpFallbackSource, SignedPackagesResponse};
pub use last_published::{FeedPublishInfo, LastPublishedFeedState};
pub use reference_verifier::ReferenceValueVerifier;

/// What the consumer receives from a running subscriber
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriberEvent {
    /// A finalized batch, feed id -> selected packages
    Packages(DataPackagesResponse),
    /// Transport error, forwarded unchanged
    TransportError(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberState {
    Active,
    Stopped,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubscriberStatus {
    pub state: SubscriberState,
    pub topics: usize,
    pub bucket_count: usize,
    pub last_published: BTreeMap<String, FeedPublishInfo>,
    pub scheduled_publishes: Vec<i64>,
    pub fallback_enabled: bool,
    pub circuit_breaker_attached: bool,
    pub reference_buckets: Option<usize>,
}

/// Commands handled by the subscriber task
pub enum SubscriberCommand {
    Message {
        topic: String,
        payload: std::result::Result<serde_json::Value, String>,
    },
    PublishDue {
        timestamp: i64,
    },
    EnableFallback {
        source: Arc<dyn FallbackSource>,
        max_delay: Duration,
        check_interval: Duration,
    },
    DisableFallback,
    FallbackTick {
        generation: u64,
    },
    FallbackFetched {
        generation: u64,
        result: Result<SignedPackagesResponse>,
    },
    EnableCircuitBreaker(RateLimitsCircuitBreaker),
    Unsubscribe {
        resp_chan: oneshot::Sender<Result<()>>,
    },
    UnsubscribeFinished {
        error: Option<String>,
        after_trip: bool,
    },
    CleanStale,
    Status {
        resp_chan: oneshot::Sender<SubscriberStatus>,
    },
    Shutdown,
}

/// Subscribes to every feed/signer topic and hands finalized quorum batches
/// to the consumer.
pub struct DataPackageSubscriber {
    pubsub: Arc<dyn PubSubClient>,
    settings: SubscriberSettings,
    topics: Vec<String>,
    command_tx: mpsc::UnboundedSender<SubscriberCommand>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<SubscriberCommand>>>,
    subscribed: AtomicBool,
    fallback_enabled: AtomicBool,
}

impl DataPackageSubscriber {
    /// Validate the configuration and compute topics; the transport is not touched
    pub fn new(pubsub: Arc<dyn PubSubClient>, settings: SubscriberSettings) -> Result<Self> {
        settings.validate()?;
        let topics = data_package_topics(
            &settings.data_service_id,
            &settings.data_package_ids,
            &settings.normalized_signers(),
        );
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Ok(Self {
            pubsub,
            settings,
            topics,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            subscribed: AtomicBool::new(false),
            fallback_enabled: AtomicBool::new(false),
        })
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn settings(&self) -> &SubscriberSettings {
        &self.settings
    }

    /// Start the subscriber task and subscribe to all topics.
    ///
    /// Finalized batches and transport errors arrive on the returned receiver.
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<SubscriberEvent>> {
        let command_rx = self
            .command_rx
            .lock()
            .map_err(|e| QuorumError::Concurrency(format!("Mutex lock fail {}", e)))?
            .take();
        let command_rx = match command_rx {
            Some(rx) => rx,
            None => {
                warn!("You tried to subscribe twice using same subscriber");
                return Err(subscription_error!(
                    "You tried to subscribe twice using same subscriber"
                ));
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = SubscriberController::new(
            self.settings.clone(),
            self.topics.clone(),
            self.pubsub.clone(),
            self.command_tx.clone(),
            events_tx,
        );
        tokio::spawn(controller.start(command_rx));
        self.subscribed.store(true, Ordering::SeqCst);

        let command_tx = self.command_tx.clone();
        let mut callback: SubscribeCallback = Arc::new(move |topic, payload| {
            let cmd = SubscriberCommand::Message {
                topic: topic.to_string(),
                payload,
            };
            if command_tx.send(cmd).is_err() {
                error!("Failed sending message for topic {} to subscriber", topic);
            }
        });
        if self.settings.stats_log_interval_ms > 0 {
            let log_interval = Duration::from_millis(self.settings.stats_log_interval_ms);
            let tracker = MessageStatsTracker::spawn(log_interval);
            callback = with_stats(callback, self.pubsub.clone(), tracker);
        }
        if let Some(config) = &self.settings.rate_limiter {
            callback = with_rate_limiter(callback, self.pubsub.clone(), config.clone());
        }

        info!(
            "Subscribing to {} topics on {}",
            self.topics.len(),
            self.pubsub.unique_name()
        );
        if let Err(e) = self.pubsub.subscribe(&self.topics, callback).await {
            if self.fallback_enabled.load(Ordering::SeqCst) {
                warn!(
                    "Failed to subscribe to topics, continuing because fallback is enabled: {}",
                    e
                );
            } else {
                self.send(SubscriberCommand::Shutdown)?;
                return Err(e);
            }
        }

        Ok(events_rx)
    }

    /// Poll `source` every `check_interval` whenever some feed has gone
    /// `max_delay_between_publishes` without a publish
    pub fn enable_fallback(
        &self,
        source: Arc<dyn FallbackSource>,
        max_delay_between_publishes: Duration,
        check_interval: Duration,
    ) -> Result<()> {
        self.fallback_enabled.store(true, Ordering::SeqCst);
        self.send(SubscriberCommand::EnableFallback {
            source,
            max_delay: max_delay_between_publishes,
            check_interval,
        })
    }

    pub fn disable_fallback(&self) -> Result<()> {
        self.fallback_enabled.store(false, Ordering::SeqCst);
        self.send(SubscriberCommand::DisableFallback)
    }

    pub fn enable_circuit_breaker(&self, breaker: RateLimitsCircuitBreaker) -> Result<()> {
        self.send(SubscriberCommand::EnableCircuitBreaker(breaker))
    }

    pub fn clean_stale_packages(&self) -> Result<()> {
        self.ensure_subscribed()?;
        self.send(SubscriberCommand::CleanStale)
    }

    /// Stop accepting packages and unsubscribe from all topics; repeated calls are no-ops
    pub async fn unsubscribe(&self) -> Result<()> {
        self.ensure_subscribed()?;
        let (tx, rx) = oneshot::channel();
        self.send(SubscriberCommand::Unsubscribe { resp_chan: tx })?;
        rx.await
            .map_err(|e| subscription_error!("Subscriber task gone: {}", e))?
    }

    /// Stop the underlying transport client
    pub async fn stop(&self) {
        self.pubsub.stop().await;
    }

    pub async fn status(&self) -> Result<SubscriberStatus> {
        self.ensure_subscribed()?;
        let (tx, rx) = oneshot::channel();
        self.send(SubscriberCommand::Status { resp_chan: tx })?;
        rx.await
            .map_err(|e| subscription_error!("Subscriber task gone: {}", e))
    }

    fn ensure_subscribed(&self) -> Result<()> {
        if self.subscribed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(subscription_error!("Subscriber is not subscribed yet"))
        }
    }

    fn send(&self, cmd: SubscriberCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .map_err(|_| subscription_error!("Subscriber task is not running"))
    }
}

impl Drop for DataPackageSubscriber {
    fn drop(&mut self) {
        let _ = self.command_tx.send(SubscriberCommand::Shutdown);
    }
}
