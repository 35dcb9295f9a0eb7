//! Publish/subscribe transport seam and its decorators
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod local;
pub mod polling;
pub mod rate_limiter;
pub mod stats;
pub mod topics;

pub use local::LocalPubSubClient;
pub use polling::PollingHttpClient;
pub use rate_limiter::{with_rate_limiter, RateLimiterConfig};
pub use stats::{with_stats, MessageStatsTracker};
pub use topics::{data_package_topics, DataPackageTopic};

/// Message handler registered with a transport.
///
/// Receives the topic and either the raw JSON payload or a transport error.
pub type SubscribeCallback =
    Arc<dyn Fn(&str, std::result::Result<serde_json::Value, String>) + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PubSubPayload {
    pub topic: String,
    pub data: serde_json::Value,
}

impl PubSubPayload {
    pub fn new(topic: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }
}

#[async_trait]
pub trait PubSubClient: Send + Sync {
    async fn subscribe(&self, topics: &[String], callback: SubscribeCallback) -> Result<()>;
    async fn publish(&self, payloads: Vec<PubSubPayload>) -> Result<()>;
    async fn unsubscribe(&self, topics: &[String]) -> Result<()>;
    async fn stop(&self);
    fn unique_name(&self) -> String;
}
