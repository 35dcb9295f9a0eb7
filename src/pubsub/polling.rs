//! HTTP polling client for a light gateway
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{PubSubClient, PubSubPayload, SubscribeCallback};
use crate::error::{QuorumError, Result};
use crate::transport_error;

pub const GET_DATA_ROUTE: &str = "data";
pub const PUBLISH_ROUTE: &str = "publish";
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 5_000;

/// One gateway entry: every pending message for a topic, each JSON-serialized
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayPackages {
    pub topic: String,
    pub data: Vec<String>,
}

#[derive(Default)]
struct PollingState {
    topics: BTreeSet<String>,
    callback: Option<SubscribeCallback>,
    poller: Option<JoinHandle<()>>,
}

/// Periodically POSTs its topic list to the gateway and hands every returned
/// message to the registered callback.
#[derive(Clone)]
pub struct PollingHttpClient {
    gateway: Url,
    polling_interval: Duration,
    http: reqwest::Client,
    state: Arc<Mutex<PollingState>>,
}

impl std::fmt::Debug for PollingHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingHttpClient")
            .field("gateway", &self.gateway.as_str())
            .field("polling_interval", &self.polling_interval)
            .finish()
    }
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> QuorumError {
    QuorumError::Concurrency(format!("Mutex lock fail {}", e))
}

impl PollingHttpClient {
    pub fn new(gateway: Url, polling_interval: Duration) -> Self {
        Self {
            gateway,
            polling_interval,
            http: reqwest::Client::new(),
            state: Arc::new(Mutex::new(PollingState::default())),
        }
    }

    fn route(&self, path: &str) -> String {
        format!("{}/{}", self.gateway.as_str().trim_end_matches('/'), path)
    }

    pub fn topics(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_polling(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.poller.is_some())
            .unwrap_or(false)
    }

    /// Fetch pending messages for all subscribed topics.
    /// Items that fail to deserialize are reported to the callback as errors.
    pub async fn get_data(&self) -> Result<Vec<(String, Vec<serde_json::Value>)>> {
        let (topics, callback) = {
            let state = self.state.lock().map_err(lock_err)?;
            (
                state.topics.iter().cloned().collect::<Vec<_>>(),
                state.callback.clone(),
            )
        };
        if topics.is_empty() {
            warn!("No topics to fetch data for");
            return Ok(Vec::new());
        }

        let response: Vec<GatewayPackages> = self
            .http
            .post(self.route(GET_DATA_ROUTE))
            .json(&topics)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut result = Vec::with_capacity(response.len());
        let mut total = 0;
        for pkg in response {
            let mut items = Vec::with_capacity(pkg.data.len());
            for raw in &pkg.data {
                match serde_json::from_str::<serde_json::Value>(raw) {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        let msg = format!(
                            "Failed to deserialize data for topic {}, error={}",
                            pkg.topic, e
                        );
                        match &callback {
                            Some(callback) => callback(&pkg.topic, Err(msg)),
                            None => warn!("{}", msg),
                        }
                    }
                }
            }
            total += items.len();
            result.push((pkg.topic, items));
        }
        debug!(topic_count = result.len(), total_packages = total, "Fetched data");
        Ok(result)
    }

    /// One polling round: fetch and dispatch
    pub async fn poll_once(&self) {
        let callback = match self.state.lock() {
            Ok(state) => state.callback.clone(),
            Err(e) => {
                error!("Polling state unavailable: {}", e);
                return;
            }
        };
        let Some(callback) = callback else {
            warn!("Attempt to pull data when client is in inconsistent state");
            return;
        };
        match self.get_data().await {
            Ok(data) => {
                for (topic, items) in data {
                    for item in items {
                        callback(&topic, Ok(item));
                    }
                }
            }
            Err(e) => warn!("Failed to poll data, error={}", e),
        }
    }

    fn start_polling(&self, state: &mut PollingState) {
        if state.poller.is_some() {
            info!("Polling is already active");
            return;
        }
        let client = self.clone();
        let period = self.polling_interval;
        state.poller = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                client.poll_once().await;
            }
        }));
        info!(
            interval_ms = self.polling_interval.as_millis() as u64,
            "Started polling for data"
        );
    }
}

#[async_trait]
impl PubSubClient for PollingHttpClient {
    async fn subscribe(&self, topics: &[String], callback: SubscribeCallback) -> Result<()> {
        let mut state = self.state.lock().map_err(lock_err)?;
        state.callback = Some(callback);
        state.topics.extend(topics.iter().cloned());
        info!("Subscribed to {} topics", topics.len());
        self.start_polling(&mut state);
        Ok(())
    }

    async fn publish(&self, payloads: Vec<PubSubPayload>) -> Result<()> {
        let body = payloads
            .into_iter()
            .map(|payload| {
                Ok(GatewayPackages {
                    topic: payload.topic,
                    data: vec![serde_json::to_string(&payload.data)?],
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let response = self
            .http
            .post(self.route(PUBLISH_ROUTE))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(transport_error!(
                "gateway rejected publish with status {}",
                response.status()
            ));
        }
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<()> {
        let mut state = self.state.lock().map_err(lock_err)?;
        let removed: Vec<&String> = topics.iter().filter(|t| state.topics.remove(*t)).collect();
        if !removed.is_empty() {
            info!("Unsubscribed from topics {:?}", removed);
        }
        Ok(())
    }

    async fn stop(&self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(poller) = state.poller.take() {
                poller.abort();
                info!("Stopped polling for data");
            }
        }
    }

    fn unique_name(&self) -> String {
        format!("polling-client::{}", self.gateway)
    }
}
