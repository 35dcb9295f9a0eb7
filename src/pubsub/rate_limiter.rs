//! Per-topic and per-client flood protection for subscribe callbacks
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::time::Duration;
use tracing::{error, info, warn};

use super::{PubSubClient, SubscribeCallback};
use crate::limiters::circuit_breaker::RateLimitsCircuitBreaker;

#[derive(Clone, Debug, Default)]
pub struct RateLimiterConfig {
    pub topic_interval: Option<Duration>,
    pub max_messages_per_topic_interval: Option<usize>,
    pub client_interval: Option<Duration>,
    pub max_messages_per_client_interval: Option<usize>,
}

impl RateLimiterConfig {
    fn topic_limit(&self) -> Option<(Duration, usize)> {
        match (self.topic_interval, self.max_messages_per_topic_interval) {
            (Some(interval), Some(max)) if max > 0 && !interval.is_zero() => Some((interval, max)),
            _ => None,
        }
    }

    fn client_limit(&self) -> Option<(Duration, usize)> {
        match (self.client_interval, self.max_messages_per_client_interval) {
            (Some(interval), Some(max)) if max > 0 && !interval.is_zero() => Some((interval, max)),
            _ => None,
        }
    }
}

#[derive(Default)]
struct LimiterState {
    blocked_topics: HashSet<String>,
    blocked_clients: HashSet<String>,
    topic_breakers: HashMap<String, RateLimitsCircuitBreaker>,
    client_breakers: HashMap<String, RateLimitsCircuitBreaker>,
}

enum Verdict {
    Pass,
    Drop,
    StopClient,
    UnsubscribeTopic,
}

impl LimiterState {
    fn check(&mut self, config: &RateLimiterConfig, client_name: &str, topic: &str) -> Verdict {
        let topic_key = format!("{}-{}", client_name, topic);
        if self.blocked_clients.contains(client_name) || self.blocked_topics.contains(&topic_key) {
            return Verdict::Drop;
        }

        if let Some((interval, max)) = config.client_limit() {
            let breaker = self
                .client_breakers
                .entry(client_name.to_string())
                .or_insert_with(|| RateLimitsCircuitBreaker::new(interval, max));
            breaker.record_event();
            if breaker.should_break_circuit() {
                self.blocked_clients.insert(client_name.to_string());
                return Verdict::StopClient;
            }
        }

        if let Some((interval, max)) = config.topic_limit() {
            let breaker = self
                .topic_breakers
                .entry(topic_key.clone())
                .or_insert_with(|| RateLimitsCircuitBreaker::new(interval, max));
            breaker.record_event();
            if breaker.should_break_circuit() {
                self.blocked_topics.insert(topic_key);
                return Verdict::UnsubscribeTopic;
            }
        }

        Verdict::Pass
    }
}

/// Wrap `callback` so that a topic crossing its message limit is unsubscribed
/// and a client crossing its overall limit is stopped. Blocked scopes stay
/// blocked for the life of the wrapper.
pub fn with_rate_limiter(
    callback: SubscribeCallback,
    client: Arc<dyn PubSubClient>,
    config: RateLimiterConfig,
) -> SubscribeCallback {
    let state = Arc::new(Mutex::new(LimiterState::default()));

    Arc::new(move |topic, message| {
        let client_name = client.unique_name();
        let verdict = match state.lock() {
            Ok(mut state) => state.check(&config, &client_name, topic),
            Err(e) => {
                error!("Failed to calculate rate limits error={}", e);
                Verdict::Pass
            }
        };

        match verdict {
            Verdict::Pass => callback(topic, message),
            Verdict::Drop => {}
            Verdict::StopClient => {
                error!(
                    "PubSubClient rate limit exceeded: client={}, maxMessages={:?}, interval={:?}. Disabling entire client.",
                    client_name, config.max_messages_per_client_interval, config.client_interval
                );
                let client = client.clone();
                spawn_or_log(async move {
                    client.stop().await;
                    warn!("Disabled entire pubSubClient due to rate limit: {}", client_name);
                });
            }
            Verdict::UnsubscribeTopic => {
                error!(
                    "Topic rate limit exceeded: topic={}, client={}, maxMessages={:?}, interval={:?}. Unsubscribing from topic.",
                    topic, client_name, config.max_messages_per_topic_interval, config.topic_interval
                );
                let client = client.clone();
                let topic = topic.to_string();
                spawn_or_log(async move {
                    match client.unsubscribe(&[topic.clone()]).await {
                        Ok(()) => info!(
                            "Successfully unsubscribed from rate-limited topic: {} on client: {}",
                            topic, client_name
                        ),
                        Err(e) => error!(
                            "Failed to unsubscribe from rate-limited topic: {} on client: {}: {}",
                            topic, client_name, e
                        ),
                    }
                });
            }
        }
    })
}

fn spawn_or_log<F>(fut: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(e) => error!("No runtime available for rate limiter action: {}", e),
    }
}
