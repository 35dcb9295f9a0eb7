//! Message rate statistics for subscribe callbacks
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use serde::Serialize;
use tokio::time::{self, Duration};
use tracing::{error, info};

use super::{PubSubClient, SubscribeCallback};

pub const DEFAULT_STATS_LOG_INTERVAL_MS: u64 = 60_000;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsMetrics {
    pub max: u64,
    pub min: u64,
    pub avg: f64,
    pub total: u64,
}

type CountsPerSecond = HashMap<i64, u64>;

#[derive(Default)]
struct StatsTables {
    topics: HashMap<String, CountsPerSecond>,
    clients: HashMap<String, CountsPerSecond>,
}

/// Counts messages per second for each topic and client, logging a summary
/// every interval and then starting over.
#[derive(Default)]
pub struct MessageStatsTracker {
    tables: Mutex<StatsTables>,
}

impl MessageStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker and start its periodic log task.
    /// The task ends once the tracker is dropped.
    pub fn spawn(log_interval: Duration) -> Arc<Self> {
        let tracker = Arc::new(Self::new());
        let weak: Weak<Self> = Arc::downgrade(&tracker);
        info!(
            "Message stats tracker started, will log every {}s",
            log_interval.as_secs_f64()
        );
        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + log_interval, log_interval);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(tracker) => tracker.log_and_clear(),
                    None => break,
                }
            }
        });
        tracker
    }

    pub fn record_message(&self, topic: &str, client_name: &str) {
        let second = Utc::now().timestamp_millis() / 1000;
        match self.tables.lock() {
            Ok(mut tables) => {
                *tables
                    .topics
                    .entry(topic.to_string())
                    .or_default()
                    .entry(second)
                    .or_insert(0) += 1;
                *tables
                    .clients
                    .entry(client_name.to_string())
                    .or_default()
                    .entry(second)
                    .or_insert(0) += 1;
            }
            Err(e) => error!("Failed to record message stats error={}", e),
        }
    }

    pub fn topic_metrics(&self) -> Vec<(String, StatsMetrics)> {
        self.tables
            .lock()
            .map(|tables| collect_metrics(&tables.topics))
            .unwrap_or_default()
    }

    pub fn client_metrics(&self) -> Vec<(String, StatsMetrics)> {
        self.tables
            .lock()
            .map(|tables| collect_metrics(&tables.clients))
            .unwrap_or_default()
    }

    pub fn log_and_clear(&self) {
        let topics = self.topic_metrics();
        let clients = self.client_metrics();
        if topics.is_empty() && clients.is_empty() {
            info!("Message stats: no messages received in the last interval");
            return;
        }
        for (topic, metrics) in &topics {
            info!(
                topic = topic.as_str(),
                max = metrics.max,
                min = metrics.min,
                avg = metrics.avg,
                total = metrics.total,
                "Message stats per topic (msgs/sec)"
            );
        }
        for (client, metrics) in &clients {
            info!(
                client = client.as_str(),
                max = metrics.max,
                min = metrics.min,
                avg = metrics.avg,
                total = metrics.total,
                "Message stats per client (msgs/sec)"
            );
        }
        if let Ok(mut tables) = self.tables.lock() {
            tables.topics.clear();
            tables.clients.clear();
        }
    }
}

fn compute_metrics(counts: &CountsPerSecond) -> StatsMetrics {
    if counts.is_empty() {
        return StatsMetrics::default();
    }
    let total: u64 = counts.values().sum();
    let max = counts.values().copied().max().unwrap_or(0);
    let min = counts.values().copied().min().unwrap_or(0);
    let avg = total as f64 / counts.len() as f64;
    StatsMetrics {
        max,
        min,
        avg: (avg * 100.0).round() / 100.0,
        total,
    }
}

fn collect_metrics(table: &HashMap<String, CountsPerSecond>) -> Vec<(String, StatsMetrics)> {
    let mut metrics: Vec<_> = table
        .iter()
        .map(|(key, counts)| (key.clone(), compute_metrics(counts)))
        .collect();
    metrics.sort_by(|a, b| a.0.cmp(&b.0));
    metrics
}

/// Wrap `callback` so every delivered message is counted by `tracker`
pub fn with_stats(
    callback: SubscribeCallback,
    client: Arc<dyn PubSubClient>,
    tracker: Arc<MessageStatsTracker>,
) -> SubscribeCallback {
    Arc::new(move |topic, message| {
        tracker.record_message(topic, &client.unique_name());
        callback(topic, message)
    })
}
