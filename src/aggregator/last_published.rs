//! Per-feed record of what was last handed to the consumer
use std::collections::BTreeMap;

use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::package::DataPackagesResponse;

#[derive(Clone, Copy, Debug)]
struct FeedEntry {
    timestamp_ms: i64,
    published_at: Option<Instant>,
}

/// Last published package timestamp and local publish instant, per feed
#[derive(Clone, Debug)]
pub struct LastPublishedFeedState {
    feeds: BTreeMap<String, FeedEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FeedPublishInfo {
    pub timestamp_ms: i64,
    pub published: bool,
}

impl LastPublishedFeedState {
    pub fn new<S: AsRef<str>>(feed_ids: &[S], initial_timestamp_ms: i64) -> Self {
        let feeds = feed_ids
            .iter()
            .map(|id| {
                (
                    id.as_ref().to_string(),
                    FeedEntry {
                        timestamp_ms: initial_timestamp_ms,
                        published_at: None,
                    },
                )
            })
            .collect();
        Self { feeds }
    }

    pub fn last_publish_time(&self, feed_id: &str) -> Option<i64> {
        self.feeds.get(feed_id).map(|e| e.timestamp_ms)
    }

    pub fn is_newer_than_last_published(&self, feed_id: &str, timestamp_ms: i64) -> bool {
        match self.feeds.get(feed_id) {
            Some(entry) => timestamp_ms > entry.timestamp_ms,
            None => false,
        }
    }

    /// Record a publish; timestamps never move backwards
    pub fn update<S: AsRef<str>>(&mut self, feed_ids: &[S], timestamp_ms: i64) {
        let now = Instant::now();
        for feed_id in feed_ids {
            if let Some(entry) = self.feeds.get_mut(feed_id.as_ref()) {
                entry.timestamp_ms = entry.timestamp_ms.max(timestamp_ms);
                entry.published_at = Some(now);
            }
        }
    }

    /// True if some feed was never published or not within `max_delay`
    pub fn is_any_feed_not_published_in(&self, max_delay: Duration) -> bool {
        let now = Instant::now();
        self.feeds.values().any(|entry| match entry.published_at {
            Some(at) => now.duration_since(at) >= max_delay,
            None => true,
        })
    }

    /// Keep only feeds whose packages are all newer than their last publish
    pub fn filter_out_not_newer_packages(
        &self,
        packages: DataPackagesResponse,
    ) -> DataPackagesResponse {
        packages
            .into_iter()
            .filter(|(feed_id, pkgs)| {
                !pkgs.is_empty()
                    && pkgs
                        .iter()
                        .all(|p| self.is_newer_than_last_published(feed_id, p.timestamp()))
            })
            .collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, FeedPublishInfo> {
        self.feeds
            .iter()
            .map(|(id, entry)| {
                (
                    id.clone(),
                    FeedPublishInfo {
                        timestamp_ms: entry.timestamp_ms,
                        published: entry.published_at.is_some(),
                    },
                )
            })
            .collect()
    }
}

impl std::fmt::Display for LastPublishedFeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .feeds
            .iter()
            .map(|(id, entry)| format!("{}={}", id, entry.timestamp_ms))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}
