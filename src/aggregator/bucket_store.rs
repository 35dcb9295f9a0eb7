//! Packages grouped by normalized timestamp, then by feed
use std::collections::BTreeMap;

use crate::package::VerifiedDataPackage;

pub type FeedPackages = BTreeMap<String, Vec<VerifiedDataPackage>>;

/// Timestamp buckets of accepted packages.
///
/// Timestamps are floored to `granularity_ms`; a granularity of 1 keeps the
/// exact millisecond.
#[derive(Clone, Debug)]
pub struct TimestampBucketStore {
    granularity_ms: i64,
    buckets: BTreeMap<i64, FeedPackages>,
}

impl TimestampBucketStore {
    pub fn new(granularity_ms: i64) -> Self {
        Self {
            granularity_ms: granularity_ms.max(1),
            buckets: BTreeMap::new(),
        }
    }

    pub fn exact() -> Self {
        Self::new(1)
    }

    pub fn granularity_ms(&self) -> i64 {
        self.granularity_ms
    }

    pub fn normalize(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.granularity_ms) * self.granularity_ms
    }

    /// Store unconditionally; returns the bucket key
    pub fn push(&mut self, package: VerifiedDataPackage) -> i64 {
        let key = self.normalize(package.timestamp());
        self.buckets
            .entry(key)
            .or_default()
            .entry(package.feed_id().to_string())
            .or_default()
            .push(package);
        key
    }

    pub fn has_signer(&self, timestamp: i64, feed_id: &str, signer: &str) -> bool {
        self.feed_packages(timestamp, feed_id)
            .iter()
            .any(|p| p.signer == signer)
    }

    /// Store only if the signer has no package for this feed and bucket yet
    pub fn insert_unique(&mut self, package: VerifiedDataPackage) -> bool {
        if self.has_signer(package.timestamp(), package.feed_id(), &package.signer) {
            return false;
        }
        self.push(package);
        true
    }

    pub fn get(&self, timestamp: i64) -> Option<&FeedPackages> {
        self.buckets.get(&self.normalize(timestamp))
    }

    pub fn feed_packages(&self, timestamp: i64, feed_id: &str) -> &[VerifiedDataPackage] {
        self.get(timestamp)
            .and_then(|feeds| feeds.get(feed_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn signer_count(&self, timestamp: i64, feed_id: &str) -> usize {
        self.feed_packages(timestamp, feed_id).len()
    }

    /// Drop the given feeds from a bucket, keeping the bucket key
    pub fn clear_feeds<S: AsRef<str>>(&mut self, timestamp: i64, feed_ids: &[S]) {
        let key = self.normalize(timestamp);
        if let Some(feeds) = self.buckets.get_mut(&key) {
            for feed_id in feed_ids {
                feeds.remove(feed_id.as_ref());
            }
        }
    }

    /// Remove buckets older than `now_ms - max_staleness_ms`; returns how many went
    pub fn clean_stale(&mut self, now_ms: i64, max_staleness_ms: i64) -> usize {
        let horizon = now_ms - max_staleness_ms;
        let before = self.buckets.len();
        self.buckets.retain(|ts, _| *ts >= horizon);
        before - self.buckets.len()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.buckets.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
