//! Cross-checks candidate values against trusted reference signers
use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, error, warn};

use super::bucket_store::TimestampBucketStore;
use crate::package::numeric::{deviation_percent, median};
use crate::package::VerifiedDataPackage;
use crate::settings::{
    ReferenceVerifierSettings, MAX_PACKAGE_STALENESS_MS, PACKAGE_TIMESTAMP_GRANULATION_MS,
};

#[derive(Clone, Debug)]
pub struct ReferenceValueVerifier {
    reference_signers: HashSet<String>,
    threshold_deviation_percent: f64,
    max_delay_in_seconds: u32,
    min_reference_values: usize,
    store: TimestampBucketStore,
}

impl ReferenceValueVerifier {
    pub fn new(settings: &ReferenceVerifierSettings) -> Self {
        Self {
            reference_signers: settings.reference_signer_set(),
            threshold_deviation_percent: settings.threshold_deviation_percent,
            max_delay_in_seconds: settings.max_delay_in_seconds,
            min_reference_values: settings.min_reference_values,
            store: TimestampBucketStore::new(PACKAGE_TIMESTAMP_GRANULATION_MS),
        }
    }

    pub fn is_reference_signer(&self, signer: &str) -> bool {
        self.reference_signers.contains(signer)
    }

    /// Remember a package for later cross-referencing, trusted or not
    pub fn register_data_package(&mut self, package: &VerifiedDataPackage) {
        self.store.push(package.clone());
    }

    /// Accept unless the value deviates from the reference median by at least the threshold
    pub fn verify_data_package(&self, package: &VerifiedDataPackage) -> bool {
        if self.is_reference_signer(&package.signer) {
            return true;
        }

        let timestamp = self.store.normalize(package.timestamp());
        let description = format!("for {}/{} on {}", package.feed_id(), package.signer, timestamp);

        let deviation = self.reference_value_deviation(package, timestamp, &description);
        if deviation >= self.threshold_deviation_percent {
            error!(deviation_percent = deviation, "Deviation exceeded {}", description);
            return false;
        }
        true
    }

    /// First-seen value per reference signer in the current and earlier buckets
    fn reference_values(&self, feed_id: &str, timestamp: i64) -> Vec<f64> {
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for i in 0..=i64::from(self.max_delay_in_seconds) {
            let key = timestamp - i * PACKAGE_TIMESTAMP_GRANULATION_MS;
            for pkg in self.store.feed_packages(key, feed_id) {
                if self.is_reference_signer(&pkg.signer) && seen.insert(pkg.signer.as_str()) {
                    values.push(pkg.value());
                }
            }
        }
        values
    }

    fn reference_value_deviation(
        &self,
        package: &VerifiedDataPackage,
        timestamp: i64,
        description: &str,
    ) -> f64 {
        let values = self.reference_values(package.feed_id(), timestamp);
        let median_value = match median(&values) {
            Some(m) if values.len() >= self.min_reference_values => m,
            _ => {
                warn!(
                    deviation_percent = 0.0,
                    "Not enough reference values {} (required: {}, found: {})",
                    description,
                    self.min_reference_values,
                    values.len()
                );
                return 0.0;
            }
        };

        let deviation = deviation_percent(median_value, package.value());
        debug!(
            deviation_percent = deviation,
            "Calculated deviationPercent {} of {} reference signers",
            description,
            values.len()
        );
        deviation
    }

    pub fn clean_stale_packages(&mut self) -> usize {
        self.store
            .clean_stale(Utc::now().timestamp_millis(), MAX_PACKAGE_STALENESS_MS)
    }

    pub fn bucket_count(&self) -> usize {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{DataPackage, DataPoint, Wallet};

    const KEY_1: &str = "0xfae81e7c122f2ad245be182d88889e6a037bbeebd7de7bb5ca10f891d359e440";
    const KEY_2: &str = "0x0a566b182e650472efe9a17efb850cc01bb5e479add24739942ba43327a194f9";
    const KEY_3: &str = "0xd56e1ee933657d6bcdec81f9956392aef47a7f8b1a1275b6e4ad551fb5d6b14c";
    const OUTSIDER: &str = "0x7712474356ae40814b45e9317579388d5e185ac17177f0399831f29141c7c896";

    fn wallet(key: &str) -> Wallet {
        Wallet::from_private_key_hex(key).unwrap()
    }

    fn signed(key: &str, feed: &str, ts: i64, value: f64) -> VerifiedDataPackage {
        DataPackage::new(feed, ts, vec![DataPoint::new(feed, value)])
            .sign(&wallet(key))
            .unwrap()
            .verify()
            .unwrap()
    }

    fn verifier(
        keys: &[&str],
        threshold: f64,
        delay: u32,
        min_refs: usize,
    ) -> ReferenceValueVerifier {
        let mut settings = ReferenceVerifierSettings::new(
            keys.iter().map(|k| wallet(k).address().to_string()).collect(),
        );
        settings.threshold_deviation_percent = threshold;
        settings.max_delay_in_seconds = delay;
        settings.min_reference_values = min_refs;
        ReferenceValueVerifier::new(&settings)
    }

    #[test]
    fn reference_signer_is_always_accepted() {
        let v = verifier(&[KEY_1], 1.0, 3, 1);
        assert!(v.verify_data_package(&signed(KEY_1, "BTC", 1_730_000_000_000, 100.0)));
    }

    #[test]
    fn not_enough_references_accepts() {
        let mut v = verifier(&[KEY_1, KEY_2], 1.0, 3, 2);
        let ts = 1_730_000_001_000;
        v.register_data_package(&signed(KEY_1, "ETH", ts, 200.0));
        assert!(v.verify_data_package(&signed(KEY_3, "ETH", ts, 205.0)));
    }

    #[test]
    fn no_references_at_all_accepts() {
        let v = verifier(&[KEY_1], 1.0, 3, 1);
        assert!(v.verify_data_package(&signed(KEY_3, "ETH", 1_730_000_001_000, 1e9)));
    }

    #[test]
    fn rejects_when_deviation_reaches_threshold() {
        let mut v = verifier(&[KEY_1, KEY_2, KEY_3], 1.0, 3, 2);
        let ts = 1_730_000_002_000;
        v.register_data_package(&signed(KEY_1, "BTC", ts, 100.0));
        v.register_data_package(&signed(KEY_2, "BTC", ts, 101.0));
        v.register_data_package(&signed(KEY_3, "BTC", ts, 102.0));
        // ~1.98% from median 101
        assert!(!v.verify_data_package(&signed(OUTSIDER, "BTC", ts, 103.0)));
    }

    #[test]
    fn accepts_within_threshold() {
        let mut v = verifier(&[KEY_1, KEY_2], 2.0, 3, 2);
        let ts = 1_730_000_003_000;
        v.register_data_package(&signed(KEY_1, "BTC", ts, 100.0));
        v.register_data_package(&signed(KEY_2, "BTC", ts, 102.0));
        assert!(v.verify_data_package(&signed(OUTSIDER, "BTC", ts, 101.5)));
    }

    #[test]
    fn ignores_non_reference_signers_and_other_feeds() {
        let mut v = verifier(&[KEY_1, KEY_2, KEY_3], 0.5, 3, 2);
        let ts = 1_730_000_004_000;
        v.register_data_package(&signed(KEY_1, "SOL", ts, 50.0));
        v.register_data_package(&signed(KEY_2, "SOL", ts, 52.0));
        v.register_data_package(&signed(OUTSIDER, "SOL", ts, 10.0));
        v.register_data_package(&signed(KEY_3, "BTC", ts, 9999.0));
        // median 51, ~0.39%
        assert!(v.verify_data_package(&signed(OUTSIDER, "SOL", ts, 51.2)));
    }

    #[test]
    fn looks_back_over_earlier_seconds() {
        let mut v = verifier(&[KEY_1, KEY_2], 1.0, 3, 2);
        let now = 1_730_000_005_000;
        v.register_data_package(&signed(KEY_1, "ADA", now - 2_000, 10.0));
        v.register_data_package(&signed(KEY_2, "ADA", now - 2_000, 11.0));
        assert!(v.verify_data_package(&signed(OUTSIDER, "ADA", now, 10.4)));
        assert!(!v.verify_data_package(&signed(OUTSIDER, "ADA", now, 12.0)));
    }

    #[test]
    fn references_outside_max_delay_are_ignored() {
        let delay = 3;
        let now = 1_730_000_006_000;
        let too_old = now - (i64::from(delay) + 1) * 1_000;
        let oldest_in_range = now - i64::from(delay) * 1_000;

        let mut v = verifier(&[KEY_1, KEY_2], 1.0, delay, 2);
        v.register_data_package(&signed(KEY_1, "XRP", too_old, 10.0));
        v.register_data_package(&signed(KEY_2, "XRP", too_old, 10.0));
        // nothing in range, so even a far-off value passes
        assert!(v.verify_data_package(&signed(OUTSIDER, "XRP", now, 1_000.0)));

        let mut v = verifier(&[KEY_1, KEY_2], 1.0, delay, 2);
        v.register_data_package(&signed(KEY_1, "XRP", oldest_in_range, 10.0));
        v.register_data_package(&signed(KEY_2, "XRP", oldest_in_range, 10.0));
        assert!(!v.verify_data_package(&signed(OUTSIDER, "XRP", now, 1_000.0)));
    }

    #[test]
    fn normalizes_to_whole_seconds() {
        let mut v = verifier(&[KEY_1, KEY_2], 1.0, 0, 2);
        let base = 10_000_003_000;
        v.register_data_package(&signed(KEY_1, "DOT", base + 1, 20.0));
        v.register_data_package(&signed(KEY_2, "DOT", base + 1_001, 22.0));
        // only one reference in the base bucket: accepted without a check
        assert!(v.verify_data_package(&signed(OUTSIDER, "DOT", base, 25.0)));

        v.register_data_package(&signed(KEY_2, "DOT", base + 5, 22.0));
        assert!(v.verify_data_package(&signed(OUTSIDER, "DOT", base + 2, 21.0)));
        assert!(!v.verify_data_package(&signed(OUTSIDER, "DOT", base + 2, 25.0)));
    }
}
