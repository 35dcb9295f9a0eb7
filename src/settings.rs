//! Quorum feed settings
use std::collections::HashSet;

use tokio::time::Duration;
use url::Url;

use crate::config_error;
use crate::error::Result;
use crate::package::signer::normalize_address;
use crate::pubsub::RateLimiterConfig;

pub const STANDARD_PORT_HTTP: u16 = 8420;
pub const DEFAULT_PORT_HTTP: &str = "8420";

/// Packages older than this are never accepted and are swept from memory
pub const MAX_PACKAGE_STALENESS_MS: i64 = 5 * 60 * 1000;
/// How often the subscriber sweeps stale buckets on its own
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 10_000;

pub const PACKAGE_TIMESTAMP_GRANULATION_MS: i64 = 1_000;
pub const DEFAULT_THRESHOLD_DEVIATION_PERCENT: f64 = 1.0;
pub const DEFAULT_MAX_DELAY_IN_SECONDS: u32 = 3;
pub const DEFAULT_MIN_REFERENCE_VALUES: usize = 1;

/// Reference deviation guard options
#[derive(Clone, Debug)]
pub struct ReferenceVerifierSettings {
    pub reference_signers: Vec<String>,
    pub threshold_deviation_percent: f64,
    pub max_delay_in_seconds: u32,
    pub min_reference_values: usize,
}

impl ReferenceVerifierSettings {
    pub fn new(reference_signers: Vec<String>) -> Self {
        Self {
            reference_signers,
            threshold_deviation_percent: DEFAULT_THRESHOLD_DEVIATION_PERCENT,
            max_delay_in_seconds: DEFAULT_MAX_DELAY_IN_SECONDS,
            min_reference_values: DEFAULT_MIN_REFERENCE_VALUES,
        }
    }

    pub fn reference_signer_set(&self) -> HashSet<String> {
        self.reference_signers
            .iter()
            .map(|s| normalize_address(s))
            .collect()
    }
}

/// Quorum configuration for one subscriber
#[derive(Clone, Debug)]
pub struct SubscriberSettings {
    pub data_service_id: String,
    pub data_package_ids: Vec<String>,
    pub authorized_signers: Vec<String>,
    pub unique_signers_count: usize,
    pub minimal_off_chain_signers_count: usize,
    pub ignore_missing_feeds: bool,
    pub wait_ms_after_minimal_satisfied: u64,
    /// 0 disables per-topic message statistics
    pub stats_log_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    pub reference: Option<ReferenceVerifierSettings>,
    /// Per-topic and per-client message limits applied to the transport callback
    pub rate_limiter: Option<RateLimiterConfig>,
}

impl SubscriberSettings {
    pub fn new(
        data_service_id: impl Into<String>,
        data_package_ids: Vec<String>,
        authorized_signers: Vec<String>,
        unique_signers_count: usize,
    ) -> Self {
        Self {
            data_service_id: data_service_id.into(),
            data_package_ids,
            authorized_signers,
            unique_signers_count,
            minimal_off_chain_signers_count: unique_signers_count,
            ignore_missing_feeds: false,
            wait_ms_after_minimal_satisfied: 0,
            stats_log_interval_ms: 0,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            reference: None,
            rate_limiter: None,
        }
    }

    /// Reject configurations that could never reach quorum
    pub fn validate(&self) -> Result<()> {
        if self.authorized_signers.is_empty() {
            return Err(config_error!(
                "You have to provide at least one authorized signer"
            ));
        }
        if self.unique_signers_count == 0 {
            return Err(config_error!("unique_signers_count has to be > 0"));
        }
        // duplicates differing only in case count once
        let distinct_signers = self.normalized_signers().len();
        if distinct_signers < self.unique_signers_count {
            return Err(config_error!(
                "Misconfiguration authorized_signers.len()={} has to be >= unique_signers_count={}",
                distinct_signers,
                self.unique_signers_count
            ));
        }
        if self.minimal_off_chain_signers_count < self.unique_signers_count {
            return Err(config_error!(
                "Misconfiguration unique_signers_count={} has to be <= minimal_off_chain_signers_count={}",
                self.unique_signers_count,
                self.minimal_off_chain_signers_count
            ));
        }
        if self.data_package_ids.is_empty() {
            return Err(config_error!("You have to provide at least one data package id"));
        }
        Ok(())
    }

    /// Authorized signers, lowercased and deduplicated in their configured order
    pub fn normalized_signers(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.authorized_signers
            .iter()
            .map(|s| normalize_address(s))
            .filter(|s| seen.insert(s.clone()))
            .collect()
    }
}

/// Fallback polling options
#[derive(Clone, Debug)]
pub struct FallbackSettings {
    pub cache_service_url: Url,
    pub max_delay_between_publishes: Duration,
    pub check_interval: Duration,
}

/// Whole-subscriber circuit breaker options
#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerSettings {
    pub interval: Duration,
    pub max_events_per_interval: usize,
}

#[derive(Clone, Debug)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // HTTP API listen port
    pub listen_port: u16,

    // Light gateway polled for packages
    pub gateway_url: Url,
    pub polling_interval: Duration,

    pub subscriber: SubscriberSettings,
    pub circuit_breaker: Option<CircuitBreakerSettings>,
    pub fallback: Option<FallbackSettings>,
}
