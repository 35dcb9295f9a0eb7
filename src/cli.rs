//! CLI for this application
//!
use tokio::time::Duration;
use url::Url;

use crate::config_error;
use crate::error::Result;
use crate::pubsub::polling::DEFAULT_POLLING_INTERVAL_MS;
use crate::pubsub::RateLimiterConfig;
use crate::settings::{
    self, CircuitBreakerSettings, FallbackSettings, ReferenceVerifierSettings, SubscriberSettings,
};

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Debug, clap::Parser)]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("QUORUM_FEED_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("QUORUM_FEED_HTTP_LISTEN_PORT"),
        help = "Port to bind the status API to"
    )]
    pub listen_port: u16,

    // Light gateway
    #[clap(
        long,
        env("QUORUM_FEED_GATEWAY_URL"),
        help = "Light gateway polled for data packages"
    )]
    pub gateway_url: Url,

    #[clap(
        long,
        default_value_t = DEFAULT_POLLING_INTERVAL_MS,
        env("QUORUM_FEED_POLLING_INTERVAL_MS"),
        help = "How often to poll the gateway"
    )]
    pub polling_interval_ms: u64,

    // Quorum
    #[clap(long, env("QUORUM_FEED_DATA_SERVICE_ID"), help = "Data service id")]
    pub data_service_id: String,

    #[clap(
        long,
        env("QUORUM_FEED_DATA_PACKAGE_IDS"),
        value_delimiter = ',',
        required = true,
        help = "Comma separated feed ids (e.g., ETH,BTC)"
    )]
    pub data_package_ids: Vec<String>,

    #[clap(
        long,
        env("QUORUM_FEED_AUTHORIZED_SIGNERS"),
        value_delimiter = ',',
        required = true,
        help = "Comma separated signer addresses"
    )]
    pub authorized_signers: Vec<String>,

    #[clap(
        long,
        env("QUORUM_FEED_UNIQUE_SIGNERS_COUNT"),
        help = "Packages published per feed"
    )]
    pub unique_signers_count: usize,

    #[clap(
        long,
        env("QUORUM_FEED_MINIMAL_SIGNERS_COUNT"),
        help = "Signers required before a feed can be published; defaults to unique-signers-count"
    )]
    pub minimal_off_chain_signers_count: Option<usize>,

    #[clap(
        long,
        env("QUORUM_FEED_IGNORE_MISSING_FEEDS"),
        help = "Publish as soon as any feed has enough signers"
    )]
    pub ignore_missing_feeds: bool,

    #[clap(
        long,
        default_value_t = 0,
        env("QUORUM_FEED_WAIT_MS_AFTER_MINIMAL_SATISFIED"),
        help = "Wait for more signers after the minimum is reached"
    )]
    pub wait_ms_after_minimal_satisfied: u64,

    #[clap(
        long,
        default_value_t = 0,
        env("QUORUM_FEED_STATS_LOG_INTERVAL_MS"),
        help = "Message statistics log interval, 0 disables"
    )]
    pub stats_log_interval_ms: u64,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_CLEANUP_INTERVAL_MS,
        env("QUORUM_FEED_CLEANUP_INTERVAL_MS"),
        help = "How often stale packages are swept"
    )]
    pub cleanup_interval_ms: u64,

    // Whole-subscriber circuit breaker
    #[clap(long, env("QUORUM_FEED_CIRCUIT_BREAKER_INTERVAL_MS"))]
    pub circuit_breaker_interval_ms: Option<u64>,

    #[clap(long, env("QUORUM_FEED_CIRCUIT_BREAKER_MAX_EVENTS"))]
    pub circuit_breaker_max_events: Option<usize>,

    // Transport rate limits
    #[clap(long, env("QUORUM_FEED_TOPIC_RATE_LIMIT_INTERVAL_MS"))]
    pub topic_rate_limit_interval_ms: Option<u64>,

    #[clap(long, env("QUORUM_FEED_TOPIC_RATE_LIMIT_MAX_MESSAGES"))]
    pub topic_rate_limit_max_messages: Option<usize>,

    #[clap(long, env("QUORUM_FEED_CLIENT_RATE_LIMIT_INTERVAL_MS"))]
    pub client_rate_limit_interval_ms: Option<u64>,

    #[clap(long, env("QUORUM_FEED_CLIENT_RATE_LIMIT_MAX_MESSAGES"))]
    pub client_rate_limit_max_messages: Option<usize>,

    // Fallback
    #[clap(
        long,
        env("QUORUM_FEED_FALLBACK_CACHE_URL"),
        help = "Cache service queried when publishes stall"
    )]
    pub fallback_cache_url: Option<Url>,

    #[clap(long, default_value_t = 60_000, env("QUORUM_FEED_FALLBACK_MAX_DELAY_MS"))]
    pub fallback_max_delay_ms: u64,

    #[clap(
        long,
        default_value_t = 5_000,
        env("QUORUM_FEED_FALLBACK_CHECK_INTERVAL_MS")
    )]
    pub fallback_check_interval_ms: u64,

    // Reference deviation guard
    #[clap(
        long,
        env("QUORUM_FEED_REFERENCE_SIGNERS"),
        value_delimiter = ',',
        help = "Trusted signers values are cross-checked against; empty disables the guard"
    )]
    pub reference_signers: Vec<String>,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_THRESHOLD_DEVIATION_PERCENT,
        env("QUORUM_FEED_REFERENCE_THRESHOLD_PERCENT")
    )]
    pub reference_threshold_deviation_percent: f64,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_MAX_DELAY_IN_SECONDS,
        env("QUORUM_FEED_REFERENCE_MAX_DELAY_SECONDS")
    )]
    pub reference_max_delay_in_seconds: u32,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_MIN_REFERENCE_VALUES,
        env("QUORUM_FEED_REFERENCE_MIN_VALUES")
    )]
    pub reference_min_values: usize,
}

impl Cli {
    pub fn into_settings(self) -> Result<settings::Settings> {
        let mut subscriber = SubscriberSettings::new(
            self.data_service_id,
            self.data_package_ids,
            self.authorized_signers,
            self.unique_signers_count,
        );
        if let Some(minimal) = self.minimal_off_chain_signers_count {
            subscriber.minimal_off_chain_signers_count = minimal;
        }
        subscriber.ignore_missing_feeds = self.ignore_missing_feeds;
        subscriber.wait_ms_after_minimal_satisfied = self.wait_ms_after_minimal_satisfied;
        subscriber.stats_log_interval_ms = self.stats_log_interval_ms;
        subscriber.cleanup_interval_ms = self.cleanup_interval_ms;

        if !self.reference_signers.is_empty() {
            let mut reference = ReferenceVerifierSettings::new(self.reference_signers);
            reference.threshold_deviation_percent = self.reference_threshold_deviation_percent;
            reference.max_delay_in_seconds = self.reference_max_delay_in_seconds;
            reference.min_reference_values = self.reference_min_values;
            subscriber.reference = Some(reference);
        }

        let rate_limiter = RateLimiterConfig {
            topic_interval: self.topic_rate_limit_interval_ms.map(Duration::from_millis),
            max_messages_per_topic_interval: self.topic_rate_limit_max_messages,
            client_interval: self.client_rate_limit_interval_ms.map(Duration::from_millis),
            max_messages_per_client_interval: self.client_rate_limit_max_messages,
        };
        if rate_limiter.topic_interval.is_some()
            || rate_limiter.max_messages_per_topic_interval.is_some()
            || rate_limiter.client_interval.is_some()
            || rate_limiter.max_messages_per_client_interval.is_some()
        {
            subscriber.rate_limiter = Some(rate_limiter);
        }

        subscriber.validate()?;

        let circuit_breaker = match (
            self.circuit_breaker_interval_ms,
            self.circuit_breaker_max_events,
        ) {
            (Some(interval_ms), Some(max_events)) => Some(CircuitBreakerSettings {
                interval: Duration::from_millis(interval_ms),
                max_events_per_interval: max_events,
            }),
            (None, None) => None,
            _ => {
                return Err(config_error!(
                    "circuit-breaker-interval-ms and circuit-breaker-max-events must be set together"
                ))
            }
        };

        let fallback = self.fallback_cache_url.map(|cache_service_url| FallbackSettings {
            cache_service_url,
            max_delay_between_publishes: Duration::from_millis(self.fallback_max_delay_ms),
            check_interval: Duration::from_millis(self.fallback_check_interval_ms),
        });

        Ok(settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            gateway_url: self.gateway_url,
            polling_interval: Duration::from_millis(self.polling_interval_ms),
            subscriber,
            circuit_breaker,
            fallback,
        })
    }
}
