use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quorum_feed::aggregator::{DataPackageSubscriber, HttpFallbackSource};
use quorum_feed::api::{self, ApiState};
use quorum_feed::cli;
use quorum_feed::limiters::RateLimitsCircuitBreaker;
use quorum_feed::pubsub::PollingHttpClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quorum_feed=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings()?;
    // Socket server listen address setup
    let listen_address: IpAddr = settings
        .listen_address
        .parse::<IpAddr>()
        .context("Invalid ip address")?;
    let socket_address = SocketAddr::from((listen_address, settings.listen_port));

    let pubsub = Arc::new(PollingHttpClient::new(
        settings.gateway_url.clone(),
        settings.polling_interval,
    ));
    let subscriber = Arc::new(DataPackageSubscriber::new(
        pubsub,
        settings.subscriber.clone(),
    )?);

    if let Some(breaker) = settings.circuit_breaker {
        subscriber.enable_circuit_breaker(RateLimitsCircuitBreaker::new(
            breaker.interval,
            breaker.max_events_per_interval,
        ))?;
    }
    if let Some(fallback) = &settings.fallback {
        let source = HttpFallbackSource::new(
            fallback.cache_service_url.clone(),
            settings.subscriber.data_service_id.clone(),
            settings.subscriber.data_package_ids.clone(),
        );
        subscriber.enable_fallback(
            Arc::new(source),
            fallback.max_delay_between_publishes,
            fallback.check_interval,
        )?;
    }

    let events = subscriber.subscribe().await?;
    let state = ApiState::new(subscriber.clone());
    tokio::spawn(state.clone().consume(events));

    // Build Axum Router
    let api = api::api(state)?;

    // Start server
    info!("Starting Quorum Feed on {}", socket_address);
    axum::Server::bind(&socket_address)
        .serve(api.into_make_service())
        .await?;

    subscriber.unsubscribe().await?;
    subscriber.stop().await;
    Ok(())
}
