use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::aggregator::{DataPackageSubscriber, SubscriberEvent};
use crate::error::{QuorumError, Result};
use crate::package::DataPackagesResponse;

/// Most recent finalized batch handed to the consumer
#[derive(Clone, Debug, Serialize)]
pub struct LatestBatch {
    pub received_at_ms: i64,
    pub packages: DataPackagesResponse,
}

pub type SharedLatest = Arc<RwLock<Option<LatestBatch>>>;

#[derive(Clone)]
pub struct ApiState {
    pub subscriber: Arc<DataPackageSubscriber>,
    pub latest: SharedLatest,
}

impl ApiState {
    pub fn new(subscriber: Arc<DataPackageSubscriber>) -> Self {
        Self {
            subscriber,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    pub fn record_batch(&self, packages: DataPackagesResponse) -> Result<()> {
        let mut latest = self
            .latest
            .write()
            .map_err(|e| QuorumError::Concurrency(format!("RwLock write fail {}", e)))?;
        *latest = Some(LatestBatch {
            received_at_ms: Utc::now().timestamp_millis(),
            packages,
        });
        Ok(())
    }

    pub fn latest_batch(&self) -> Result<Option<LatestBatch>> {
        self.latest
            .read()
            .map_err(|e| QuorumError::Concurrency(format!("RwLock read fail {}", e)))
            .map(|latest| latest.clone())
    }

    /// Drain subscriber events into the latest batch until the subscriber goes away
    pub async fn consume(self, mut events: mpsc::UnboundedReceiver<SubscriberEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SubscriberEvent::Packages(packages) => {
                    info!(
                        "Received batch dataPackageIds={}",
                        packages.keys().cloned().collect::<Vec<_>>().join(",")
                    );
                    if let Err(e) = self.record_batch(packages) {
                        error!("Failed storing latest batch: {}", e);
                    }
                }
                SubscriberEvent::TransportError(e) => {
                    warn!("Transport error from subscriber: {}", e);
                }
            }
        }
        info!("Subscriber event stream closed");
    }
}
