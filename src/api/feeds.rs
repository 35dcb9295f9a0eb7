use axum::{extract::State, http::StatusCode};
use tracing::{event, instrument, Level};

use super::state::{ApiState, LatestBatch};
use crate::aggregator::SubscriberStatus;
use crate::error::Result;

#[instrument(skip(state), level = "debug")]
pub async fn status(State(state): State<ApiState>) -> Result<axum::Json<SubscriberStatus>> {
    state
        .subscriber
        .status()
        .await
        .map_err(|err| {
            event!(
                Level::ERROR,
                message = "Failed reading subscriber status",
                err = format!("{:?}", err)
            );
            err
        })
        .map(axum::Json)
}

#[instrument(skip(state), level = "debug")]
pub async fn latest(
    State(state): State<ApiState>,
) -> std::result::Result<axum::Json<LatestBatch>, StatusCode> {
    let batch = state.latest_batch().map_err(|err| {
        event!(
            Level::ERROR,
            message = "Failed reading latest batch",
            err = format!("{:?}", err)
        );
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    batch.map(axum::Json).ok_or(StatusCode::NOT_FOUND)
}

#[instrument(skip(state), level = "debug")]
pub async fn clean_stale(State(state): State<ApiState>) -> StatusCode {
    match state.subscriber.clean_stale_packages() {
        Ok(()) => StatusCode::ACCEPTED,
        Err(err) => {
            event!(
                Level::ERROR,
                message = "Failed requesting stale sweep",
                err = format!("{:?}", err)
            );
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
