use axum::extract::State;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::state::ApiState;
use crate::cli::{APP_NAME, APP_VERSION};

pub async fn root() -> &'static str {
    "Welcome to Quorum Feed"
}

pub async fn health() -> &'static str {
    "OK"
}

/// Build info plus the quorum this instance aggregates
#[derive(Debug, Serialize, Deserialize)]
pub struct AboutResponse {
    pub name: String,
    pub version: String,
    pub data_service_id: String,
    pub data_package_ids: Vec<String>,
    pub unique_signers_count: usize,
    pub authorized_signers: usize,
}

#[instrument(skip(state))]
pub async fn about(State(state): State<ApiState>) -> axum::Json<AboutResponse> {
    let settings = state.subscriber.settings();
    axum::Json(AboutResponse {
        name: APP_NAME.to_string(),
        version: APP_VERSION.to_string(),
        data_service_id: settings.data_service_id.clone(),
        data_package_ids: settings.data_package_ids.clone(),
        unique_signers_count: settings.unique_signers_count,
        authorized_signers: settings.normalized_signers().len(),
    })
}
