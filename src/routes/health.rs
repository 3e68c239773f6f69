use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
}

/// Goes through the lazy loader, so the first healthcheck also loads the
/// model. A load failure is reported, not raised.
#[instrument(skip(state))]
pub async fn healthcheck<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> Json<HealthStatus> {
    state.metrics.record_request("/healthcheck");

    let model_loaded = match state.model_loader.get().await {
        Ok(_) => true,
        Err(e) => {
            tracing::error!("Healthcheck could not load model: {}", e);
            false
        }
    };

    Json(HealthStatus {
        status: "healthy".into(),
        model_loaded,
    })
}
