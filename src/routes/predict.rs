use crate::{
    model_service::{ModelError, ModelService},
    schema::{ImageData, PredictionResponse},
    server::SharedState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No images provided")]
    NoImages,
    #[error("Model loading error: {0}")]
    ModelLoading(#[from] ModelError),
    #[error("{}", .0.body_text())]
    InvalidBody(#[from] JsonRejection),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = match &self {
            PredictError::NoImages => StatusCode::BAD_REQUEST,
            PredictError::ModelLoading(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PredictError::InvalidBody(rejection) => rejection.status(),
        };
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[instrument(skip(state, payload))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    payload: Result<Json<ImageData>, JsonRejection>,
) -> Result<Json<PredictionResponse>, PredictError> {
    state.metrics.record_request("/predict");

    let Json(data) = payload?;
    if data.image.is_empty() {
        return Err(PredictError::NoImages);
    }

    let model = state.model_loader.get().await?;

    let batch_size = data.image.len();
    tracing::info!("Processing batch of {} images", batch_size);
    let started = Instant::now();

    let results = state.dispatcher.dispatch(model, data.image).await;

    let failed = results.iter().filter(|r| r.is_error()).count();
    state
        .metrics
        .record_prediction_duration(started.elapsed().as_millis() as u64, "/predict");
    state
        .metrics
        .record_images((batch_size - failed) as u64, failed as u64);
    tracing::info!(
        failed,
        "Completed processing batch of {} images",
        batch_size
    );

    Ok(Json(PredictionResponse { results }))
}
