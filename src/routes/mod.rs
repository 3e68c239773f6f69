mod health;
mod metrics;
mod predict;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub use health::{healthcheck, HealthStatus};
pub use metrics::metrics_handler;
pub use predict::{predict, ErrorBody, PredictError};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/predict", post(predict::<M>))
        .route("/healthcheck", get(healthcheck::<M>))
        .route("/metrics", get(metrics_handler::<M>))
}
