use crate::{
    config::ServerConfig, dispatcher::BatchDispatcher, model_loader::ModelLoader,
    model_service::ModelService, routes::api_routes, telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::cors::CorsLayer;

pub struct SharedState<M: ModelService> {
    pub model_loader: Arc<ModelLoader<M>>,
    pub dispatcher: BatchDispatcher,
    pub metrics: Arc<Metrics>,
}

impl<M: ModelService> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            model_loader: self.model_loader.clone(),
            dispatcher: self.dispatcher.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<M: ModelService> SharedState<M> {
    pub fn new(
        model_loader: Arc<ModelLoader<M>>,
        dispatcher: BatchDispatcher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            model_loader,
            dispatcher,
            metrics,
        }
    }
}

/// API routes with the body limit and, when enabled, the permissive CORS
/// policy browser clients need.
pub fn build_router<M: ModelService>(state: SharedState<M>, config: &ServerConfig) -> Router {
    let router = Router::new()
        .merge(api_routes::<M>())
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .with_state(state);

    if config.cors_allow_any_origin {
        router.layer(CorsLayer::very_permissive())
    } else {
        router
    }
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        state: SharedState<M>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let addr = config.get_address();
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let router = build_router(state, config).layer(metrics_layer);

        let listener = TcpListener::bind(&addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Listening on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok::<(), anyhow::Error>(())
        });

        Ok(server_handle)
    }
}
