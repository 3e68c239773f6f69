use crate::{
    config::Config,
    dispatcher::BatchDispatcher,
    model_loader::ModelLoader,
    ort_service::OrtModelService,
    server::{HttpServer, SharedState},
    telemetry::Metrics,
};
use std::sync::Arc;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let model_config = config.model.clone();
    let model_loader = Arc::new(ModelLoader::new(move || {
        OrtModelService::new(&model_config)
    }));

    if config.model.preload {
        if let Err(e) = model_loader.get().await {
            tracing::error!("Failed to initialize model: {}", e);
            return Err(e.into());
        }
    }

    let metrics = Arc::new(Metrics::new()?);
    let dispatcher = BatchDispatcher::new(config.dispatcher.max_workers);
    tracing::info!("Worker pool size: {}", dispatcher.max_workers());

    let state = SharedState::new(model_loader, dispatcher, metrics);
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
