use crate::model_service::{ModelError, ModelService};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

type LoadFn<M> = dyn Fn() -> Result<M, ModelError> + Send + Sync;
type PendingLoad<M> = Shared<BoxFuture<'static, Result<Arc<M>, ModelError>>>;

/// Process-wide model handle. The load function runs on the blocking pool
/// and its first success is memoized for the lifetime of the loader;
/// failures are not cached, so the next caller retries.
///
/// An in-flight load is shared by every caller and keeps running when the
/// caller that started it goes away, so at most one load runs at a time.
pub struct ModelLoader<M: ModelService> {
    model: OnceCell<Arc<M>>,
    pending: Mutex<Option<PendingLoad<M>>>,
    load: Arc<LoadFn<M>>,
}

impl<M: ModelService> ModelLoader<M> {
    pub fn new<F>(load: F) -> Self
    where
        F: Fn() -> Result<M, ModelError> + Send + Sync + 'static,
    {
        Self {
            model: OnceCell::new(),
            pending: Mutex::new(None),
            load: Arc::new(load),
        }
    }

    pub async fn get(&self) -> Result<Arc<M>, ModelError> {
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }

        let pending = self.pending_load()?;
        let result = pending.clone().await;

        let mut slot = self
            .pending
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;
        if let Ok(model) = &result {
            let _ = self.model.set(model.clone());
        }
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&pending)) {
            *slot = None;
        }

        result
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    fn pending_load(&self) -> Result<PendingLoad<M>, ModelError> {
        let mut slot = self
            .pending
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        // The model is stored before the slot is cleared, both under this lock.
        if let Some(model) = self.model.get() {
            return Ok(future::ready(Ok(model.clone())).boxed().shared());
        }
        if let Some(pending) = slot.as_ref() {
            return Ok(pending.clone());
        }

        let load = self.load.clone();
        let handle = tokio::task::spawn_blocking(move || (load.as_ref())());
        let pending = async move {
            let model = handle
                .await
                .map_err(|e| ModelError::Load(format!("loader task failed: {}", e)))??;
            tracing::info!("Model loaded");
            Ok::<_, ModelError>(Arc::new(model))
        }
        .boxed()
        .shared();

        *slot = Some(pending.clone());
        Ok(pending)
    }
}
