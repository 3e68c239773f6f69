use crate::{
    classifier::{classify_image, error_result},
    model_service::ModelService,
    schema::PredictionResult,
};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Fans a batch of images out over a fixed number of blocking workers.
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    workers: Arc<Semaphore>,
    max_workers: usize,
}

impl BatchDispatcher {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Classifies every image and returns one result per input, in input
    /// order. A single image runs inline on the calling task.
    pub async fn dispatch<M: ModelService>(
        &self,
        model: Arc<M>,
        images: Vec<String>,
    ) -> Vec<PredictionResult> {
        if images.len() <= 1 {
            return images
                .iter()
                .enumerate()
                .map(|(idx, img_data)| classify_image(model.as_ref(), img_data, idx))
                .collect();
        }

        let tasks = images.into_iter().enumerate().map(|(idx, img_data)| {
            let model = model.clone();
            let workers = self.workers.clone();
            async move {
                let permit = match workers.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return error_result(&format!("worker pool closed: {}", e)),
                };
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    classify_image(model.as_ref(), &img_data, idx)
                });
                match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!("Worker failed on image {}: {}", idx + 1, e);
                        error_result(&format!("worker failed: {}", e))
                    }
                }
            }
        });

        join_all(tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{classifier::ERROR_CLASS_ID, model_service::ModelError};
    use base64::{engine::general_purpose, Engine as _};
    use image::{ImageBuffer, Luma};
    use ndarray::ArrayView4;
    use std::{
        io::Cursor,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    /// Predicts class 0 for dark images and class 3 for bright ones, and
    /// tracks how many predictions run at once.
    #[derive(Default)]
    struct BrightnessModel {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ModelService for BrightnessModel {
        fn predict(&self, input: ArrayView4<f32>) -> Result<Vec<f32>, ModelError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);

            let mean = input.mean().unwrap_or(0.0);
            let class = if mean > 0.5 { 3 } else { 0 };
            let mut scores = vec![0.1; 4];
            scores[class] = 0.7;
            Ok(scores)
        }
    }

    /// Panics on bright images, answers class 1 otherwise.
    struct PanicOnBright;

    impl ModelService for PanicOnBright {
        fn predict(&self, input: ArrayView4<f32>) -> Result<Vec<f32>, ModelError> {
            if input.mean().unwrap_or(0.0) > 0.5 {
                panic!("kernel crashed");
            }
            Ok(vec![0.1, 0.7, 0.1, 0.1])
        }
    }

    fn encoded_gray(level: u8) -> String {
        let img = ImageBuffer::<Luma<u8>, Vec<u8>>::from_pixel(16, 16, Luma([level]));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
            .unwrap();
        general_purpose::STANDARD.encode(image_data)
    }

    #[tokio::test]
    async fn test_single_image_runs_inline() {
        let dispatcher = BatchDispatcher::new(4);
        let model = Arc::new(BrightnessModel::default());

        let results = dispatcher.dispatch(model, vec![encoded_gray(255)]).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, Some(1));
        assert_eq!(results[0].detections[0].class_id, 3);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_isolates_errors() {
        let dispatcher = BatchDispatcher::new(4);
        let model = Arc::new(BrightnessModel::default());
        let images = vec![
            encoded_gray(0),
            "corrupt!!".to_string(),
            encoded_gray(255),
            encoded_gray(10),
        ];

        let results = dispatcher.dispatch(model, images).await;

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].id, Some(1));
        assert_eq!(results[0].detections[0].class_id, 0);
        assert_eq!(results[1].id, None);
        assert_eq!(results[1].detections[0].class_id, ERROR_CLASS_ID);
        assert_eq!(results[2].id, Some(3));
        assert_eq!(results[2].detections[0].class_id, 3);
        assert_eq!(results[3].id, Some(4));
        assert_eq!(results[3].detections[0].class_id, 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_pool_size() {
        let dispatcher = BatchDispatcher::new(2);
        let model = Arc::new(BrightnessModel::default());
        let images = (0..8).map(|_| encoded_gray(128)).collect();

        let results = dispatcher.dispatch(model.clone(), images).await;

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| !r.is_error()));
        assert!(model.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_zero_workers_is_clamped() {
        let dispatcher = BatchDispatcher::new(0);

        assert_eq!(dispatcher.max_workers(), 1);
        let model = Arc::new(BrightnessModel::default());
        let results = dispatcher
            .dispatch(model, vec![encoded_gray(0), encoded_gray(255)])
            .await;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_worker_panic_only_fails_its_entry() {
        let dispatcher = BatchDispatcher::new(2);
        let model = Arc::new(PanicOnBright);
        let images = vec![encoded_gray(0), encoded_gray(255), encoded_gray(20)];

        let results = dispatcher.dispatch(model, images).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, Some(1));
        assert_eq!(results[0].detections[0].class_id, 1);
        assert_eq!(results[1].id, None);
        assert_eq!(results[1].detections[0].class_id, ERROR_CLASS_ID);
        assert!(results[1].detections[0].class_name.starts_with("Error: worker failed"));
        assert_eq!(results[2].id, Some(3));
        assert_eq!(results[2].detections[0].class_id, 1);
    }
}
