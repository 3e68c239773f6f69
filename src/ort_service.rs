use crate::{
    classifier::CLASS_MAPPINGS,
    config::ModelConfig,
    model_service::{ModelError, ModelService},
};
use ndarray::{Array4, ArrayView4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
    input_size: u32,
}

impl OrtModelService {
    /// Opens `num_instances` sessions on the configured artifact and runs a
    /// warm-up prediction so broken models fail here instead of on the first
    /// request.
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let model_path = model_config.get_path();
        tracing::info!("Loading model from {:?}", model_path);

        if !model_path.exists() {
            tracing::error!("Model file not found at {:?}", model_path);
            return Err(ModelError::NotFound(model_path));
        }

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| {
                tracing::error!("Failed to load model: {}", e);
                ModelError::Load(e.to_string())
            })?;

        let output_name = {
            let session = sessions[0]
                .lock()
                .map_err(|e| ModelError::Poisoned(e.to_string()))?;
            session
                .outputs
                .first()
                .map(|output| output.name.clone())
                .ok_or_else(|| ModelError::Load("model declares no outputs".to_string()))?
        };

        tracing::info!("Created {} ONNX sessions", num_instances);

        let service = Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name,
            input_size: model_config.input_size,
        };
        service.warm_up()?;

        Ok(service)
    }

    fn warm_up(&self) -> Result<(), ModelError> {
        let size = self.input_size as usize;
        let zeros = Array4::<f32>::zeros((1, size, size, 1));
        self.predict(zeros.view()).map_err(|e| {
            tracing::error!("Failed to load model: warm-up inference failed: {}", e);
            ModelError::Load(format!("warm-up inference failed: {}", e))
        })?;
        Ok(())
    }

    fn run_inference(&self, input: ArrayView4<f32>) -> Result<Vec<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling image with session {}", index);
        let owned_buffer;
        let input_view = if input.is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)?;
        let outputs = session.run(ort::inputs![tensor_ref])?;
        let (_, scores) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

        Ok(scores.to_vec())
    }
}

impl ModelService for OrtModelService {
    fn predict(&self, input: ArrayView4<f32>) -> Result<Vec<f32>, ModelError> {
        let scores = self.run_inference(input)?;
        if scores.len() != CLASS_MAPPINGS.len() {
            return Err(ModelError::UnexpectedOutput {
                expected: CLASS_MAPPINGS.len(),
                got: scores.len(),
            });
        }
        Ok(scores)
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }
}
