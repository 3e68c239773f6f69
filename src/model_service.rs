use ndarray::ArrayView4;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("Model file not found at {0:?}")]
    NotFound(PathBuf),
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model returned {got} scores, expected {expected}")]
    UnexpectedOutput { expected: usize, got: usize },
    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
}

impl From<ort::Error> for ModelError {
    fn from(err: ort::Error) -> Self {
        ModelError::Inference(err.to_string())
    }
}

/// A loaded classifier. `predict` takes a `[1, size, size, 1]` batch and
/// returns one score per class.
pub trait ModelService: Send + Sync + 'static {
    fn predict(&self, input: ArrayView4<f32>) -> Result<Vec<f32>, ModelError>;

    fn input_size(&self) -> u32 {
        168
    }
}
