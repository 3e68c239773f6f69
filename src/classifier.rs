use crate::{
    model_service::{ModelError, ModelService},
    preprocess::{decode_image, prepare_image, PreprocessError},
    schema::{Detection, PredictionResult},
};
use thiserror::Error;

/// Labels indexed by the model's output position. These strings are part of
/// the response contract, spelling included.
pub const CLASS_MAPPINGS: [&str; 4] = ["Glioma", "Meninigioma", "Notumor", "Pituitary"];

pub const ERROR_CLASS_ID: i32 = -1;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("model returned no scores")]
    EmptyScores,
    #[error("predicted class {0} has no label")]
    UnknownClass(usize),
    #[error("non-finite confidence {0}")]
    NonFinite(f32),
}

pub fn class_name(class_id: usize) -> Option<&'static str> {
    CLASS_MAPPINGS.get(class_id).copied()
}

/// Runs one base64 payload through decode, preprocessing and the model.
/// Failures never escape: they come back as a single sentinel detection.
pub fn classify_image<M: ModelService + ?Sized>(
    model: &M,
    img_data: &str,
    idx: usize,
) -> PredictionResult {
    match try_classify(model, img_data) {
        Ok(detection) => PredictionResult {
            detections: vec![detection],
            id: Some(idx + 1),
        },
        Err(e) => {
            tracing::error!(image = idx + 1, "Error processing image {}: {}", idx + 1, e);
            error_result(&e.to_string())
        }
    }
}

pub fn error_result(message: &str) -> PredictionResult {
    PredictionResult {
        detections: vec![Detection {
            class_id: ERROR_CLASS_ID,
            class_name: format!("Error: {}", message),
            confidence: 0.0,
        }],
        id: None,
    }
}

fn try_classify<M: ModelService + ?Sized>(
    model: &M,
    img_data: &str,
) -> Result<Detection, ClassifyError> {
    let image_bytes = decode_image(img_data)?;
    let input = prepare_image(&image_bytes, model.input_size())?;

    let scores = model.predict(input.view())?;
    let (class_id, score) = top_class(&scores)?;
    let class_name = class_name(class_id).ok_or(ClassifyError::UnknownClass(class_id))?;

    Ok(Detection {
        class_id: class_id as i32,
        class_name: class_name.to_string(),
        confidence: to_percentage(score)?,
    })
}

// First maximum wins on ties.
fn top_class(scores: &[f32]) -> Result<(usize, f32), ClassifyError> {
    scores
        .iter()
        .copied()
        .enumerate()
        .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        .ok_or(ClassifyError::EmptyScores)
}

fn to_percentage(score: f32) -> Result<f32, ClassifyError> {
    if !score.is_finite() {
        return Err(ClassifyError::NonFinite(score));
    }
    let percentage = ((score as f64) * 100.0 * 100.0).round() / 100.0;
    Ok(percentage.clamp(0.0, 100.0) as f32)
}
