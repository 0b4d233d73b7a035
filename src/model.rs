use anyhow::{Context, Result};
use log::info;
use ndarray::Array4;
use opencv::{
    core::{Mat, Size, CV_32FC3},
    imgproc,
    prelude::*,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;

use crate::config::ModelConfig;
use crate::error::{CaptureError, InferenceError};
use crate::keypoint::{Keypoint, KeypointIndex, PoseEstimate};

pub const MODEL_FILE: &str = "movenet_singlepose_lightning.onnx";

// Tensor names of the tf2onnx-converted MoveNet graph.
const INPUT_NAME: &str = "serving_default_input_0";
const OUTPUT_NAME: &str = "StatefulPartitionedCall_0";

/// Find the MoveNet model file: explicit config path first, then the
/// system install location, then the user data directory.
pub fn resolve_model_path(config: &ModelConfig) -> Option<PathBuf> {
    if let Some(ref path) = config.model_path {
        return Some(path.clone());
    }

    let system = PathBuf::from("/usr/share/stature/models").join(MODEL_FILE);
    if system.exists() {
        return Some(system);
    }

    if let Some(data_dir) = dirs::data_dir() {
        let user = data_dir.join("stature").join("models").join(MODEL_FILE);
        if user.exists() {
            return Some(user);
        }
    }

    None
}

/// A loaded MoveNet single-pose session. Owned by the capture engine;
/// loaded lazily once the camera stream is up, disposed on retake and on
/// teardown.
pub struct PoseModel {
    session: Option<Session>,
    input_size: i32,
    presence_score: f32,
}

impl PoseModel {
    /// Build the ONNX session. This blocks for the duration of the model
    /// load and is run off the event loop by the engine.
    pub fn load(config: &ModelConfig) -> Result<Self, CaptureError> {
        let path = resolve_model_path(config).ok_or_else(|| {
            CaptureError::ModelLoadFailed(format!(
                "{} not found; install it under /usr/share/stature/models or the stature data directory",
                MODEL_FILE
            ))
        })?;

        info!("Loading pose model from {:?}", path);

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(&path))
            .map_err(|e| CaptureError::ModelLoadFailed(e.to_string()))?;

        info!("Pose model ready");

        Ok(Self {
            session: Some(session),
            input_size: config.input_size,
            presence_score: config.presence_score,
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    /// Run one detection pass over a BGR frame. Returns `None` when no
    /// keypoint clears the presence score, i.e. nobody is tracked.
    pub fn estimate(&mut self, frame: &Mat) -> Result<Option<PoseEstimate>, InferenceError> {
        let frame_w = frame.cols() as f32;
        let frame_h = frame.rows() as f32;
        let input_size = self.input_size;
        let presence_score = self.presence_score;

        let Some(session) = self.session.as_mut() else {
            return Err(InferenceError("model session is disposed".to_string()));
        };

        let input =
            preprocess(frame, input_size).map_err(|e| InferenceError(e.to_string()))?;

        let input_tensor =
            Tensor::from_array(input).map_err(|e| InferenceError(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![INPUT_NAME => input_tensor])
            .map_err(|e| InferenceError(e.to_string()))?;

        // MoveNet output is [1, 1, 17, 3] as (y, x, score), normalized.
        let output: ndarray::ArrayViewD<f32> = outputs[OUTPUT_NAME]
            .try_extract_array()
            .map_err(|e| InferenceError(e.to_string()))?;

        let mut keypoints = Vec::with_capacity(KeypointIndex::COUNT);
        for i in 0..KeypointIndex::COUNT {
            let Some(index) = KeypointIndex::from_index(i) else {
                continue;
            };
            let y = output[[0, 0, i, 0]] * frame_h;
            let x = output[[0, 0, i, 1]] * frame_w;
            let score = output[[0, 0, i, 2]];
            keypoints.push(Keypoint::new(index, x, y, score));
        }

        let estimate = PoseEstimate::new(keypoints);
        if estimate.max_score() <= presence_score {
            return Ok(None);
        }

        Ok(Some(estimate))
    }

    /// Release the inference session. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.session.take().is_some() {
            info!("Pose model disposed");
        }
    }
}

/// Convert a BGR frame into the [1, S, S, 3] f32 RGB tensor (0-255 range)
/// MoveNet expects.
fn preprocess(frame: &Mat, input_size: i32) -> Result<Array4<f32>> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
        .context("Color conversion failed")?;

    let mut resized = Mat::default();
    imgproc::resize(
        &rgb,
        &mut resized,
        Size::new(input_size, input_size),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )
    .context("Resize failed")?;

    let mut float_mat = Mat::default();
    resized
        .convert_to(&mut float_mat, CV_32FC3, 1.0, 0.0)
        .context("Float conversion failed")?;

    let size = input_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for y in 0..input_size {
        for x in 0..input_size {
            let pixel = float_mat.at_2d::<opencv::core::Vec3f>(y, x)?;
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] = pixel[c];
            }
        }
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unloaded() -> PoseModel {
        PoseModel {
            session: None,
            input_size: 192,
            presence_score: 0.2,
        }
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut model = unloaded();
        model.dispose();
        model.dispose();
        assert!(!model.is_loaded());
    }

    #[test]
    fn test_estimate_after_dispose_errors() {
        let mut model = unloaded();
        let frame = Mat::default();
        assert!(model.estimate(&frame).is_err());
    }

    #[test]
    fn test_resolve_prefers_explicit_path() {
        let config = ModelConfig {
            model_path: Some(PathBuf::from("/tmp/custom.onnx")),
            ..ModelConfig::default()
        };
        assert_eq!(
            resolve_model_path(&config),
            Some(PathBuf::from("/tmp/custom.onnx"))
        );
    }
}
