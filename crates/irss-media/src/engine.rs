//! Inference engines.
//!
//! An engine wraps one loaded inference session. Sessions are not reentrant,
//! so `infer` takes `&mut self`: a caller needs exclusive access to run it.
//! Engines are built by an [`EngineFactory`] once per replica lane.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array4;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use irss_models::ExecutionStrategy;

use crate::error::{MediaError, MediaResult};

/// A loaded segmentation session.
///
/// Input is `[1, 3, H, W]` in `[0, 1]`; output is `[1, 1, H, W]` in `[0, 1]`.
pub trait InferenceEngine: Send {
    fn infer(&mut self, input: Array4<f32>) -> MediaResult<Array4<f32>>;
}

/// Builds engines for a given execution strategy and lane.
///
/// Each call is independently fallible; the replica pool walks a strategy's
/// fallback chain and calls `create` once per candidate.
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        strategy: ExecutionStrategy,
        lane_id: usize,
    ) -> MediaResult<Box<dyn InferenceEngine>>;
}

/// Factory for ONNX Runtime sessions sharing one model file.
pub struct OrtEngineFactory {
    model_path: PathBuf,
    model_bytes: Arc<[u8]>,
}

impl OrtEngineFactory {
    /// Read the model once; every replica is committed from the same bytes.
    pub fn from_path(model_path: impl AsRef<Path>) -> MediaResult<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(MediaError::model_not_found(model_path.display().to_string()));
        }

        let model_bytes = std::fs::read(model_path)
            .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

        info!(
            model = %model_path.display(),
            bytes = model_bytes.len(),
            "Loaded segmentation model"
        );

        Ok(Self {
            model_path: model_path.to_path_buf(),
            model_bytes: model_bytes.into(),
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

impl EngineFactory for OrtEngineFactory {
    fn create(
        &self,
        strategy: ExecutionStrategy,
        lane_id: usize,
    ) -> MediaResult<Box<dyn InferenceEngine>> {
        let session = create_session(&self.model_bytes, strategy, lane_id as i32)?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| MediaError::strategy_unavailable(strategy, "model declares no outputs"))?;

        debug!(lane = lane_id, %strategy, output = %output_name, "Session committed");
        Ok(Box::new(OrtMaskEngine {
            session,
            output_name,
        }))
    }
}

/// Flatten an NCHW batch of one into an ORT input value.
fn input_value(input: &Array4<f32>, h: usize, w: usize) -> MediaResult<Value> {
    let data = input.as_standard_layout().iter().copied().collect::<Vec<f32>>();
    Tensor::from_array((vec![1usize, 3, h, w], data.into_boxed_slice()))
        .map(Value::from)
        .map_err(|e| MediaError::inference(format!("Failed to create tensor: {}", e)))
}

/// ONNX Runtime session producing a single-channel mask.
pub struct OrtMaskEngine {
    session: Session,
    output_name: String,
}

impl InferenceEngine for OrtMaskEngine {
    fn infer(&mut self, input: Array4<f32>) -> MediaResult<Array4<f32>> {
        let (n, c, h, w) = input.dim();
        if n != 1 || c != 3 {
            return Err(MediaError::inference(format!(
                "Expected input [1, 3, H, W], got [{}, {}, {}, {}]",
                n, c, h, w
            )));
        }

        let tensor = input_value(&input, h, w)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| MediaError::inference(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| MediaError::inference(format!("Missing {} tensor", self.output_name)))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::inference(format!("Failed to extract tensor: {}", e)))?;

        let dims: Vec<i64> = shape.iter().copied().collect();
        check_mask_shape(&dims, h, w)?;

        Ok(Array4::from_shape_vec((1, 1, h, w), data.to_vec())?)
    }
}

/// Accept only `[1, 1, H, W]` matching the input's spatial size.
fn check_mask_shape(dims: &[i64], height: usize, width: usize) -> MediaResult<()> {
    let expected = [1, 1, height as i64, width as i64];
    if dims != expected {
        return Err(MediaError::inference(format!(
            "Unexpected mask shape {:?}, expected {:?}",
            dims, expected
        )));
    }
    Ok(())
}

/// Commit a session for one strategy, bound to `device_id` on GPU providers.
fn create_session(
    model_bytes: &[u8],
    strategy: ExecutionStrategy,
    device_id: i32,
) -> MediaResult<Session> {
    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    let builder = match strategy {
        ExecutionStrategy::Cpu => builder,
        ExecutionStrategy::Cuda => with_cuda(builder, device_id)?,
        ExecutionStrategy::TensorRt => with_tensorrt(builder, device_id)?,
        ExecutionStrategy::DirectMl => with_directml(builder, device_id)?,
        ExecutionStrategy::Auto => {
            return Err(MediaError::strategy_unavailable(
                strategy,
                "auto must be resolved through its fallback chain",
            ))
        }
    };

    builder
        .commit_from_memory(model_bytes)
        .map_err(|e| MediaError::strategy_unavailable(strategy, format!("Failed to load ONNX model: {}", e)))
}

#[cfg(feature = "cuda")]
fn with_cuda(builder: SessionBuilder, device_id: i32) -> MediaResult<SessionBuilder> {
    use ort::execution_providers::CUDAExecutionProvider;
    builder
        .with_execution_providers([CUDAExecutionProvider::default()
            .with_device_id(device_id)
            .build()
            .error_on_failure()])
        .map_err(|e| MediaError::strategy_unavailable(ExecutionStrategy::Cuda, e.to_string()))
}

#[cfg(not(feature = "cuda"))]
fn with_cuda(_builder: SessionBuilder, _device_id: i32) -> MediaResult<SessionBuilder> {
    Err(MediaError::strategy_unavailable(
        ExecutionStrategy::Cuda,
        "built without the `cuda` feature",
    ))
}

#[cfg(feature = "tensorrt")]
fn with_tensorrt(builder: SessionBuilder, device_id: i32) -> MediaResult<SessionBuilder> {
    use ort::execution_providers::TensorRTExecutionProvider;
    builder
        .with_execution_providers([TensorRTExecutionProvider::default()
            .with_device_id(device_id)
            .build()
            .error_on_failure()])
        .map_err(|e| MediaError::strategy_unavailable(ExecutionStrategy::TensorRt, e.to_string()))
}

#[cfg(not(feature = "tensorrt"))]
fn with_tensorrt(_builder: SessionBuilder, _device_id: i32) -> MediaResult<SessionBuilder> {
    Err(MediaError::strategy_unavailable(
        ExecutionStrategy::TensorRt,
        "built without the `tensorrt` feature",
    ))
}

#[cfg(feature = "directml")]
fn with_directml(builder: SessionBuilder, device_id: i32) -> MediaResult<SessionBuilder> {
    use ort::execution_providers::DirectMLExecutionProvider;
    builder
        .with_execution_providers([DirectMLExecutionProvider::default()
            .with_device_id(device_id)
            .build()
            .error_on_failure()])
        .map_err(|e| MediaError::strategy_unavailable(ExecutionStrategy::DirectMl, e.to_string()))
}

#[cfg(not(feature = "directml"))]
fn with_directml(_builder: SessionBuilder, _device_id: i32) -> MediaResult<SessionBuilder> {
    Err(MediaError::strategy_unavailable(
        ExecutionStrategy::DirectMl,
        "built without the `directml` feature",
    ))
}

/// Check if a model is available at a custom path.
pub fn is_model_available_at(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model() {
        let err = OrtEngineFactory::from_path("/nonexistent/skyremoval.onnx")
            .err()
            .unwrap();
        assert!(matches!(err, MediaError::ModelNotFound(_)));
        assert!(err.is_setup_fatal());
        assert!(!is_model_available_at("/nonexistent/skyremoval.onnx"));
    }

    #[test]
    fn test_mask_shape_check() {
        assert!(check_mask_shape(&[1, 1, 384, 384], 384, 384).is_ok());
        assert!(check_mask_shape(&[1, 3, 384, 384], 384, 384).is_err());
        assert!(check_mask_shape(&[1, 1, 192, 192], 384, 384).is_err());
        assert!(check_mask_shape(&[384, 384], 384, 384).is_err());
    }
}
