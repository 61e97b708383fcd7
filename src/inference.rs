//! Inference boundary.
//!
//! The pipeline only prepares input; running a model is delegated to an
//! [`InferenceInvoker`]. Device placement is the invoker's business.

use crate::tensor::TensorView;

use std::convert::Infallible;

pub trait InferenceInvoker {
    type Output;
    type Error: std::error::Error + Send + Sync + 'static;

    fn invoke(&mut self, input: TensorView<'_>) -> Result<Self::Output, Self::Error>;
}

/// Intensity statistics of the prepared tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityStats {
    pub mean: f64,
    pub min: f32,
    pub max: f32,
}

/// Invoker that summarizes the input instead of running a model.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntensitySummary;

impl InferenceInvoker for IntensitySummary {
    type Output = IntensityStats;
    type Error = Infallible;

    fn invoke(&mut self, input: TensorView<'_>) -> Result<IntensityStats, Infallible> {
        let (sum, min, max) = input.iter().fold(
            (0.0f64, f32::INFINITY, f32::NEG_INFINITY),
            |(sum, min, max), &v| (sum + f64::from(v), min.min(v), max.max(v)),
        );
        let count = input.len().max(1) as f64;
        Ok(IntensityStats {
            mean: sum / count,
            min,
            max,
        })
    }
}

#[cfg(feature = "onnx")]
pub use onnx::{ModelOutput, OnnxInvoker};

#[cfg(feature = "onnx")]
mod onnx {
    use super::InferenceInvoker;
    use crate::tensor::TensorView;

    use ort::session::Session;
    use ort::value::TensorRef;
    use std::path::Path;
    use tracing::info;

    /// First output of a forward pass.
    #[derive(Debug, Clone)]
    pub struct ModelOutput {
        pub shape: Vec<i64>,
        pub values: Vec<f32>,
    }

    /// ONNX Runtime session with a single volume input.
    pub struct OnnxInvoker {
        session: Session,
    }

    impl OnnxInvoker {
        pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ort::Error> {
            let session = Session::builder()?.commit_from_file(path.as_ref())?;
            info!(model = %path.as_ref().display(), "model loaded");
            Ok(Self { session })
        }
    }

    impl InferenceInvoker for OnnxInvoker {
        type Output = ModelOutput;
        type Error = ort::Error;

        fn invoke(&mut self, input: TensorView<'_>) -> Result<ModelOutput, ort::Error> {
            let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
            let data = input.as_slice().ok_or_else(|| {
                ort::Error::new("input tensor is not contiguous in memory")
            })?;
            let tensor = TensorRef::from_array_view((dims, data))?;
            let outputs = self.session.run(ort::inputs![tensor])?;
            let (shape, values) = outputs[0].try_extract_tensor::<f32>()?;
            Ok(ModelOutput {
                shape: shape.to_vec(),
                values: values.to_vec(),
            })
        }
    }
}
