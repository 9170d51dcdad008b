//! Black-box waveform classifier.
//!
//! The pipeline only depends on the `Classifier` trait; the shipped
//! implementation runs a pre-trained ONNX model through tract. Model load
//! failures are fatal at startup (exit code 2), per-inference failures are
//! reported by the caller and the spike is skipped.

use tract_onnx::prelude::*;

use crate::error::ProcessorError;

/// Opaque classification result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeLabel {
    /// Index of the winning output unit.
    pub class: usize,
    /// Raw score of the winning unit.
    pub score: f32,
}

/// Pure function from a fixed-length waveform to a label. Calls are serial;
/// implementations need no internal synchronization.
pub trait Classifier {
    fn input_size(&self) -> usize;
    fn classify(&mut self, waveform: &[f64]) -> Result<SpikeLabel, ProcessorError>;
}

type RunnableOnnx = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX-backed classifier. Expects a model taking `[1, input_size]` f32 and
/// producing a score vector.
#[derive(Debug)]
pub struct OnnxClassifier {
    plan: RunnableOnnx,
    input_size: usize,
    scratch: Vec<f32>,
}

impl OnnxClassifier {
    /// Load and optimize the model. Any failure here is a startup error.
    pub fn load(path: &str, input_size: usize) -> Result<Self, ProcessorError> {
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| ProcessorError::Classifier(format!("load '{}': {}", path, e)))?
            .with_input_fact(0, f32::fact([1, input_size]).into())
            .map_err(|e| ProcessorError::Classifier(format!("input shape: {}", e)))?
            .into_optimized()
            .map_err(|e| ProcessorError::Classifier(format!("optimize: {}", e)))?
            .into_runnable()
            .map_err(|e| ProcessorError::Classifier(format!("plan: {}", e)))?;
        log::info!("loaded classifier model '{}'", path);
        Ok(Self {
            plan,
            input_size,
            scratch: vec![0.0; input_size],
        })
    }
}

impl Classifier for OnnxClassifier {
    fn input_size(&self) -> usize {
        self.input_size
    }

    fn classify(&mut self, waveform: &[f64]) -> Result<SpikeLabel, ProcessorError> {
        if waveform.len() != self.input_size {
            return Err(ProcessorError::Classifier(format!(
                "waveform length {} does not match model input {}",
                waveform.len(),
                self.input_size
            )));
        }
        for (dst, src) in self.scratch.iter_mut().zip(waveform) {
            *dst = *src as f32;
        }
        let input: Tensor = tract_ndarray::Array2::from_shape_vec(
            (1, self.input_size),
            self.scratch.clone(),
        )
        .map_err(|e| ProcessorError::Classifier(e.to_string()))?
        .into();

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| ProcessorError::Classifier(format!("inference: {}", e)))?;
        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| ProcessorError::Classifier(format!("output: {}", e)))?;

        let mut best = SpikeLabel {
            class: 0,
            score: f32::NEG_INFINITY,
        };
        for (i, &score) in view.iter().enumerate() {
            if score > best.score {
                best = SpikeLabel { class: i, score };
            }
        }
        Ok(best)
    }
}
