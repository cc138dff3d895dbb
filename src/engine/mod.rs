mod guard;
pub use guard::ConcurrencyGuard;
pub use guard::EngineLease;

#[cfg(feature = "tflite")]
mod tflite;
#[cfg(feature = "tflite")]
pub use self::tflite::TFLiteEngine;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use crate::error::{Error, Result};
use crate::pipeline::RawDetectionBatch;

/// Element type the model expects for its image input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    U8,
    F32,
    Unsupported(String),
}

/// Shape of the model's image input, NHWC with a batch of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
    pub dtype: ElementType,
}

impl TensorShape {
    pub fn element_count(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "1x{}x{}x{} {:?}", self.height, self.width, self.channels, self.dtype)
    }
}

/// Preprocessed model input.
#[derive(Debug, Clone, PartialEq)]
pub enum InputTensor {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl InputTensor {
    pub fn len(&self) -> usize {
        match self {
            InputTensor::U8(data) => data.len(),
            InputTensor::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A loaded detection model.
///
/// Implementations own mutable interpreter buffers, so a call sequence of
/// `set_input`, `invoke` and `output` must never interleave with another one.
/// [`ConcurrencyGuard`] is the only thing that should drive an engine.
pub trait InferenceEngine: Send + 'static {
    fn input_shape(&self) -> &TensorShape;

    fn set_input(&mut self, input: &InputTensor) -> Result<()>;

    fn invoke(&mut self) -> Result<()>;

    fn output_count(&self) -> usize;

    fn output(&self, index: usize) -> Result<Vec<f32>>;
}

/// Runs one full inference and collects boxes, classes and scores.
///
/// A fourth output, when the model has one, is the number of valid detections.
pub(crate) fn run_inference(engine: &mut dyn InferenceEngine, input: &InputTensor) -> Result<RawDetectionBatch> {
    engine.set_input(input)?;
    engine.invoke()?;

    let count = engine.output_count();
    if count < 3 {
        return Err(Error::Inference(format!("model has {count} outputs, expected at least 3")));
    }
    let locations = engine.output(0)?;
    let classes = engine.output(1)?;
    let scores = engine.output(2)?;
    let num_detections = if count > 3 {
        engine.output(3)?.first().copied()
    } else {
        None
    };

    RawDetectionBatch::from_outputs(&locations, &classes, &scores, num_detections)
}
