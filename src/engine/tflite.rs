use tflite::context::{ElementKind, TensorIndex};
use tflite::ops::builtin::BuiltinOpResolver;
use tflite::{FlatBufferModel, Interpreter, InterpreterBuilder};

use crate::app::config::ModelConfig;
use crate::engine::{ElementType, InferenceEngine, InputTensor, TensorShape};
use crate::error::{Error, Result};

fn model_err(err: tflite::Error) -> Error {
    Error::Model(err.to_string())
}

fn inference_err(err: tflite::Error) -> Error {
    Error::Inference(err.to_string())
}

/// SSD-style TFLite detection model with the post-processing op baked in.
pub struct TFLiteEngine {
    interpreter: Interpreter<'static, BuiltinOpResolver>,
    input_index: TensorIndex,
    outputs: Vec<TensorIndex>,
    shape: TensorShape,
}

impl TFLiteEngine {
    pub fn load(config: &ModelConfig) -> Result<Self> {
        tracing::info!(model = %config.model_filename.display(), "loading tflite model");
        let model = FlatBufferModel::build_from_file(&config.model_filename).map_err(model_err)?;
        let resolver = BuiltinOpResolver::default();
        let builder = InterpreterBuilder::new(model, resolver).map_err(model_err)?;
        let mut interpreter = builder.build().map_err(model_err)?;
        interpreter.allocate_tensors().map_err(model_err)?;

        let inputs = interpreter.inputs().to_vec();
        if inputs.len() != 1 {
            return Err(Error::Model(format!("expected one input tensor, found {}", inputs.len())));
        }
        let tinfos = interpreter.get_input_details().map_err(model_err)?;
        let dims = &tinfos[0].dims;
        if dims.len() != 4 {
            return Err(Error::Model(format!("expected NHWC input, got dims {dims:?}")));
        }
        let dtype = match tinfos[0].element_kind {
            ElementKind::kTfLiteUInt8 => ElementType::U8,
            ElementKind::kTfLiteFloat32 => ElementType::F32,
            other => ElementType::Unsupported(format!("{other:?}")),
        };
        let shape = TensorShape {
            height: dims[1] as u32,
            width: dims[2] as u32,
            channels: dims[3] as u32,
            dtype,
        };

        let outputs = interpreter.outputs().to_vec();
        if outputs.len() < 3 {
            return Err(Error::Model(format!(
                "expected boxes, classes and scores outputs, found {}",
                outputs.len()
            )));
        }

        interpreter.set_num_threads(config.num_threads.max(1) as i32);

        tracing::info!(%shape, outputs = outputs.len(), "model ready");
        Ok(Self {
            interpreter,
            input_index: inputs[0],
            outputs,
            shape,
        })
    }
}

impl InferenceEngine for TFLiteEngine {
    fn input_shape(&self) -> &TensorShape {
        &self.shape
    }

    fn set_input(&mut self, input: &InputTensor) -> Result<()> {
        let expected = self.shape.element_count();
        if input.len() != expected {
            return Err(Error::Inference(format!(
                "input has {} elements, model expects {expected}",
                input.len()
            )));
        }
        match input {
            InputTensor::U8(data) => {
                let tensor: &mut [u8] = self.interpreter.tensor_data_mut(self.input_index).map_err(inference_err)?;
                tensor[..expected].copy_from_slice(data);
            }
            InputTensor::F32(data) => {
                let tensor: &mut [f32] = self.interpreter.tensor_data_mut(self.input_index).map_err(inference_err)?;
                tensor[..expected].copy_from_slice(data);
            }
        }
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        self.interpreter.invoke().map_err(inference_err)
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn output(&self, index: usize) -> Result<Vec<f32>> {
        let tensor = *self
            .outputs
            .get(index)
            .ok_or_else(|| Error::Inference(format!("model has no output {index}")))?;
        let data: &[f32] = self.interpreter.tensor_data(tensor).map_err(inference_err)?;
        Ok(data.to_vec())
    }
}
