use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::engine::{ElementType, InputTensor, TensorShape};
use crate::error::{Error, Result};

/// Decodes any format the `image` crate recognises into RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).map_err(|err| Error::Decode(err.to_string()))?;
    Ok(image.to_rgb8())
}

/// Decodes a base64 payload, tolerating a `data:<mime>;base64,` prefix and
/// whitespace anywhere, including line wrapping.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let data = match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload.as_str(),
    };
    STANDARD
        .decode(data)
        .map_err(|err| Error::Decode(format!("invalid base64: {err}")))
}

/// Resizes `image` to the model input and lays it out as NHWC.
///
/// `uint8` models get raw RGB, `float32` models get RGB scaled to `[0, 1]`.
pub fn prepare_input(image: &RgbImage, shape: &TensorShape) -> Result<InputTensor> {
    if shape.channels != 3 {
        return Err(Error::Inference(format!("model expects {} channels, only RGB is supported", shape.channels)));
    }
    let resized = if image.dimensions() == (shape.width, shape.height) {
        image.clone()
    } else {
        imageops::resize(image, shape.width, shape.height, FilterType::Triangle)
    };

    match &shape.dtype {
        ElementType::U8 => Ok(InputTensor::U8(resized.into_raw())),
        ElementType::F32 => Ok(InputTensor::F32(
            resized.into_raw().into_iter().map(|v| f32::from(v) / 255.0).collect(),
        )),
        ElementType::Unsupported(kind) => Err(Error::Inference(format!("unsupported input dtype {kind}"))),
    }
}
