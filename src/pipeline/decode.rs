use crate::error::{Error, Result};
use crate::pipeline::batch::{Candidate, PixelBox, RawDetectionBatch};

/// Turns a raw batch into pixel-space candidates for an image of the given size.
///
/// Candidates scoring below `confidence_threshold` are dropped here so the
/// suppressor never sees them. Coordinates are clamped to `[0, 1]`, scaled and
/// then truncated toward zero, never rounded.
pub fn decode(
    batch: &RawDetectionBatch,
    image_width: u32,
    image_height: u32,
    confidence_threshold: f32,
) -> Result<Vec<Candidate>> {
    let n = batch.boxes.len();
    if batch.classes.len() != n || batch.scores.len() != n {
        return Err(Error::Postprocess(format!(
            "output length mismatch: {} boxes, {} classes, {} scores",
            n,
            batch.classes.len(),
            batch.scores.len()
        )));
    }

    let width = image_width as f32;
    let height = image_height as f32;
    let mut candidates = Vec::new();

    for (index, ((location, &class), &score)) in batch
        .boxes
        .iter()
        .zip(&batch.classes)
        .zip(&batch.scores)
        .enumerate()
    {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(Error::Postprocess(format!("score {score} at candidate {index}")));
        }
        if location.iter().any(|v| !v.is_finite()) {
            return Err(Error::Postprocess(format!("box {location:?} at candidate {index}")));
        }
        if score < confidence_threshold {
            continue;
        }

        let [y0, x0, y1, x1] = location.map(|v| v.clamp(0.0, 1.0));
        let scale = |v: f32, extent: f32| ((v * extent) as u32).min(extent as u32);
        let (ya, yb) = (scale(y0, height), scale(y1, height));
        let (xa, xb) = (scale(x0, width), scale(x1, width));
        let bbox = PixelBox {
            ymin: ya.min(yb),
            xmin: xa.min(xb),
            ymax: ya.max(yb),
            xmax: xa.max(xb),
        };

        tracing::trace!("candidate {index} class {class} score {score} at {bbox:?}");
        candidates.push(Candidate {
            index,
            class,
            confidence: score,
            bbox,
        });
    }

    Ok(candidates)
}
