use serde::Serialize;

use crate::error::{Error, Result};

/// Raw output of one inference call, batch size 1.
///
/// `boxes` hold normalized `[ymin, xmin, ymax, xmax]`. The three vectors are
/// expected to share a length; the decoder rejects batches where they don't.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetectionBatch {
    pub boxes: Vec<[f32; 4]>,
    pub classes: Vec<i32>,
    pub scores: Vec<f32>,
}

impl RawDetectionBatch {
    /// Builds a batch from flat engine outputs.
    ///
    /// `locations` is `N * 4` floats, `classes` and `scores` are `N` floats. SSD
    /// post-processed models also report how many leading entries are valid;
    /// when `num_detections` is given only that many are kept. Length
    /// mismatches are left in place for the decoder to reject.
    pub fn from_outputs(
        locations: &[f32],
        classes: &[f32],
        scores: &[f32],
        num_detections: Option<f32>,
    ) -> Result<Self> {
        if locations.len() % 4 != 0 {
            return Err(Error::Postprocess(format!(
                "box tensor has {} values, not a multiple of 4",
                locations.len()
            )));
        }
        let mut limit = usize::MAX;
        if let Some(reported) = num_detections {
            if !reported.is_finite() || reported < 0.0 {
                return Err(Error::Postprocess(format!("invalid detection count {reported}")));
            }
            limit = reported as usize;
        }

        let boxes = locations
            .chunks_exact(4)
            .take(limit)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        let classes = classes
            .iter()
            .take(limit)
            .map(|&c| {
                if c.is_finite() {
                    Ok(c as i32)
                } else {
                    Err(Error::Postprocess(format!("invalid class index {c}")))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let scores = scores.iter().take(limit).copied().collect();

        Ok(Self { boxes, classes, scores })
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Pixel box, `ymin <= ymax` and `xmin <= xmax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub ymin: u32,
    pub xmin: u32,
    pub ymax: u32,
    pub xmax: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> u32 {
        self.ymax - self.ymin
    }
}

/// A decoded detection that has not been through suppression yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Position of the candidate in the raw batch, used to break ties.
    pub index: usize,
    pub class: i32,
    pub confidence: f32,
    pub bbox: PixelBox,
}

/// Final detection as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub ymin: u32,
    pub xmin: u32,
    pub ymax: u32,
    pub xmax: u32,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(candidate: &Candidate, label: String) -> Self {
        let PixelBox { ymin, xmin, ymax, xmax } = candidate.bbox;
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
            label,
            confidence: candidate.confidence,
        }
    }
}
