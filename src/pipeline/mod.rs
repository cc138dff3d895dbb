mod batch;
pub use batch::Candidate;
pub use batch::Detection;
pub use batch::PixelBox;
pub use batch::RawDetectionBatch;

mod decode;
pub use decode::decode;

mod suppress;
pub use suppress::AreaFormula;
pub use suppress::SuppressionStrategy;
pub use suppress::Suppressor;

mod labels;
pub use labels::LabelIndex;
pub use labels::UNKNOWN_LABEL;

use crate::app::config::DetectionConfig;
use crate::error::Result;

pub type Detections = Vec<Detection>;

/// Decode, suppress, label and order one raw batch.
///
/// Holds no mutable state, so one instance is shared by every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pipeline {
    confidence_threshold: f32,
    suppressor: Suppressor,
    max_detections: Option<usize>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(0.5, Suppressor::new(0.5, SuppressionStrategy::default()))
    }
}

impl Pipeline {
    pub fn new(confidence_threshold: f32, suppressor: Suppressor) -> Self {
        Self {
            confidence_threshold,
            suppressor,
            max_detections: None,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        let strategy = SuppressionStrategy {
            class_aware: config.class_aware,
            area: config.area_formula,
        };
        Self {
            confidence_threshold: config.confidence_threshold,
            suppressor: Suppressor::new(config.iou_threshold, strategy),
            max_detections: config.max_detections,
        }
    }

    pub fn with_max_detections(mut self, max: Option<usize>) -> Self {
        self.max_detections = max;
        self
    }

    /// Runs the whole post-processing chain.
    ///
    /// Detections come back by descending confidence, then ascending class,
    /// then ascending batch index. Malformed batches yield
    /// [`Error::Postprocess`](crate::Error::Postprocess) and no detections.
    pub fn process(
        &self,
        batch: &RawDetectionBatch,
        image_width: u32,
        image_height: u32,
        labels: &LabelIndex,
    ) -> Result<Detections> {
        let candidates = decode(batch, image_width, image_height, self.confidence_threshold)?;
        let decoded = candidates.len();
        let mut kept = self.suppressor.suppress(candidates);

        kept.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.class.cmp(&b.class))
                .then_with(|| a.index.cmp(&b.index))
        });
        if let Some(max) = self.max_detections {
            kept.truncate(max);
        }

        tracing::debug!(
            raw = batch.len(),
            decoded,
            kept = kept.len(),
            "post-processed detections"
        );
        Ok(kept
            .iter()
            .map(|c| Detection::new(c, labels.lookup(c.class).to_string()))
            .collect())
    }
}
