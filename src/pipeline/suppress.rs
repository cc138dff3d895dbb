use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Deserialize;

use crate::pipeline::batch::{Candidate, PixelBox};

/// How box areas are measured when computing IoU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaFormula {
    /// `(x2 - x1) * (y2 - y1)`. Zero-width overlaps contribute nothing.
    #[default]
    Continuous,
    /// `(x2 - x1 + 1) * (y2 - y1 + 1)`, treating corners as inclusive pixels.
    PixelInclusive,
}

impl AreaFormula {
    fn bias(self) -> f64 {
        match self {
            AreaFormula::Continuous => 0.0,
            AreaFormula::PixelInclusive => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuppressionStrategy {
    /// Suppress only within a class. When false every candidate competes with
    /// every other one.
    pub class_aware: bool,
    pub area: AreaFormula,
}

impl Default for SuppressionStrategy {
    fn default() -> Self {
        Self {
            class_aware: true,
            area: AreaFormula::Continuous,
        }
    }
}

/// Greedy non-maximum suppression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Suppressor {
    iou_threshold: f32,
    strategy: SuppressionStrategy,
}

impl Suppressor {
    pub fn new(iou_threshold: f32, strategy: SuppressionStrategy) -> Self {
        Self {
            iou_threshold,
            strategy,
        }
    }

    /// Keeps the best candidate of every overlapping cluster.
    ///
    /// Within a partition candidates are visited by descending confidence, ties
    /// going to the lower batch index. A candidate is discarded when its IoU with
    /// an already kept box is strictly greater than the threshold. Output order
    /// is by partition (ascending class) then selection order.
    pub fn suppress(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut partitions: BTreeMap<i32, Vec<Candidate>> = BTreeMap::new();
        for candidate in candidates {
            let key = if self.strategy.class_aware { candidate.class } else { 0 };
            partitions.entry(key).or_default().push(candidate);
        }

        let mut kept = Vec::new();
        for (class, partition) in partitions {
            let before = partition.len();
            let selected = self.suppress_partition(partition);
            tracing::trace!("class {class}: kept {} of {before}", selected.len());
            kept.extend(selected);
        }
        kept
    }

    fn suppress_partition(&self, mut partition: Vec<Candidate>) -> Vec<Candidate> {
        partition.sort_by(by_confidence_then_index);

        let threshold = f64::from(self.iou_threshold);
        let mut suppressed = vec![false; partition.len()];
        for i in 0..partition.len() {
            if suppressed[i] {
                continue;
            }
            for j in (i + 1)..partition.len() {
                if !suppressed[j] && self.iou(&partition[i].bbox, &partition[j].bbox) > threshold {
                    suppressed[j] = true;
                }
            }
        }

        partition
            .into_iter()
            .zip(suppressed)
            .filter_map(|(candidate, gone)| (!gone).then_some(candidate))
            .collect()
    }

    /// Intersection over union, 0 when the union is empty.
    pub fn iou(&self, a: &PixelBox, b: &PixelBox) -> f64 {
        let bias = self.strategy.area.bias();
        let area = |bx: &PixelBox| {
            (f64::from(bx.xmax) - f64::from(bx.xmin) + bias) * (f64::from(bx.ymax) - f64::from(bx.ymin) + bias)
        };

        let x1 = f64::from(a.xmin.max(b.xmin));
        let y1 = f64::from(a.ymin.max(b.ymin));
        let x2 = f64::from(a.xmax.min(b.xmax));
        let y2 = f64::from(a.ymax.min(b.ymax));
        let inter_w = (x2 - x1 + bias).max(0.0);
        let inter_h = (y2 - y1 + bias).max(0.0);
        let intersection = inter_w * inter_h;

        let union = area(a) + area(b) - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

pub(crate) fn by_confidence_then_index(a: &Candidate, b: &Candidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.index.cmp(&b.index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(index: usize, class: i32, confidence: f32, bbox: [u32; 4]) -> Candidate {
        let [ymin, xmin, ymax, xmax] = bbox;
        Candidate {
            index,
            class,
            confidence,
            bbox: PixelBox { ymin, xmin, ymax, xmax },
        }
    }

    fn class_aware(threshold: f32) -> Suppressor {
        Suppressor::new(threshold, SuppressionStrategy::default())
    }

    #[test]
    fn keeps_best_of_overlapping_pair() {
        let kept = class_aware(0.5).suppress(vec![
            candidate(0, 1, 0.9, [10, 10, 50, 50]),
            candidate(1, 1, 0.85, [12, 12, 52, 52]),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].index, 0);
    }

    #[test]
    fn different_classes_do_not_suppress() {
        let kept = class_aware(0.5).suppress(vec![
            candidate(0, 1, 0.9, [10, 10, 50, 50]),
            candidate(1, 2, 0.85, [10, 10, 50, 50]),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn class_agnostic_strategy_crosses_classes() {
        let suppressor = Suppressor::new(
            0.5,
            SuppressionStrategy {
                class_aware: false,
                area: AreaFormula::Continuous,
            },
        );
        let kept = suppressor.suppress(vec![
            candidate(0, 1, 0.8, [10, 10, 50, 50]),
            candidate(1, 2, 0.9, [10, 10, 50, 50]),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class, 2);
    }

    #[test]
    fn ties_go_to_lower_index() {
        let kept = class_aware(0.5).suppress(vec![
            candidate(3, 0, 0.7, [0, 0, 10, 10]),
            candidate(1, 0, 0.7, [0, 0, 10, 10]),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].index, 1);
    }

    #[test]
    fn iou_equal_to_threshold_is_kept() {
        // b covers half of a: intersection 50, union 100.
        let a = candidate(0, 0, 0.9, [0, 0, 10, 10]);
        let b = candidate(1, 0, 0.8, [0, 0, 10, 5]);
        let suppressor = class_aware(0.5);
        assert_eq!(suppressor.iou(&a.bbox, &b.bbox), 0.5);
        assert_eq!(suppressor.suppress(vec![a.clone(), b.clone()]).len(), 2);
        assert_eq!(class_aware(0.49).suppress(vec![a, b]).len(), 1);
    }

    #[test]
    fn degenerate_boxes_have_zero_iou() {
        let suppressor = class_aware(0.5);
        let point = PixelBox { ymin: 5, xmin: 5, ymax: 5, xmax: 5 };
        assert_eq!(suppressor.iou(&point, &point), 0.0);

        let line = PixelBox { ymin: 0, xmin: 0, ymax: 0, xmax: 10 };
        let square = PixelBox { ymin: 0, xmin: 0, ymax: 10, xmax: 10 };
        assert_eq!(suppressor.iou(&line, &square), 0.0);

        let kept = suppressor.suppress(vec![
            candidate(0, 0, 0.9, [5, 5, 5, 5]),
            candidate(1, 0, 0.8, [5, 5, 5, 5]),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn touching_boxes_do_not_overlap() {
        let suppressor = class_aware(0.0);
        let a = PixelBox { ymin: 0, xmin: 0, ymax: 10, xmax: 10 };
        let b = PixelBox { ymin: 0, xmin: 10, ymax: 10, xmax: 20 };
        assert_eq!(suppressor.iou(&a, &b), 0.0);
    }

    #[test]
    fn pixel_inclusive_counts_shared_edge() {
        let suppressor = Suppressor::new(
            0.5,
            SuppressionStrategy {
                class_aware: true,
                area: AreaFormula::PixelInclusive,
            },
        );
        let a = PixelBox { ymin: 0, xmin: 0, ymax: 9, xmax: 9 };
        let b = PixelBox { ymin: 0, xmin: 9, ymax: 9, xmax: 18 };
        // One shared column of 10 pixels, each box 100 pixels.
        assert!((suppressor.iou(&a, &b) - 10.0 / 190.0).abs() < 1e-9);
    }

    #[test]
    fn suppression_is_idempotent() {
        let suppressor = class_aware(0.4);
        let candidates: Vec<Candidate> = (0..30)
            .map(|i| {
                let offset = (i * 7 % 40) as u32;
                let class = (i % 3) as i32;
                let confidence = 0.5 + (i * 13 % 50) as f32 / 100.0;
                candidate(i, class, confidence, [offset, offset / 2, offset + 20, offset / 2 + 25])
            })
            .collect();

        let once = suppressor.suppress(candidates);
        let twice = suppressor.suppress(once.clone());
        assert_eq!(once, twice);

        for a in &once {
            for b in &once {
                if a.index != b.index && a.class == b.class {
                    assert!(suppressor.iou(&a.bbox, &b.bbox) <= 0.4);
                }
            }
        }
    }
}
