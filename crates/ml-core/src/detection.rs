//! Detection types shared by every detector backend, plus the post-processing
//! the console applies to raw detector output.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use video_ingest::Frame;

use crate::labels::LabelTable;

/// Detections scoring below this are dropped by the caller.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Single raw result as produced by a detector, in frame pixel coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetection {
    pub bbox_xyxy: [f32; 4],
    pub score: f32,
    pub class_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn center(&self) -> (i32, i32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Labelled, thresholded detection ready for drawing and logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn center(&self) -> (i32, i32) {
        self.bbox.center()
    }
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),
    #[error("unexpected detector output: {0}")]
    BadOutput(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Black-box object detector.
///
/// Implementations return every candidate they consider plausible; the caller
/// applies its own confidence threshold.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectError>;
}

/// Keep detections with `score >= threshold`, label them and snap boxes to pixels.
pub fn filter_detections(
    raw: &[RawDetection],
    threshold: f32,
    labels: &LabelTable,
) -> Vec<Detection> {
    raw.iter()
        .filter(|det| det.score >= threshold)
        .map(|det| {
            let [x1, y1, x2, y2] = det.bbox_xyxy;
            Detection {
                label: labels.lookup(det.class_id),
                confidence: det.score,
                bbox: BoundingBox {
                    x1: x1 as i32,
                    y1: y1 as i32,
                    x2: x2 as i32,
                    y2: y2 as i32,
                },
            }
        })
        .collect()
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Greedy per-class suppression, highest score first.
pub fn non_max_suppression(
    mut candidates: Vec<RawDetection>,
    iou_threshold: f32,
    max_results: usize,
) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<RawDetection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_results {
            break;
        }
        let overlaps = kept.iter().any(|existing| {
            existing.class_id == candidate.class_id
                && iou(&existing.bbox_xyxy, &candidate.bbox_xyxy) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(score: f32, class_id: i64, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            bbox_xyxy: bbox,
            score,
            class_id,
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let detections = vec![
            raw(0.3, 0, [0.0, 0.0, 10.0, 10.0]),
            raw(0.5, 1, [0.0, 0.0, 10.0, 10.0]),
            raw(0.7, 2, [0.0, 0.0, 10.0, 10.0]),
        ];
        let kept = filter_detections(&detections, 0.5, &LabelTable::default());
        let scores: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(scores, vec![0.5, 0.7]);
        assert_eq!(kept[0].label, "eraser");
        assert_eq!(kept[1].label, "mouse");
    }

    #[test]
    fn boxes_snap_to_pixels_and_expose_center() {
        let kept = filter_detections(
            &[raw(0.9, 42, [10.7, 20.2, 31.9, 41.0])],
            0.5,
            &LabelTable::default(),
        );
        let det = &kept[0];
        assert_eq!(
            det.bbox,
            BoundingBox {
                x1: 10,
                y1: 20,
                x2: 31,
                y2: 41
            }
        );
        assert_eq!(det.center(), (20, 30));
        assert_eq!(det.label, "class_42");
    }

    #[test]
    fn suppression_keeps_best_box_per_class() {
        let kept = non_max_suppression(
            vec![
                raw(0.6, 0, [0.0, 0.0, 10.0, 10.0]),
                raw(0.9, 0, [1.0, 1.0, 11.0, 11.0]),
                raw(0.8, 1, [1.0, 1.0, 11.0, 11.0]),
                raw(0.7, 0, [50.0, 50.0, 60.0, 60.0]),
            ],
            0.45,
            16,
        );
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.7]);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
        assert!((iou(&[0.0, 0.0, 2.0, 2.0], &[0.0, 0.0, 2.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}
