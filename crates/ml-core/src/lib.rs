//! Detection types, label mapping and detector backends.

pub mod detection;
#[cfg(feature = "with-tch")]
pub mod detector;
pub mod labels;

pub use detection::{
    BoundingBox, DEFAULT_CONFIDENCE_THRESHOLD, DetectError, Detection, Detector, RawDetection,
    filter_detections, non_max_suppression,
};
#[cfg(feature = "with-tch")]
pub use detector::TorchDetector;
pub use labels::LabelTable;

#[cfg(feature = "with-tch")]
pub use tch;
