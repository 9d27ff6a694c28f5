use std::{convert::TryFrom, path::Path, sync::Mutex};

use anyhow::Result;
use image::{ImageBuffer, Rgb, imageops::FilterType};
use tch::{self, Device, Kind, Tensor};
use video_ingest::{Frame, FrameFormat};

use crate::detection::{DetectError, Detector, RawDetection, non_max_suppression};

const MAX_DETECTIONS: usize = 512;
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// TorchScript-exported YOLO detector.
///
/// Expects an output tensor shaped `[1, 4 + classes, anchors]` where the first
/// four channels are `cx, cy, w, h` in model-input pixels.
pub struct TorchDetector {
    module: Mutex<tch::CModule>,
    device: Device,
    input_size: (i64, i64),
    confidence_threshold: f32,
}

impl TorchDetector {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: (i64, i64),
    ) -> Result<Self> {
        let module = tch::CModule::load_on_device(model_path, device)?;
        Ok(Self {
            module: Mutex::new(module),
            device,
            input_size,
            confidence_threshold: 0.25,
        })
    }

    /// Lowest score kept before suppression; the console filters again afterwards.
    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn input_size(&self) -> (i64, i64) {
        self.input_size
    }

    /// Converts a frame into a normalised `[1, 3, H, W]` RGB tensor at model resolution.
    fn frame_to_tensor(&self, frame: &Frame) -> Result<Tensor, DetectError> {
        let mut rgb = Vec::with_capacity(frame.data().len());
        for chunk in frame.data().chunks_exact(3) {
            match frame.format() {
                FrameFormat::Bgr8 => rgb.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]),
                FrameFormat::Rgb8 => rgb.extend_from_slice(chunk),
            }
        }

        let (in_w, in_h) = self.input_size;
        let image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(frame.width(), frame.height(), rgb)
            .ok_or_else(|| DetectError::UnsupportedFrame("buffer size mismatch".into()))?;
        let resized = if (frame.width() as i64, frame.height() as i64) != (in_w, in_h) {
            image::imageops::resize(&image, in_w as u32, in_h as u32, FilterType::Triangle)
        } else {
            image
        };

        let tensor = Tensor::from_slice(resized.as_raw())
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, in_h, in_w, 3])
            .permute([0, 3, 1, 2])
            / 255.0;
        Ok(tensor)
    }
}

impl Detector for TorchDetector {
    fn name(&self) -> &str {
        "torchscript"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError::UnsupportedFrame(format!(
                "{}x{} frame",
                frame.width(),
                frame.height()
            )));
        }
        let input = self.frame_to_tensor(frame)?;
        let output = {
            let module = self
                .module
                .lock()
                .map_err(|_| DetectError::Other(anyhow::anyhow!("detector module poisoned")))?;
            module
                .forward_ts(&[input])
                .map_err(|err| DetectError::Other(err.into()))?
        };
        let shape = output.size();
        if shape.len() != 3 {
            return Err(DetectError::BadOutput(format!("shape {shape:?}")));
        }
        if shape[0] != 1 {
            return Err(DetectError::BadOutput(format!(
                "expected batch=1 but received {}",
                shape[0]
            )));
        }
        if shape[1] < 5 {
            return Err(DetectError::BadOutput(format!(
                "need at least 5 channels (cx,cy,w,h,score), got {}",
                shape[1]
            )));
        }

        let preds = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows: Vec<Vec<f32>> =
            Vec::<Vec<f32>>::try_from(&preds).map_err(|err| DetectError::Other(err.into()))?;

        let (in_w, in_h) = self.input_size;
        let scale_x = frame.width() as f32 / in_w as f32;
        let scale_y = frame.height() as f32 / in_h as f32;
        let max_x = (frame.width() - 1) as f32;
        let max_y = (frame.height() - 1) as f32;

        let mut candidates = Vec::new();
        for row in rows {
            let Some((class_id, score)) = row[4..]
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            if score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            candidates.push(RawDetection {
                bbox_xyxy: [
                    ((cx - w / 2.0) * scale_x).clamp(0.0, max_x),
                    ((cy - h / 2.0) * scale_y).clamp(0.0, max_y),
                    ((cx + w / 2.0) * scale_x).clamp(0.0, max_x),
                    ((cy + h / 2.0) * scale_y).clamp(0.0, max_y),
                ],
                score,
                class_id: class_id as i64,
            });
        }

        Ok(non_max_suppression(
            candidates,
            NMS_IOU_THRESHOLD,
            MAX_DETECTIONS,
        ))
    }
}
