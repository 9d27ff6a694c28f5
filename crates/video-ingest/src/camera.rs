//! OpenCV-backed camera capture.

use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::warn;

use crate::{
    source::{CameraSettings, DeviceOpener, FrameSource},
    types::{CaptureError, Frame, FrameFormat},
};

/// Opens cameras through `cv::VideoCapture`, trying V4L before the generic backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenCvOpener;

impl DeviceOpener for OpenCvOpener {
    fn open(
        &self,
        index: i32,
        settings: &CameraSettings,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        let mut cap = open_video_capture(index)?;
        configure_camera(&mut cap, settings);
        Ok(Box::new(OpenCvCamera {
            index,
            cap: Some(cap),
            settings: *settings,
            frame: Mat::default(),
            scratch: Mat::default(),
        }))
    }
}

pub struct OpenCvCamera {
    index: i32,
    cap: Option<VideoCapture>,
    settings: CameraSettings,
    frame: Mat,
    scratch: Mat,
}

impl FrameSource for OpenCvCamera {
    fn describe(&self) -> String {
        format!("opencv device #{}", self.index)
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let uri = format!("/dev/video{}", self.index);
        let cap = self
            .cap
            .as_mut()
            .ok_or_else(|| CaptureError::EndOfStream { uri: uri.clone() })?;

        let grabbed = cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Other(e.into()))?;
        let size = self.frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed || size.width <= 0 {
            return Err(CaptureError::Read {
                uri,
                reason: "device returned no frame".into(),
            });
        }

        let target_w = self.settings.width as i32;
        let target_h = self.settings.height as i32;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        Frame::new(
            data,
            self.settings.width,
            self.settings.height,
            FrameFormat::Bgr8,
        )
    }

    fn release(&mut self) {
        if let Some(mut cap) = self.cap.take() {
            if let Err(err) = cap.release() {
                warn!("video-ingest: failed to release device #{}: {err}", self.index);
            }
        }
    }
}

impl Drop for OpenCvCamera {
    fn drop(&mut self) {
        self.release();
    }
}

fn open_video_capture(index: i32) -> Result<VideoCapture, CaptureError> {
    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::new(index, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("video-ingest: failed to open device #{index} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: format!("/dev/video{index}"),
    })
}

/// Apply capture settings; devices silently ignore what they do not support.
fn configure_camera(cap: &mut VideoCapture, settings: &CameraSettings) {
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, settings.width as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, settings.height as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, settings.fps);
}
