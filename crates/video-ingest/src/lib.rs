//! Camera ingest: frame types, capture sources and device probing.

#[cfg(feature = "with-opencv")]
mod camera;
mod ffmpeg;
mod source;
mod synthetic;
mod types;

#[cfg(feature = "with-opencv")]
pub use camera::{OpenCvCamera, OpenCvOpener};
pub use ffmpeg::{FfmpegCamera, FfmpegOpener};
pub use source::{
    CameraSettings, DeviceOpener, FrameSource, Interrupter, open_first_available,
    parse_device_index,
};
pub use synthetic::{SyntheticCamera, SyntheticOpener};
pub use types::{CaptureError, Frame, FrameFormat};
