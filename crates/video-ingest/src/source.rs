//! Device-agnostic capture interfaces and index probing.

use std::sync::Arc;

use tracing::{debug, info};

use crate::types::{CaptureError, Frame};

/// Capture parameters requested from a device once it is open.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
        }
    }
}

/// Callable from any thread to make a blocked [`FrameSource::read_frame`] return.
pub type Interrupter = Arc<dyn Fn() + Send + Sync>;

/// An open camera handle. Exactly one capture worker owns it at a time.
pub trait FrameSource: Send {
    /// Human readable identifier, used in logs and status text.
    fn describe(&self) -> String;

    /// Blocks until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Releases the underlying device. Must be safe to call more than once.
    fn release(&mut self);

    /// Handle that aborts a pending read. `None` for sources whose reads
    /// always return on their own.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

/// Opens a camera by device index.
pub trait DeviceOpener: Send + Sync {
    fn open(
        &self,
        index: i32,
        settings: &CameraSettings,
    ) -> Result<Box<dyn FrameSource>, CaptureError>;
}

/// Try `indices` in order and return the first device that opens.
pub fn open_first_available(
    opener: &dyn DeviceOpener,
    indices: &[i32],
    settings: &CameraSettings,
) -> Result<(i32, Box<dyn FrameSource>), CaptureError> {
    for &index in indices {
        match opener.open(index, settings) {
            Ok(source) => {
                info!("Camera found at index {index} ({})", source.describe());
                return Ok((index, source));
            }
            Err(err) => {
                debug!("camera index {index} unavailable: {err}");
            }
        }
    }

    Err(CaptureError::NoDevice {
        tried: indices.to_vec(),
    })
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::types::FrameFormat;

    struct StillSource(i32);

    impl FrameSource for StillSource {
        fn describe(&self) -> String {
            format!("still #{}", self.0)
        }

        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            Ok(Frame::filled(2, 2, FrameFormat::Bgr8, [0, 0, 0]))
        }

        fn release(&mut self) {}
    }

    struct OnlyIndex {
        available: i32,
        attempts: Mutex<Vec<i32>>,
    }

    impl DeviceOpener for OnlyIndex {
        fn open(
            &self,
            index: i32,
            _settings: &CameraSettings,
        ) -> Result<Box<dyn FrameSource>, CaptureError> {
            self.attempts.lock().unwrap().push(index);
            if index == self.available {
                Ok(Box::new(StillSource(index)))
            } else {
                Err(CaptureError::Open {
                    uri: format!("/dev/video{index}"),
                })
            }
        }
    }

    #[test]
    fn first_successful_index_wins() {
        let opener = OnlyIndex {
            available: 1,
            attempts: Mutex::new(Vec::new()),
        };
        let (index, source) =
            open_first_available(&opener, &[0, 1, 2], &CameraSettings::default()).unwrap();
        assert_eq!(index, 1);
        assert_eq!(source.describe(), "still #1");
        assert_eq!(*opener.attempts.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn reports_every_index_tried() {
        let opener = OnlyIndex {
            available: 9,
            attempts: Mutex::new(Vec::new()),
        };
        let err = open_first_available(&opener, &[0, 1, 2], &CameraSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::NoDevice { ref tried } if tried == &[0, 1, 2]));
    }

    #[test]
    fn parses_device_uris() {
        assert_eq!(parse_device_index("2"), Some(2));
        assert_eq!(parse_device_index("/dev/video10"), Some(10));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("rtsp://cam"), None);
    }
}
