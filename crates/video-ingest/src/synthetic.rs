//! Test-pattern source for running the console without camera hardware.

use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    source::{CameraSettings, DeviceOpener, FrameSource},
    types::{CaptureError, Frame, FrameFormat},
};

/// Opens a [`SyntheticCamera`] for any index listed in `indices`.
#[derive(Clone, Debug)]
pub struct SyntheticOpener {
    pub indices: Vec<i32>,
    /// Fail every read after this many frames. `None` streams forever.
    pub fail_after: Option<u64>,
}

impl Default for SyntheticOpener {
    fn default() -> Self {
        Self {
            indices: vec![0],
            fail_after: None,
        }
    }
}

impl DeviceOpener for SyntheticOpener {
    fn open(
        &self,
        index: i32,
        settings: &CameraSettings,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        if !self.indices.contains(&index) {
            return Err(CaptureError::Open {
                uri: format!("synthetic:{index}"),
            });
        }
        let mut camera = SyntheticCamera::new(index, *settings);
        camera.fail_after = self.fail_after;
        Ok(Box::new(camera))
    }
}

/// Moving colour bars paced at the configured frame rate.
pub struct SyntheticCamera {
    index: i32,
    settings: CameraSettings,
    produced: u64,
    fail_after: Option<u64>,
    next_due: Option<Instant>,
    released: bool,
}

impl SyntheticCamera {
    pub fn new(index: i32, settings: CameraSettings) -> Self {
        Self {
            index,
            settings,
            produced: 0,
            fail_after: None,
            next_due: None,
            released: false,
        }
    }

    fn frame_interval(&self) -> Duration {
        if self.settings.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.settings.fps)
        } else {
            Duration::ZERO
        }
    }

    fn render(&self) -> Vec<u8> {
        let width = self.settings.width as usize;
        let height = self.settings.height as usize;
        let shift = (self.produced as usize * 4) % width.max(1);
        let mut data = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                let band = ((x + shift) * 8 / width.max(1)) as u8;
                let b = band.wrapping_mul(32);
                let g = (y * 255 / height.max(1)) as u8;
                let r = 255u8.wrapping_sub(b);
                data.extend_from_slice(&[b, g, r]);
            }
        }
        data
    }
}

impl FrameSource for SyntheticCamera {
    fn describe(&self) -> String {
        format!("synthetic #{}", self.index)
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let uri = format!("synthetic:{}", self.index);
        if self.released {
            return Err(CaptureError::EndOfStream { uri });
        }
        if let Some(limit) = self.fail_after {
            if self.produced >= limit {
                return Err(CaptureError::Read {
                    uri,
                    reason: "synthetic failure".into(),
                });
            }
        }

        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.frame_interval());

        let data = self.render();
        self.produced += 1;
        Frame::new(
            data,
            self.settings.width,
            self.settings.height,
            FrameFormat::Bgr8,
        )
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> CameraSettings {
        CameraSettings {
            width: 16,
            height: 8,
            fps: 0.0,
        }
    }

    #[test]
    fn produces_frames_of_requested_size() {
        let mut camera = SyntheticCamera::new(0, fast_settings());
        let frame = camera.read_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 8));
        assert_eq!(frame.data().len(), 16 * 8 * 3);
    }

    #[test]
    fn fails_after_limit_and_after_release() {
        let opener = SyntheticOpener {
            indices: vec![0],
            fail_after: Some(1),
        };
        let mut camera = opener.open(0, &fast_settings()).unwrap();
        assert!(camera.read_frame().is_ok());
        assert!(matches!(camera.read_frame(), Err(CaptureError::Read { .. })));

        let mut camera = SyntheticCamera::new(0, fast_settings());
        camera.release();
        assert!(matches!(
            camera.read_frame(),
            Err(CaptureError::EndOfStream { .. })
        ));
    }

    #[test]
    fn unknown_index_does_not_open() {
        assert!(SyntheticOpener::default().open(3, &fast_settings()).is_err());
    }
}
