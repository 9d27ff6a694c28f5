#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use arm_control::{ArmDriver, ArmError, ServoAngles};
use ml_core::{DetectError, Detector, RawDetection};
use rig_console::SessionSettings;
use video_ingest::{
    CameraSettings, CaptureError, DeviceOpener, Frame, FrameFormat, FrameSource,
};

pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        device_indices: vec![0, 1, 2],
        camera_width: 32,
        camera_height: 24,
        camera_fps: 500.0,
        capture_yield: Duration::from_millis(1),
        display_interval: Duration::from_millis(5),
        settle: Duration::from_millis(5),
        observe: Duration::from_millis(5),
        move_duration: Duration::from_millis(1),
        ..SessionSettings::default()
    }
}

/// Per-device bookkeeping shared with the test.
#[derive(Default)]
pub struct DeviceStats {
    pub reads: AtomicUsize,
    pub released: AtomicBool,
}

/// Opener that counts opens and keeps stats for every device it hands out.
#[derive(Default)]
pub struct CountingOpener {
    pub devices: Mutex<Vec<Arc<DeviceStats>>>,
    /// Time every read blocks for; a millisecond when unset.
    pub read_delay: Option<Duration>,
}

impl CountingOpener {
    /// Devices whose reads hang for `delay`, like a camera that stopped answering.
    pub fn stalling(delay: Duration) -> Self {
        Self {
            read_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.devices.lock().unwrap().len()
    }

    pub fn open_devices(&self) -> usize {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| !d.released.load(Ordering::SeqCst))
            .count()
    }

    pub fn read_counts(&self) -> Vec<usize> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.reads.load(Ordering::SeqCst))
            .collect()
    }
}

impl DeviceOpener for CountingOpener {
    fn open(
        &self,
        _index: i32,
        settings: &CameraSettings,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        let stats = Arc::new(DeviceStats::default());
        self.devices.lock().unwrap().push(stats.clone());
        Ok(Box::new(CountingSource {
            stats,
            delay: self.read_delay.unwrap_or(Duration::from_millis(1)),
            width: settings.width,
            height: settings.height,
        }))
    }
}

struct CountingSource {
    stats: Arc<DeviceStats>,
    delay: Duration,
    width: u32,
    height: u32,
}

impl FrameSource for CountingSource {
    fn describe(&self) -> String {
        "counting".into()
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        std::thread::sleep(self.delay);
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::filled(
            self.width,
            self.height,
            FrameFormat::Bgr8,
            [0, 0, 255],
        ))
    }

    fn release(&mut self) {
        self.stats.released.store(true, Ordering::SeqCst);
    }
}

/// Arm that records every commanded pose.
#[derive(Default)]
pub struct RecordingArm {
    pub moves: Mutex<Vec<ServoAngles>>,
}

impl RecordingArm {
    pub fn moves(&self) -> Vec<ServoAngles> {
        self.moves.lock().unwrap().clone()
    }
}

impl ArmDriver for RecordingArm {
    fn describe(&self) -> String {
        "recording arm".into()
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn move_all(&self, angles: &ServoAngles, _duration: Duration) -> Result<(), ArmError> {
        self.moves.lock().unwrap().push(*angles);
        Ok(())
    }
}

/// Arm whose moves take `delay` regardless of the requested duration.
pub struct StallingArm {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl StallingArm {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ArmDriver for StallingArm {
    fn describe(&self) -> String {
        "stalling arm".into()
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn move_all(&self, _angles: &ServoAngles, _duration: Duration) -> Result<(), ArmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(())
    }
}

/// Detector returning a fixed answer, or failing on every other call.
pub struct StubDetector {
    pub output: Vec<RawDetection>,
    pub fail_every_other: bool,
    pub calls: AtomicUsize,
}

impl StubDetector {
    pub fn finding(score: f32) -> Self {
        Self {
            output: vec![RawDetection {
                bbox_xyxy: [4.0, 4.0, 20.0, 16.0],
                score,
                class_id: 2,
            }],
            fail_every_other: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn flaky() -> Self {
        Self {
            fail_every_other: true,
            ..Self::finding(0.9)
        }
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>, DetectError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_every_other && call % 2 == 0 {
            return Err(DetectError::BadOutput("stub failure".into()));
        }
        Ok(self.output.clone())
    }
}
