//! Capture worker: reads frames, runs the detector, and feeds the relays.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use ml_core::{Detector, LabelTable, filter_detections};
use tracing::{debug, info, warn};
use video_ingest::{Frame, FrameSource};

use crate::{
    annotation::draw_detections,
    cancel::CancelToken,
    events::{ConsoleEvent, EventSender},
    relay::RelayQueue,
    telemetry,
    watchdog::Heartbeat,
};

/// Pause between capture iterations.
pub const DEFAULT_CAPTURE_YIELD: Duration = Duration::from_millis(10);

/// Detector plus the label table and threshold applied to its output.
pub struct DetectionSetup {
    pub detector: Arc<dyn Detector>,
    pub labels: LabelTable,
    pub threshold: f32,
}

pub struct CaptureWorker {
    pub source: Box<dyn FrameSource>,
    pub detection: Option<Arc<DetectionSetup>>,
    pub raw: RelayQueue<Frame>,
    pub annotated: RelayQueue<Frame>,
    pub detecting: Arc<AtomicBool>,
    pub heartbeat: Arc<Heartbeat>,
    pub events: EventSender,
    pub token: CancelToken,
    pub yield_interval: Duration,
    pub generation: u64,
}

/// Start the worker. The join handle yields the source back so the caller can
/// release the device after the thread has exited.
pub fn spawn_capture_worker(worker: CaptureWorker) -> io::Result<JoinHandle<Box<dyn FrameSource>>> {
    telemetry::spawn_thread("rig-capture", move || worker.run())
}

impl CaptureWorker {
    fn run(mut self) -> Box<dyn FrameSource> {
        let span = tracing::info_span!(
            "capture.worker",
            source = %self.source.describe(),
            generation = self.generation
        );
        let _guard = span.enter();
        info!("Capture worker started");

        while !self.token.is_cancelled() {
            let frame = match self.source.read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    if self.token.is_cancelled() {
                        debug!("read interrupted by stop: {err}");
                        break;
                    }
                    warn!("Camera read failed: {err}");
                    let _ = self.events.send(ConsoleEvent::CameraError {
                        generation: self.generation,
                        message: err.to_string(),
                    });
                    break;
                }
            };
            if self.token.is_cancelled() {
                break;
            }
            self.heartbeat.beat();
            metrics::counter!("rig_frames_captured_total").increment(1);

            if self.detecting.load(Ordering::Relaxed) {
                self.annotate(&frame);
            }

            self.raw.push(frame);

            if !self.token.sleep(self.yield_interval) {
                break;
            }
        }

        info!("Capture worker stopped");
        self.source
    }

    fn annotate(&self, frame: &Frame) {
        let Some(setup) = self.detection.as_ref() else {
            return;
        };
        let _span = tracing::debug_span!("capture.detect", detector = setup.detector.name()).entered();

        let private = frame.clone();
        let raw = match setup.detector.detect(&private) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Detection error: {err}");
                metrics::counter!("rig_detector_failures_total").increment(1);
                return;
            }
        };

        let detections = filter_detections(&raw, setup.threshold, &setup.labels);
        let annotated = draw_detections(&private, &detections);
        if !detections.is_empty() {
            metrics::counter!("rig_detections_reported_total").increment(detections.len() as u64);
            let _ = self.events.send(ConsoleEvent::Detections {
                generation: self.generation,
                detections,
            });
        }
        self.annotated.push(annotated);
    }
}
