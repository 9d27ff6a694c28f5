//! Periodic display side of the relay: picks the freshest frame, scales it to
//! the viewport, converts it for the surface, and keeps a rolling FPS figure.

use std::{
    fs,
    path::Path,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use image::{RgbaImage, imageops::FilterType};
use tracing::{error, trace};
use video_ingest::Frame;

use crate::relay::RelayQueue;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(33);
pub const DEFAULT_FPS_WINDOW: Duration = Duration::from_secs(1);
/// FPS window used by the simple viewer timings.
pub const MINIMAL_FPS_WINDOW: Duration = Duration::from_millis(500);
/// Used until the surface reports a real size.
pub const DEFAULT_VIEWPORT: (u32, u32) = (640, 480);
/// Surfaces at or below this size in either dimension are treated as not laid out.
const MIN_LAID_OUT_EDGE: u32 = 10;

/// Where rendered frames end up.
pub trait RenderSurface {
    /// Current drawable size, `None` if not laid out yet.
    fn viewport(&self) -> Option<(u32, u32)>;

    fn present(&mut self, image: RgbaImage) -> Result<()>;

    /// `None` clears the readout.
    fn show_fps(&mut self, fps: Option<f32>);

    /// Placeholder text shown instead of video, `None` to clear it.
    fn show_message(&mut self, message: Option<&str>);
}

/// Rolling frame counter that publishes `count / elapsed` once per window.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    window: Duration,
    count: u32,
    window_start: Instant,
    fps: Option<f32>,
}

impl FpsMeter {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            count: 0,
            window_start: now,
            fps: None,
        }
    }

    /// Count one rendered frame. Returns the new estimate when a window closes.
    pub fn record(&mut self, now: Instant) -> Option<f32> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        let fps = self.count as f32 / elapsed.as_secs_f32();
        self.count = 0;
        self.window_start = now;
        self.fps = Some(fps);
        Some(fps)
    }

    pub fn fps(&self) -> Option<f32> {
        self.fps
    }

    pub fn reset(&mut self, now: Instant) {
        self.count = 0;
        self.window_start = now;
        self.fps = None;
    }
}

/// Largest size with the frame's aspect ratio that fits inside `viewport`.
///
/// Returns `None` when the result would have a zero dimension.
pub fn fit_to_viewport(frame: (u32, u32), viewport: (u32, u32)) -> Option<(u32, u32)> {
    let (frame_w, frame_h) = frame;
    let (view_w, view_h) = viewport;
    if frame_w == 0 || frame_h == 0 || view_w == 0 || view_h == 0 {
        return None;
    }

    let frame_aspect = frame_w as f64 / frame_h as f64;
    let view_aspect = view_w as f64 / view_h as f64;
    let (width, height) = if view_aspect > frame_aspect {
        let height = view_h;
        let width = ((height as f64 * frame_aspect).floor() as u32).min(view_w);
        (width, height)
    } else {
        let width = view_w;
        let height = ((width as f64 / frame_aspect).floor() as u32).min(view_h);
        (width, height)
    };

    (width > 0 && height > 0).then_some((width, height))
}

/// Viewport to scale into, substituting the default for surfaces not yet laid out.
pub fn effective_viewport(reported: Option<(u32, u32)>) -> (u32, u32) {
    match reported {
        Some((w, h)) if w > MIN_LAID_OUT_EDGE && h > MIN_LAID_OUT_EDGE => (w, h),
        _ => DEFAULT_VIEWPORT,
    }
}

/// Snapshot of the relay state a tick reads from.
pub struct DisplaySources<'a> {
    pub running: bool,
    pub detecting: bool,
    pub raw: &'a RelayQueue<Frame>,
    pub annotated: &'a RelayQueue<Frame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running; the tick chain ends here.
    Stopped,
    /// No frame was waiting.
    Idle,
    Rendered,
    /// Rendering failed and was logged.
    Failed,
}

impl TickOutcome {
    pub fn reschedule(self) -> bool {
        !matches!(self, TickOutcome::Stopped)
    }
}

pub struct DisplayScheduler {
    interval: Duration,
    fps: FpsMeter,
}

impl DisplayScheduler {
    pub fn new(interval: Duration, fps_window: Duration, now: Instant) -> Self {
        Self {
            interval,
            fps: FpsMeter::new(fps_window, now),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn fps(&self) -> Option<f32> {
        self.fps.fps()
    }

    pub fn reset(&mut self, now: Instant) {
        self.fps.reset(now);
    }

    /// Run one display tick. Never blocks on the relay queues.
    pub fn tick(
        &mut self,
        sources: DisplaySources<'_>,
        surface: &mut dyn RenderSurface,
        now: Instant,
    ) -> TickOutcome {
        if !sources.running {
            return TickOutcome::Stopped;
        }

        let frame = if sources.detecting && !sources.annotated.is_empty() {
            sources.annotated.try_pop()
        } else {
            None
        };
        let Some(frame) = frame.or_else(|| sources.raw.try_pop()) else {
            trace!("display tick: no frame queued");
            return TickOutcome::Idle;
        };

        if let Some(fps) = self.fps.record(now) {
            surface.show_fps(Some(fps));
            metrics::gauge!("rig_display_fps").set(fps as f64);
        }

        match render_frame(&frame, surface) {
            Ok(()) => TickOutcome::Rendered,
            Err(err) => {
                error!("GUI update error: {err:#}");
                TickOutcome::Failed
            }
        }
    }
}

fn render_frame(frame: &Frame, surface: &mut dyn RenderSurface) -> Result<()> {
    let image = RgbaImage::from_raw(frame.width(), frame.height(), frame.to_rgba())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width(), frame.height()))?;

    let viewport = effective_viewport(surface.viewport());
    let image = match fit_to_viewport((frame.width(), frame.height()), viewport) {
        Some((w, h)) if (w, h) != image.dimensions() => {
            image::imageops::resize(&image, w, h, FilterType::Triangle)
        }
        _ => image,
    };

    surface.show_message(None);
    surface.present(image).context("surface rejected frame")
}

/// In-memory surface holding the latest rendered image; can write PNG snapshots.
#[derive(Debug, Default)]
pub struct PreviewSurface {
    viewport: Option<(u32, u32)>,
    latest: Option<RgbaImage>,
    fps: Option<f32>,
    message: Option<String>,
    presented: u64,
}

impl PreviewSurface {
    pub fn new(viewport: Option<(u32, u32)>) -> Self {
        Self {
            viewport,
            ..Self::default()
        }
    }

    pub fn set_viewport(&mut self, viewport: Option<(u32, u32)>) {
        self.viewport = viewport;
    }

    pub fn latest(&self) -> Option<&RgbaImage> {
        self.latest.as_ref()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn fps_text(&self) -> String {
        match self.fps {
            Some(fps) => format!("FPS: {fps:.1}"),
            None => "FPS: --".into(),
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Write the latest image as PNG.
    pub fn snapshot(&self, path: &Path) -> Result<()> {
        let image = self
            .latest
            .as_ref()
            .ok_or_else(|| anyhow!("no frame has been rendered yet"))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        image
            .save(path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))
    }
}

impl RenderSurface for PreviewSurface {
    fn viewport(&self) -> Option<(u32, u32)> {
        self.viewport
    }

    fn present(&mut self, image: RgbaImage) -> Result<()> {
        self.latest = Some(image);
        self.presented += 1;
        Ok(())
    }

    fn show_fps(&mut self, fps: Option<f32>) {
        self.fps = fps;
    }

    fn show_message(&mut self, message: Option<&str>) {
        self.message = message.map(str::to_owned);
    }
}

#[cfg(test)]
mod tests {
    use video_ingest::FrameFormat;

    use super::*;

    fn frame(width: u32, height: u32, bgr: [u8; 3]) -> Frame {
        Frame::filled(width, height, FrameFormat::Bgr8, bgr)
    }

    #[test]
    fn fit_preserves_aspect_and_stays_inside_viewport() {
        let frames = [(640, 480), (1280, 720), (480, 640), (333, 111), (1, 1000)];
        let viewports = [(800, 600), (1000, 300), (300, 1000), (11, 11), (1919, 1081)];
        for &frame in &frames {
            for &viewport in &viewports {
                let Some((w, h)) = fit_to_viewport(frame, viewport) else {
                    continue;
                };
                assert!(w <= viewport.0 && h <= viewport.1, "{frame:?} in {viewport:?}");
                let expected = frame.0 as f64 / frame.1 as f64;
                let actual = w as f64 / h as f64;
                // Flooring one side costs at most one pixel of error.
                let tolerance = expected / h as f64 + 1.0 / h as f64;
                assert!(
                    (actual - expected).abs() <= tolerance,
                    "{frame:?} in {viewport:?} -> {w}x{h}"
                );
            }
        }
    }

    #[test]
    fn fit_uses_the_binding_dimension() {
        assert_eq!(fit_to_viewport((640, 480), (1000, 480)), Some((640, 480)));
        assert_eq!(fit_to_viewport((640, 480), (320, 1000)), Some((320, 240)));
        assert_eq!(fit_to_viewport((1000, 1), (10, 10)), None);
        assert_eq!(fit_to_viewport((640, 480), (0, 480)), None);
    }

    #[test]
    fn unlaid_surfaces_fall_back_to_default_viewport() {
        assert_eq!(effective_viewport(None), DEFAULT_VIEWPORT);
        assert_eq!(effective_viewport(Some((1, 1))), DEFAULT_VIEWPORT);
        assert_eq!(effective_viewport(Some((800, 600))), (800, 600));
    }

    #[test]
    fn fps_converges_to_a_synthetic_rate() {
        for rate in [10.0f64, 30.0, 60.0] {
            let start = Instant::now();
            let mut meter = FpsMeter::new(DEFAULT_FPS_WINDOW, start);
            let step = Duration::from_secs_f64(1.0 / rate);
            let mut reported = None;
            for n in 1..=(rate as u32 * 3) {
                if let Some(fps) = meter.record(start + step * n) {
                    reported = Some(fps);
                }
            }
            let fps = reported.expect("at least one window closed") as f64;
            assert!((fps - rate).abs() / rate < 0.05, "rate {rate} reported {fps}");
        }
    }

    #[test]
    fn empty_queues_tick_without_waiting_and_reschedule() {
        let raw = RelayQueue::new("raw");
        let annotated = RelayQueue::new("annotated");
        let now = Instant::now();
        let mut scheduler = DisplayScheduler::new(DEFAULT_TICK_INTERVAL, DEFAULT_FPS_WINDOW, now);
        let mut surface = PreviewSurface::default();
        let started = Instant::now();
        let outcome = scheduler.tick(
            DisplaySources {
                running: true,
                detecting: true,
                raw: &raw,
                annotated: &annotated,
            },
            &mut surface,
            now,
        );
        assert_eq!(outcome, TickOutcome::Idle);
        assert!(outcome.reschedule());
        assert!(started.elapsed() < Duration::from_millis(20));
        assert_eq!(surface.presented(), 0);
    }

    #[test]
    fn stopped_scheduler_does_nothing() {
        let raw = RelayQueue::new("raw");
        let annotated = RelayQueue::new("annotated");
        raw.push(frame(4, 4, [0, 0, 0]));
        let now = Instant::now();
        let mut scheduler = DisplayScheduler::new(DEFAULT_TICK_INTERVAL, DEFAULT_FPS_WINDOW, now);
        let mut surface = PreviewSurface::default();
        let outcome = scheduler.tick(
            DisplaySources {
                running: false,
                detecting: false,
                raw: &raw,
                annotated: &annotated,
            },
            &mut surface,
            now,
        );
        assert_eq!(outcome, TickOutcome::Stopped);
        assert!(!outcome.reschedule());
        assert_eq!(raw.len(), 1);
    }

    #[test]
    fn annotated_frames_win_only_while_detecting() {
        let raw = RelayQueue::new("raw");
        let annotated = RelayQueue::new("annotated");
        let now = Instant::now();
        let mut scheduler = DisplayScheduler::new(DEFAULT_TICK_INTERVAL, DEFAULT_FPS_WINDOW, now);
        let mut surface = PreviewSurface::new(Some((64, 48)));

        raw.push(frame(64, 48, [255, 0, 0]));
        annotated.push(frame(64, 48, [0, 0, 255]));
        let (raw_ref, annotated_ref) = (&raw, &annotated);
        let sources = move |detecting| DisplaySources {
            running: true,
            detecting,
            raw: raw_ref,
            annotated: annotated_ref,
        };

        assert_eq!(
            scheduler.tick(sources(true), &mut surface, now),
            TickOutcome::Rendered
        );
        // The annotated frame is stored BGR and shown as RGBA red.
        assert_eq!(surface.latest().unwrap().get_pixel(0, 0).0, [255, 0, 0, 255]);

        assert_eq!(
            scheduler.tick(sources(true), &mut surface, now),
            TickOutcome::Rendered
        );
        assert_eq!(surface.latest().unwrap().get_pixel(0, 0).0, [0, 0, 255, 255]);

        annotated.push(frame(64, 48, [0, 255, 0]));
        raw.push(frame(64, 48, [9, 9, 9]));
        scheduler.tick(sources(false), &mut surface, now);
        assert_eq!(surface.latest().unwrap().get_pixel(0, 0).0, [9, 9, 9, 255]);
    }

    #[test]
    fn frames_are_scaled_into_the_viewport() {
        let raw = RelayQueue::new("raw");
        let annotated = RelayQueue::new("annotated");
        let now = Instant::now();
        let mut scheduler = DisplayScheduler::new(DEFAULT_TICK_INTERVAL, DEFAULT_FPS_WINDOW, now);
        let mut surface = PreviewSurface::new(Some((320, 320)));
        raw.push(frame(640, 480, [0, 0, 0]));
        scheduler.tick(
            DisplaySources {
                running: true,
                detecting: false,
                raw: &raw,
                annotated: &annotated,
            },
            &mut surface,
            now,
        );
        assert_eq!(surface.latest().unwrap().dimensions(), (320, 240));
    }

    #[test]
    fn snapshot_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let mut surface = PreviewSurface::default();
        assert!(surface.snapshot(&dir.path().join("none.png")).is_err());
        surface.present(RgbaImage::new(4, 4)).unwrap();
        let path = dir.path().join("shots").join("frame.png");
        surface.snapshot(&path).unwrap();
        assert!(path.exists());
    }
}
