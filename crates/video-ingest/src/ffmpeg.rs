//! FFmpeg-backed V4L2 capture that streams raw BGR24 frames over a pipe.

use std::{
    io::{BufRead, BufReader, ErrorKind, Read},
    path::Path,
    process::{Child, ChildStderr, ChildStdout, Command, Stdio},
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use anyhow::anyhow;
use crossbeam_channel::bounded;
use tracing::{debug, warn};

use crate::{
    source::{CameraSettings, DeviceOpener, FrameSource, Interrupter},
    types::{CaptureError, Frame, FrameFormat},
};

/// How long opening waits for the first frame before the device is skipped.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens `/dev/video<N>` through an `ffmpeg` child process.
#[derive(Clone, Debug)]
pub struct FfmpegOpener {
    pub binary: String,
    pub open_timeout: Duration,
}

impl Default for FfmpegOpener {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".into(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

impl DeviceOpener for FfmpegOpener {
    fn open(
        &self,
        index: i32,
        settings: &CameraSettings,
    ) -> Result<Box<dyn FrameSource>, CaptureError> {
        let camera = FfmpegCamera::spawn_with_timeout(
            &self.binary,
            &format!("/dev/video{index}"),
            settings,
            self.open_timeout,
        )?;
        Ok(Box::new(camera))
    }
}

/// A running `ffmpeg` child. Counts as open only once it has delivered a frame.
pub struct FfmpegCamera {
    uri: String,
    child: Arc<Mutex<Option<Child>>>,
    stdout: Option<ChildStdout>,
    /// Frame read while opening, handed out by the first `read_frame`.
    pending: Option<Frame>,
    width: u32,
    height: u32,
}

impl FfmpegCamera {
    pub fn spawn(
        binary: &str,
        device: &str,
        settings: &CameraSettings,
    ) -> Result<Self, CaptureError> {
        Self::spawn_with_timeout(binary, device, settings, DEFAULT_OPEN_TIMEOUT)
    }

    pub fn spawn_with_timeout(
        binary: &str,
        device: &str,
        settings: &CameraSettings,
        open_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        if !Path::new(device).exists() {
            return Err(CaptureError::Open {
                uri: device.to_string(),
            });
        }

        let mut cmd = Command::new(binary);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("video4linux2")
            .arg("-framerate")
            .arg(format!("{}", settings.fps))
            .arg("-video_size")
            .arg(format!("{}x{}", settings.width, settings.height))
            .arg("-i")
            .arg(device)
            .arg("-vf")
            .arg(format!("scale={}:{}", settings.width, settings.height))
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .stdout(Stdio::piped());

        let mut child = cmd.spawn().map_err(|err| {
            warn!("video-ingest: failed to spawn {binary} for {device}: {err}");
            CaptureError::Open {
                uri: device.to_string(),
            }
        })?;

        if let Some(stderr) = child.stderr.take() {
            forward_stderr(device, stderr);
        }
        let stdout = child.stdout.take();

        // Dropping `camera` on any early return kills the child.
        let mut camera = Self {
            uri: device.to_string(),
            child: Arc::new(Mutex::new(Some(child))),
            stdout: None,
            pending: None,
            width: settings.width,
            height: settings.height,
        };
        let stdout =
            stdout.ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

        let (stdout, first) = camera.read_first_frame(stdout, open_timeout)?;
        match first {
            Ok(frame) => {
                debug!(
                    "ffmpeg capture started on {device} ({}x{} @ {} fps)",
                    settings.width, settings.height, settings.fps
                );
                camera.pending = Some(frame);
                camera.stdout = Some(stdout);
                Ok(camera)
            }
            Err(err) => {
                debug!("{device} produced no frame: {err}");
                Err(CaptureError::Open {
                    uri: device.to_string(),
                })
            }
        }
    }

    /// Read one frame on a helper thread, killing the child if it takes longer
    /// than `timeout`. The pipe is handed back either way.
    fn read_first_frame(
        &self,
        mut stdout: ChildStdout,
        timeout: Duration,
    ) -> Result<(ChildStdout, Result<Frame, CaptureError>), CaptureError> {
        let (width, height) = (self.width, self.height);
        let uri = self.uri.clone();
        let (done_tx, done_rx) = bounded::<()>(1);
        let reader = thread::Builder::new()
            .name("ffmpeg-open".into())
            .spawn(move || {
                let first = read_raw_frame(&mut stdout, &uri, width, height);
                let _ = done_tx.send(());
                (stdout, first)
            })
            .map_err(|err| CaptureError::Other(err.into()))?;

        if done_rx.recv_timeout(timeout).is_err() {
            debug!("{} gave no frame within {timeout:?}", self.uri);
            self.kill_child();
        }
        reader
            .join()
            .map_err(|_| CaptureError::Other(anyhow!("ffmpeg open reader panicked")))
    }

    fn kill_child(&self) {
        let mut guard = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(child) = guard.as_mut() {
            let _ = child.kill();
        }
    }
}

fn read_raw_frame(
    stdout: &mut ChildStdout,
    uri: &str,
    width: u32,
    height: u32,
) -> Result<Frame, CaptureError> {
    let frame_bytes = (width as usize) * (height as usize) * 3;
    let mut buffer = vec![0u8; frame_bytes];
    match stdout.read_exact(&mut buffer) {
        Ok(()) => Frame::new(buffer, width, height, FrameFormat::Bgr8),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(CaptureError::EndOfStream {
            uri: uri.to_string(),
        }),
        Err(err) => Err(CaptureError::Read {
            uri: uri.to_string(),
            reason: err.to_string(),
        }),
    }
}

fn forward_stderr(device: &str, stderr: ChildStderr) {
    let device = device.to_string();
    let spawned = thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                debug!("ffmpeg {device}: {line}");
            }
        });
    if let Err(err) = spawned {
        warn!("video-ingest: ffmpeg stderr will not be logged: {err}");
    }
}

impl FrameSource for FfmpegCamera {
    fn describe(&self) -> String {
        format!("ffmpeg {}", self.uri)
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        let stdout = self.stdout.as_mut().ok_or_else(|| CaptureError::EndOfStream {
            uri: self.uri.clone(),
        })?;
        read_raw_frame(stdout, &self.uri, self.width, self.height)
    }

    fn release(&mut self) {
        self.stdout = None;
        self.pending = None;
        let taken = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut child) = taken {
            let _ = child.kill();
            let _ = child.wait();
            debug!("released {}", self.uri);
        }
    }

    /// Kills the child, which closes the pipe under a blocked read.
    fn interrupter(&self) -> Option<Interrupter> {
        let child = Arc::clone(&self.child);
        Some(Arc::new(move || {
            let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(child) = guard.as_mut() {
                let _ = child.kill();
            }
        }))
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.release();
    }
}
