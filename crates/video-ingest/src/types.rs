use anyhow::Error;
use thiserror::Error;

/// Raw pixel frame captured from a video source.
///
/// Pixels are packed row-major in the device-native channel order recorded in
/// `format`. The buffer is private so a frame can only be built through
/// [`Frame::new`], which guarantees `data.len() == width * height * 3`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
}

impl FrameFormat {
    pub fn channels(self) -> usize {
        match self {
            FrameFormat::Bgr8 | FrameFormat::Rgb8 => 3,
        }
    }
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Result<Self, CaptureError> {
        let expected = (width as usize) * (height as usize) * format.channels();
        if width == 0 || height == 0 || data.len() != expected {
            return Err(CaptureError::BadFrame {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    /// Solid-colour frame, mostly useful for placeholders and tests.
    ///
    /// Both dimensions must be non-zero, as with [`Frame::new`].
    pub fn filled(width: u32, height: u32, format: FrameFormat, pixel: [u8; 3]) -> Self {
        assert!(
            width > 0 && height > 0,
            "frame dimensions must be non-zero, got {width}x{height}"
        );
        let count = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(count * 3);
        for _ in 0..count {
            data.extend_from_slice(&pixel);
        }
        Self {
            data,
            width,
            height,
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel access for drawing on a private copy. The buffer length is fixed.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Channel triple at `(x, y)` in the frame's own channel order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = ((y as usize) * (self.width as usize) + x as usize) * 3;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Packed RGBA copy suitable for display surfaces.
    pub fn to_rgba(&self) -> Vec<u8> {
        let pixels = self.data.len() / 3;
        let mut output = Vec::with_capacity(pixels * 4);
        for chunk in self.data.chunks_exact(3) {
            match self.format {
                FrameFormat::Bgr8 => {
                    output.push(chunk[2]);
                    output.push(chunk[1]);
                    output.push(chunk[0]);
                }
                FrameFormat::Rgb8 => output.extend_from_slice(chunk),
            }
            output.push(255);
        }
        output
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("no camera found (tried device indices {tried:?})")]
    NoDevice { tried: Vec<i32> },
    #[error("frame buffer of {len} bytes does not match {width}x{height}")]
    BadFrame { width: u32, height: u32, len: usize },
    #[error("video source {uri:?} ended")]
    EndOfStream { uri: String },
    #[error("failed to read frame from {uri:?}: {reason}")]
    Read { uri: String, reason: String },
    #[error(transparent)]
    Other(#[from] Error),
}
