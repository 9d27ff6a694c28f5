//! Detection overlay drawn onto a copy of a captured frame.

use ml_core::{BoundingBox, Detection};
use video_ingest::{Frame, FrameFormat};

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const TEXT_COLOR: [u8; 3] = [0, 0, 0];
const BOX_THICKNESS: i32 = 2;
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;
const LABEL_PADDING: i32 = 2;

/// Returns a new frame with a box, a filled label background and
/// `label confidence` text for each detection. `frame` is left untouched.
pub fn draw_detections(frame: &Frame, detections: &[Detection]) -> Frame {
    let mut annotated = frame.clone();
    {
        let mut canvas = Canvas::new(&mut annotated);
        for det in detections {
            let bbox = canvas.clamp_box(det.bbox);
            canvas.stroke_rect(bbox.x1, bbox.y1, bbox.x2, bbox.y2, BOX_COLOR);

            let text = format!("{} {:.2}", det.label, det.confidence);
            let (text_w, text_h) = text_size(&text);
            let label_h = text_h + LABEL_PADDING * 2;
            let mut top = bbox.y1 - label_h;
            if top < 0 {
                top = bbox.y1.max(0);
            }
            let left = bbox.x1.max(0);
            canvas.fill_rect(
                left,
                top,
                left + text_w + LABEL_PADDING * 2 - 1,
                top + label_h - 1,
                BOX_COLOR,
            );
            canvas.draw_text(left + LABEL_PADDING, top + LABEL_PADDING, &text, TEXT_COLOR);
        }
    }
    annotated
}

/// Pixel extent of `text` in the built-in font.
pub fn text_size(text: &str) -> (i32, i32) {
    let chars = text.chars().count() as i32;
    if chars == 0 {
        return (0, GLYPH_HEIGHT);
    }
    (chars * GLYPH_ADVANCE - (GLYPH_ADVANCE - GLYPH_WIDTH), GLYPH_HEIGHT)
}

/// RGB drawing over a frame buffer, writing in the frame's own channel order.
struct Canvas<'a> {
    data: &'a mut [u8],
    width: i32,
    height: i32,
    format: FrameFormat,
}

impl<'a> Canvas<'a> {
    fn new(frame: &'a mut Frame) -> Self {
        let width = frame.width() as i32;
        let height = frame.height() as i32;
        let format = frame.format();
        Self {
            data: frame.data_mut(),
            width,
            height,
            format,
        }
    }

    /// Pull coordinates to just outside the frame so edges that were off-frame
    /// stay off-frame and later arithmetic cannot overflow.
    fn clamp_box(&self, bbox: BoundingBox) -> BoundingBox {
        let clamp = |v: i32, extent: i32| v.clamp(-BOX_THICKNESS, extent + BOX_THICKNESS - 1);
        BoundingBox {
            x1: clamp(bbox.x1, self.width),
            y1: clamp(bbox.y1, self.height),
            x2: clamp(bbox.x2, self.width),
            y2: clamp(bbox.y2, self.height),
        }
    }

    fn put(&mut self, x: i32, y: i32, rgb: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let offset = ((y * self.width + x) * 3) as usize;
        let pixel = match self.format {
            FrameFormat::Bgr8 => [rgb[2], rgb[1], rgb[0]],
            FrameFormat::Rgb8 => rgb,
        };
        self.data[offset..offset + 3].copy_from_slice(&pixel);
    }

    fn stroke_rect(&mut self, left: i32, top: i32, right: i32, bottom: i32, rgb: [u8; 3]) {
        for inset in 0..BOX_THICKNESS {
            let (l, t, r, b) = (left + inset, top + inset, right - inset, bottom - inset);
            if l > r || t > b {
                break;
            }
            // Edges outside the frame are skipped; spans are clipped before walking.
            let (x0, x1) = (l.max(0), r.min(self.width - 1));
            let (y0, y1) = (t.max(0), b.min(self.height - 1));
            for x in x0..=x1 {
                self.put(x, t, rgb);
                self.put(x, b, rgb);
            }
            for y in y0..=y1 {
                self.put(l, y, rgb);
                self.put(r, y, rgb);
            }
        }
    }

    fn fill_rect(&mut self, left: i32, top: i32, right: i32, bottom: i32, rgb: [u8; 3]) {
        let left = left.max(0);
        let top = top.max(0);
        let right = right.min(self.width - 1);
        let bottom = bottom.min(self.height - 1);
        for y in top..=bottom {
            for x in left..=right {
                self.put(x, y, rgb);
            }
        }
    }

    fn draw_text(&mut self, mut x: i32, y: i32, text: &str, rgb: [u8; 3]) {
        for ch in text.chars().flat_map(|c| c.to_uppercase()) {
            if let Some(glyph) = glyph_bits(ch) {
                for (row, pattern) in glyph.iter().enumerate() {
                    for col in 0..GLYPH_WIDTH {
                        if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                            self.put(x + col, y + row as i32, rgb);
                        }
                    }
                }
            }
            x += GLYPH_ADVANCE;
        }
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use ml_core::BoundingBox;

    use super::*;

    fn detection(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            label: "pen".into(),
            confidence: 0.87,
            bbox: BoundingBox { x1, y1, x2, y2 },
        }
    }

    #[test]
    fn input_frame_is_not_mutated() {
        let frame = Frame::filled(64, 48, FrameFormat::Bgr8, [10, 20, 30]);
        let before = frame.clone();
        let annotated = draw_detections(&frame, &[detection(10, 20, 40, 40)]);
        assert_eq!(frame, before);
        assert_ne!(annotated, frame);
    }

    #[test]
    fn box_outline_is_green_in_device_order() {
        let frame = Frame::filled(64, 48, FrameFormat::Bgr8, [0, 0, 0]);
        let annotated = draw_detections(&frame, &[detection(10, 20, 40, 40)]);
        assert_eq!(annotated.pixel(40, 30), Some([0, 255, 0]));
        assert_eq!(annotated.pixel(39, 30), Some([0, 255, 0]));
        assert_eq!(annotated.pixel(25, 30), Some([0, 0, 0]));
    }

    #[test]
    fn label_sits_above_the_box_when_there_is_room() {
        let frame = Frame::filled(100, 60, FrameFormat::Rgb8, [255, 255, 255]);
        let annotated = draw_detections(&frame, &[detection(10, 30, 60, 50)]);
        // Background fill directly above the top-left corner.
        assert_eq!(annotated.pixel(10, 19), Some([0, 255, 0]));
        // Nothing drawn inside the box interior.
        assert_eq!(annotated.pixel(30, 40), Some([255, 255, 255]));
    }

    #[test]
    fn boxes_at_the_border_are_clipped() {
        let frame = Frame::filled(32, 32, FrameFormat::Bgr8, [0, 0, 0]);
        let annotated = draw_detections(&frame, &[detection(-5, -5, 100, 100)]);
        assert_eq!(annotated.width(), 32);
        assert_eq!(annotated.pixel(0, 0), Some([0, 255, 0]));
    }

    #[test]
    fn garbage_boxes_are_clamped_before_drawing() {
        let frame = Frame::filled(32, 32, FrameFormat::Bgr8, [0, 0, 0]);
        let annotated = draw_detections(
            &frame,
            &[
                detection(i32::MIN, i32::MIN, i32::MAX, i32::MAX),
                detection(i32::MAX, i32::MAX, i32::MIN, i32::MIN),
            ],
        );
        // Label background only; the box edges all lie outside the frame.
        assert_eq!(annotated.pixel(0, 0), Some([0, 255, 0]));
        assert_eq!(annotated.pixel(20, 20), Some([0, 0, 0]));
        assert_eq!(annotated.pixel(31, 31), Some([0, 0, 0]));
    }

    #[test]
    fn empty_detection_list_copies_the_frame() {
        let frame = Frame::filled(8, 8, FrameFormat::Bgr8, [1, 2, 3]);
        assert_eq!(draw_detections(&frame, &[]), frame);
    }

    #[test]
    fn text_size_uses_fixed_advance() {
        assert_eq!(text_size("pen 0.87"), (8 * 6 - 1, 7));
        assert_eq!(text_size(""), (0, 7));
    }
}
