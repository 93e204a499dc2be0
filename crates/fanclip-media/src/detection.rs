//! Per-frame face detection and box drawing.
//!
//! Detectors implement [`FaceDetector`] and run synchronously on a single
//! decoded frame; callers are expected to move them onto a blocking thread.
//! The bundled [`SkinToneDetector`] is a pure heuristic: it classifies
//! pixels by chroma, groups skin-coloured grid cells into regions and keeps
//! the ones shaped like a face.

use std::collections::VecDeque;
use std::fmt;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::error::MediaResult;

/// Red, the annotation colour.
pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Annotation stroke width in pixels.
pub const BOX_THICKNESS: u32 = 2;

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Left edge x-coordinate
    pub x: f64,
    /// Top edge y-coordinate
    pub y: f64,
    /// Box width
    pub width: f64,
    /// Box height
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn x2(&self) -> f64 {
        self.x + self.width
    }

    #[inline]
    pub fn y2(&self) -> f64 {
        self.y + self.height
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Intersection over Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.x2().min(other.x2());
        let y2 = self.y2().min(other.y2());

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Intersect with the frame. Returns `None` when nothing is left.
    pub fn clip_to(&self, frame_width: u32, frame_height: u32) -> Option<BoundingBox> {
        let x1 = self.x.max(0.0);
        let y1 = self.y.max(0.0);
        let x2 = self.x2().min(frame_width as f64);
        let y2 = self.y2().min(frame_height as f64);

        if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
            return None;
        }
        Some(BoundingBox::new(x1, y1, x2 - x1, y2 - y1))
    }

    fn to_rect(self) -> Option<Rect> {
        let width = self.width.round() as u32;
        let height = self.height.round() as u32;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Rect::at(self.x.round() as i32, self.y.round() as i32).of_size(width, height))
    }
}

/// Finds faces in a single RGB frame.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<BoundingBox>>;

    /// Detector name for logging.
    fn name(&self) -> &'static str;
}

impl fmt::Debug for dyn FaceDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaceDetector")
            .field("name", &self.name())
            .finish()
    }
}

/// Detector that never finds anything. Clips pass through unannotated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDetector;

impl FaceDetector for NoopDetector {
    fn detect(&self, _frame: &RgbImage) -> MediaResult<Vec<BoundingBox>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Tuning for [`SkinToneDetector`].
#[derive(Debug, Clone)]
pub struct SkinToneConfig {
    /// Grid cell edge in pixels.
    pub cell_size: u32,
    /// Fraction of skin pixels needed to mark a cell.
    pub min_cell_fill: f64,
    /// Smallest region, in cells, reported as a face.
    pub min_region_cells: usize,
    /// Accepted width/height range of a region.
    pub aspect_range: (f64, f64),
    /// Minimum share of the region's bounding box covered by skin cells.
    pub min_box_fill: f64,
    /// Upper bound on faces reported per frame.
    pub max_faces: usize,
}

impl Default for SkinToneConfig {
    fn default() -> Self {
        Self {
            cell_size: 8,
            min_cell_fill: 0.6,
            min_region_cells: 6,
            aspect_range: (0.5, 1.6),
            min_box_fill: 0.45,
            max_faces: 8,
        }
    }
}

/// Chroma-based face heuristic.
#[derive(Debug, Clone, Default)]
pub struct SkinToneDetector {
    config: SkinToneConfig,
}

impl SkinToneDetector {
    pub fn new(config: SkinToneConfig) -> Self {
        Self { config }
    }

    /// Per-cell skin mask, row-major, with its grid dimensions.
    fn skin_cells(&self, frame: &RgbImage) -> (Vec<bool>, u32, u32) {
        let cell = self.config.cell_size.max(1);
        let cols = frame.width() / cell;
        let rows = frame.height() / cell;
        let needed = ((cell * cell) as f64 * self.config.min_cell_fill).ceil() as u32;

        let mut mask = vec![false; (cols * rows) as usize];
        for row in 0..rows {
            for col in 0..cols {
                let mut skin = 0u32;
                for dy in 0..cell {
                    for dx in 0..cell {
                        let p = frame.get_pixel(col * cell + dx, row * cell + dy);
                        if is_skin(p) {
                            skin += 1;
                        }
                    }
                }
                mask[(row * cols + col) as usize] = skin >= needed;
            }
        }
        (mask, cols, rows)
    }
}

impl FaceDetector for SkinToneDetector {
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<BoundingBox>> {
        let (mut mask, cols, rows) = self.skin_cells(frame);
        let cell = self.config.cell_size.max(1) as f64;
        let (min_aspect, max_aspect) = self.config.aspect_range;

        let mut faces = Vec::new();
        for start in 0..mask.len() {
            if !mask[start] {
                continue;
            }
            let region = flood_region(&mut mask, cols, rows, start);
            if region.cells < self.config.min_region_cells {
                continue;
            }

            let w_cells = region.max_col - region.min_col + 1;
            let h_cells = region.max_row - region.min_row + 1;
            let aspect = w_cells as f64 / h_cells as f64;
            let fill = region.cells as f64 / (w_cells * h_cells) as f64;
            if aspect < min_aspect || aspect > max_aspect || fill < self.config.min_box_fill {
                continue;
            }

            let bbox = BoundingBox::new(
                region.min_col as f64 * cell,
                region.min_row as f64 * cell,
                w_cells as f64 * cell,
                h_cells as f64 * cell,
            );
            if let Some(bbox) = bbox.clip_to(frame.width(), frame.height()) {
                faces.push(bbox);
            }
        }

        faces.sort_by(|a, b| b.area().total_cmp(&a.area()));
        faces.truncate(self.config.max_faces);
        Ok(faces)
    }

    fn name(&self) -> &'static str {
        "skin_tone"
    }
}

/// YCbCr skin test (BT.601).
fn is_skin(p: &Rgb<u8>) -> bool {
    let [r, g, b] = p.0.map(f64::from);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    y > 40.0 && (77.0..=127.0).contains(&cb) && (133.0..=173.0).contains(&cr)
}

struct Region {
    cells: usize,
    min_col: u32,
    max_col: u32,
    min_row: u32,
    max_row: u32,
}

/// Clears a 4-connected component from `mask` and returns its extent.
fn flood_region(mask: &mut [bool], cols: u32, rows: u32, start: usize) -> Region {
    let start_col = start as u32 % cols;
    let start_row = start as u32 / cols;
    let mut region = Region {
        cells: 0,
        min_col: start_col,
        max_col: start_col,
        min_row: start_row,
        max_row: start_row,
    };

    let mut queue = VecDeque::from([(start_col, start_row)]);
    mask[start] = false;

    while let Some((col, row)) = queue.pop_front() {
        region.cells += 1;
        region.min_col = region.min_col.min(col);
        region.max_col = region.max_col.max(col);
        region.min_row = region.min_row.min(row);
        region.max_row = region.max_row.max(row);

        let neighbours = [
            (col.wrapping_sub(1), row),
            (col + 1, row),
            (col, row.wrapping_sub(1)),
            (col, row + 1),
        ];
        for (c, r) in neighbours {
            if c >= cols || r >= rows {
                continue;
            }
            let idx = (r * cols + c) as usize;
            if mask[idx] {
                mask[idx] = false;
                queue.push_back((c, r));
            }
        }
    }
    region
}

/// Draw `boxes` onto `frame` as hollow rectangles.
pub fn draw_boxes(frame: &mut RgbImage, boxes: &[BoundingBox], color: Rgb<u8>, thickness: u32) {
    for bbox in boxes {
        let Some(bbox) = bbox.clip_to(frame.width(), frame.height()) else {
            continue;
        };
        for inset in 0..thickness {
            let inset = inset as f64;
            let inner = BoundingBox::new(
                bbox.x + inset,
                bbox.y + inset,
                bbox.width - 2.0 * inset,
                bbox.height - 2.0 * inset,
            );
            if inner.width < 1.0 || inner.height < 1.0 {
                break;
            }
            if let Some(rect) = inner.to_rect() {
                draw_hollow_rect_mut(frame, rect, color);
            }
        }
    }
}
