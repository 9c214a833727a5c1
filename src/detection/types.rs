// src/detection/types.rs

/// Axis-aligned pixel bounding box, inclusive of its first row/column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl BoundingBox {
    pub fn from_extents(min_x: usize, min_y: usize, max_x: usize, max_y: usize) -> Self {
        Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        }
    }
}

/// One candidate organism in one frame. Carries no identity; the associator
/// either folds it into a track or spawns a new one.
#[derive(Debug, Clone)]
pub struct Detection {
    pub centroid: (f64, f64),
    pub bbox: BoundingBox,
    /// Pixel count.
    pub area: usize,
    /// Member pixels (x, y), row-major order.
    pub pixels: Vec<(usize, usize)>,
}

impl Detection {
    pub fn from_pixels(pixels: Vec<(usize, usize)>) -> Option<Self> {
        let first = *pixels.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.0, first.1, first.0, first.1);
        let (mut sx, mut sy) = (0.0f64, 0.0f64);
        for &(x, y) in &pixels {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            sx += x as f64;
            sy += y as f64;
        }
        let n = pixels.len() as f64;
        Some(Self {
            centroid: (sx / n, sy / n),
            bbox: BoundingBox::from_extents(min_x, min_y, max_x, max_y),
            area: pixels.len(),
            pixels,
        })
    }

    pub fn distance_to(&self, point: (f64, f64)) -> f64 {
        let dx = self.centroid.0 - point.0;
        let dy = self.centroid.1 - point.1;
        (dx * dx + dy * dy).sqrt()
    }
}
