//! Polygon measurements and rasterization for traced mask contours.
//!
//! Contours are traced with `imageproc` and treated as closed polygons through
//! the centers of their border pixels, so areas and moments match the usual
//! polygon (Green's theorem) definitions rather than pixel counts.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;

/// Outer borders of the top-level foreground regions of a mask.
///
/// Regions nested inside holes of other regions are not reported.
#[must_use]
pub fn external_contours(mask: &GrayImage) -> Vec<Vec<Point<i32>>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| c.points)
        .collect()
}

/// Zeroth and first order spatial moments of a closed polygon.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    /// Area.
    pub m00: f64,
    /// First moment about the y axis.
    pub m10: f64,
    /// First moment about the x axis.
    pub m01: f64,
}

impl Moments {
    /// Centroid truncated toward zero, or `None` for a zero-area polygon.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn centroid(&self) -> Option<(i32, i32)> {
        if self.m00 == 0.0 {
            return None;
        }
        Some(((self.m10 / self.m00) as i32, (self.m01 / self.m00) as i32))
    }
}

/// Moments of the polygon described by `points`, independent of winding.
#[must_use]
pub fn moments(points: &[Point<i32>]) -> Moments {
    let Some(&last) = points.last() else {
        return Moments::default();
    };

    let (mut a00, mut a10, mut a01) = (0.0_f64, 0.0_f64, 0.0_f64);
    let mut prev = last;
    for &p in points {
        let (xp, yp) = (f64::from(prev.x), f64::from(prev.y));
        let (x, y) = (f64::from(p.x), f64::from(p.y));
        let cross = xp * y - x * yp;
        a00 += cross;
        a10 += cross * (xp + x);
        a01 += cross * (yp + y);
        prev = p;
    }

    let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
    Moments {
        m00: sign * a00 / 2.0,
        m10: sign * a10 / 6.0,
        m01: sign * a01 / 6.0,
    }
}

/// Area enclosed by the polygon described by `points`.
#[must_use]
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    moments(points).m00
}

/// Fill the polygon described by `points`, border pixels included.
///
/// Interior pixels are found by even-odd scanline crossing with a half-open
/// edge rule, which keeps crossings paired on every row.
#[allow(clippy::cast_possible_truncation)]
pub fn fill_contour(canvas: &mut GrayImage, points: &[Point<i32>], value: u8) {
    let (width, height) = canvas.dimensions();
    let (Ok(max_x), Ok(max_y)) = (i32::try_from(width), i32::try_from(height)) else {
        return;
    };
    let inside = |x: i32, y: i32| x >= 0 && y >= 0 && x < max_x && y < max_y;

    if points.len() >= 3 {
        let y_lo = points.iter().map(|p| p.y).min().unwrap_or(0).max(0);
        let y_hi = points.iter().map(|p| p.y).max().unwrap_or(0).min(max_y - 1);
        let mut crossings: Vec<f64> = Vec::new();

        for y in y_lo..=y_hi {
            crossings.clear();
            for (i, p0) in points.iter().enumerate() {
                let p1 = points[(i + 1) % points.len()];
                if (p0.y <= y) != (p1.y <= y) {
                    let t = f64::from(y - p0.y) / f64::from(p1.y - p0.y);
                    crossings.push(f64::from(p0.x) + t * f64::from(p1.x - p0.x));
                }
            }
            crossings.sort_by(f64::total_cmp);

            for pair in crossings.chunks_exact(2) {
                let from = (pair[0].ceil() as i32).max(0);
                let to = (pair[1].floor() as i32).min(max_x - 1);
                for x in from..=to {
                    canvas.put_pixel(x.unsigned_abs(), y.unsigned_abs(), Luma([value]));
                }
            }
        }
    }

    for p in points.iter().filter(|p| inside(p.x, p.y)) {
        canvas.put_pixel(p.x.unsigned_abs(), p.y.unsigned_abs(), Luma([value]));
    }
}
