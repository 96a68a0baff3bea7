//! Quadrilateral candidates from a binary mask.

use image::GrayImage;
use nalgebra::{Point2, Vector2};

use crate::geometry::signed_area2;

/// Quad area over hull area below this means the blob isn't a quadrilateral
const MIN_FILL_RATIO: f64 = 0.85;
/// Minimum distance from a corner to the image border, in pixels
const MIN_BORDER_DISTANCE: f64 = 3.0;
const MIN_CORNER_DISTANCE_RATE: f64 = 0.05;
/// Refined corners that move further than this are discarded
const MAX_REFINE_SHIFT: f64 = 3.0;

/// A connected blob of dark pixels, stored as per-row extents
#[derive(Debug, Clone)]
pub struct Component {
    /// First row of the component
    pub top: u32,
    /// `(min_x, max_x)` for each row starting at `top`
    pub rows: Vec<(u32, u32)>,
    pub pixels: usize,
}
impl Component {
    /// Outline points at pixel corners (pixel centers sit on integer coordinates)
    fn outline(&self) -> Vec<Point2<f64>> {
        let mut pts = Vec::with_capacity(self.rows.len() * 4);
        for (i, &(x0, x1)) in self.rows.iter().enumerate() {
            if x0 > x1 {
                continue;
            }
            let y = (self.top as usize + i) as f64;
            let (l, r) = (x0 as f64 - 0.5, x1 as f64 + 0.5);
            pts.push(Point2::new(l, y - 0.5));
            pts.push(Point2::new(r, y - 0.5));
            pts.push(Point2::new(l, y + 0.5));
            pts.push(Point2::new(r, y + 0.5));
        }
        pts
    }
}

/// Label 8-connected components of `mask` (1 = set), in raster order of their first pixel
pub fn components(mask: &[u8], width: usize, height: usize, min_pixels: usize) -> Vec<Component> {
    let mut visited = vec![false; mask.len()];
    let mut stack = Vec::new();
    let mut out = Vec::new();

    for start in 0..mask.len() {
        if mask[start] == 0 || visited[start] {
            continue;
        }

        let top = (start / width) as u32;
        let mut comp = Component {
            top,
            rows: Vec::new(),
            pixels: 0,
        };

        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            comp.pixels += 1;

            let row = y - top as usize;
            if comp.rows.len() <= row {
                comp.rows.resize(row + 1, (u32::MAX, 0));
            }
            let ext = &mut comp.rows[row];
            ext.0 = ext.0.min(x as u32);
            ext.1 = ext.1.max(x as u32);

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let n = ny as usize * width + nx as usize;
                    if mask[n] != 0 && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        if comp.pixels >= min_pixels {
            out.push(comp);
        }
    }

    out
}

/// Convex hull (Andrew's monotone chain), positive signed area
pub fn convex_hull(mut pts: Vec<Point2<f64>>) -> Vec<Point2<f64>> {
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let cross = |o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>| {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    };

    let mut hull: Vec<Point2<f64>> = Vec::with_capacity(pts.len() * 2);
    // Lower half
    for p in &pts {
        while hull.len() >= 2 && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }
    // Upper half, never popping into the lower one
    let floor = hull.len() + 1;
    for p in pts.iter().rev().skip(1) {
        while hull.len() >= floor && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }
    hull.pop();
    hull
}

fn perimeter(poly: &[Point2<f64>]) -> f64 {
    (0..poly.len())
        .map(|i| (poly[(i + 1) % poly.len()] - poly[i]).norm())
        .sum()
}

/// Limits for [fit_quad]
#[derive(Debug, Clone, Copy)]
pub struct QuadLimits {
    pub min_perimeter: f64,
    pub max_perimeter: f64,
    pub width: f64,
    pub height: f64,
}

/// Fit a quadrilateral to a component's convex hull
///
/// Corners come back clockwise (in image coordinates), starting at an arbitrary corner.
pub fn fit_quad(comp: &Component, limits: &QuadLimits) -> Option<[Point2<f64>; 4]> {
    let hull = convex_hull(comp.outline());
    if hull.len() < 4 {
        return None;
    }

    let hull_perimeter = perimeter(&hull);
    if hull_perimeter < limits.min_perimeter || hull_perimeter > limits.max_perimeter {
        return None;
    }
    let hull_area = signed_area2(&hull) / 2.0;
    if hull_area <= 0.0 {
        return None;
    }

    let n = hull.len();
    let centroid = hull.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n as f64;
    let farthest = |from: Vector2<f64>| {
        (0..n)
            .max_by(|&i, &j| {
                (hull[i].coords - from)
                    .norm_squared()
                    .total_cmp(&(hull[j].coords - from).norm_squared())
            })
            .unwrap_or(0)
    };

    // Two opposite corners...
    let a = farthest(centroid);
    let c = farthest(hull[a].coords);
    if a == c {
        return None;
    }

    // ...and the points furthest from their diagonal on either side
    let (pa, pc) = (hull[a], hull[c]);
    let side = |p: &Point2<f64>| (pc.x - pa.x) * (p.y - pa.y) - (pc.y - pa.y) * (p.x - pa.x);
    let (mut b, mut d) = (None::<(usize, f64)>, None::<(usize, f64)>);
    for (i, p) in hull.iter().enumerate() {
        let s = side(p);
        if s > 0.0 && b.map_or(true, |(_, best)| s > best) {
            b = Some((i, s));
        }
        if s < 0.0 && d.map_or(true, |(_, best)| s < best) {
            d = Some((i, s));
        }
    }
    let (b, d) = (b?.0, d?.0);

    let mut quad = [pa, hull[b], pc, hull[d]];
    if signed_area2(&quad) < 0.0 {
        quad.swap(1, 3);
    }

    let quad_area = signed_area2(&quad) / 2.0;
    if quad_area / hull_area < MIN_FILL_RATIO {
        return None;
    }

    let quad_perimeter = perimeter(&quad);
    let min_side = (0..4)
        .map(|i| (quad[(i + 1) % 4] - quad[i]).norm())
        .fold(f64::INFINITY, f64::min);
    if min_side < (MIN_CORNER_DISTANCE_RATE * quad_perimeter).max(4.0) {
        return None;
    }

    let near_border = quad.iter().any(|p| {
        p.x < MIN_BORDER_DISTANCE
            || p.y < MIN_BORDER_DISTANCE
            || p.x > limits.width - 1.0 - MIN_BORDER_DISTANCE
            || p.y > limits.height - 1.0 - MIN_BORDER_DISTANCE
    });
    if near_border {
        return None;
    }

    Some(quad)
}

/// Bilinear sample with pixel centers on integer coordinates
pub fn sample_bilinear(gray: &GrayImage, x: f64, y: f64) -> Option<f64> {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    if x0 < 0 || y0 < 0 || x0 + 1 >= w || y0 + 1 >= h {
        return None;
    }
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);
    let px = |xx: i64, yy: i64| gray.get_pixel(xx as u32, yy as u32).0[0] as f64;

    let top = px(x0, y0) * (1.0 - fx) + px(x0 + 1, y0) * fx;
    let bottom = px(x0, y0 + 1) * (1.0 - fx) + px(x0 + 1, y0 + 1) * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Re-fit each side to the intensity edge and intersect neighbouring sides
///
/// For each side, points along it are searched outward/inward along the normal for the
/// strongest dark-to-light gradient, a line is fitted through them, and the corners are moved
/// to the intersections of adjacent lines.
pub fn refine_edges(gray: &GrayImage, quad: &mut [Point2<f64>; 4]) {
    let mut lines = [(Point2::origin(), Vector2::zeros()); 4];

    for (edge, line) in lines.iter_mut().enumerate() {
        let (a, b) = (quad[edge], quad[(edge + 1) % 4]);
        let d = b - a;
        let len = d.norm();
        if len < 1.0 {
            return;
        }
        // Outward normal for clockwise corners in image coordinates
        let normal = Vector2::new(d.y, -d.x) / len;

        let nsamples = ((len / 4.0) as usize).max(16);
        let range = 2.5;
        let step = 0.25;

        let mut fit = Vec::with_capacity(nsamples);
        for s in 0..nsamples {
            let alpha = (1.0 + s as f64) / (nsamples as f64 + 1.0);
            // Stay away from the corners, they're the least reliable part of an edge
            if !(0.1..=0.9).contains(&alpha) {
                continue;
            }
            let p0 = a + d * alpha;

            let (mut m_n, mut m_count) = (0.0, 0.0);
            let mut n = -range;
            while n <= range {
                let outside = p0 + normal * (n + 1.0);
                let inside = p0 + normal * (n - 1.0);
                if let (Some(g_out), Some(g_in)) = (
                    sample_bilinear(gray, outside.x, outside.y),
                    sample_bilinear(gray, inside.x, inside.y),
                ) {
                    // Only dark-inside, light-outside gradients belong to a marker border
                    if g_out > g_in {
                        let weight = (g_out - g_in) * (g_out - g_in);
                        m_n += weight * n;
                        m_count += weight;
                    }
                }
                n += step;
            }

            if m_count > 0.0 {
                fit.push(p0 + normal * (m_n / m_count));
            }
        }

        if fit.len() < 2 {
            return;
        }
        *line = fit_line(&fit);
    }

    let mut refined = *quad;
    for i in 0..4 {
        // Corner i + 1 sits between edge i and edge i + 1
        let (ea, da) = lines[i];
        let (eb, db) = lines[(i + 1) % 4];
        let det = da.x * (-db.y) - da.y * (-db.x);
        if det.abs() < 1e-9 {
            return;
        }
        let rhs = eb - ea;
        let s = (rhs.x * (-db.y) - rhs.y * (-db.x)) / det;
        let corner = ea + da * s;

        let idx = (i + 1) % 4;
        if (corner - quad[idx]).norm() > MAX_REFINE_SHIFT || !corner.x.is_finite() || !corner.y.is_finite() {
            return;
        }
        refined[idx] = corner;
    }

    *quad = refined;
}

/// Total least squares line through points: centroid and unit direction
fn fit_line(pts: &[Point2<f64>]) -> (Point2<f64>, Vector2<f64>) {
    let n = pts.len() as f64;
    let mean = pts.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let (mut cxx, mut cxy, mut cyy) = (0.0, 0.0, 0.0);
    for p in pts {
        let q = p.coords - mean;
        cxx += q.x * q.x;
        cxy += q.x * q.y;
        cyy += q.y * q.y;
    }
    let theta = 0.5 * (2.0 * cxy).atan2(cxx - cyy);
    (Point2::from(mean), Vector2::new(theta.cos(), theta.sin()))
}
