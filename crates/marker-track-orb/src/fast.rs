//! FAST-9 corners ranked by Harris response.

use image::GrayImage;
use marker_track_core::KeyPoint;

// Bresenham circle of radius 3, clockwise from the top.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

const ARC: usize = 9;
const HARRIS_RADIUS: i32 = 3;

pub(crate) struct FastParams {
    pub threshold: u8,
    pub nms_cell: u32,
    pub harris_k: f32,
    /// Corners closer than this to the border are skipped.
    pub border: u32,
    pub orientation_radius: i32,
}

#[inline]
fn px(img: &GrayImage, x: i32, y: i32) -> i16 {
    // callers keep (x, y) inside the image
    img.as_raw()[y as usize * img.width() as usize + x as usize] as i16
}

fn longest_run(flags: u16) -> usize {
    let mut run = 0;
    let mut best = 0;
    for i in 0..32 {
        if flags & (1 << (i % 16)) != 0 {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best.min(16)
}

fn is_corner(img: &GrayImage, x: i32, y: i32, t: i16) -> bool {
    let c = px(img, x, y);

    // cardinal pre-test: any 9-arc covers at least 2 of the 4 compass points
    let card = [0usize, 4, 8, 12].map(|i| px(img, x + CIRCLE[i].0, y + CIRCLE[i].1));
    let bright = card.iter().filter(|&&v| v > c + t).count();
    let dark = card.iter().filter(|&&v| v < c - t).count();
    if bright < 2 && dark < 2 {
        return false;
    }

    let mut bright_flags = 0u16;
    let mut dark_flags = 0u16;
    for (i, &(dx, dy)) in CIRCLE.iter().enumerate() {
        let v = px(img, x + dx, y + dy);
        if v > c + t {
            bright_flags |= 1 << i;
        } else if v < c - t {
            dark_flags |= 1 << i;
        }
    }
    longest_run(bright_flags) >= ARC || longest_run(dark_flags) >= ARC
}

fn harris(img: &GrayImage, x: i32, y: i32, k: f32) -> f32 {
    let (mut sxx, mut syy, mut sxy) = (0.0f32, 0.0f32, 0.0f32);
    for dy in -HARRIS_RADIUS..=HARRIS_RADIUS {
        for dx in -HARRIS_RADIUS..=HARRIS_RADIUS {
            let (u, v) = (x + dx, y + dy);
            let ix = (px(img, u + 1, v) - px(img, u - 1, v)) as f32 * 0.5;
            let iy = (px(img, u, v + 1) - px(img, u, v - 1)) as f32 * 0.5;
            sxx += ix * ix;
            syy += iy * iy;
            sxy += ix * iy;
        }
    }
    let det = sxx * syy - sxy * sxy;
    let tr = sxx + syy;
    det - k * tr * tr
}

/// Intensity-centroid angle over a disc of `radius`.
pub(crate) fn orientation(img: &GrayImage, x: i32, y: i32, radius: i32) -> f32 {
    let (mut m10, mut m01) = (0.0f32, 0.0f32);
    let r2 = radius * radius;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = px(img, x + dx, y + dy) as f32;
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}

/// Detect corners, keep the strongest per `nms_cell` cell, strongest first.
///
/// Ordering is total (response, then row, then column), so output is
/// deterministic for a given image.
pub(crate) fn detect(img: &GrayImage, p: &FastParams) -> Vec<KeyPoint> {
    let (w, h) = img.dimensions();
    let border = p.border.max(HARRIS_RADIUS as u32 + 1).max(3);
    if w <= 2 * border || h <= 2 * border {
        return Vec::new();
    }

    let cell = p.nms_cell.max(1);
    let cols = w.div_ceil(cell) as usize;
    let rows = h.div_ceil(cell) as usize;
    let mut grid: Vec<Option<KeyPoint>> = vec![None; cols * rows];
    let t = p.threshold as i16;

    for y in border..(h - border) {
        for x in border..(w - border) {
            let (xi, yi) = (x as i32, y as i32);
            if !is_corner(img, xi, yi, t) {
                continue;
            }
            let response = harris(img, xi, yi, p.harris_k);
            let slot = &mut grid[(y / cell) as usize * cols + (x / cell) as usize];
            // scan order makes the first of equal responses win
            if slot.is_some_and(|kp| kp.response >= response) {
                continue;
            }
            *slot = Some(KeyPoint {
                x: x as f32,
                y: y as f32,
                response,
                angle: orientation(img, xi, yi, p.orientation_radius),
            });
        }
    }

    let mut kps: Vec<KeyPoint> = grid.into_iter().flatten().collect();
    kps.sort_by(|a, b| {
        b.response
            .total_cmp(&a.response)
            .then(a.y.total_cmp(&b.y))
            .then(a.x.total_cmp(&b.x))
    });
    kps
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn params() -> FastParams {
        FastParams {
            threshold: 20,
            nms_cell: 8,
            harris_k: 0.04,
            border: 16,
            orientation_radius: 7,
        }
    }

    #[test]
    fn uniform_image_has_no_corners() {
        let img = GrayImage::from_pixel(80, 80, Luma([128]));
        assert!(detect(&img, &params()).is_empty());
    }

    #[test]
    fn tiny_image_is_skipped() {
        let img = GrayImage::new(20, 20);
        assert!(detect(&img, &params()).is_empty());
    }

    #[test]
    fn finds_corner_of_bright_square() {
        let mut img = GrayImage::from_pixel(100, 100, Luma([30]));
        for y in 40..70 {
            for x in 40..70 {
                img.put_pixel(x, y, Luma([220]));
            }
        }
        let kps = detect(&img, &params());
        assert!(!kps.is_empty());
        assert!(kps
            .iter()
            .any(|kp| (kp.x - 40.0).abs() <= 3.0 && (kp.y - 40.0).abs() <= 3.0));
        assert!(kps.windows(2).all(|w| w[0].response >= w[1].response));
    }

    #[test]
    fn run_length_wraps_around() {
        // bits 12..16 and 0..5 set: a run of 9 across the seam
        let flags: u16 = 0b1111_0000_0001_1111;
        assert_eq!(longest_run(flags), 9);
        assert_eq!(longest_run(0), 0);
        assert_eq!(longest_run(u16::MAX), 16);
    }
}
