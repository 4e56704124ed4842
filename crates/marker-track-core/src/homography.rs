use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};

use crate::ReferenceShape;

/// Projective transform `p_frame ~ H * p_marker`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    /// Build from row-major entries.
    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    /// Map a point. Returns `None` when the point lands on the line at infinity.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        if v.z.abs() < 1e-12 {
            return None;
        }
        let out = Point2::new(v.x / v.z, v.y / v.z);
        (out.x.is_finite() && out.y.is_finite()).then_some(out)
    }

    /// Project the four reference corners `(0,0),(w,0),(w,h),(0,h)`.
    pub fn project_shape(&self, shape: ReferenceShape) -> Option<[Point2<f64>; 4]> {
        let [a, b, c, d] = shape.corners();
        Some([
            self.apply(a)?,
            self.apply(b)?,
            self.apply(c)?,
            self.apply(d)?,
        ])
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Determinant of `H` scaled so that `H[2,2] == 1`; near zero means the
    /// transform collapses the plane.
    pub fn normalized_determinant(&self) -> f64 {
        scale_to_unit(self.h).map_or(0.0, |m| m.determinant())
    }
}

/// Similarity that moves the centroid to the origin and scales the mean
/// distance from it to sqrt(2), plus the conditioned points.
fn condition(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    let n = pts.len() as f64;
    let centroid = pts
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + Vector3::new(p.x, p.y, 0.0))
        / n;
    let spread = pts
        .iter()
        .map(|p| (p.x - centroid.x).hypot(p.y - centroid.y))
        .sum::<f64>()
        / n;
    let s = if spread > 1e-12 {
        std::f64::consts::SQRT_2 / spread
    } else {
        1.0
    };

    let t = Matrix3::new(
        s, 0.0, -s * centroid.x, //
        0.0, s, -s * centroid.y, //
        0.0, 0.0, 1.0,
    );
    let conditioned = pts
        .iter()
        .map(|p| Point2::new(s * (p.x - centroid.x), s * (p.y - centroid.y)))
        .collect();
    (conditioned, t)
}

/// Twice the signed area of the triangle `abc`.
#[inline]
pub(crate) fn triangle_area2(a: Point2<f64>, b: Point2<f64>, c: Point2<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

// Expects conditioned points, so an absolute tolerance is meaningful.
fn any_three_collinear(pts: &[Point2<f64>]) -> bool {
    const EPS: f64 = 1e-9;
    (0..pts.len()).any(|i| {
        (i + 1..pts.len())
            .any(|j| (j + 1..pts.len()).any(|k| triangle_area2(pts[i], pts[j], pts[k]).abs() < EPS))
    })
}

fn scale_to_unit(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = h[(2, 2)];
    (s.abs() >= 1e-12).then(|| h / s)
}

/// Undo the conditioning: `H = T_dst^-1 * Hn * T_src`, scaled to `h33 = 1`.
fn uncondition(hn: Matrix3<f64>, t_src: Matrix3<f64>, t_dst: Matrix3<f64>) -> Option<Homography> {
    let h = t_dst.try_inverse()? * hn * t_src;
    scale_to_unit(h).map(Homography::new)
}

/// Estimate H such that `dst ~ H * src` with the conditioned DLT.
///
/// Exactly four points use the closed-form [`homography_from_4pt`]; more
/// points are solved in the least-squares sense via SVD.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    if let (Ok(s), Ok(d)) = (
        <&[Point2<f64>; 4]>::try_from(src),
        <&[Point2<f64>; 4]>::try_from(dst),
    ) {
        return homography_from_4pt(s, d);
    }

    let (s, t_src) = condition(src);
    let (d, t_dst) = condition(dst);

    // two rows per pair; h is the null vector of A
    let mut a = DMatrix::<f64>::zeros(2 * s.len(), 9);
    for (k, (p, q)) in s.iter().zip(&d).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        a.row_mut(2 * k)
            .copy_from_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
        a.row_mut(2 * k + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
    }

    let v_t = a.svd(false, true).v_t?;
    let null = v_t.row(v_t.nrows().checked_sub(1)?);
    let hn = Matrix3::from_fn(|r, c| null[3 * r + c]);
    uncondition(hn, t_src, t_dst)
}

/// Closed-form H from exactly four correspondences (`h33 = 1`).
///
/// Returns `None` for degenerate configurations (three collinear points).
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    let (s, t_src) = condition(src);
    let (d, t_dst) = condition(dst);
    if any_three_collinear(&s) || any_three_collinear(&d) {
        return None;
    }

    // unknowns h11 h12 h13 h21 h22 h23 h31 h32
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (k, (p, q)) in s.iter().zip(&d).enumerate() {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        a.row_mut(2 * k)
            .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]);
        a.row_mut(2 * k + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]);
        b[2 * k] = u;
        b[2 * k + 1] = v;
    }

    let sol = a.lu().solve(&b)?;
    if sol.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let hn = Matrix3::from_fn(|r, c| if r == 2 && c == 2 { 1.0 } else { sol[3 * r + c] });
    uncondition(hn, t_src, t_dst)
}
