//! 4-RoSy and 4-PoSy field math.
//!
//! A 4-RoSy (rotational symmetry) direction at a vertex is represented by one
//! unit tangent vector `q`; the other three representatives are `q` rotated by
//! quarter turns about the vertex normal. A 4-PoSy (positional symmetry) value
//! is a lattice origin `o` of the square grid spanned by `q` and `n × q` with
//! the vertex's spacing.
//!
//! Matching between neighbours is expressed with [`Rot4`] frame indices and
//! integer lattice offsets, never by comparing raw angles.
//!
//! # References
//!
//! - Jakob, W., et al. (2015). "Instant Field-Aligned Meshes." ACM TOG 34(6).
//! - Huang, J., et al. (2018). "QuadriFlow: A Scalable and Robust Method for
//!   Quadrangulation." Computer Graphics Forum 37(5).

use std::f64::consts::{FRAC_PI_2, PI};
use std::ops::{Add, Neg, Sub};

use nalgebra::{Vector2, Vector3};

/// A rotation by a multiple of 90 degrees, stored modulo 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rot4(u8);

impl Rot4 {
    /// The identity rotation.
    pub const IDENTITY: Rot4 = Rot4(0);

    /// Create a rotation of `quarter_turns` (any sign) quarter turns.
    #[inline]
    pub fn new(quarter_turns: i32) -> Self {
        Rot4(quarter_turns.rem_euclid(4) as u8)
    }

    /// Number of quarter turns in `0..4`.
    #[inline]
    pub fn turns(self) -> i32 {
        self.0 as i32
    }

    /// Whether this is the identity.
    #[inline]
    pub fn is_identity(self) -> bool {
        self.0 == 0
    }

    /// Rotate a 3D tangent vector about `n` by this many quarter turns.
    #[inline]
    pub fn apply(self, q: &Vector3<f64>, n: &Vector3<f64>) -> Vector3<f64> {
        rotate90_by(q, n, self.turns())
    }

    /// Rotate an integer lattice vector: one quarter turn maps `(x, y)` to `(-y, x)`.
    #[inline]
    pub fn apply_int(self, v: Vector2<i32>) -> Vector2<i32> {
        match self.0 {
            0 => v,
            1 => Vector2::new(-v.y, v.x),
            2 => Vector2::new(-v.x, -v.y),
            _ => Vector2::new(v.y, -v.x),
        }
    }
}

impl Add for Rot4 {
    type Output = Rot4;

    fn add(self, rhs: Rot4) -> Rot4 {
        Rot4((self.0 + rhs.0) % 4)
    }
}

impl Sub for Rot4 {
    type Output = Rot4;

    fn sub(self, rhs: Rot4) -> Rot4 {
        Rot4((self.0 + 4 - rhs.0) % 4)
    }
}

impl Neg for Rot4 {
    type Output = Rot4;

    fn neg(self) -> Rot4 {
        Rot4((4 - self.0) % 4)
    }
}

/// Rotate `q` about the unit normal `n` by `k` quarter turns (counter-clockwise).
#[inline]
pub fn rotate90_by(q: &Vector3<f64>, n: &Vector3<f64>, k: i32) -> Vector3<f64> {
    match k.rem_euclid(4) {
        0 => *q,
        1 => n.cross(q),
        2 => -q,
        _ => q.cross(n),
    }
}

/// Project `v` into the plane with unit normal `n`.
#[inline]
pub fn project_tangent(v: &Vector3<f64>, n: &Vector3<f64>) -> Vector3<f64> {
    v - n * n.dot(v)
}

/// A deterministic unit tangent basis `(e1, n × e1)` for the plane of `n`.
pub fn tangent_basis(n: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    // Cross with the coordinate axis least aligned with n.
    let axis = if n.x.abs() <= n.y.abs() && n.x.abs() <= n.z.abs() {
        Vector3::x()
    } else if n.y.abs() <= n.z.abs() {
        Vector3::y()
    } else {
        Vector3::z()
    };
    let e1 = n.cross(&axis).normalize();
    (e1, n.cross(&e1))
}

/// Orient a unit vector into the tangent plane, falling back to the basis.
pub fn tangent_unit(v: &Vector3<f64>, n: &Vector3<f64>) -> Vector3<f64> {
    project_tangent(v, n)
        .try_normalize(1e-12)
        .unwrap_or_else(|| tangent_basis(n).0)
}

/// Best matching representatives of two 4-RoSy directions.
///
/// Returns `(a, b)` where `a` is a representative of `q0` and `b` of `q1`
/// such that `|a · b|` is maximal and `a · b >= 0`.
#[inline]
pub fn compat_orientation_extrinsic_4(
    q0: &Vector3<f64>,
    n0: &Vector3<f64>,
    q1: &Vector3<f64>,
    n1: &Vector3<f64>,
) -> (Vector3<f64>, Vector3<f64>) {
    let a = [*q0, n0.cross(q0)];
    let b = [*q1, n1.cross(q1)];

    let mut best = (0, 0);
    let mut best_score = f64::NEG_INFINITY;
    for (i, ai) in a.iter().enumerate() {
        for (j, bj) in b.iter().enumerate() {
            let score = ai.dot(bj).abs();
            if score > best_score + 1e-6 {
                best_score = score;
                best = (i, j);
            }
        }
    }
    let dp = a[best.0].dot(&b[best.1]);
    (a[best.0], b[best.1] * dp.signum())
}

/// Frame indices of the best matching representatives of two directions.
///
/// Returns `(r0, r1)` such that `r0.apply(q0, n0)` and `r1.apply(q1, n1)` are
/// the matched pair of [`compat_orientation_extrinsic_4`].
pub fn compat_orientation_extrinsic_index_4(
    q0: &Vector3<f64>,
    n0: &Vector3<f64>,
    q1: &Vector3<f64>,
    n1: &Vector3<f64>,
) -> (Rot4, Rot4) {
    let a = [*q0, n0.cross(q0)];
    let b = [*q1, n1.cross(q1)];

    let mut best = (0, 0);
    let mut best_score = f64::NEG_INFINITY;
    for (i, ai) in a.iter().enumerate() {
        for (j, bj) in b.iter().enumerate() {
            let score = ai.dot(bj).abs();
            if score > best_score + 1e-6 {
                best_score = score;
                best = (i, j);
            }
        }
    }
    let dp = a[best.0].dot(&b[best.1]);
    let flip = if dp < 0.0 { 2 } else { 0 };
    (Rot4::new(best.0 as i32), Rot4::new(best.1 as i32 + flip))
}

/// Edge energy of a matched orientation pair, `|a - b|²`.
///
/// Equal to `2 - 2 max |dot|` over the representative pairs, which makes it
/// exactly symmetric in its two arguments.
#[inline]
pub fn orientation_mismatch(
    q0: &Vector3<f64>,
    n0: &Vector3<f64>,
    q1: &Vector3<f64>,
    n1: &Vector3<f64>,
) -> f64 {
    let t0 = n0.cross(q0);
    let t1 = n1.cross(q1);
    let best = q0
        .dot(q1)
        .abs()
        .max(q0.dot(&t1).abs())
        .max(t0.dot(q1).abs())
        .max(t0.dot(&t1).abs());
    2.0 - 2.0 * best
}

// ==================== Connection ====================

/// Angle of the minimal-rotation transport of `e1_i` expressed in `j`'s basis.
///
/// The rotation maps `n_i` onto `n_j` about their common axis; if a tangent
/// vector has angle `θ` in `i`'s basis, its transport has angle `θ + ρ` in
/// `j`'s basis.
pub fn transport_angle(
    n_i: &Vector3<f64>,
    e1_i: &Vector3<f64>,
    n_j: &Vector3<f64>,
    e1_j: &Vector3<f64>,
    e2_j: &Vector3<f64>,
) -> f64 {
    let w = n_i.cross(n_j);
    let c = n_i.dot(n_j);
    // R v = v + w × v + w × (w × v) / (1 + c)
    let wv = w.cross(e1_i);
    let transported = e1_i + wv + w.cross(&wv) / (1.0 + c).max(1e-12);
    transported.dot(e2_j).atan2(transported.dot(e1_j))
}

/// Angle of a tangent vector in the basis `(e1, e2)`.
#[inline]
pub fn angle_in_basis(q: &Vector3<f64>, e1: &Vector3<f64>, e2: &Vector3<f64>) -> f64 {
    q.dot(e2).atan2(q.dot(e1))
}

/// Integer period jump between two directions given their basis angles and
/// the transport angle: `round((θ_j - θ_i - ρ) / (π/2))`.
#[inline]
pub fn period_jump(theta_i: f64, theta_j: f64, rho: f64) -> i32 {
    ((theta_j - theta_i - rho) / FRAC_PI_2).round() as i32
}

/// Wrap an angle into `(-π, π]`.
#[inline]
pub fn wrap_angle(a: f64) -> f64 {
    let mut r = a.rem_euclid(2.0 * PI);
    if r > PI {
        r -= 2.0 * PI;
    }
    r
}

// ==================== Position lattice ====================

/// Tangent-plane midpoint of two oriented points.
///
/// Finds the point closest to both tangent planes and the segment midpoint.
pub fn middle_point(
    p0: &Vector3<f64>,
    n0: &Vector3<f64>,
    p1: &Vector3<f64>,
    n1: &Vector3<f64>,
) -> Vector3<f64> {
    let n0p0 = n0.dot(p0);
    let n0p1 = n0.dot(p1);
    let n1p0 = n1.dot(p0);
    let n1p1 = n1.dot(p1);
    let n0n1 = n0.dot(n1);
    let denom = 1.0 / (1.0 - n0n1 * n0n1 + 1e-4);
    let lambda_0 = 2.0 * (n0p1 - n0p0 - n0n1 * (n1p0 - n1p1)) * denom;
    let lambda_1 = 2.0 * (n1p0 - n1p1 - n0n1 * (n0p1 - n0p0)) * denom;
    0.5 * (p0 + p1) - 0.25 * (n0 * lambda_0 + n1 * lambda_1)
}

/// Lattice cell (lower corner) containing `p` in the grid through `o`.
#[inline]
pub fn position_floor_index_4(
    o: &Vector3<f64>,
    q: &Vector3<f64>,
    n: &Vector3<f64>,
    p: &Vector3<f64>,
    inv_scale: f64,
) -> Vector2<i32> {
    let t = n.cross(q);
    let d = p - o;
    Vector2::new(
        (q.dot(&d) * inv_scale).floor() as i32,
        (t.dot(&d) * inv_scale).floor() as i32,
    )
}

/// Lattice point nearest to `p` in the grid through `o`, as integer offsets.
#[inline]
pub fn position_round_index_4(
    o: &Vector3<f64>,
    q: &Vector3<f64>,
    n: &Vector3<f64>,
    p: &Vector3<f64>,
    inv_scale: f64,
) -> Vector2<i32> {
    let t = n.cross(q);
    let d = p - o;
    Vector2::new(
        (q.dot(&d) * inv_scale).round() as i32,
        (t.dot(&d) * inv_scale).round() as i32,
    )
}

/// Lower lattice corner of the cell containing `p` in the grid through `o`.
#[inline]
pub fn position_floor_4(
    o: &Vector3<f64>,
    q: &Vector3<f64>,
    n: &Vector3<f64>,
    p: &Vector3<f64>,
    scale: f64,
) -> Vector3<f64> {
    let idx = position_floor_index_4(o, q, n, p, 1.0 / scale);
    lattice_point(o, q, n, idx, scale)
}

/// Lattice point nearest to `p` in the grid through `o`.
#[inline]
pub fn position_round_4(
    o: &Vector3<f64>,
    q: &Vector3<f64>,
    n: &Vector3<f64>,
    p: &Vector3<f64>,
    scale: f64,
) -> Vector3<f64> {
    let idx = position_round_index_4(o, q, n, p, 1.0 / scale);
    lattice_point(o, q, n, idx, scale)
}

/// The point `o + scale (x q + y (n × q))`.
#[inline]
pub fn lattice_point(
    o: &Vector3<f64>,
    q: &Vector3<f64>,
    n: &Vector3<f64>,
    idx: Vector2<i32>,
    scale: f64,
) -> Vector3<f64> {
    let t = n.cross(q);
    o + (q * idx.x as f64 + t * idx.y as f64) * scale
}

/// One endpoint of a position comparison: an oriented point with its field values.
#[derive(Debug, Clone, Copy)]
pub struct LatticeSample<'a> {
    /// Vertex position.
    pub p: &'a Vector3<f64>,
    /// Vertex normal.
    pub n: &'a Vector3<f64>,
    /// Orientation representative.
    pub q: &'a Vector3<f64>,
    /// Lattice origin.
    pub o: &'a Vector3<f64>,
    /// Lattice spacing.
    pub scale: f64,
}

fn cell_offset(k: usize) -> Vector2<i32> {
    Vector2::new((k & 1) as i32, ((k & 2) >> 1) as i32)
}

/// Search the 4×4 corner pairs of the cells around the shared midpoint.
fn closest_corners(a: &LatticeSample, b: &LatticeSample) -> (Vector2<i32>, Vector2<i32>) {
    let middle = middle_point(a.p, a.n, b.p, b.n);
    let base0 = position_floor_index_4(a.o, a.q, a.n, &middle, 1.0 / a.scale);
    let base1 = position_floor_index_4(b.o, b.q, b.n, &middle, 1.0 / b.scale);

    let mut best = (base0, base1);
    let mut best_cost = f64::INFINITY;
    for i in 0..4 {
        let i0 = base0 + cell_offset(i);
        let o0 = lattice_point(a.o, a.q, a.n, i0, a.scale);
        for j in 0..4 {
            let i1 = base1 + cell_offset(j);
            let o1 = lattice_point(b.o, b.q, b.n, i1, b.scale);
            let cost = (o0 - o1).norm_squared();
            if cost < best_cost {
                best_cost = cost;
                best = (i0, i1);
            }
        }
    }
    best
}

/// Closest pair of lattice points of two neighbouring grids near their midpoint.
pub fn compat_position_extrinsic_4(
    a: &LatticeSample,
    b: &LatticeSample,
) -> (Vector3<f64>, Vector3<f64>) {
    let (i0, i1) = closest_corners(a, b);
    (
        lattice_point(a.o, a.q, a.n, i0, a.scale),
        lattice_point(b.o, b.q, b.n, i1, b.scale),
    )
}

/// Integer offsets (from each origin) of the closest lattice point pair.
pub fn compat_position_extrinsic_index_4(
    a: &LatticeSample,
    b: &LatticeSample,
) -> (Vector2<i32>, Vector2<i32>) {
    closest_corners(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rot4_algebra() {
        let r = Rot4::new(3);
        assert_eq!(r + Rot4::new(1), Rot4::IDENTITY);
        assert_eq!(-r, Rot4::new(1));
        assert_eq!(Rot4::new(-1), r);
        assert_eq!(Rot4::new(1) - Rot4::new(2), r);
        let v = Vector2::new(2, 1);
        assert_eq!(Rot4::new(1).apply_int(v), Vector2::new(-1, 2));
        assert_eq!(r.apply_int(Rot4::new(1).apply_int(v)), v);
    }

    #[test]
    fn test_rotate90_matches_integer_rotation() {
        let n = Vector3::z();
        let q = Vector3::x();
        let t = n.cross(&q);
        for k in 0..4 {
            let r = Rot4::new(k);
            let idx = r.apply_int(Vector2::new(1, 0));
            let expected = q * idx.x as f64 + t * idx.y as f64;
            assert!((r.apply(&q, &n) - expected).norm() < 1e-12);
        }
    }

    #[test]
    fn test_compat_orientation_picks_closest_representative() {
        let n = Vector3::z();
        let q0 = Vector3::x();
        let q1 = Vector3::new(0.1, 1.0, 0.0).normalize();
        let (a, b) = compat_orientation_extrinsic_4(&q0, &n, &q1, &n);
        assert!(a.dot(&b) > 0.99);
        let (r0, r1) = compat_orientation_extrinsic_index_4(&q0, &n, &q1, &n);
        assert!((r0.apply(&q0, &n) - a).norm() < 1e-12);
        assert!((r1.apply(&q1, &n) - b).norm() < 1e-12);
        assert!(orientation_mismatch(&q0, &n, &q1, &n) < 0.02);
    }

    #[test]
    fn test_transport_is_antisymmetric() {
        let n_i = Vector3::new(0.0, 0.2, 1.0).normalize();
        let n_j = Vector3::new(0.3, -0.1, 1.0).normalize();
        let (e1_i, e2_i) = tangent_basis(&n_i);
        let (e1_j, e2_j) = tangent_basis(&n_j);
        let rho_ij = transport_angle(&n_i, &e1_i, &n_j, &e1_j, &e2_j);
        let rho_ji = transport_angle(&n_j, &e1_j, &n_i, &e1_i, &e2_i);
        assert!(wrap_angle(rho_ij + rho_ji).abs() < 1e-9);
    }

    #[test]
    fn test_period_jump_and_wrap() {
        assert_eq!(period_jump(0.0, FRAC_PI_2 + 0.1, 0.0), 1);
        assert_eq!(period_jump(0.2, -PI + 0.2, 0.0), -2);
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(-0.5) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_middle_point_of_coplanar_points() {
        let n = Vector3::z();
        let p0 = Vector3::new(0.0, 0.0, 0.0);
        let p1 = Vector3::new(2.0, 0.0, 0.0);
        let m = middle_point(&p0, &n, &p1, &n);
        assert!((m - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn test_position_rounding() {
        let n = Vector3::z();
        let q = Vector3::x();
        let o = Vector3::new(0.1, 0.1, 0.0);
        let p = Vector3::new(1.45, -0.8, 0.0);
        let r = position_round_4(&o, &q, &n, &p, 0.5);
        assert!((r - Vector3::new(1.6, -0.9, 0.0)).norm() < 1e-12);
        let f = position_floor_4(&o, &q, &n, &p, 0.5);
        assert!((f - Vector3::new(1.1, -0.9, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_compat_position_on_shared_lattice() {
        let n = Vector3::z();
        let q = Vector3::x();
        let p0 = Vector3::new(0.0, 0.0, 0.0);
        let p1 = Vector3::new(1.0, 0.2, 0.0);
        let o0 = Vector3::new(0.0, 0.0, 0.0);
        let o1 = Vector3::new(1.0, 0.0, 0.0);
        let a = LatticeSample { p: &p0, n: &n, q: &q, o: &o0, scale: 1.0 };
        let b = LatticeSample { p: &p1, n: &n, q: &q, o: &o1, scale: 1.0 };
        let (x0, x1) = compat_position_extrinsic_4(&a, &b);
        assert!((x0 - x1).norm() < 1e-12);
        let (i0, i1) = compat_position_extrinsic_index_4(&a, &b);
        // o1 - o0 = i0 - i1 in lattice units
        assert_eq!(i0 - i1, Vector2::new(1, 0));
    }
}
