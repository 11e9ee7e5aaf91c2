//! Discrete curvature computation on meshes.
//!
//! This module provides the curvature estimates that drive the adaptive
//! scale field: Gaussian curvature from the angle defect, mean curvature from
//! the cotangent Laplacian and principal curvatures derived from both.
//!
//! # Curvature Types
//!
//! - **Gaussian curvature K**: Intrinsic curvature computed via angle defect
//! - **Mean curvature H**: Extrinsic curvature from the Laplace-Beltrami operator
//! - **Principal curvatures k1, k2**: Maximum and minimum normal curvatures
//!
//! Mean curvature is measured along the vertex normal, and boundary vertices
//! report zero Gaussian curvature (their angle defect measures the turning of
//! the boundary curve, not the surface), so flat patches are flat up to the rim.
//!
//! # Example
//!
//! ```
//! use quadmesh::algo::curvature::compute_curvature;
//! use quadmesh::mesh::{primitives, VertexId};
//!
//! let mesh = primitives::icosphere(1.0, 2).unwrap();
//! let result = compute_curvature(&mesh);
//! let (k1, k2) = result.principal(VertexId::new(0));
//! assert!(k1 >= k2);
//! ```
//!
//! # References
//!
//! - Meyer, M., et al. (2003). "Discrete Differential-Geometry Operators for
//!   Triangulated 2-Manifolds." Visualization and Mathematics III.

use std::f64::consts::PI;

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use crate::mesh::{EdgeId, SurfaceMesh, VertexId};

/// Result of curvature computation.
///
/// Contains per-vertex curvature values for all vertices in the mesh.
#[derive(Debug, Clone)]
pub struct CurvatureResult {
    /// Gaussian curvature (K) per vertex.
    gaussian: Vec<f64>,
    /// Mean curvature (H) per vertex (signed).
    mean: Vec<f64>,
    /// Maximum principal curvature (k1) per vertex.
    principal_max: Vec<f64>,
    /// Minimum principal curvature (k2) per vertex.
    principal_min: Vec<f64>,
}

impl CurvatureResult {
    /// Get Gaussian curvature at a vertex.
    #[inline]
    pub fn gaussian(&self, v: VertexId) -> f64 {
        self.gaussian[v.index()]
    }

    /// Get mean curvature at a vertex.
    #[inline]
    pub fn mean(&self, v: VertexId) -> f64 {
        self.mean[v.index()]
    }

    /// Get principal curvatures at a vertex.
    ///
    /// Returns (k1, k2) where k1 >= k2.
    #[inline]
    pub fn principal(&self, v: VertexId) -> (f64, f64) {
        (self.principal_max[v.index()], self.principal_min[v.index()])
    }

    /// Largest absolute principal curvature at a vertex, `|H| + sqrt(H² - K)`.
    #[inline]
    pub fn magnitude(&self, v: VertexId) -> f64 {
        let h = self.mean[v.index()];
        let k = self.gaussian[v.index()];
        h.abs() + (h * h - k).max(0.0).sqrt()
    }

    /// Get all Gaussian curvatures as a slice.
    #[inline]
    pub fn gaussian_values(&self) -> &[f64] {
        &self.gaussian
    }

    /// Get all mean curvatures as a slice.
    #[inline]
    pub fn mean_values(&self) -> &[f64] {
        &self.mean
    }

    /// Get the number of vertices.
    #[inline]
    pub fn len(&self) -> usize {
        self.gaussian.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.gaussian.is_empty()
    }
}

/// Compute the angle at vertex `a` in triangle (a, b, c).
fn triangle_angle(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> f64 {
    let ab = b - a;
    let ac = c - a;
    let denom = ab.norm() * ac.norm();
    if denom < 1e-20 {
        return 0.0;
    }
    (ab.dot(&ac) / denom).clamp(-1.0, 1.0).acos()
}

/// Compute the cotangent of the angle at vertex `a` in triangle (a, b, c).
fn cotangent_angle(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> f64 {
    let ab = b - a;
    let ac = c - a;
    let cross_norm = ab.cross(&ac).norm();
    if cross_norm < 1e-10 {
        0.0
    } else {
        ab.dot(&ac) / cross_norm
    }
}

/// Corner positions of the face of `e`, rotated so `e`'s origin comes first.
fn corner_positions(mesh: &SurfaceMesh, e: EdgeId) -> [Point3<f64>; 3] {
    let [p0, p1, p2] = mesh.face_positions(e.face());
    match e.corner() {
        0 => [p0, p1, p2],
        1 => [p1, p2, p0],
        _ => [p2, p0, p1],
    }
}

/// Compute the mixed Voronoi area of a vertex.
///
/// Uses the Meyer et al. formulation:
/// - Non-obtuse triangles: Voronoi area
/// - Obtuse at vertex: triangle_area / 2
/// - Obtuse elsewhere: triangle_area / 4
pub(crate) fn mixed_area(mesh: &SurfaceMesh, v: VertexId) -> f64 {
    let mut area = 0.0;
    let mut fallback = 0.0;
    for e in mesh.vertex_edges(v) {
        let [p, q, r] = corner_positions(mesh, e);
        let tri_area = 0.5 * (q - p).cross(&(r - p)).norm();
        fallback += tri_area / 3.0;

        let half_pi = PI / 2.0;
        let at_p = triangle_angle(&p, &q, &r);
        let at_q = triangle_angle(&q, &r, &p);
        let at_r = triangle_angle(&r, &p, &q);
        area += if at_p > half_pi {
            tri_area / 2.0
        } else if at_q > half_pi || at_r > half_pi {
            tri_area / 4.0
        } else {
            // (1/8) * (|pr|² cot(q) + |pq|² cot(r))
            0.125
                * ((r - p).norm_squared() * cotangent_angle(&q, &r, &p)
                    + (q - p).norm_squared() * cotangent_angle(&r, &p, &q))
        };
    }
    if area < 1e-12 {
        fallback
    } else {
        area
    }
}

/// Sum of corner angles at a vertex.
fn angle_sum(mesh: &SurfaceMesh, v: VertexId) -> f64 {
    mesh.vertex_edges(v)
        .map(|e| {
            let [p, q, r] = corner_positions(mesh, e);
            triangle_angle(&p, &q, &r)
        })
        .sum()
}

/// Unnormalized cotangent Laplacian of the position at a vertex.
///
/// Δx = ½ Σ (cot α + cot β)(x_j − x_i); its magnitude over the mixed area is 2H.
fn mean_curvature_normal(mesh: &SurfaceMesh, v: VertexId) -> Vector3<f64> {
    let p_v = *mesh.position(v);
    let mut laplacian = Vector3::zeros();
    let mut closing: Option<(usize, f64)> = None;

    for e in mesh.vertex_edges(v) {
        // Edge v -> j, opposite corner r in this face.
        let [p, q, r] = corner_positions(mesh, e);
        let j = mesh.dest(e).index();
        let mut cot_sum = cotangent_angle(&r, &p, &q);
        if let Some(t) = mesh.twin(e) {
            let [a, b, c] = corner_positions(mesh, t);
            cot_sum += cotangent_angle(&c, &a, &b);
        }
        laplacian += cot_sum.max(0.0) * (mesh.positions()[j] - p_v);

        // The last boundary edge (r -> v) is only seen from this face.
        if mesh.twin(e.prev()).is_none() {
            let r_id = mesh.origin(e.prev()).index();
            closing = Some((r_id, cotangent_angle(&q, &r, &p).max(0.0)));
        }
    }
    if let Some((r, cot)) = closing {
        laplacian += cot * (mesh.positions()[r] - p_v);
    }
    0.5 * laplacian
}

/// Compute all curvatures (Gaussian, mean, and principal) for all vertices.
///
/// Mean curvature is signed against the area-weighted vertex normal
/// (positive on a sphere with outward faces). This
/// function uses parallel computation by default; use
/// [`compute_curvature_sequential`] for single-threaded execution.
pub fn compute_curvature(mesh: &SurfaceMesh) -> CurvatureResult {
    compute_curvature_impl(mesh, true)
}

/// Compute all curvatures (sequential version).
pub fn compute_curvature_sequential(mesh: &SurfaceMesh) -> CurvatureResult {
    compute_curvature_impl(mesh, false)
}

/// Per-vertex curvature data computed in parallel.
#[derive(Debug, Clone)]
struct VertexCurvature {
    gaussian: f64,
    mean: f64,
    principal_max: f64,
    principal_min: f64,
}

fn compute_curvature_impl(mesh: &SurfaceMesh, parallel: bool) -> CurvatureResult {
    let n = mesh.num_vertices();

    let compute_vertex = |idx: usize| -> VertexCurvature {
        let v = VertexId::new(idx);
        let area = mixed_area(mesh, v);
        if area <= 1e-12 {
            return VertexCurvature {
                gaussian: 0.0,
                mean: 0.0,
                principal_max: 0.0,
                principal_min: 0.0,
            };
        }

        let k = if mesh.is_boundary_vertex(v) {
            0.0
        } else {
            (2.0 * PI - angle_sum(mesh, v)) / area
        };

        let laplacian = mean_curvature_normal(mesh, v) / area;
        let normal: Vector3<f64> = mesh
            .vertex_edges(v)
            .map(|e| {
                let [p, q, r] = corner_positions(mesh, e);
                (q - p).cross(&(r - p))
            })
            .sum();
        let h = match normal.try_normalize(1e-20) {
            // Δx = -2H n
            Some(n) => -0.5 * laplacian.dot(&n),
            None => 0.0,
        };

        // Principal curvatures: k1, k2 = H ± sqrt(H² - K)
        let sqrt_disc = (h * h - k).max(0.0).sqrt();
        VertexCurvature {
            gaussian: k,
            mean: h,
            principal_max: h + sqrt_disc,
            principal_min: h - sqrt_disc,
        }
    };

    let results: Vec<VertexCurvature> = if parallel {
        (0..n).into_par_iter().map(compute_vertex).collect()
    } else {
        (0..n).map(compute_vertex).collect()
    };

    let mut gaussian = Vec::with_capacity(n);
    let mut mean = Vec::with_capacity(n);
    let mut principal_max = Vec::with_capacity(n);
    let mut principal_min = Vec::with_capacity(n);
    for vc in results {
        gaussian.push(vc.gaussian);
        mean.push(vc.mean);
        principal_max.push(vc.principal_max);
        principal_min.push(vc.principal_min);
    }

    CurvatureResult {
        gaussian,
        mean,
        principal_max,
        principal_min,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::primitives;

    #[test]
    fn test_curvature_flat_plane() {
        let mesh = primitives::grid(4, 4, 4.0, 4.0).unwrap();
        let result = compute_curvature(&mesh);
        for v in mesh.vertex_ids() {
            assert!(result.gaussian(v).abs() < 1e-9, "K at {:?}", v);
            assert!(result.mean(v).abs() < 1e-9, "H at {:?}", v);
            assert!(result.magnitude(v) < 1e-6);
        }
    }

    #[test]
    fn test_gauss_bonnet() {
        // ∫K dA = 2π χ = 4π on a sphere
        let mesh = primitives::icosphere(1.0, 2).unwrap();
        let gaussian = compute_curvature(&mesh);
        let total: f64 = mesh
            .vertex_ids()
            .map(|v| gaussian.gaussian(v) * mixed_area(&mesh, v))
            .sum();
        assert!((total - 4.0 * PI).abs() < 1e-6, "got {}", total);
    }

    #[test]
    fn test_sphere_curvature_magnitude() {
        let mesh = primitives::icosphere(2.0, 3).unwrap();
        let result = compute_curvature_sequential(&mesh);
        for v in mesh.vertex_ids() {
            let h = result.mean(v);
            assert!((h - 0.5).abs() < 0.1, "H {} at {:?}", h, v);
            let kappa = result.magnitude(v);
            assert!(kappa >= h.abs() && kappa < 1.0, "kappa {} at {:?}", kappa, v);
            let (k1, k2) = result.principal(v);
            assert!(k1 >= k2 - 1e-12);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mesh = primitives::torus(2.0, 0.5, 12, 8).unwrap();
        let a = compute_curvature(&mesh);
        let b = compute_curvature_sequential(&mesh);
        assert_eq!(a.mean_values(), b.mean_values());
        assert_eq!(a.gaussian_values(), b.gaussian_values());
    }
}
