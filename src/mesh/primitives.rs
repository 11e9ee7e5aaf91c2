//! Procedural surface generators for tests and benchmarks.
//!
//! Every generator produces a deterministic, outward-oriented (counter-clockwise)
//! triangle mesh and runs it through [`build_surface`] validation.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use nalgebra::Point3;

use super::builder::build_surface;
use super::surface::SurfaceMesh;
use crate::error::{QuadError, Result};

/// Generates a flat triangulated grid in the XY plane, facing +Z.
///
/// The grid spans `[-width/2, width/2]` × `[-height/2, height/2]` and is
/// split into `cols × rows` cells of two triangles each.
///
/// # Example
/// ```
/// use quadmesh::mesh::primitives::grid;
/// let mesh = grid(2, 2, 1.0, 1.0).unwrap();
/// assert_eq!(mesh.num_vertices(), 9);
/// assert_eq!(mesh.num_faces(), 8);
/// ```
pub fn grid(cols: usize, rows: usize, width: f64, height: f64) -> Result<SurfaceMesh> {
    if cols == 0 || rows == 0 {
        return Err(QuadError::invalid_param("cols/rows", cols.min(rows), "must be positive"));
    }
    let verts_x = cols + 1;
    let mut vertices = Vec::with_capacity(verts_x * (rows + 1));
    for j in 0..=rows {
        for i in 0..=cols {
            let u = i as f64 / cols as f64;
            let v = j as f64 / rows as f64;
            vertices.push(Point3::new(
                -0.5 * width + u * width,
                -0.5 * height + v * height,
                0.0,
            ));
        }
    }

    let mut faces = Vec::with_capacity(cols * rows * 2);
    for j in 0..rows {
        for i in 0..cols {
            let a = j * verts_x + i;
            let b = a + 1;
            let d = a + verts_x;
            let c = d + 1;
            faces.push([a, b, c]);
            faces.push([a, c, d]);
        }
    }
    build_surface(&vertices, &faces)
}

/// Generates a latitude/longitude sphere centered at the origin.
///
/// `segments` is the number of longitudinal slices and `rings` the number of
/// latitudinal bands, giving `2 × segments × (rings - 1)` triangles.
///
/// # Example
/// ```
/// use quadmesh::mesh::primitives::uv_sphere;
/// let mesh = uv_sphere(1.0, 25, 21).unwrap();
/// assert_eq!(mesh.num_faces(), 1000);
/// ```
pub fn uv_sphere(radius: f64, segments: usize, rings: usize) -> Result<SurfaceMesh> {
    if segments < 3 {
        return Err(QuadError::invalid_param("segments", segments, "must be at least 3"));
    }
    if rings < 2 {
        return Err(QuadError::invalid_param("rings", rings, "must be at least 2"));
    }

    let mut vertices = Vec::with_capacity(2 + segments * (rings - 1));
    vertices.push(Point3::new(0.0, 0.0, radius));
    for i in 1..rings {
        let theta = PI * i as f64 / rings as f64;
        for j in 0..segments {
            let phi = 2.0 * PI * j as f64 / segments as f64;
            vertices.push(Point3::new(
                radius * theta.sin() * phi.cos(),
                radius * theta.sin() * phi.sin(),
                radius * theta.cos(),
            ));
        }
    }
    let south = vertices.len();
    vertices.push(Point3::new(0.0, 0.0, -radius));

    let ring = |i: usize, j: usize| 1 + (i - 1) * segments + j % segments;
    let mut faces = Vec::with_capacity(2 * segments * (rings - 1));
    for j in 0..segments {
        faces.push([0, ring(1, j), ring(1, j + 1)]);
    }
    for i in 1..rings - 1 {
        for j in 0..segments {
            let a = ring(i, j);
            let b = ring(i + 1, j);
            let c = ring(i + 1, j + 1);
            let d = ring(i, j + 1);
            faces.push([a, b, c]);
            faces.push([a, c, d]);
        }
    }
    for j in 0..segments {
        faces.push([south, ring(rings - 1, j + 1), ring(rings - 1, j)]);
    }
    build_surface(&vertices, &faces)
}

/// Generates a geodesic sphere by subdividing an icosahedron.
///
/// Each subdivision level splits every triangle into four, giving
/// `20 × 4^subdivisions` faces.
pub fn icosphere(radius: f64, subdivisions: usize) -> Result<SurfaceMesh> {
    if subdivisions > 7 {
        return Err(QuadError::invalid_param("subdivisions", subdivisions, "must be at most 7"));
    }
    let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let mut vertices: Vec<Point3<f64>> = [
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ]
    .iter()
    .map(|c| Point3::from(Point3::new(c[0], c[1], c[2]).coords.normalize()))
    .collect();
    let mut faces: Vec<[usize; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..subdivisions {
        let mut midpoints: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<Point3<f64>>| {
            *midpoints.entry((a.min(b), a.max(b))).or_insert_with(|| {
                let m = (vertices[a].coords + vertices[b].coords).normalize();
                vertices.push(Point3::from(m));
                vertices.len() - 1
            })
        };
        let mut next = Vec::with_capacity(faces.len() * 4);
        for &[a, b, c] in &faces {
            let ab = midpoint(a, b, &mut vertices);
            let bc = midpoint(b, c, &mut vertices);
            let ca = midpoint(c, a, &mut vertices);
            next.push([a, ab, ca]);
            next.push([b, bc, ab]);
            next.push([c, ca, bc]);
            next.push([ab, bc, ca]);
        }
        faces = next;
    }

    for p in &mut vertices {
        *p = Point3::from(p.coords * radius);
    }
    build_surface(&vertices, &faces)
}

/// Generates a torus around the Z axis.
///
/// `segments` slices run around the main ring and `sides` around the tube.
pub fn torus(
    major_radius: f64,
    minor_radius: f64,
    segments: usize,
    sides: usize,
) -> Result<SurfaceMesh> {
    if segments < 3 || sides < 3 {
        return Err(QuadError::invalid_param(
            "segments/sides",
            segments.min(sides),
            "must be at least 3",
        ));
    }
    if minor_radius <= 0.0 || minor_radius >= major_radius {
        return Err(QuadError::invalid_param(
            "minor_radius",
            minor_radius,
            "must be in (0, major_radius)",
        ));
    }

    let mut vertices = Vec::with_capacity(segments * sides);
    for i in 0..segments {
        let u = 2.0 * PI * i as f64 / segments as f64;
        for j in 0..sides {
            let v = 2.0 * PI * j as f64 / sides as f64;
            let r = major_radius + minor_radius * v.cos();
            vertices.push(Point3::new(r * u.cos(), r * u.sin(), minor_radius * v.sin()));
        }
    }

    let idx = |i: usize, j: usize| (i % segments) * sides + j % sides;
    let mut faces = Vec::with_capacity(segments * sides * 2);
    for i in 0..segments {
        for j in 0..sides {
            let a = idx(i, j);
            let b = idx(i + 1, j);
            let c = idx(i + 1, j + 1);
            let d = idx(i, j + 1);
            faces.push([a, b, c]);
            faces.push([a, c, d]);
        }
    }
    build_surface(&vertices, &faces)
}

/// Generates an axis-aligned cube of edge length `size` centered at the
/// origin, each side split into `subdivisions × subdivisions` cells.
pub fn cube(size: f64, subdivisions: usize) -> Result<SurfaceMesh> {
    if subdivisions == 0 {
        return Err(QuadError::invalid_param("subdivisions", subdivisions, "must be positive"));
    }
    let n = subdivisions;

    // (fixed axis, fixed value, u axis, v axis) with u × v pointing outward.
    let sides: [(usize, usize, usize, usize); 6] = [
        (2, n, 0, 1),
        (2, 0, 1, 0),
        (0, n, 1, 2),
        (0, 0, 2, 1),
        (1, n, 2, 0),
        (1, 0, 0, 2),
    ];

    let mut lattice: BTreeMap<[usize; 3], usize> = BTreeMap::new();
    let mut vertices = Vec::new();
    let mut vertex = |key: [usize; 3], vertices: &mut Vec<Point3<f64>>| {
        *lattice.entry(key).or_insert_with(|| {
            let c = |k: usize| size * (key[k] as f64 / n as f64 - 0.5);
            vertices.push(Point3::new(c(0), c(1), c(2)));
            vertices.len() - 1
        })
    };

    let mut faces = Vec::with_capacity(12 * n * n);
    for &(fixed, value, u, v) in &sides {
        let point = |a: usize, b: usize| {
            let mut key = [0; 3];
            key[fixed] = value;
            key[u] = a;
            key[v] = b;
            key
        };
        for a in 0..n {
            for b in 0..n {
                let p00 = vertex(point(a, b), &mut vertices);
                let p10 = vertex(point(a + 1, b), &mut vertices);
                let p11 = vertex(point(a + 1, b + 1), &mut vertices);
                let p01 = vertex(point(a, b + 1), &mut vertices);
                faces.push([p00, p10, p11]);
                faces.push([p00, p11, p01]);
            }
        }
    }
    build_surface(&vertices, &faces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_outward(mesh: &SurfaceMesh) {
        for f in mesh.face_ids() {
            let c = mesh.face_centroid(f);
            assert!(
                mesh.face_normal(f).dot(&c.coords) > 0.0,
                "face {:?} points inward",
                f
            );
        }
    }

    #[test]
    fn test_grid_counts() {
        let mesh = grid(4, 3, 2.0, 1.0).unwrap();
        assert_eq!(mesh.num_vertices(), 20);
        assert_eq!(mesh.num_faces(), 24);
        assert_eq!(mesh.euler_characteristic(), 1);
        assert!(mesh.face_ids().all(|f| mesh.face_normal(f).z > 0.99));
    }

    #[test]
    fn test_uv_sphere_closed() {
        let mesh = uv_sphere(1.0, 25, 21).unwrap();
        assert_eq!(mesh.num_faces(), 1000);
        assert_eq!(mesh.num_vertices(), 502);
        assert!(mesh.is_closed());
        assert_eq!(mesh.euler_characteristic(), 2);
        assert_outward(&mesh);
    }

    #[test]
    fn test_icosphere_closed() {
        let mesh = icosphere(2.0, 2).unwrap();
        assert_eq!(mesh.num_faces(), 320);
        assert_eq!(mesh.num_vertices(), 162);
        assert_eq!(mesh.euler_characteristic(), 2);
        assert_outward(&mesh);
        for p in mesh.positions() {
            assert!((p.coords.norm() - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_torus_genus_one() {
        let mesh = torus(2.0, 0.5, 16, 8).unwrap();
        assert!(mesh.is_closed());
        assert_eq!(mesh.euler_characteristic(), 0);
    }

    #[test]
    fn test_cube_closed() {
        let mesh = cube(2.0, 3).unwrap();
        assert_eq!(mesh.num_faces(), 108);
        assert_eq!(mesh.num_vertices(), 56);
        assert!(mesh.is_closed());
        assert_eq!(mesh.euler_characteristic(), 2);
        assert_outward(&mesh);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(grid(0, 2, 1.0, 1.0).is_err());
        assert!(uv_sphere(1.0, 2, 5).is_err());
        assert!(torus(1.0, 2.0, 8, 8).is_err());
    }
}
