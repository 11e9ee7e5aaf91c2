//! Working mesh preparation.
//!
//! Before any field is solved the input surface is normalized into a unit
//! bounding box, refined until no edge is longer than a fraction of the
//! target quad size, and annotated with the per-vertex data every later
//! stage reads: angle-weighted normals, dual areas, sharp edges and the
//! feature constraints derived from them.
//!
//! The normalization is recorded so extracted quads can be mapped back to
//! the input's coordinate frame.

use std::collections::BTreeMap;

use nalgebra::{Point3, Vector3};

use crate::config::Config;
use crate::error::{QuadError, Result};
use crate::mesh::{build_surface, dedge_prev, FaceId, SurfaceMesh, VertexId, INVALID};

use super::hierarchy::Constraint;

/// Refinement passes are capped; each pass halves every edge it touches.
const MAX_SPLIT_PASSES: usize = 64;

/// Two feature edges turning by more than this (cosine) make a corner.
const CORNER_TURN_COS: f64 = 0.5;

/// Affine map between input coordinates and the unit working frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    /// Bounding-box center of the input.
    pub center: Vector3<f64>,
    /// Largest bounding-box extent of the input.
    pub scale: f64,
}

impl Normalization {
    /// Map an input point into the working frame.
    #[inline]
    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from((p.coords - self.center) / self.scale)
    }

    /// Map a working-frame point back to input coordinates.
    #[inline]
    pub fn restore(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(p.coords * self.scale + self.center)
    }
}

/// The normalized, refined surface that all fields live on.
#[derive(Debug, Clone)]
pub struct WorkingMesh {
    /// Normalized and refined triangle mesh.
    pub mesh: SurfaceMesh,
    /// Angle-weighted unit vertex normals.
    pub normals: Vec<Vector3<f64>>,
    /// Unit face normals.
    pub face_normals: Vec<Vector3<f64>>,
    /// Face areas.
    pub face_areas: Vec<f64>,
    /// Barycentric dual area of every vertex.
    pub areas: Vec<f64>,
    /// Per directed edge: whether the edge is a feature (sharp or boundary).
    pub sharp: Vec<bool>,
    /// Per vertex feature constraint.
    pub constraints: Vec<Constraint>,
    /// Uniform target edge length in the working frame.
    pub scale: f64,
    /// Requested number of output quads.
    pub target_faces: usize,
    /// Average undirected edge length after refinement.
    pub average_edge_length: f64,
    /// Map back to input coordinates.
    pub normalization: Normalization,
}

impl WorkingMesh {
    /// Whether vertex `v` carries a feature constraint.
    #[inline]
    pub fn is_feature(&self, v: usize) -> bool {
        !matches!(self.constraints[v], Constraint::Free)
    }

    /// Number of undirected feature edges.
    pub fn num_sharp_edges(&self) -> usize {
        let twins = self.mesh.twins();
        (0..self.sharp.len())
            .filter(|&e| self.sharp[e] && (twins[e] == INVALID || e < twins[e]))
            .count()
    }

    /// Feature segments incident to vertex `v`, as working-frame endpoints.
    pub fn sharp_segments_at(&self, v: usize) -> Vec<(Vector3<f64>, Vector3<f64>)> {
        let mesh = &self.mesh;
        let mut segments = Vec::new();
        for e in mesh.vertex_edges(VertexId::new(v)) {
            let e = e.index();
            if self.sharp[e] {
                segments.push(self.segment(e));
            }
            // The incoming edge of the same face covers the closing boundary edge.
            let p = dedge_prev(e);
            if self.sharp[p] && mesh.twins()[p] == INVALID {
                segments.push(self.segment(p));
            }
        }
        segments
    }

    fn segment(&self, e: usize) -> (Vector3<f64>, Vector3<f64>) {
        let positions = self.mesh.positions();
        (
            positions[self.mesh.dedge_from(e)].coords,
            positions[self.mesh.dedge_to(e)].coords,
        )
    }
}

/// Build the working mesh for a remeshing run.
///
/// # Errors
/// Returns [`QuadError::Hierarchy`] when the input has no extent or a vertex
/// normal cannot be determined, and any error of the mesh builder when the
/// refined surface cannot be rebuilt.
pub fn prepare(input: &SurfaceMesh, config: &Config) -> Result<WorkingMesh> {
    let (min, max) = input.bounding_box().ok_or(QuadError::EmptyMesh)?;
    let extent = max - min;
    let scale = extent.x.max(extent.y).max(extent.z);
    if !(scale > 0.0 && scale.is_finite()) {
        return Err(QuadError::Hierarchy(
            "input has zero spatial extent".to_string(),
        ));
    }
    let normalization = Normalization {
        center: (min.coords + max.coords) * 0.5,
        scale,
    };

    let vertices: Vec<Point3<f64>> = input
        .positions()
        .iter()
        .map(|p| normalization.apply(p))
        .collect();
    let mut faces = input.triangles().to_vec();

    let target_faces = config.target_faces.unwrap_or(input.num_vertices()).max(1);
    let area: f64 = faces
        .iter()
        .map(|f| triangle_area(&vertices, f))
        .sum();
    let target_len = (area / target_faces as f64).sqrt();

    let normalized = build_surface(&vertices, &faces)?;
    let average = normalized.average_edge_length();
    let max_len = (target_len * 0.5).min(average * 2.0);

    let mut vertices = vertices;
    let splits = split_long_edges(&mut vertices, &mut faces, max_len);
    let mesh = if splits > 0 {
        log::debug!("split {} edges longer than {:.5}", splits, max_len);
        build_surface(&vertices, &faces)?
    } else {
        normalized
    };

    let face_normals: Vec<Vector3<f64>> = mesh
        .face_ids()
        .map(|f| face_normal_or_zero(&mesh, f))
        .collect();
    let face_areas: Vec<f64> = mesh.face_ids().map(|f| mesh.face_area(f)).collect();
    let normals = vertex_normals(&mesh)?;
    let areas = dual_areas(&mesh, &face_areas);
    let sharp = detect_sharp_edges(&mesh, &face_normals, config);
    let constraints = feature_constraints(&mesh, &sharp);

    let working = WorkingMesh {
        average_edge_length: mesh.average_edge_length(),
        mesh,
        normals,
        face_normals,
        face_areas,
        areas,
        sharp,
        constraints,
        scale: target_len,
        target_faces,
        normalization,
    };
    log::debug!(
        "working mesh: {} vertices, {} faces, {} feature edges, scale {:.5}",
        working.mesh.num_vertices(),
        working.mesh.num_faces(),
        working.num_sharp_edges(),
        working.scale
    );
    Ok(working)
}

fn triangle_area(vertices: &[Point3<f64>], f: &[usize; 3]) -> f64 {
    let [a, b, c] = [vertices[f[0]], vertices[f[1]], vertices[f[2]]];
    0.5 * (b - a).cross(&(c - a)).norm()
}

fn face_normal_or_zero(mesh: &SurfaceMesh, f: FaceId) -> Vector3<f64> {
    let [p0, p1, p2] = mesh.face_positions(f);
    (p1 - p0)
        .cross(&(p2 - p0))
        .try_normalize(1e-20)
        .unwrap_or_else(Vector3::zeros)
}

/// Bisect edges longer than `max_len` until none remain.
///
/// Each pass splits the longest edges first; a face is split at most once per
/// pass so every split sees the current connectivity. Both triangles of an
/// interior edge are split, so the result stays conforming.
fn split_long_edges(
    vertices: &mut Vec<Point3<f64>>,
    faces: &mut Vec<[usize; 3]>,
    max_len: f64,
) -> usize {
    let max_sq = max_len * max_len;
    let mut total = 0;

    for _ in 0..MAX_SPLIT_PASSES {
        let mut edge_faces: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        for (f, tri) in faces.iter().enumerate() {
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                edge_faces.entry((a.min(b), a.max(b))).or_default().push(f);
            }
        }

        let mut candidates: Vec<(f64, (usize, usize))> = edge_faces
            .keys()
            .map(|&(a, b)| ((vertices[a] - vertices[b]).norm_squared(), (a, b)))
            .filter(|&(len_sq, _)| len_sq > max_sq)
            .collect();
        if candidates.is_empty() {
            break;
        }
        candidates.sort_by(|x, y| y.0.total_cmp(&x.0).then(x.1.cmp(&y.1)));

        let mut touched = vec![false; faces.len()];
        let mut splits = 0;
        for (_, (a, b)) in candidates {
            let adjacent = &edge_faces[&(a, b)];
            if adjacent.iter().any(|&f| touched[f]) {
                continue;
            }
            let m = vertices.len();
            vertices.push(Point3::from((vertices[a].coords + vertices[b].coords) * 0.5));
            for &f in adjacent {
                let tri = faces[f];
                // Rotate so the split edge is the first one.
                let k = (0..3)
                    .find(|&k| {
                        let (x, y) = (tri[k], tri[(k + 1) % 3]);
                        (x == a && y == b) || (x == b && y == a)
                    })
                    .unwrap_or(0);
                let (x, y, z) = (tri[k], tri[(k + 1) % 3], tri[(k + 2) % 3]);
                faces[f] = [x, m, z];
                faces.push([m, y, z]);
                touched[f] = true;
            }
            splits += 1;
        }
        total += splits;
    }
    total
}

/// Angle-weighted vertex normals.
fn vertex_normals(mesh: &SurfaceMesh) -> Result<Vec<Vector3<f64>>> {
    let positions = mesh.positions();
    let mut normals = vec![Vector3::zeros(); mesh.num_vertices()];
    for tri in mesh.triangles() {
        let [a, b, c] = [positions[tri[0]], positions[tri[1]], positions[tri[2]]];
        let Some(n) = (b - a).cross(&(c - a)).try_normalize(1e-20) else {
            continue;
        };
        for k in 0..3 {
            let p = positions[tri[k]];
            let u = positions[tri[(k + 1) % 3]] - p;
            let w = positions[tri[(k + 2) % 3]] - p;
            let angle = u.angle(&w);
            if angle.is_finite() {
                normals[tri[k]] += n * angle;
            }
        }
    }
    normals
        .into_iter()
        .enumerate()
        .map(|(v, n)| {
            n.try_normalize(1e-20).ok_or_else(|| {
                QuadError::Hierarchy(format!("vertex {} has no well-defined normal", v))
            })
        })
        .collect()
}

/// One third of every incident face area.
fn dual_areas(mesh: &SurfaceMesh, face_areas: &[f64]) -> Vec<f64> {
    let mut areas = vec![0.0; mesh.num_vertices()];
    for (tri, &a) in mesh.triangles().iter().zip(face_areas) {
        for &v in tri {
            areas[v] += a / 3.0;
        }
    }
    areas
}

/// Mark feature edges on both directed halves.
///
/// Boundary edges are always features; interior edges are features when
/// sharp-feature preservation is on and their dihedral angle exceeds the
/// configured threshold.
fn detect_sharp_edges(
    mesh: &SurfaceMesh,
    face_normals: &[Vector3<f64>],
    config: &Config,
) -> Vec<bool> {
    let twins = mesh.twins();
    let cos_threshold = config.sharp_angle_degrees.to_radians().cos();
    let mut sharp = vec![false; mesh.num_dedges()];
    for e in 0..mesh.num_dedges() {
        let t = twins[e];
        if t == INVALID {
            sharp[e] = true;
        } else if config.preserve_sharp && e < t {
            let dot = face_normals[e / 3].dot(&face_normals[t / 3]);
            if dot < cos_threshold {
                sharp[e] = true;
                sharp[t] = true;
            }
        }
    }
    sharp
}

/// Derive per-vertex constraints from the feature edges around each vertex.
///
/// Two nearly collinear feature edges make the vertex slide along their
/// line; any other count, or a sharp turn, pins it as a corner.
fn feature_constraints(mesh: &SurfaceMesh, sharp: &[bool]) -> Vec<Constraint> {
    let twins = mesh.twins();
    let positions = mesh.positions();
    let mut feature_neighbors: Vec<Vec<usize>> = vec![Vec::new(); mesh.num_vertices()];
    for e in 0..mesh.num_dedges() {
        let t = twins[e];
        if sharp[e] && (t == INVALID || e < t) {
            let (a, b) = (mesh.dedge_from(e), mesh.dedge_to(e));
            feature_neighbors[a].push(b);
            feature_neighbors[b].push(a);
        }
    }

    feature_neighbors
        .iter()
        .enumerate()
        .map(|(v, nbrs)| {
            let p = positions[v].coords;
            match nbrs.as_slice() {
                [] => Constraint::Free,
                [a, b] => {
                    let incoming = (p - positions[*a].coords).try_normalize(1e-20);
                    let outgoing = (positions[*b].coords - p).try_normalize(1e-20);
                    match (incoming, outgoing) {
                        (Some(i), Some(o)) if i.dot(&o) > CORNER_TURN_COS => {
                            let dir = (i + o).try_normalize(1e-20).unwrap_or(i);
                            Constraint::Line { point: p, dir }
                        }
                        (_, Some(o)) => Constraint::Corner { point: p, dir: o },
                        _ => Constraint::Corner {
                            point: p,
                            dir: Vector3::x(),
                        },
                    }
                }
                [first, ..] => {
                    let dir = (positions[*first].coords - p)
                        .try_normalize(1e-20)
                        .unwrap_or_else(Vector3::x);
                    Constraint::Corner { point: p, dir }
                }
            }
        })
        .collect()
}

/// Number of edges on the boundary loop through `start`.
#[cfg(test)]
fn feature_loop_length(working: &WorkingMesh, start: usize) -> usize {
    use crate::mesh::dedge_next;

    let mut count = 0;
    let mut e = start;
    loop {
        count += 1;
        // Next boundary edge: rotate around the destination until the twin is missing.
        let mut n = dedge_next(e);
        while working.mesh.twins()[n] != INVALID {
            n = dedge_next(working.mesh.twins()[n]);
        }
        e = n;
        if e == start || count > working.mesh.num_dedges() {
            return count;
        }
    }
}
