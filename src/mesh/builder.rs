//! Mesh construction utilities.
//!
//! This module builds validated [`SurfaceMesh`] values from face-vertex
//! lists, as commonly found in mesh file formats. Validation is strict: the
//! pipeline assumes a manifold, consistently oriented surface and does not
//! attempt repair.

use std::collections::HashMap;

use nalgebra::Point3;

use super::index::{dedge_prev, INVALID};
use super::surface::{rotate_cw, SurfaceMesh};
use crate::error::{QuadError, Result};

/// Build a surface mesh from vertices and triangle faces.
///
/// Vertices not referenced by any face are dropped and the remaining ones
/// are renumbered in their original order.
///
/// # Errors
/// Returns an error for empty input, out-of-range indices, degenerate faces,
/// edges shared by more than two faces or traversed twice in the same
/// direction, and vertices whose incident faces form more than one fan.
///
/// # Example
/// ```
/// use quadmesh::mesh::build_surface;
/// use nalgebra::Point3;
///
/// let vertices = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.5, 1.0, 0.0),
/// ];
/// let faces = vec![[0, 1, 2]];
///
/// let mesh = build_surface(&vertices, &faces).unwrap();
/// assert_eq!(mesh.num_vertices(), 3);
/// assert_eq!(mesh.num_faces(), 1);
/// ```
pub fn build_surface(vertices: &[Point3<f64>], faces: &[[usize; 3]]) -> Result<SurfaceMesh> {
    if faces.is_empty() {
        return Err(QuadError::EmptyMesh);
    }

    // Validate vertex indices
    for (fi, face) in faces.iter().enumerate() {
        for &vi in face {
            if vi >= vertices.len() {
                return Err(QuadError::InvalidVertexIndex {
                    face: fi,
                    vertex: vi,
                });
            }
        }
        if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
            return Err(QuadError::DegenerateFace { face: fi });
        }
    }

    // Compact unreferenced vertices
    let mut remap = vec![INVALID; vertices.len()];
    let mut positions = Vec::with_capacity(vertices.len());
    for face in faces {
        for &vi in face {
            if remap[vi] == INVALID {
                remap[vi] = 0;
            }
        }
    }
    for (vi, slot) in remap.iter_mut().enumerate() {
        if *slot != INVALID {
            *slot = positions.len();
            positions.push(vertices[vi]);
        }
    }
    let faces: Vec<[usize; 3]> = faces
        .iter()
        .map(|f| [remap[f[0]], remap[f[1]], remap[f[2]]])
        .collect();

    let twins = link_twins(&faces)?;
    let (vertex_edge, boundary) = find_vertex_fans(&faces, &twins, positions.len())?;

    Ok(SurfaceMesh {
        positions,
        faces,
        twins,
        vertex_edge,
        boundary,
    })
}

/// Pair every directed edge with its opposite.
fn link_twins(faces: &[[usize; 3]]) -> Result<Vec<usize>> {
    let mut edge_map: HashMap<(usize, usize), usize> = HashMap::with_capacity(faces.len() * 3);
    for (fi, face) in faces.iter().enumerate() {
        for k in 0..3 {
            let key = (face[k], face[(k + 1) % 3]);
            if edge_map.insert(key, fi * 3 + k).is_some() {
                return Err(QuadError::NonManifoldEdge {
                    v0: key.0,
                    v1: key.1,
                    details: "two faces traverse it in the same direction",
                });
            }
        }
    }

    let mut twins = vec![INVALID; faces.len() * 3];
    for (fi, face) in faces.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            if let Some(&t) = edge_map.get(&(b, a)) {
                twins[fi * 3 + k] = t;
            }
        }
    }
    Ok(twins)
}

/// Pick the first outgoing edge of every vertex fan and flag boundary vertices.
fn find_vertex_fans(
    faces: &[[usize; 3]],
    twins: &[usize],
    num_vertices: usize,
) -> Result<(Vec<usize>, Vec<bool>)> {
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); num_vertices];
    for (fi, face) in faces.iter().enumerate() {
        for (k, &v) in face.iter().enumerate() {
            outgoing[v].push(fi * 3 + k);
        }
    }

    let mut visited = vec![false; faces.len() * 3];
    let mut vertex_edge = vec![INVALID; num_vertices];
    let mut boundary = vec![false; num_vertices];

    for (v, edges) in outgoing.iter().enumerate() {
        let mut fans = 0;
        for &seed in edges {
            if visited[seed] {
                continue;
            }
            fans += 1;

            // Walk clockwise to the start of this fan.
            let mut start = seed;
            loop {
                let prev = rotate_cw(twins, start);
                if prev == INVALID {
                    boundary[v] = true;
                    break;
                }
                if prev == seed {
                    break;
                }
                start = prev;
            }

            let mut e = start;
            loop {
                visited[e] = true;
                let t = twins[dedge_prev(e)];
                if t == INVALID || t == start {
                    break;
                }
                e = t;
            }
            vertex_edge[v] = start;
        }
        if fans > 1 {
            return Err(QuadError::NonManifoldVertex { vertex: v, fans });
        }
    }

    Ok((vertex_edge, boundary))
}

/// Convert a surface mesh back to a face-vertex representation.
///
/// Returns (vertices, faces) tuple.
pub fn to_face_vertex(mesh: &SurfaceMesh) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    (mesh.positions.clone(), mesh.faces.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::VertexId;

    fn two_triangles() -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
        // Two triangles sharing an edge
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, -1.0, 0.0),
        ];
        let faces = vec![[0, 1, 2], [1, 0, 3]];
        (vertices, faces)
    }

    #[test]
    fn test_two_triangles() {
        let (vertices, faces) = two_triangles();
        let mesh = build_surface(&vertices, &faces).unwrap();

        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_faces(), 2);
        assert_eq!(mesh.num_edges(), 5);
        assert_eq!(mesh.twins()[0], 3);
        assert_eq!(mesh.twins()[3], 0);
        assert!(mesh.vertex_ids().all(|v| mesh.is_boundary_vertex(v)));
    }

    #[test]
    fn test_roundtrip() {
        let (vertices, faces) = two_triangles();
        let mesh = build_surface(&vertices, &faces).unwrap();
        let (out_verts, out_faces) = to_face_vertex(&mesh);
        assert_eq!(out_faces, faces);
        for (v_in, v_out) in vertices.iter().zip(out_verts.iter()) {
            assert!((v_in - v_out).norm() < 1e-10);
        }
    }

    #[test]
    fn test_unreferenced_vertices_dropped() {
        let vertices = vec![
            Point3::new(9.0, 9.0, 9.0),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let mesh = build_surface(&vertices, &[[1, 2, 3]]).unwrap();
        assert_eq!(mesh.num_vertices(), 3);
        assert_eq!(mesh.triangles()[0], [0, 1, 2]);
        assert_eq!(*mesh.position(VertexId::new(0)), Point3::origin());
    }

    #[test]
    fn test_empty_mesh() {
        let result = build_surface(&[], &[]);
        assert!(matches!(result, Err(QuadError::EmptyMesh)));
    }

    #[test]
    fn test_invalid_vertex_index() {
        let vertices = vec![Point3::new(0.0, 0.0, 0.0)];
        let result = build_surface(&vertices, &[[0, 1, 2]]);
        assert!(matches!(
            result,
            Err(QuadError::InvalidVertexIndex { face: 0, vertex: 1 })
        ));
    }

    #[test]
    fn test_degenerate_face() {
        let (vertices, _) = two_triangles();
        let result = build_surface(&vertices, &[[0, 0, 2]]);
        assert!(matches!(result, Err(QuadError::DegenerateFace { face: 0 })));
    }

    #[test]
    fn test_three_faces_on_edge() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, -1.0, 0.0),
            Point3::new(0.5, 0.0, 1.0),
        ];
        let faces = vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]];
        let result = build_surface(&vertices, &faces);
        assert!(matches!(result, Err(QuadError::NonManifoldEdge { .. })));
    }

    #[test]
    fn test_bowtie_vertex() {
        // Two triangles touching at vertex 0 only.
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(-1.0, -1.0, 0.0),
        ];
        let faces = vec![[0, 1, 2], [0, 3, 4]];
        let result = build_surface(&vertices, &faces);
        assert!(matches!(
            result,
            Err(QuadError::NonManifoldVertex { vertex: 0, fans: 2 })
        ));
    }
}
