//! Quad-dominant output mesh.
//!
//! [`QuadMesh`] is the face-vertex result of extraction: vertex positions,
//! counter-clockwise quads and a per-vertex flag marking vertices that were
//! placed on sharp features or boundaries.

use std::collections::BTreeMap;

use nalgebra::{Point3, Vector3};

use super::union_find::UnionFind;
use crate::error::{QuadError, Result};

/// A pure quad mesh in face-vertex form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuadMesh {
    pub(crate) vertices: Vec<Point3<f64>>,
    pub(crate) quads: Vec<[usize; 4]>,
    pub(crate) feature_vertices: Vec<bool>,
}

impl QuadMesh {
    /// Create a quad mesh without feature flags.
    pub fn new(vertices: Vec<Point3<f64>>, quads: Vec<[usize; 4]>) -> Self {
        let feature_vertices = vec![false; vertices.len()];
        Self {
            vertices,
            quads,
            feature_vertices,
        }
    }

    /// Attach per-vertex feature flags.
    pub fn with_features(mut self, feature_vertices: Vec<bool>) -> Self {
        debug_assert_eq!(feature_vertices.len(), self.vertices.len());
        self.feature_vertices = feature_vertices;
        self
    }

    /// Get the number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of quads.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.quads.len()
    }

    /// Vertex positions.
    #[inline]
    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    /// Quads as counter-clockwise vertex indices.
    #[inline]
    pub fn quads(&self) -> &[[usize; 4]] {
        &self.quads
    }

    /// Per-vertex flags for vertices lying on sharp features or boundaries.
    #[inline]
    pub fn feature_vertices(&self) -> &[bool] {
        &self.feature_vertices
    }

    /// Vector area of a quad (half the cross product of its diagonals).
    pub fn quad_vector_area(&self, f: usize) -> Vector3<f64> {
        let [a, b, c, d] = self.quads[f];
        let d0 = self.vertices[c] - self.vertices[a];
        let d1 = self.vertices[d] - self.vertices[b];
        0.5 * d0.cross(&d1)
    }

    /// Area of a quad.
    pub fn quad_area(&self, f: usize) -> f64 {
        self.quad_vector_area(f).norm()
    }

    /// Unit normal of a quad.
    pub fn quad_normal(&self, f: usize) -> Vector3<f64> {
        self.quad_vector_area(f).normalize()
    }

    /// Total surface area.
    pub fn surface_area(&self) -> f64 {
        (0..self.quads.len()).map(|f| self.quad_area(f)).sum()
    }

    /// Number of undirected edges.
    pub fn num_edges(&self) -> usize {
        self.edge_faces().len()
    }

    /// Euler characteristic `V - E + F`.
    pub fn euler_characteristic(&self) -> i64 {
        self.num_vertices() as i64 - self.num_edges() as i64 + self.num_faces() as i64
    }

    /// Whether a quad repeats a vertex.
    pub fn is_degenerate(&self, f: usize) -> bool {
        let q = self.quads[f];
        (0..4).any(|i| ((i + 1)..4).any(|j| q[i] == q[j]))
    }

    /// Whether any quad repeats a vertex.
    pub fn has_degenerate_faces(&self) -> bool {
        (0..self.quads.len()).any(|f| self.is_degenerate(f))
    }

    /// Undirected edges mapped to the quads using them.
    pub(crate) fn edge_faces(&self) -> BTreeMap<(usize, usize), Vec<usize>> {
        let mut map: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        for (f, q) in self.quads.iter().enumerate() {
            for k in 0..4 {
                let (a, b) = (q[k], q[(k + 1) % 4]);
                map.entry((a.min(b), a.max(b))).or_default().push(f);
            }
        }
        map
    }

    /// Check that the mesh is a manifold, non-degenerate quad mesh.
    ///
    /// # Errors
    /// Reports the first out-of-range index, degenerate quad, over-used edge
    /// or non-manifold vertex found.
    pub fn validate(&self) -> Result<()> {
        if self.quads.is_empty() {
            return Err(QuadError::EmptyMesh);
        }
        for (f, q) in self.quads.iter().enumerate() {
            if let Some(&v) = q.iter().find(|&&v| v >= self.vertices.len()) {
                return Err(QuadError::InvalidVertexIndex { face: f, vertex: v });
            }
            if self.is_degenerate(f) {
                return Err(QuadError::DegenerateFace { face: f });
            }
        }

        let mut directed: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for q in &self.quads {
            for k in 0..4 {
                let key = (q[k], q[(k + 1) % 4]);
                let count = directed.entry(key).or_insert(0);
                *count += 1;
                if *count > 1 {
                    return Err(QuadError::NonManifoldEdge {
                        v0: key.0,
                        v1: key.1,
                        details: "two faces traverse it in the same direction",
                    });
                }
            }
        }
        for (&(a, b), faces) in &self.edge_faces() {
            if faces.len() > 2 {
                return Err(QuadError::NonManifoldEdge {
                    v0: a,
                    v1: b,
                    details: "more than two incident faces",
                });
            }
        }

        let (_, fans_per_vertex) = self.corner_fans();
        if let Some((vertex, &fans)) = fans_per_vertex.iter().enumerate().find(|&(_, &n)| n > 1) {
            return Err(QuadError::NonManifoldVertex { vertex, fans });
        }
        Ok(())
    }

    /// Whether the mesh is a manifold, non-degenerate quad mesh.
    pub fn is_manifold(&self) -> bool {
        self.validate().is_ok()
    }

    /// Group the corners of each vertex into edge-connected fans.
    ///
    /// Returns the fan label of every corner (`4 * face + k`) and the number
    /// of fans per vertex. Fan labels are local to the vertex and numbered by
    /// first corner.
    fn corner_fans(&self) -> (Vec<usize>, Vec<usize>) {
        let n = self.quads.len() * 4;
        let mut uf = UnionFind::new(n);
        let mut around: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for (f, q) in self.quads.iter().enumerate() {
            for k in 0..4 {
                let corner = 4 * f + k;
                let v = q[k];
                for w in [q[(k + 1) % 4], q[(k + 3) % 4]] {
                    match around.get(&(v, w)) {
                        Some(&other) => {
                            uf.union(corner, other);
                        }
                        None => {
                            around.insert((v, w), corner);
                        }
                    }
                }
            }
        }

        let mut fan_label = vec![0; n];
        let mut fans_per_vertex = vec![0; self.vertices.len()];
        let mut root_label: BTreeMap<usize, usize> = BTreeMap::new();
        for (f, q) in self.quads.iter().enumerate() {
            for (k, &v) in q.iter().enumerate() {
                let corner = 4 * f + k;
                let root = uf.find(corner);
                let label = *root_label.entry(root).or_insert_with(|| {
                    fans_per_vertex[v] += 1;
                    fans_per_vertex[v] - 1
                });
                fan_label[corner] = label;
            }
        }
        (fan_label, fans_per_vertex)
    }

    /// Duplicate vertices whose faces form several fans, one copy per extra fan.
    ///
    /// Returns the number of vertices added.
    pub fn split_nonmanifold_vertices(&mut self) -> usize {
        let (fan_label, fans_per_vertex) = self.corner_fans();
        let mut copies: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        let mut added = 0;
        for f in 0..self.quads.len() {
            for k in 0..4 {
                let v = self.quads[f][k];
                let label = fan_label[4 * f + k];
                if fans_per_vertex[v] <= 1 || label == 0 {
                    continue;
                }
                let (p, flag) = (self.vertices[v], self.feature_vertices[v]);
                let vertices = &mut self.vertices;
                let features = &mut self.feature_vertices;
                let id = *copies.entry((v, label)).or_insert_with(|| {
                    vertices.push(p);
                    features.push(flag);
                    added += 1;
                    vertices.len() - 1
                });
                self.quads[f][k] = id;
            }
        }
        added
    }

    /// Drop vertices no quad references and renumber the rest in order.
    pub fn remove_unreferenced_vertices(&mut self) -> usize {
        let mut remap = vec![usize::MAX; self.vertices.len()];
        for q in &self.quads {
            for &v in q {
                remap[v] = 0;
            }
        }
        let mut vertices = Vec::with_capacity(self.vertices.len());
        let mut features = Vec::with_capacity(self.vertices.len());
        for (v, slot) in remap.iter_mut().enumerate() {
            if *slot != usize::MAX {
                *slot = vertices.len();
                vertices.push(self.vertices[v]);
                features.push(self.feature_vertices[v]);
            }
        }
        let removed = self.vertices.len() - vertices.len();
        for q in &mut self.quads {
            for v in q.iter_mut() {
                *v = remap[*v];
            }
        }
        self.vertices = vertices;
        self.feature_vertices = features;
        removed
    }

    /// Map every vertex through `p * scale + offset`.
    pub fn transform(&mut self, scale: f64, offset: Vector3<f64>) {
        for p in &mut self.vertices {
            *p = Point3::from(p.coords * scale + offset);
        }
    }

    /// Compute the bounding box of the mesh.
    pub fn bounding_box(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in &self.vertices {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_quads() -> QuadMesh {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
        ];
        QuadMesh::new(vertices, vec![[0, 1, 2, 3], [1, 4, 5, 2]])
    }

    #[test]
    fn test_two_quads_manifold() {
        let mesh = two_quads();
        assert!(mesh.is_manifold());
        assert_eq!(mesh.num_edges(), 7);
        assert_eq!(mesh.euler_characteristic(), 1);
        assert!((mesh.surface_area() - 2.0).abs() < 1e-12);
        assert!((mesh.quad_normal(0).z - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_quad_rejected() {
        let mut mesh = two_quads();
        mesh.quads[0] = [0, 1, 0, 3];
        assert!(mesh.has_degenerate_faces());
        assert!(matches!(
            mesh.validate(),
            Err(QuadError::DegenerateFace { face: 0 })
        ));
    }

    #[test]
    fn test_flipped_neighbor_rejected() {
        let mut mesh = two_quads();
        mesh.quads[1] = [2, 5, 4, 1];
        assert!(matches!(
            mesh.validate(),
            Err(QuadError::NonManifoldEdge { .. })
        ));
    }

    #[test]
    fn test_split_bowtie_vertex() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
        ];
        let mut mesh = QuadMesh::new(vertices, vec![[0, 1, 2, 3], [0, 4, 5, 6]]);
        assert!(matches!(
            mesh.validate(),
            Err(QuadError::NonManifoldVertex { vertex: 0, fans: 2 })
        ));
        assert_eq!(mesh.split_nonmanifold_vertices(), 1);
        assert!(mesh.is_manifold());
        assert_eq!(mesh.num_vertices(), 8);
        assert_eq!(mesh.quads[1][0], 7);
    }

    #[test]
    fn test_remove_unreferenced() {
        let mut mesh = two_quads();
        mesh.quads.pop();
        assert_eq!(mesh.remove_unreferenced_vertices(), 2);
        assert_eq!(mesh.quads, vec![[0, 1, 2, 3]]);
        assert_eq!(mesh.feature_vertices.len(), 4);
    }
}
