//! Directed-edge triangle mesh.
//!
//! [`SurfaceMesh`] is the validated input surface for the remeshing pipeline.
//! Connectivity is stored in the compact directed-edge form: every face owns
//! three consecutive directed edges (`3f`, `3f + 1`, `3f + 2`) and a twin
//! table links each directed edge to its opposite, or to [`INVALID`] on the
//! boundary.
//!
//! # Traversal
//!
//! Rotating counter-clockwise around a vertex goes from an outgoing edge `e`
//! to `twin(prev(e))`. Each vertex stores the outgoing edge that starts its
//! fan; for boundary vertices this is the edge without a twin, so a single
//! counter-clockwise walk visits every incident face.
//!
//! Meshes are only created through [`build_surface`](super::build_surface),
//! which guarantees the structure is manifold.

use nalgebra::{Point3, Vector3};

use super::index::{dedge_next, dedge_prev, EdgeId, FaceId, VertexId, INVALID};

/// A manifold triangle mesh with directed-edge adjacency.
#[derive(Debug, Clone)]
pub struct SurfaceMesh {
    pub(crate) positions: Vec<Point3<f64>>,
    pub(crate) faces: Vec<[usize; 3]>,
    /// Opposite directed edge, or `INVALID` on the boundary.
    pub(crate) twins: Vec<usize>,
    /// First outgoing directed edge of each vertex fan.
    pub(crate) vertex_edge: Vec<usize>,
    pub(crate) boundary: Vec<bool>,
}

impl SurfaceMesh {
    // ==================== Accessors ====================

    /// Get the number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.positions.len()
    }

    /// Get the number of faces.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Get the number of directed edges (three per face).
    #[inline]
    pub fn num_dedges(&self) -> usize {
        self.faces.len() * 3
    }

    /// Number of undirected edges.
    pub fn num_edges(&self) -> usize {
        self.twins
            .iter()
            .enumerate()
            .filter(|&(e, &t)| t == INVALID || e < t)
            .count()
    }

    /// Vertex positions.
    #[inline]
    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    /// Triangles as raw vertex indices.
    #[inline]
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.faces
    }

    /// Twin table indexed by raw directed edge.
    #[inline]
    pub fn twins(&self) -> &[usize] {
        &self.twins
    }

    /// Get the position of a vertex.
    #[inline]
    pub fn position(&self, v: VertexId) -> &Point3<f64> {
        &self.positions[v.index()]
    }

    /// Get the three vertices of a face.
    pub fn face_triangle(&self, f: FaceId) -> [VertexId; 3] {
        let [a, b, c] = self.faces[f.index()];
        [VertexId::new(a), VertexId::new(b), VertexId::new(c)]
    }

    /// Get the positions of the three corners of a face.
    pub fn face_positions(&self, f: FaceId) -> [Point3<f64>; 3] {
        let [a, b, c] = self.faces[f.index()];
        [self.positions[a], self.positions[b], self.positions[c]]
    }

    // ==================== Topology Queries ====================

    /// The opposite directed edge, if the edge is interior.
    #[inline]
    pub fn twin(&self, e: EdgeId) -> Option<EdgeId> {
        let t = self.twins[e.index()];
        (t != INVALID).then(|| EdgeId::new(t))
    }

    /// Vertex a directed edge starts from.
    #[inline]
    pub fn origin(&self, e: EdgeId) -> VertexId {
        VertexId::new(self.dedge_from(e.index()))
    }

    /// Vertex a directed edge points to.
    #[inline]
    pub fn dest(&self, e: EdgeId) -> VertexId {
        VertexId::new(self.dedge_to(e.index()))
    }

    #[inline]
    pub(crate) fn dedge_from(&self, e: usize) -> usize {
        self.faces[e / 3][e % 3]
    }

    #[inline]
    pub(crate) fn dedge_to(&self, e: usize) -> usize {
        self.faces[e / 3][(e % 3 + 1) % 3]
    }

    /// Check if a vertex lies on the boundary.
    #[inline]
    pub fn is_boundary_vertex(&self, v: VertexId) -> bool {
        self.boundary[v.index()]
    }

    /// Check if a directed edge lies on the boundary.
    #[inline]
    pub fn is_boundary_edge(&self, e: EdgeId) -> bool {
        self.twins[e.index()] == INVALID
    }

    /// Whether the mesh has no boundary.
    pub fn is_closed(&self) -> bool {
        self.twins.iter().all(|&t| t != INVALID)
    }

    /// Euler characteristic `V - E + F`.
    pub fn euler_characteristic(&self) -> i64 {
        self.num_vertices() as i64 - self.num_edges() as i64 + self.num_faces() as i64
    }

    // ==================== Iteration ====================

    /// Iterate over all vertex IDs.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        (0..self.positions.len()).map(VertexId::new)
    }

    /// Iterate over all face IDs.
    pub fn face_ids(&self) -> impl Iterator<Item = FaceId> + '_ {
        (0..self.faces.len()).map(FaceId::new)
    }

    /// Iterate over outgoing directed edges of a vertex, counter-clockwise.
    pub fn vertex_edges(&self, v: VertexId) -> VertexEdgeIter<'_> {
        VertexEdgeIter::new(self, v.index())
    }

    /// Iterate over vertices adjacent to a vertex.
    ///
    /// On the boundary the last neighbor is reached through the final face
    /// of the fan, so every neighbor is reported once.
    pub fn vertex_neighbors(&self, v: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        let closing = self.closing_neighbor(v.index());
        self.vertex_edges(v)
            .map(move |e| self.dest(e))
            .chain(closing.map(VertexId::new))
    }

    /// Iterate over faces around a vertex.
    pub fn vertex_faces(&self, v: VertexId) -> impl Iterator<Item = FaceId> + '_ {
        self.vertex_edges(v).map(|e| e.face())
    }

    /// Number of neighbors of a vertex.
    pub fn valence(&self, v: VertexId) -> usize {
        self.vertex_neighbors(v).count()
    }

    /// The neighbor closing a boundary fan (reached only through `prev`).
    fn closing_neighbor(&self, v: usize) -> Option<usize> {
        if !self.boundary[v] {
            return None;
        }
        let mut e = self.vertex_edge[v];
        loop {
            let p = dedge_prev(e);
            let t = self.twins[p];
            if t == INVALID {
                return Some(self.dedge_from(p));
            }
            e = t;
        }
    }

    // ==================== Geometry ====================

    /// Compute the unit normal of a face.
    pub fn face_normal(&self, f: FaceId) -> Vector3<f64> {
        let [p0, p1, p2] = self.face_positions(f);
        (p1 - p0).cross(&(p2 - p0)).normalize()
    }

    /// Compute the area of a face.
    pub fn face_area(&self, f: FaceId) -> f64 {
        let [p0, p1, p2] = self.face_positions(f);
        0.5 * (p1 - p0).cross(&(p2 - p0)).norm()
    }

    /// Compute the centroid of a face.
    pub fn face_centroid(&self, f: FaceId) -> Point3<f64> {
        let [p0, p1, p2] = self.face_positions(f);
        Point3::from((p0.coords + p1.coords + p2.coords) / 3.0)
    }

    /// Compute the length of a directed edge.
    pub fn edge_length(&self, e: EdgeId) -> f64 {
        (self.positions[self.dedge_to(e.index())] - self.positions[self.dedge_from(e.index())])
            .norm()
    }

    /// Average length over undirected edges.
    pub fn average_edge_length(&self) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for e in 0..self.num_dedges() {
            let t = self.twins[e];
            if t == INVALID || e < t {
                sum += self.edge_length(EdgeId::new(e));
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Compute the bounding box of the mesh.
    pub fn bounding_box(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.positions.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in &self.positions {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        Some((min, max))
    }

    /// Compute the total surface area of the mesh.
    pub fn surface_area(&self) -> f64 {
        self.face_ids().map(|f| self.face_area(f)).sum()
    }
}

/// Iterator over outgoing directed edges around a vertex.
pub struct VertexEdgeIter<'a> {
    mesh: &'a SurfaceMesh,
    start: usize,
    current: usize,
}

impl<'a> VertexEdgeIter<'a> {
    fn new(mesh: &'a SurfaceMesh, v: usize) -> Self {
        let start = mesh.vertex_edge[v];
        Self {
            mesh,
            start,
            current: start,
        }
    }
}

impl Iterator for VertexEdgeIter<'_> {
    type Item = EdgeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == INVALID {
            return None;
        }
        let result = self.current;
        // twin(prev(e)) leaves the same vertex one face further ccw.
        let t = self.mesh.twins[dedge_prev(result)];
        self.current = if t == self.start { INVALID } else { t };
        Some(EdgeId::new(result))
    }
}

/// Rotate an outgoing directed edge one face clockwise around its origin.
#[inline]
pub(crate) fn rotate_cw(twins: &[usize], e: usize) -> usize {
    let t = twins[e];
    if t == INVALID {
        INVALID
    } else {
        dedge_next(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_surface;

    fn create_tetrahedron() -> SurfaceMesh {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
        build_surface(&vertices, &faces).unwrap()
    }

    fn create_fan() -> SurfaceMesh {
        // Center vertex 0 with an open ring of four triangles.
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
        ];
        let faces = vec![[0, 1, 2], [0, 2, 3], [0, 3, 4]];
        build_surface(&vertices, &faces).unwrap()
    }

    #[test]
    fn test_tetrahedron_topology() {
        let mesh = create_tetrahedron();
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_edges(), 6);
        assert!(mesh.is_closed());
        assert_eq!(mesh.euler_characteristic(), 2);
        for v in mesh.vertex_ids() {
            assert_eq!(mesh.valence(v), 3);
            assert_eq!(mesh.vertex_faces(v).count(), 3);
            assert!(!mesh.is_boundary_vertex(v));
        }
    }

    #[test]
    fn test_twins_are_opposite() {
        let mesh = create_tetrahedron();
        for e in 0..mesh.num_dedges() {
            let t = mesh.twins()[e];
            assert_eq!(mesh.twins()[t], e);
            assert_eq!(mesh.dedge_from(e), mesh.dedge_to(t));
        }
    }

    #[test]
    fn test_boundary_fan_neighbors() {
        let mesh = create_fan();
        let center = VertexId::new(0);
        assert!(mesh.is_boundary_vertex(center));
        assert_eq!(mesh.vertex_faces(center).count(), 3);
        let mut neighbors: Vec<usize> = mesh.vertex_neighbors(center).map(|v| v.index()).collect();
        neighbors.sort_unstable();
        assert_eq!(neighbors, vec![1, 2, 3, 4]);
        assert_eq!(mesh.valence(VertexId::new(1)), 2);
    }

    #[test]
    fn test_geometry() {
        let mesh = create_fan();
        let f = FaceId::new(0);
        assert!((mesh.face_area(f) - 0.5).abs() < 1e-12);
        assert!((mesh.face_normal(f).z - 1.0).abs() < 1e-12);
        assert!((mesh.surface_area() - 1.5).abs() < 1e-12);
        let (min, max) = mesh.bounding_box().unwrap();
        assert_eq!(min, Point3::new(-1.0, -1.0, 0.0));
        assert_eq!(max, Point3::new(1.0, 1.0, 0.0));
    }
}
