//! Integer edge lattice.
//!
//! Once the position field has been relaxed, every undirected edge `a → b`
//! of the working mesh gets an integer translation `t ∈ Z²`, the offset of
//! `b`'s lattice origin from `a`'s in units of the local scale and in `a`'s
//! frame, together with the frame rotation `r` that maps `b`'s frame
//! coordinates into `a`'s. Everything the repair and extraction passes do is
//! integer arithmetic on this table.
//!
//! Reading an edge backwards (`b → a`) yields `(-r, -rot(-r) t)`; shifting
//! vertex `a` by `δ_a` and `b` by `δ_b` (in their own frames) changes the
//! translation to `t - δ_a + rot(r) δ_b`, which leaves every face loop sum
//! unchanged.

use nalgebra::{Vector2, Vector3};

use crate::mesh::{SurfaceMesh, INVALID};

use super::super::rosy::{compat_position_extrinsic_index_4, rotate90_by, LatticeSample, Rot4};
use super::super::singularity::EdgeTransitions;

/// One undirected edge of the lattice, stored in the direction of its
/// canonical directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatticeEdge {
    /// Canonical directed edge (the one without a twin, or the smaller index).
    pub dedge: usize,
    /// Source and destination vertex of the canonical direction.
    pub endpoints: [usize; 2],
    /// Rotation from destination frame to source frame.
    pub rotation: Rot4,
    /// Integer translation from source to destination, in the source frame.
    pub translation: Vector2<i32>,
}

/// Classification of a face's lattice image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceState {
    /// Zero lattice area within one cell: the face collapses.
    Degenerate,
    /// A positively oriented half cell: half of an output quad.
    HalfCell,
    /// Negative lattice area.
    Flipped,
    /// Spans more than one cell.
    Oversized,
    /// The translations do not close around the face.
    PositionSingular,
    /// Orientation-singular face whose vertices are not collapsed together.
    Unresolved,
}

impl FaceState {
    /// Whether the face is acceptable for extraction.
    #[inline]
    pub fn is_valid(self) -> bool {
        matches!(self, FaceState::Degenerate | FaceState::HalfCell)
    }
}

/// Integer translations and rotations for every edge of the working mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeLattice {
    edges: Vec<LatticeEdge>,
    edge_of: Vec<usize>,
    incident: Vec<Vec<usize>>,
}

/// Lattice data of the working mesh vertices.
#[derive(Debug, Clone, Copy)]
pub struct VertexFrames<'a> {
    /// Vertex positions.
    pub positions: &'a [Vector3<f64>],
    /// Unit vertex normals.
    pub normals: &'a [Vector3<f64>],
    /// Orientation representatives.
    pub q: &'a [Vector3<f64>],
    /// Lattice origins.
    pub o: &'a [Vector3<f64>],
    /// Lattice spacing.
    pub scales: &'a [f64],
}

impl EdgeLattice {
    /// Build the lattice from a solved position field.
    pub fn build(mesh: &SurfaceMesh, frames: &VertexFrames, transitions: &EdgeTransitions) -> Self {
        let twins = mesh.twins();
        let mut edges = Vec::with_capacity(mesh.num_edges());
        let mut edge_of = vec![INVALID; mesh.num_dedges()];
        for e in 0..mesh.num_dedges() {
            let t = twins[e];
            if t != INVALID && t < e {
                continue;
            }
            let (a, b) = (mesh.dedge_from(e), mesh.dedge_to(e));
            let rotation = transitions.rotation(e);
            let q_b = rotate90_by(&frames.q[b], &frames.normals[b], -rotation.turns());
            let sample_a = LatticeSample {
                p: &frames.positions[a],
                n: &frames.normals[a],
                q: &frames.q[a],
                o: &frames.o[a],
                scale: frames.scales[a],
            };
            let sample_b = LatticeSample {
                p: &frames.positions[b],
                n: &frames.normals[b],
                q: &q_b,
                o: &frames.o[b],
                scale: frames.scales[b],
            };
            let (i0, i1) = compat_position_extrinsic_index_4(&sample_a, &sample_b);
            edge_of[e] = edges.len();
            if t != INVALID {
                edge_of[t] = edges.len();
            }
            edges.push(LatticeEdge {
                dedge: e,
                endpoints: [a, b],
                rotation,
                translation: i0 - i1,
            });
        }
        Self::from_edges(mesh.num_vertices(), edges, edge_of)
    }

    /// Assemble a lattice from explicit edges.
    pub(crate) fn from_edges(
        num_vertices: usize,
        edges: Vec<LatticeEdge>,
        edge_of: Vec<usize>,
    ) -> Self {
        let mut incident = vec![Vec::new(); num_vertices];
        for (i, edge) in edges.iter().enumerate() {
            incident[edge.endpoints[0]].push(i);
            incident[edge.endpoints[1]].push(i);
        }
        Self {
            edges,
            edge_of,
            incident,
        }
    }

    /// Number of undirected edges.
    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// All edges.
    #[inline]
    pub fn edges(&self) -> &[LatticeEdge] {
        &self.edges
    }

    /// Edge by index.
    #[inline]
    pub fn edge(&self, i: usize) -> &LatticeEdge {
        &self.edges[i]
    }

    /// Undirected edge index of a directed edge.
    #[inline]
    pub fn edge_index(&self, dedge: usize) -> usize {
        self.edge_of[dedge]
    }

    /// Edges incident to vertex `v`.
    #[inline]
    pub fn incident_edges(&self, v: usize) -> &[usize] {
        &self.incident[v]
    }

    /// Replace the translation of edge `i`.
    #[inline]
    pub fn set_translation(&mut self, i: usize, t: Vector2<i32>) {
        self.edges[i].translation = t;
    }

    /// Rotation and translation of a directed edge, in its source frame.
    pub fn directed(&self, dedge: usize) -> (Rot4, Vector2<i32>) {
        let edge = &self.edges[self.edge_of[dedge]];
        if edge.dedge == dedge {
            (edge.rotation, edge.translation)
        } else {
            reverse(edge.rotation, edge.translation)
        }
    }

    /// Like [`directed`](Self::directed), with the endpoints shifted by `delta`.
    pub fn directed_shifted<F>(
        &self,
        mesh: &SurfaceMesh,
        dedge: usize,
        delta: &F,
    ) -> (Rot4, Vector2<i32>)
    where
        F: Fn(usize) -> Vector2<i32>,
    {
        let (r, t) = self.directed(dedge);
        let (a, b) = (mesh.dedge_from(dedge), mesh.dedge_to(dedge));
        (r, t - delta(a) + r.apply_int(delta(b)))
    }

    /// Rotation-aware sum of translations around face `f`, in the frame of
    /// its first corner. Zero for a face whose translations close.
    pub fn face_loop(&self, f: usize) -> Vector2<i32> {
        let mut frame = Rot4::IDENTITY;
        let mut sum = Vector2::zeros();
        for k in 0..3 {
            let (r, t) = self.directed(3 * f + k);
            sum += frame.apply_int(t);
            frame = frame + r;
        }
        sum
    }

    /// Shift the lattice origin of vertex `v` by `delta` cells in its frame.
    pub fn shift_vertex(&mut self, v: usize, delta: Vector2<i32>) {
        for &i in &self.incident[v] {
            let edge = &mut self.edges[i];
            if edge.endpoints[0] == v {
                edge.translation -= delta;
            }
            if edge.endpoints[1] == v {
                edge.translation += edge.rotation.apply_int(delta);
            }
        }
    }

    /// Classify face `f`.
    pub fn face_state(
        &self,
        mesh: &SurfaceMesh,
        f: usize,
        orientation_singular: bool,
    ) -> FaceState {
        self.face_state_shifted(mesh, f, orientation_singular, &|_| Vector2::zeros())
    }

    /// Classify face `f` as if its vertices were shifted by `delta`.
    pub fn face_state_shifted<F>(
        &self,
        mesh: &SurfaceMesh,
        f: usize,
        orientation_singular: bool,
        delta: &F,
    ) -> FaceState
    where
        F: Fn(usize) -> Vector2<i32>,
    {
        let d: [(Rot4, Vector2<i32>); 3] =
            [0, 1, 2].map(|k| self.directed_shifted(mesh, 3 * f + k, delta));
        if orientation_singular {
            return if d.iter().all(|(_, t)| *t == Vector2::zeros()) {
                FaceState::Degenerate
            } else {
                FaceState::Unresolved
            };
        }

        let closing = d[0].1 + d[0].0.apply_int(d[1].1) + (d[0].0 + d[1].0).apply_int(d[2].1);
        if closing != Vector2::zeros() {
            return FaceState::PositionSingular;
        }

        let u1 = d[0].1;
        let (_, u2) = reverse(d[2].0, d[2].1);
        let area2 = u1.x * u2.y - u1.y * u2.x;
        let within = |v: Vector2<i32>| v.x.abs() <= 1 && v.y.abs() <= 1;
        if area2 < 0 {
            FaceState::Flipped
        } else if area2 > 1 || !within(u1) || !within(u2) || !within(u2 - u1) {
            FaceState::Oversized
        } else if area2 == 0 {
            FaceState::Degenerate
        } else {
            FaceState::HalfCell
        }
    }

    /// Lattice coordinates of the three corners of face `f` in the frame of
    /// its first corner: `[0, u1, u2]`.
    pub fn face_corners(&self, f: usize) -> [Vector2<i32>; 3] {
        let (_, u1) = self.directed(3 * f);
        let (r2, t2) = self.directed(3 * f + 2);
        let (_, u2) = reverse(r2, t2);
        [Vector2::zeros(), u1, u2]
    }

    /// Number of faces that are not valid for extraction.
    pub fn count_invalid(&self, mesh: &SurfaceMesh, orientation_singular: &[bool]) -> usize {
        (0..mesh.num_faces())
            .filter(|&f| !self.face_state(mesh, f, orientation_singular[f]).is_valid())
            .count()
    }
}

/// Read an edge `(r, t)` in the opposite direction.
#[inline]
pub(crate) fn reverse(r: Rot4, t: Vector2<i32>) -> (Rot4, Vector2<i32>) {
    (-r, -(-r).apply_int(t))
}

/// Length of a translation in the L∞ norm.
#[inline]
pub(crate) fn linf(t: Vector2<i32>) -> i32 {
    t.x.abs().max(t.y.abs())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mesh::build_surface;
    use nalgebra::Point3;

    /// A unit right triangle split from a square: `0 → 1 → 2` with
    /// translations `(1,0)`, `(0,1)`, `(-1,-1)`.
    pub(crate) fn half_cell() -> (SurfaceMesh, EdgeLattice) {
        let mesh = build_surface(
            &[
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
            ],
            &[[0, 1, 2]],
        )
        .unwrap();
        let translations = [Vector2::new(1, 0), Vector2::new(0, 1), Vector2::new(-1, -1)];
        let edges = (0..3)
            .map(|e| LatticeEdge {
                dedge: e,
                endpoints: [mesh.dedge_from(e), mesh.dedge_to(e)],
                rotation: Rot4::IDENTITY,
                translation: translations[e],
            })
            .collect();
        let lattice = EdgeLattice::from_edges(3, edges, vec![0, 1, 2]);
        (mesh, lattice)
    }

    /// The ideal lattice of a unit-spaced `n × n` grid: every translation is
    /// the integer offset between its endpoints.
    pub(crate) fn grid_lattice(n: usize) -> (SurfaceMesh, EdgeLattice) {
        let mesh = crate::mesh::primitives::grid(n, n, n as f64, n as f64).unwrap();
        let twins = mesh.twins();
        let mut edges = Vec::new();
        let mut edge_of = vec![INVALID; mesh.num_dedges()];
        for e in 0..mesh.num_dedges() {
            let t = twins[e];
            if t != INVALID && t < e {
                continue;
            }
            let (a, b) = (mesh.dedge_from(e), mesh.dedge_to(e));
            let d = mesh.positions()[b] - mesh.positions()[a];
            edge_of[e] = edges.len();
            if t != INVALID {
                edge_of[t] = edges.len();
            }
            edges.push(LatticeEdge {
                dedge: e,
                endpoints: [a, b],
                rotation: Rot4::IDENTITY,
                translation: Vector2::new(d.x.round() as i32, d.y.round() as i32),
            });
        }
        let lattice = EdgeLattice::from_edges(mesh.num_vertices(), edges, edge_of);
        (mesh, lattice)
    }

    #[test]
    fn test_grid_lattice_is_valid() {
        let (mesh, lattice) = grid_lattice(3);
        let singular = vec![false; mesh.num_faces()];
        assert_eq!(lattice.count_invalid(&mesh, &singular), 0);
        for f in 0..mesh.num_faces() {
            assert_eq!(lattice.face_state(&mesh, f, false), FaceState::HalfCell);
        }
    }

    #[test]
    fn test_reverse_is_involution() {
        for k in 0..4 {
            let r = Rot4::new(k);
            let t = Vector2::new(2, -1);
            let (r2, t2) = reverse(r, t);
            assert_eq!(reverse(r2, t2), (r, t));
        }
    }

    #[test]
    fn test_half_cell_is_valid() {
        let (mesh, lattice) = half_cell();
        assert_eq!(lattice.face_loop(0), Vector2::zeros());
        assert_eq!(lattice.face_state(&mesh, 0, false), FaceState::HalfCell);
        assert_eq!(
            lattice.face_corners(0),
            [Vector2::zeros(), Vector2::new(1, 0), Vector2::new(1, 1)]
        );
    }

    #[test]
    fn test_shift_preserves_loop_and_changes_state() {
        let (mesh, mut lattice) = half_cell();
        lattice.shift_vertex(2, Vector2::new(0, 1));
        assert_eq!(lattice.face_loop(0), Vector2::zeros());
        assert_eq!(lattice.face_state(&mesh, 0, false), FaceState::Oversized);

        lattice.shift_vertex(2, Vector2::new(0, -3));
        assert_eq!(lattice.face_state(&mesh, 0, false), FaceState::Flipped);

        lattice.shift_vertex(2, Vector2::new(-1, 1));
        assert_eq!(lattice.face_state(&mesh, 0, false), FaceState::Degenerate);
    }

    #[test]
    fn test_shifted_view_matches_shift() {
        let (mesh, lattice) = half_cell();
        let delta = |v: usize| if v == 1 { Vector2::new(0, 1) } else { Vector2::zeros() };
        let viewed = lattice.face_state_shifted(&mesh, 0, false, &delta);
        let mut shifted = lattice.clone();
        shifted.shift_vertex(1, Vector2::new(0, 1));
        assert_eq!(viewed, shifted.face_state(&mesh, 0, false));
    }

    #[test]
    fn test_position_singular_face() {
        let (mesh, mut lattice) = half_cell();
        lattice.set_translation(0, Vector2::new(2, 0));
        assert_eq!(lattice.face_loop(0), Vector2::new(1, 0));
        assert_eq!(lattice.face_state(&mesh, 0, false), FaceState::PositionSingular);
        assert_eq!(lattice.face_state(&mesh, 0, true), FaceState::Unresolved);
    }

    #[test]
    fn test_rotated_edges_close() {
        // Vertex 1's frame is rotated a quarter turn relative to vertex 0's.
        let (mesh, _) = half_cell();
        let r = Rot4::new(1);
        // t01 in frame 0; t12 in frame 1 = rot(-1) applied to (0,1) in frame 0.
        let t12 = (-r).apply_int(Vector2::new(0, 1));
        // Edge 2 -> 0 lives in frame 2 == frame 1; rotation back to frame 0 is -r.
        let t20 = (-r).apply_int(Vector2::new(-1, -1));
        let edges = vec![
            LatticeEdge {
                dedge: 0,
                endpoints: [0, 1],
                rotation: r,
                translation: Vector2::new(1, 0),
            },
            LatticeEdge {
                dedge: 1,
                endpoints: [1, 2],
                rotation: Rot4::IDENTITY,
                translation: t12,
            },
            LatticeEdge {
                dedge: 2,
                endpoints: [2, 0],
                rotation: -r,
                translation: t20,
            },
        ];
        let lattice = EdgeLattice::from_edges(3, edges, vec![0, 1, 2]);
        assert_eq!(lattice.face_loop(0), Vector2::zeros());
        assert_eq!(lattice.face_state(&mesh, 0, false), FaceState::HalfCell);
    }
}
